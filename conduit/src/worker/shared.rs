use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::queue::{FrameRequest, RequestQueue};
use super::WorkerState;
use crate::error::{Error, Result};

#[derive(Debug)]
struct Inner {
    state: WorkerState,
    queue: RequestQueue,
    stop_requested: bool,
    fatal: Option<Error>,
}

/// State shared between the control side and one worker thread.
///
/// Worker state and the request queue sit behind a single mutex so that the
/// start wait, request hand-off and teardown all use the same condition
/// variable.
#[derive(Debug)]
pub struct WorkerShared {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl Default for WorkerShared {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: WorkerState::New,
                queue: RequestQueue::default(),
                stop_requested: false,
                fatal: None,
            }),
            cond: Condvar::new(),
        }
    }
}

impl WorkerShared {
    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        let mut inner = self.inner.lock();
        debug!("Worker state {:?} -> {:?}", inner.state, state);
        inner.state = state;
        self.cond.notify_all();
    }

    /// Enqueues `request` while the worker accepts work. Returns `false` when
    /// it was rejected.
    pub fn offer(&self, request: FrameRequest) -> bool {
        let mut inner = self.inner.lock();
        let accepting = matches!(inner.state, WorkerState::Started | WorkerState::Running);
        if !accepting || inner.stop_requested {
            return false;
        }

        inner.queue.offer(request);
        self.cond.notify_all();
        true
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Blocks until a request is available. `None` once stop was requested.
    pub(crate) fn next_request(&self) -> Option<FrameRequest> {
        let mut inner = self.inner.lock();
        loop {
            if inner.stop_requested {
                return None;
            }
            if let Some(request) = inner.queue.poll() {
                return Some(request);
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Drops pending requests and asks the loop to exit.
    pub(crate) fn request_stop(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.stop_requested = true;
        self.cond.notify_all();
    }

    /// Marks the worker as exited, recording a fatal error if there is one.
    pub(crate) fn finish(&self, fatal: Option<Error>) {
        let mut inner = self.inner.lock();
        if let Some(err) = fatal {
            inner.fatal.get_or_insert(err);
        }
        inner.state = WorkerState::Stopped;
        inner.queue.clear();
        self.cond.notify_all();
    }

    pub fn has_exited(&self) -> bool {
        self.inner.lock().state == WorkerState::Stopped
    }

    pub(crate) fn take_fatal(&self) -> Option<Error> {
        self.inner.lock().fatal.take()
    }

    /// Waits until the worker is running.
    ///
    /// Returns `Ok(false)` when `timeout` elapsed first, and the worker's
    /// fatal error when it exited without reaching running.
    pub(crate) fn wait_running(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();

        loop {
            if let Some(err) = inner.fatal.take() {
                return Err(err);
            }
            match inner.state {
                WorkerState::Running => return Ok(true),
                WorkerState::Stopping | WorkerState::Stopped => {
                    return Err(Error::InvalidState(
                        "worker exited before it was running".into(),
                    ));
                }
                WorkerState::New | WorkerState::Started => {}
            }

            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut inner, deadline).timed_out() {
                        return Ok(inner.state == WorkerState::Running);
                    }
                }
                None => self.cond.wait(&mut inner),
            }
        }
    }
}
