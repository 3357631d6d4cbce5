//! Auxiliary thread that delivers frame-available callbacks.
//!
//! Producers fire their notification on whatever thread queued the frame. The
//! worker wants those signals decoupled from both the producer and its own
//! draw loop, so they are re-posted onto this dedicated thread.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

use crate::error::{panic_message, Result};

type Job = Box<dyn FnOnce() + Send>;

enum NotifyMessage {
    Run(Job),
    Quit,
}

/// Cloneable posting end of a [`NotifyThread`].
#[derive(Clone)]
pub struct NotifyHandle {
    tx: UnboundedSender<NotifyMessage>,
}

impl fmt::Debug for NotifyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl NotifyHandle {
    /// Queues `job` on the notify thread. Returns `false` once the thread has quit.
    pub fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(NotifyMessage::Run(Box::new(job))).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct NotifyThread {
    handle: NotifyHandle,
    thread: Option<JoinHandle<()>>,
}

impl NotifyThread {
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = unbounded_channel::<NotifyMessage>();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || notify_loop(rx))?;

        Ok(Self {
            handle: NotifyHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> NotifyHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stops the thread after the jobs already queued have run.
    pub fn quit(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        let _ = self.handle.tx.send(NotifyMessage::Quit);

        // Quitting from one of our own callbacks: the loop exits on its own.
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("Notify thread panicked");
        }
    }
}

impl Drop for NotifyThread {
    fn drop(&mut self) {
        self.quit();
    }
}

fn notify_loop(mut rx: UnboundedReceiver<NotifyMessage>) {
    while let Some(msg) = rx.blocking_recv() {
        match msg {
            NotifyMessage::Run(job) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                    warn!(
                        "Frame-available callback panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
            NotifyMessage::Quit => break,
        }
    }

    debug!("Notify thread exiting");
}
