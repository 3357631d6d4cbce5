//! Reference [`ProcessingRoutine`]: gray conversion plus luminance statistics.
//!
//! Each session runs its own processing thread. `process_frame` only reads
//! the working texture back into a pooled buffer and queues it; the thread
//! analyzes it and delivers the result. The queue holds a single frame and a
//! new frame replaces one still waiting, so a slow consumer sees the latest
//! frame rather than a growing backlog.

pub mod analysis;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use hashbrown::HashMap;
use image::{ImageBuffer, Rgba};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::processor::{
    FrameInput, ProcessingRoutine, ResultFrame, ResultFrameType, ResultSink, SessionId,
    STATUS_DROPPED, STATUS_INVALID_ARGUMENT, STATUS_OK,
};

const MAX_QUEUED_FRAMES: usize = 1;
const MAX_POOL_SIZE: usize = 2;

/// Generic failure status.
pub const STATUS_FAILED: i32 = -1;

pub const DEFAULT_RESULT_FRAME_TYPE: ResultFrameType = ResultFrameType::DstWithOverlay;

/// Counters of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub queued: u64,
    pub processed: u64,
    /// Frames replaced in the queue before the thread got to them.
    pub replaced: u64,
    /// Frames refused because the session was not started.
    pub rejected: u64,
}

#[derive(Debug)]
struct QueuedFrame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    index: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    running: bool,
    frames: VecDeque<QueuedFrame>,
    pool: Vec<Vec<u8>>,
    next_index: u64,
    stats: SessionStats,
}

impl QueueState {
    fn recycle(&mut self, buffer: Vec<u8>) {
        if self.pool.len() < MAX_POOL_SIZE {
            self.pool.push(buffer);
        }
    }
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    sink: ResultSink,
    frame_type: AtomicI32,
    state: Mutex<QueueState>,
    cond: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn new(id: SessionId, sink: ResultSink) -> Self {
        Self {
            id,
            sink,
            frame_type: AtomicI32::new(DEFAULT_RESULT_FRAME_TYPE.code()),
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    fn frame_type(&self) -> ResultFrameType {
        ResultFrameType::from_code(self.frame_type.load(Ordering::Acquire))
            .unwrap_or(DEFAULT_RESULT_FRAME_TYPE)
    }

    fn start(self: &Arc<Self>) -> i32 {
        let mut thread = self.thread.lock();
        {
            let mut state = self.state.lock();
            if state.running {
                return STATUS_FAILED;
            }
            state.running = true;
        }

        let spawned = std::thread::Builder::new()
            .name(format!("reference-{}", self.id.get()))
            .spawn({
                let session = self.clone();
                move || session.process_loop()
            });
        match spawned {
            Ok(handle) => {
                *thread = Some(handle);
                debug!("Reference {} started", self.id);
                STATUS_OK
            }
            Err(err) => {
                warn!("Failed to spawn reference processing thread: {}", err);
                self.state.lock().running = false;
                STATUS_FAILED
            }
        }
    }

    fn stop(&self) -> i32 {
        let mut thread = self.thread.lock();
        {
            let mut state = self.state.lock();
            state.running = false;
            while let Some(frame) = state.frames.pop_front() {
                state.recycle(frame.pixels);
            }
            self.cond.notify_all();
        }

        if let Some(handle) = thread.take() {
            if handle.join().is_err() {
                warn!("Reference processing thread for {} panicked", self.id);
                return STATUS_FAILED;
            }
            debug!("Reference {} stopped", self.id);
        }
        STATUS_OK
    }

    fn enqueue(&self, input: &mut FrameInput<'_>) -> i32 {
        let mut buffer = {
            let mut state = self.state.lock();
            if !state.running {
                state.stats.rejected += 1;
                return STATUS_DROPPED;
            }
            state.pool.pop().unwrap_or_default()
        };

        let (width, height) = match input.read_pixels(&mut buffer) {
            Ok(size) => size,
            Err(err) => {
                warn!("Readback failed: {}", err);
                self.state.lock().recycle(buffer);
                return STATUS_FAILED;
            }
        };

        let mut state = self.state.lock();
        if !state.running {
            state.recycle(buffer);
            state.stats.rejected += 1;
            return STATUS_DROPPED;
        }

        let index = state.next_index;
        state.next_index += 1;
        state.frames.push_back(QueuedFrame {
            width,
            height,
            pixels: buffer,
            index,
        });
        state.stats.queued += 1;

        while state.frames.len() > MAX_QUEUED_FRAMES {
            if let Some(oldest) = state.frames.pop_front() {
                trace!("Frame {} replaced before processing", oldest.index);
                state.stats.replaced += 1;
                state.recycle(oldest.pixels);
            }
        }
        self.cond.notify_all();
        STATUS_OK
    }

    fn next_frame(&self) -> Option<QueuedFrame> {
        let mut state = self.state.lock();
        loop {
            if !state.running {
                return None;
            }
            if let Some(frame) = state.frames.pop_front() {
                return Some(frame);
            }
            self.cond.wait(&mut state);
        }
    }

    fn process_loop(&self) {
        while let Some(frame) = self.next_frame() {
            self.process(&frame);

            let mut state = self.state.lock();
            state.stats.processed += 1;
            state.recycle(frame.pixels);
        }
    }

    fn process(&self, frame: &QueuedFrame) {
        let Some(source) =
            ImageBuffer::<Rgba<u8>, &[u8]>::from_raw(frame.width, frame.height, &frame.pixels[..])
        else {
            warn!(
                "Frame {} has {} bytes for {}x{}",
                frame.index,
                frame.pixels.len(),
                frame.width,
                frame.height
            );
            return;
        };

        let frame_type = self.frame_type();
        let gray = analysis::to_gray(&source);
        let result = analysis::analyze(&gray, frame.index);
        let image = analysis::render(frame_type, &source, &gray, &result);

        let delivered = self.sink.deliver(
            frame_type,
            Some(ResultFrame {
                width: image.width(),
                height: image.height(),
                pixels: image.as_raw(),
            }),
            Some(&result.values),
        );
        if !delivered {
            trace!("{} has no processor attached, result dropped", self.id);
        }
    }
}

/// See the module documentation.
#[derive(Debug, Default)]
pub struct ReferenceRoutine {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl ReferenceRoutine {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn session_stats(&self, id: SessionId) -> Option<SessionStats> {
        self.session(id).map(|session| session.state.lock().stats)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl ProcessingRoutine for ReferenceRoutine {
    fn create_session(&self, sink: ResultSink) -> Option<SessionId> {
        let id = SessionId::next();
        self.sessions.lock().insert(id, Arc::new(Session::new(id, sink)));
        Some(id)
    }

    fn start_session(&self, session: SessionId, width: u32, height: u32) -> i32 {
        match self.session(session) {
            Some(s) => {
                trace!("Starting {} for {}x{}", session, width, height);
                s.start()
            }
            None => STATUS_INVALID_ARGUMENT,
        }
    }

    fn stop_session(&self, session: SessionId) -> i32 {
        match self.session(session) {
            Some(s) => s.stop(),
            None => STATUS_INVALID_ARGUMENT,
        }
    }

    fn process_frame(&self, session: SessionId, input: &mut FrameInput<'_>) -> i32 {
        match self.session(session) {
            Some(s) => s.enqueue(input),
            None => STATUS_INVALID_ARGUMENT,
        }
    }

    fn set_result_frame_type(&self, session: SessionId, frame_type: i32) -> i32 {
        let Some(s) = self.session(session) else {
            return STATUS_INVALID_ARGUMENT;
        };
        if ResultFrameType::from_code(frame_type).is_none() {
            return STATUS_INVALID_ARGUMENT;
        }
        s.frame_type.store(frame_type, Ordering::Release);
        STATUS_OK
    }

    fn result_frame_type(&self, session: SessionId) -> i32 {
        self.session(session)
            .map_or(STATUS_INVALID_ARGUMENT, |s| s.frame_type().code())
    }

    fn release_session(&self, session: SessionId) {
        let removed = self.sessions.lock().remove(&session);
        if let Some(s) = removed {
            s.stop();
        }
    }
}

impl Drop for ReferenceRoutine {
    fn drop(&mut self) {
        for (_, session) in self.sessions.lock().drain() {
            session.stop();
        }
    }
}
