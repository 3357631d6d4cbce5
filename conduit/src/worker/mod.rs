//! Dedicated GPU thread running a [`GpuTask`].
//!
//! The runner creates the GPU context on its own thread, calls
//! [`GpuTask::on_start`], then processes one [`FrameRequest`] at a time until
//! stop is requested, and finally calls [`GpuTask::on_stop`]. Failures during
//! start or stop terminate the thread and are kept as the worker's fatal
//! error; per-request failures go through [`GpuTask::on_error`].

mod queue;
mod shared;

pub use queue::FrameRequest;
pub use shared::WorkerShared;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{panic_message, Error, LifecyclePhase, Result};
use crate::gpu::{Gpu, GpuFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum WorkerState {
    New,
    Started,
    Running,
    Stopping,
    Stopped,
}

/// What the loop does after a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Terminate,
}

/// Work hosted on a [`FrameWorker`] thread. Every method runs on that thread
/// with the GPU context current.
pub trait GpuTask: Send + 'static {
    fn on_start(&mut self, gpu: &mut dyn Gpu) -> Result<()>;

    fn process_request(&mut self, gpu: &mut dyn Gpu, request: FrameRequest) -> Result<()>;

    /// Called after `process_request` failed. A lost context ends the loop,
    /// anything else is logged and skipped.
    fn on_error(&mut self, err: &Error) -> ErrorAction {
        if err.is_context_lost() {
            return ErrorAction::Terminate;
        }
        warn!("Request failed: {}", err);
        ErrorAction::Continue
    }

    /// Releases everything `on_start` created. Also called after a failed
    /// `on_start`, so it must cope with partial initialization.
    fn on_stop(&mut self, gpu: &mut dyn Gpu) -> Result<()>;
}

#[derive(Debug)]
pub struct FrameWorker {
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl FrameWorker {
    pub fn spawn<T: GpuTask>(
        name: &str,
        task: T,
        gpu_factory: GpuFactory,
        shared: Arc<WorkerShared>,
    ) -> Result<Self> {
        let thread = std::thread::Builder::new().name(name.to_string()).spawn({
            let shared = shared.clone();
            move || run(task, gpu_factory, shared)
        })?;

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }

    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    pub fn offer(&self, request: FrameRequest) -> bool {
        self.shared.offer(request)
    }

    /// See [`WorkerShared::wait_running`].
    pub fn wait_running(&self, timeout: Option<Duration>) -> Result<bool> {
        self.shared.wait_running(timeout)
    }

    pub fn has_exited(&self) -> bool {
        self.shared.has_exited()
    }

    /// Drains pending requests, lets `on_stop` run and joins the thread.
    /// Returns the worker's fatal error, if it had one.
    pub fn stop(mut self) -> Result<()> {
        self.shared.request_stop();
        self.join()?;

        match self.shared.take_fatal() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn join(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        if thread.thread().id() == std::thread::current().id() {
            return Err(Error::InvalidState(
                "worker cannot be stopped from its own thread".into(),
            ));
        }

        thread
            .join()
            .map_err(|panic| Error::WorkerPanic(panic_message(panic.as_ref())))
    }
}

impl Drop for FrameWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shared.request_stop();
            if let Err(err) = self.join() {
                error!("Worker dropped without stop: {}", err);
            }
        }
    }
}

fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|panic| Err(Error::WorkerPanic(panic_message(panic.as_ref()))))
}

fn run<T: GpuTask>(mut task: T, gpu_factory: GpuFactory, shared: Arc<WorkerShared>) {
    shared.set_state(WorkerState::Started);

    let gpu = guarded(|| {
        let mut gpu = gpu_factory()?;
        gpu.make_current()?;
        Ok(gpu)
    });
    let mut gpu = match gpu {
        Ok(gpu) => gpu,
        Err(err) => {
            error!("Failed to create GPU context: {}", err);
            shared.finish(Some(Error::fatal(LifecyclePhase::Start, err)));
            return;
        }
    };

    if let Err(err) = guarded(|| task.on_start(gpu.as_mut())) {
        error!("Worker start failed: {}", err);
        if let Err(stop_err) = guarded(|| task.on_stop(gpu.as_mut())) {
            warn!("Cleanup after failed start also failed: {}", stop_err);
        }
        drop(gpu);
        shared.finish(Some(Error::fatal(LifecyclePhase::Start, err)));
        return;
    }

    shared.set_state(WorkerState::Running);

    while let Some(request) = shared.next_request() {
        if let Err(err) = guarded(|| task.process_request(gpu.as_mut(), request)) {
            if task.on_error(&err) == ErrorAction::Terminate {
                error!("Worker loop terminated by {:?}: {}", request, err);
                break;
            }
        }
    }

    shared.set_state(WorkerState::Stopping);
    let stop_result = guarded(|| {
        gpu.make_current()?;
        task.on_stop(gpu.as_mut())
    });
    drop(gpu);

    let fatal = match stop_result {
        Ok(()) => None,
        Err(err) => {
            error!("Worker stop failed: {}", err);
            Some(Error::fatal(LifecyclePhase::Stop, err))
        }
    };
    shared.finish(fatal);
    debug!("Worker thread exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::gpu::{GpuError, GpuStats, SoftwareGpu};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        requests: AtomicUsize,
    }

    struct ScriptedTask {
        recorder: Arc<Recorder>,
        fail_start: bool,
        fail_requests: bool,
        lose_context: bool,
    }

    impl ScriptedTask {
        fn new(recorder: &Arc<Recorder>) -> Self {
            Self {
                recorder: recorder.clone(),
                fail_start: false,
                fail_requests: false,
                lose_context: false,
            }
        }

        fn log(&self, event: &str) {
            self.recorder.events.lock().push(event.to_string());
        }
    }

    impl GpuTask for ScriptedTask {
        fn on_start(&mut self, _gpu: &mut dyn Gpu) -> Result<()> {
            self.log("start");
            if self.fail_start {
                return Err(Error::InvalidState("no surface".into()));
            }
            Ok(())
        }

        fn process_request(&mut self, _gpu: &mut dyn Gpu, request: FrameRequest) -> Result<()> {
            self.recorder.requests.fetch_add(1, Ordering::SeqCst);
            self.log(&format!("{:?}", request));
            if self.lose_context {
                return Err(Error::Gpu(GpuError::ContextLost("device reset".into())));
            }
            if self.fail_requests {
                return Err(Error::TransientDraw("surface gone".into()));
            }
            Ok(())
        }

        fn on_stop(&mut self, _gpu: &mut dyn Gpu) -> Result<()> {
            self.log("stop");
            Ok(())
        }
    }

    fn factory(stats: &Arc<GpuStats>) -> GpuFactory {
        SoftwareGpu::factory(stats.clone())
    }

    #[test]
    fn lifecycle_runs_start_requests_stop() {
        let stats = Arc::new(GpuStats::default());
        let recorder = Arc::new(Recorder::default());
        let shared = Arc::new(WorkerShared::default());

        let worker =
            FrameWorker::spawn("worker-test", ScriptedTask::new(&recorder), factory(&stats), shared.clone())
                .unwrap();
        assert!(worker.wait_running(None).unwrap());
        assert_eq!(worker.state(), WorkerState::Running);

        assert!(worker.offer(FrameRequest::Resize { width: 4, height: 4 }));
        while shared.pending_requests() > 0 {
            std::thread::yield_now();
        }

        worker.stop().unwrap();
        assert_eq!(shared.state(), WorkerState::Stopped);
        assert_eq!(stats.contexts_destroyed(), 1);

        let events = recorder.events.lock();
        assert_eq!(events.first().map(String::as_str), Some("start"));
        assert_eq!(events.last().map(String::as_str), Some("stop"));
    }

    #[test]
    fn failed_start_is_fatal_and_cleans_up() {
        let stats = Arc::new(GpuStats::default());
        let recorder = Arc::new(Recorder::default());
        let task = ScriptedTask {
            fail_start: true,
            ..ScriptedTask::new(&recorder)
        };

        let worker = FrameWorker::spawn(
            "worker-fail",
            task,
            factory(&stats),
            Arc::new(WorkerShared::default()),
        )
        .unwrap();
        let err = worker.wait_running(None).unwrap_err();
        assert!(matches!(
            err,
            Error::FatalLifecycle {
                phase: LifecyclePhase::Start,
                ..
            }
        ));

        worker.stop().unwrap();
        assert_eq!(*recorder.events.lock(), vec!["start", "stop"]);
        assert_eq!(stats.contexts_destroyed(), 1);
    }

    #[test]
    fn gpu_factory_failure_is_fatal() {
        let factory: GpuFactory =
            Arc::new(|| Err(crate::gpu::GpuError::ContextLost("no display".into())));
        let recorder = Arc::new(Recorder::default());

        let worker = FrameWorker::spawn(
            "worker-nogpu",
            ScriptedTask::new(&recorder),
            factory,
            Arc::new(WorkerShared::default()),
        )
        .unwrap();
        assert!(worker.wait_running(None).unwrap_err().is_fatal());
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn request_errors_do_not_stop_the_loop() {
        let stats = Arc::new(GpuStats::default());
        let recorder = Arc::new(Recorder::default());
        let task = ScriptedTask {
            fail_requests: true,
            ..ScriptedTask::new(&recorder)
        };
        let shared = Arc::new(WorkerShared::default());

        let worker = FrameWorker::spawn("worker-errs", task, factory(&stats), shared.clone()).unwrap();
        worker.wait_running(None).unwrap();

        for _ in 0..3 {
            assert!(worker.offer(FrameRequest::Draw));
            while shared.pending_requests() > 0 {
                std::thread::yield_now();
            }
        }
        while recorder.requests.load(Ordering::SeqCst) < 3 {
            std::thread::yield_now();
        }

        assert_eq!(worker.state(), WorkerState::Running);
        worker.stop().unwrap();
    }

    #[test]
    fn lost_context_terminates_the_loop() {
        let stats = Arc::new(GpuStats::default());
        let recorder = Arc::new(Recorder::default());
        let task = ScriptedTask {
            lose_context: true,
            ..ScriptedTask::new(&recorder)
        };
        let shared = Arc::new(WorkerShared::default());

        let worker = FrameWorker::spawn("worker-lost", task, factory(&stats), shared.clone()).unwrap();
        worker.wait_running(None).unwrap();
        assert!(worker.offer(FrameRequest::Draw));

        while !worker.has_exited() {
            std::thread::yield_now();
        }
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(!worker.offer(FrameRequest::Draw));
        assert_eq!(recorder.requests.load(Ordering::SeqCst), 1);

        worker.stop().unwrap();
        assert_eq!(recorder.events.lock().last().map(String::as_str), Some("stop"));
        assert_eq!(stats.contexts_destroyed(), 1);
    }
}
