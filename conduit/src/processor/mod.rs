//! The control-thread facade and its collaborators.

mod bridge;
mod routine;
mod task;

pub use bridge::{FrameObserver, ResultChannel, ResultFrame, ResultPayload, ResultSink};
pub use routine::{
    FrameInput, ProcessingRoutine, ProcessorHandle, ResultFrameType, SessionId, STATUS_DROPPED,
    STATUS_INVALID_ARGUMENT, STATUS_OK,
};

use std::sync::Arc;

use common::Slot;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use self::bridge::ResultBridge;
use self::task::{ProcessingTask, PublishedSurface, TaskParams};
use crate::config::ProcessorConfig;
use crate::error::{check_status, Error, Result};
use crate::fps::FrameRateCounter;
use crate::gpu::{GpuFactory, TextureId, MAX_TEXTURE_DIMENSION};
use crate::notify::NotifyThread;
use crate::surface::SurfacePlatform;
use crate::worker::{FrameRequest, FrameWorker, WorkerShared, WorkerState};

/// Lifecycle of a processor as seen from the control thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum SessionState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Released,
}

/// Collects the collaborators of an [`ImageProcessor`]. Every one of them is
/// required; [`build`](Self::build) reports the first missing one.
pub struct ImageProcessorBuilder<P: SurfacePlatform> {
    config: ProcessorConfig,
    platform: Option<P>,
    routine: Option<Arc<dyn ProcessingRoutine>>,
    gpu_factory: Option<GpuFactory>,
    observer: Option<Arc<dyn FrameObserver>>,
}

impl<P: SurfacePlatform> Default for ImageProcessorBuilder<P> {
    fn default() -> Self {
        Self {
            config: ProcessorConfig::default(),
            platform: None,
            routine: None,
            gpu_factory: None,
            observer: None,
        }
    }
}

impl<P: SurfacePlatform> ImageProcessorBuilder<P> {
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source_size(mut self, width: u32, height: u32) -> Self {
        self.config.source_width = width;
        self.config.source_height = height;
        self
    }

    pub fn platform(mut self, platform: P) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn routine(mut self, routine: Arc<dyn ProcessingRoutine>) -> Self {
        self.routine = Some(routine);
        self
    }

    pub fn gpu_factory(mut self, gpu_factory: GpuFactory) -> Self {
        self.gpu_factory = Some(gpu_factory);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn FrameObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<ImageProcessor<P>> {
        let missing = |what: &str| Error::InvalidArgument(format!("{} is required", what));
        let observer = self.observer.ok_or_else(|| missing("observer"))?;
        let routine = self.routine.ok_or_else(|| missing("processing routine"))?;
        let gpu_factory = self.gpu_factory.ok_or_else(|| missing("GPU factory"))?;
        let platform = self.platform.ok_or_else(|| missing("surface platform"))?;
        self.config.validate()?;

        ImageProcessor::create(self.config, platform, routine, gpu_factory, observer)
    }
}

/// Hands frames from a platform surface to a processing routine.
///
/// Owns one routine session for its whole life and at most one worker at a
/// time. All methods are meant for a single control thread; results reach the
/// observer on the routine's threads.
pub struct ImageProcessor<P: SurfacePlatform> {
    config: ProcessorConfig,
    platform: Arc<P>,
    routine: Arc<dyn ProcessingRoutine>,
    gpu_factory: GpuFactory,
    handle: Option<ProcessorHandle>,
    bridge: Option<Arc<ResultBridge>>,
    fps: Arc<Mutex<FrameRateCounter>>,
    notify: NotifyThread,
    published: Arc<Slot<PublishedSurface<P::Producer>>>,
    worker: Option<FrameWorker>,
    started: bool,
}

impl<P: SurfacePlatform> ImageProcessor<P> {
    pub fn builder() -> ImageProcessorBuilder<P> {
        ImageProcessorBuilder::default()
    }

    fn create(
        config: ProcessorConfig,
        platform: P,
        routine: Arc<dyn ProcessingRoutine>,
        gpu_factory: GpuFactory,
        observer: Arc<dyn FrameObserver>,
    ) -> Result<Self> {
        let notify = NotifyThread::spawn(&config.notify_thread_name)?;

        let fps = Arc::new(Mutex::new(FrameRateCounter::new()));
        let bridge = Arc::new(ResultBridge::new(observer, fps.clone()));
        let session = routine
            .create_session(ResultSink::new(&bridge))
            .ok_or_else(|| Error::InvalidState("routine failed to create a session".into()))?;

        info!(
            "Image processor created for {} with source {}x{}",
            session, config.source_width, config.source_height
        );

        Ok(Self {
            config,
            platform: Arc::new(platform),
            routine,
            gpu_factory,
            handle: Some(ProcessorHandle::new(session)),
            bridge: Some(bridge),
            fps,
            notify,
            published: Arc::new(Slot::new()),
            worker: None,
            started: false,
        })
    }

    fn session(&self) -> Result<SessionId> {
        self.handle
            .as_ref()
            .map(ProcessorHandle::session)
            .ok_or_else(|| Error::InvalidState("processor has been released".into()))
    }

    fn running_worker(&self) -> Result<&FrameWorker> {
        self.session()?;
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| Error::InvalidState("processor is not started".into()))?;
        match worker.state() {
            WorkerState::Running => Ok(worker),
            state => Err(Error::InvalidState(format!("worker is {}", state))),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn handle(&self) -> Result<&ProcessorHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::InvalidState("processor has been released".into()))
    }

    pub fn session_state(&self) -> SessionState {
        if self.handle.is_none() {
            return SessionState::Released;
        }
        match &self.worker {
            None if self.started => SessionState::Stopped,
            None => SessionState::Created,
            Some(worker) => match worker.state() {
                WorkerState::New | WorkerState::Started => SessionState::Starting,
                WorkerState::Running => SessionState::Running,
                WorkerState::Stopping => SessionState::Stopping,
                WorkerState::Stopped => SessionState::Stopped,
            },
        }
    }

    /// Starts a worker producing a `target_width` x `target_height` working
    /// texture and waits until it runs. Does nothing while a worker is alive.
    ///
    /// With a start timeout configured the wait may end before the worker is
    /// running; it keeps starting on its own and a failure is reported by the
    /// next `start`, `stop` or `release`.
    pub fn start(&mut self, target_width: u32, target_height: u32) -> Result<()> {
        let session = self.session()?;
        check_target_size(target_width, target_height)?;

        if let Some(worker) = self.worker.take() {
            if !worker.has_exited() {
                self.worker = Some(worker);
                return Ok(());
            }
            // Exited on its own: report why before starting over.
            self.published.clear();
            worker.stop()?;
        }

        let shared = Arc::new(WorkerShared::default());
        let task = ProcessingTask::new(TaskParams {
            platform: self.platform.clone(),
            routine: self.routine.clone(),
            session,
            shared: shared.clone(),
            notify: self.notify.handle(),
            published: self.published.clone(),
            fps: self.fps.clone(),
            source_size: (self.config.source_width, self.config.source_height),
            target_size: (target_width, target_height),
            flip_vertical: self.config.flip_vertical,
        });

        debug!("Starting worker for {}", session);
        let worker = FrameWorker::spawn(
            &self.config.worker_thread_name,
            task,
            self.gpu_factory.clone(),
            shared,
        )?;
        self.started = true;

        match worker.wait_running(self.config.start_timeout()) {
            Ok(true) => {
                info!("Worker running at {}x{}", target_width, target_height);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(false) => {
                warn!("Start wait timed out, worker keeps starting in the background");
                self.worker = Some(worker);
                Ok(())
            }
            Err(err) => {
                error!("Worker failed to start: {}", err);
                if let Err(stop_err) = worker.stop() {
                    debug!("Worker join after failed start: {}", stop_err);
                }
                Err(err)
            }
        }
    }

    /// Tears the worker down and waits for it. Does nothing without a worker.
    pub fn stop(&mut self) -> Result<()> {
        self.session()?;
        self.stop_worker()
    }

    fn stop_worker(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        debug!("Stopping worker");
        let result = worker.stop();
        self.published.clear();
        if result.is_ok() {
            info!("Worker stopped");
        }
        result
    }

    /// Stops the worker, shuts down frame notification delivery and releases
    /// the routine session. Every later call fails with `InvalidState`.
    pub fn release(&mut self) -> Result<()> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::InvalidState("processor has been released".into()))?;

        let stopped = self.stop_worker();
        self.notify.quit();
        self.routine.release_session(handle.session());
        if let Some(bridge) = self.bridge.take() {
            debug!("Disconnecting {} result sink(s)", Arc::weak_count(&bridge));
        }

        info!("Image processor for {} released", handle.session());
        stopped
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    /// Producer endpoint of the render surface. Valid while the worker runs.
    pub fn surface(&self) -> Result<P::Producer> {
        self.published_surface().map(|published| published.producer.clone())
    }

    /// External texture the render surface latches frames into.
    pub fn surface_texture(&self) -> Result<TextureId> {
        self.published_surface().map(|published| published.texture)
    }

    fn published_surface(&self) -> Result<Arc<PublishedSurface<P::Producer>>> {
        self.running_worker()?;
        self.published
            .peek()
            .ok_or_else(|| Error::InvalidState("surface is not available".into()))
    }

    /// Asks the running worker to resize the working texture.
    pub fn request_resize(&self, width: u32, height: u32) -> Result<()> {
        self.session()?;
        check_target_size(width, height)?;

        let worker = self.running_worker()?;
        if worker.offer(FrameRequest::Resize { width, height }) {
            Ok(())
        } else {
            Err(Error::InvalidState("worker is not accepting requests".into()))
        }
    }

    pub fn set_result_frame_type(&self, frame_type: ResultFrameType) -> Result<()> {
        let session = self.session()?;
        let status = self.routine.set_result_frame_type(session, frame_type.code());
        check_status("set_result_frame_type", status)
    }

    pub fn result_frame_type(&self) -> Result<ResultFrameType> {
        let session = self.session()?;
        let code = self.routine.result_frame_type(session);
        if code < 0 {
            return Err(Error::Status {
                op: "result_frame_type",
                code,
            });
        }
        ResultFrameType::from_code(code)
            .ok_or_else(|| Error::InvalidState(format!("unknown result frame type {}", code)))
    }

    /// Recomputes the frame rates from the results delivered so far.
    pub fn update_fps(&self) -> Result<()> {
        self.session()?;
        self.fps.lock().update();
        Ok(())
    }

    pub fn fps(&self) -> Result<f32> {
        self.session()?;
        Ok(self.fps.lock().fps())
    }

    pub fn total_fps(&self) -> Result<f32> {
        self.session()?;
        Ok(self.fps.lock().total_fps())
    }

    /// Results delivered since the worker last reached running.
    pub fn delivered_results(&self) -> Result<u64> {
        self.session()?;
        Ok(self.fps.lock().total_frames())
    }
}

impl<P: SurfacePlatform> Drop for ImageProcessor<P> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.release() {
                error!("Release on drop failed: {}", err);
            }
        }
    }
}

fn check_target_size(width: u32, height: u32) -> Result<()> {
    let in_range = |edge: u32| (1..=MAX_TEXTURE_DIMENSION).contains(&edge);
    if in_range(width) && in_range(height) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "target size must be within 1..={} per edge, got {}x{}",
            MAX_TEXTURE_DIMENSION, width, height
        )))
    }
}
