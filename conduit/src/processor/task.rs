use std::sync::Arc;

use common::Slot;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::routine::{FrameInput, ProcessingRoutine, SessionId, STATUS_DROPPED, STATUS_OK};
use crate::compositor::SourceCompositor;
use crate::error::{check_status, Error, Result};
use crate::fps::FrameRateCounter;
use crate::gpu::{Gpu, TextureDrawer, TextureId, TextureKind};
use crate::notify::NotifyHandle;
use crate::surface::{FrameAvailableListener, RenderSurface, SurfacePlatform};
use crate::worker::{FrameRequest, GpuTask, WorkerShared};

/// What the worker publishes to the control thread once its surface exists.
#[derive(Debug, Clone)]
pub(crate) struct PublishedSurface<Producer> {
    pub producer: Producer,
    pub texture: TextureId,
}

pub(crate) struct TaskParams<P: SurfacePlatform> {
    pub platform: Arc<P>,
    pub routine: Arc<dyn ProcessingRoutine>,
    pub session: SessionId,
    pub shared: Arc<WorkerShared>,
    pub notify: NotifyHandle,
    pub published: Arc<Slot<PublishedSurface<P::Producer>>>,
    pub fps: Arc<Mutex<FrameRateCounter>>,
    pub source_size: (u32, u32),
    pub target_size: (u32, u32),
    pub flip_vertical: bool,
}

/// Worker-side half of an [`ImageProcessor`](super::ImageProcessor): owns the
/// render surface, the compositor and the drawer, and feeds each coalesced
/// frame to the routine.
pub(crate) struct ProcessingTask<P: SurfacePlatform> {
    params: TaskParams<P>,
    drawer: Option<TextureDrawer>,
    surface: Option<RenderSurface<P::Surface>>,
    compositor: Option<SourceCompositor>,
    session_started: bool,
}

impl<P: SurfacePlatform> ProcessingTask<P> {
    pub fn new(params: TaskParams<P>) -> Self {
        Self {
            params,
            drawer: None,
            surface: None,
            compositor: None,
            session_started: false,
        }
    }

    fn handle_draw(&mut self, gpu: &mut dyn Gpu) -> Result<()> {
        gpu.make_current()?;

        let (Some(surface), Some(compositor), Some(drawer)) = (
            self.surface.as_mut(),
            self.compositor.as_mut(),
            self.drawer.as_ref(),
        ) else {
            return Err(Error::TransientDraw("worker is not initialized".into()));
        };

        let transform = surface
            .latch(gpu)
            .map_err(|err| transient("failed to latch frame", err))?;
        compositor.set_source(drawer, surface.texture(), transform);
        compositor
            .bind(gpu)
            .map_err(|err| transient("failed to composite frame", err))?;

        let status = {
            let mut input =
                FrameInput::new(gpu, compositor.output_texture(), compositor.size(), transform);
            self.params
                .routine
                .process_frame(self.params.session, &mut input)
        };

        let unbound = compositor.unbind(gpu);
        // Some drivers hang when a frame boundary passes without any draw call.
        gpu.clear();
        gpu.flush();
        unbound?;

        match status {
            STATUS_OK => Ok(()),
            STATUS_DROPPED => {
                trace!("Routine dropped the frame");
                Ok(())
            }
            code => Err(Error::Status {
                op: "process_frame",
                code,
            }),
        }
    }

    fn handle_resize(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> Result<()> {
        self.params.target_size = (width, height);
        match self.compositor.as_mut() {
            Some(compositor) => compositor.resize(gpu, width, height)?,
            None => self.compositor = Some(SourceCompositor::new(gpu, width, height)?),
        }
        debug!("Working texture resized to {}x{}", width, height);
        Ok(())
    }
}

impl<P: SurfacePlatform> GpuTask for ProcessingTask<P> {
    fn on_start(&mut self, gpu: &mut dyn Gpu) -> Result<()> {
        let mut drawer = TextureDrawer::new(true);
        if self.params.flip_vertical {
            drawer.flip(true);
        }
        self.drawer = Some(drawer);

        let (source_width, source_height) = self.params.source_size;
        let texture = gpu.create_texture(TextureKind::External, 0, 0)?;
        let mut surface = match RenderSurface::create(
            self.params.platform.as_ref(),
            gpu,
            texture,
            source_width,
            source_height,
        ) {
            Ok(surface) => surface,
            Err(err) => {
                if let Err(delete_err) = gpu.delete_texture(texture) {
                    warn!("Failed to delete external texture: {}", delete_err);
                }
                return Err(err.into());
            }
        };

        let listener: FrameAvailableListener = {
            let shared = self.params.shared.clone();
            Arc::new(move || {
                shared.offer(FrameRequest::Draw);
            })
        };
        surface.set_on_frame_available(listener, Some(self.params.notify.clone()));

        self.params.published.send(PublishedSurface {
            producer: surface.producer(),
            texture,
        });
        self.surface = Some(surface);

        let (target_width, target_height) = self.params.target_size;
        self.handle_resize(gpu, target_width, target_height)?;

        check_status(
            "start_session",
            self.params
                .routine
                .start_session(self.params.session, target_width, target_height),
        )?;
        self.session_started = true;

        self.params.fps.lock().reset();
        debug!(
            "Processing started for {} at {}x{}",
            self.params.session, target_width, target_height
        );
        Ok(())
    }

    fn process_request(&mut self, gpu: &mut dyn Gpu, request: FrameRequest) -> Result<()> {
        match request {
            FrameRequest::Draw => self.handle_draw(gpu),
            FrameRequest::Resize { width, height } => self.handle_resize(gpu, width, height),
        }
    }

    fn on_stop(&mut self, gpu: &mut dyn Gpu) -> Result<()> {
        self.params.published.clear();

        let mut result = Ok(());
        if self.session_started {
            self.session_started = false;
            let status = self.params.routine.stop_session(self.params.session);
            if let Err(err) = check_status("stop_session", status) {
                error!("Failed to stop {}: {}", self.params.session, err);
                result = Err(err);
            }
        }

        if let Some(mut surface) = self.surface.take() {
            if let Err(err) = surface.release(gpu) {
                warn!("Failed to release render surface: {}", err);
            }
        }
        if let Some(mut compositor) = self.compositor.take() {
            if let Err(err) = compositor.release(gpu) {
                warn!("Failed to release compositor: {}", err);
            }
        }
        if let Some(mut drawer) = self.drawer.take() {
            drawer.release();
        }

        debug!("Processing stopped for {}", self.params.session);
        result
    }
}

/// Wraps a per-frame failure as [`Error::TransientDraw`], except a lost
/// context, which the worker must see as such to terminate.
fn transient(what: &str, err: impl Into<Error>) -> Error {
    let err = err.into();
    if err.is_context_lost() {
        err
    } else {
        Error::TransientDraw(format!("{}: {}", what, err))
    }
}
