//! Platform surface capability and the worker-side [`RenderSurface`].

mod software;

pub use software::{FrameDelivery, SoftwareFrame, SoftwarePlatform, SoftwareProducer, SoftwareSurface};

use std::sync::Arc;

use glam::Mat4;
use thiserror::Error;
use tracing::debug;

use crate::gpu::{Gpu, GpuError, TextureId};
use crate::notify::NotifyHandle;

/// Edge-triggered "a new frame was queued" callback.
pub type FrameAvailableListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Surface has been released")]
    Released,
    #[error("Frame of {width}x{height} carries {len} bytes of RGBA data")]
    InvalidFrame { width: u32, height: u32, len: usize },
    #[error("Invalid default buffer size {width}x{height}")]
    InvalidBufferSize { width: u32, height: u32 },
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Creates surfaces bound to an external texture.
///
/// Shared between the control thread and the worker thread; the surfaces it
/// creates live on the worker thread only.
pub trait SurfacePlatform: Send + Sync + 'static {
    type Surface: PlatformSurface<Producer = Self::Producer>;
    /// Endpoint upstream producers write frames into.
    type Producer: Clone + Send + Sync + 'static;

    fn create_surface(
        &self,
        gpu: &mut dyn Gpu,
        texture: TextureId,
        width: u32,
        height: u32,
    ) -> Result<Self::Surface, SurfaceError>;
}

pub trait PlatformSurface: Send + 'static {
    type Producer;

    fn producer(&self) -> Self::Producer;

    /// Registers the frame-available listener. Platforms that support it
    /// deliver through `handler`, others call the listener inline.
    fn set_on_frame_available(
        &mut self,
        listener: FrameAvailableListener,
        handler: Option<NotifyHandle>,
    );

    /// Latches the most recent frame into the bound texture.
    fn update_tex_image(&mut self, gpu: &mut dyn Gpu) -> Result<(), SurfaceError>;

    /// Sampling transform of the latched frame.
    fn transform_matrix(&self) -> Mat4;

    fn release(&mut self);
}

/// The external texture together with the platform surface feeding it.
#[derive(Debug)]
pub struct RenderSurface<S> {
    surface: S,
    texture: TextureId,
    width: u32,
    height: u32,
    released: bool,
}

impl<S: PlatformSurface> RenderSurface<S> {
    pub fn create<P>(
        platform: &P,
        gpu: &mut dyn Gpu,
        texture: TextureId,
        width: u32,
        height: u32,
    ) -> Result<Self, SurfaceError>
    where
        P: SurfacePlatform<Surface = S>,
    {
        if width == 0 || height == 0 {
            return Err(SurfaceError::InvalidBufferSize { width, height });
        }

        let surface = platform.create_surface(gpu, texture, width, height)?;
        debug!("Render surface created on {} ({}x{})", texture, width, height);

        Ok(Self {
            surface,
            texture,
            width,
            height,
            released: false,
        })
    }

    pub fn producer(&self) -> S::Producer {
        self.surface.producer()
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn buffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn set_on_frame_available(
        &mut self,
        listener: FrameAvailableListener,
        handler: Option<NotifyHandle>,
    ) {
        self.surface.set_on_frame_available(listener, handler);
    }

    /// Latches the latest frame and returns its sampling transform.
    pub fn latch(&mut self, gpu: &mut dyn Gpu) -> Result<Mat4, SurfaceError> {
        if self.released {
            return Err(SurfaceError::Released);
        }
        self.surface.update_tex_image(gpu)?;
        Ok(self.surface.transform_matrix())
    }

    /// Releases the platform surface and deletes the external texture.
    pub fn release(&mut self, gpu: &mut dyn Gpu) -> Result<(), SurfaceError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.surface.release();
        gpu.delete_texture(self.texture)?;
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
