//! GPU capability consumed by the worker.
//!
//! The pipeline never talks to a graphics API directly. Everything it needs
//! (texture names, a render target, an MVP-matrix blit, pixel readback and the
//! clear/flush frame boundary) goes through [`Gpu`]. An implementation is
//! created on the worker thread by a [`GpuFactory`] and never leaves it, so it
//! does not have to be `Send`.

mod drawer;
mod software;

pub use drawer::TextureDrawer;
pub use software::{GpuStats, SoftwareGpu};

use std::fmt;
use std::sync::Arc;

use glam::Mat4;
use thiserror::Error;

/// Name of a texture owned by a [`Gpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Kind of texture storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Filled by the platform surface, sampled through its transform matrix.
    External,
    /// Regular RGBA8 texture usable as a render target.
    Rgba,
}

/// Largest texture edge a [`Gpu`] is asked to allocate.
pub const MAX_TEXTURE_DIMENSION: u32 = 16384;

/// Byte length of a `width` x `height` RGBA8 image, `None` when an edge
/// exceeds [`MAX_TEXTURE_DIMENSION`] or the product overflows.
pub fn rgba_byte_len(width: u32, height: u32) -> Option<usize> {
    if width > MAX_TEXTURE_DIMENSION || height > MAX_TEXTURE_DIMENSION {
        return None;
    }
    (width as usize).checked_mul(height as usize)?.checked_mul(4)
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("GPU context is not current on this thread")]
    NotCurrent,
    #[error("GPU context lost: {0}")]
    ContextLost(String),
    #[error("Unknown texture {0}")]
    UnknownTexture(TextureId),
    #[error("Texture {texture} cannot be used as {usage}")]
    WrongKind {
        texture: TextureId,
        usage: &'static str,
    },
    #[error("Invalid texture size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("Pixel data has {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("No render target bound")]
    NoTarget,
    #[error("Transform matrix is not invertible")]
    SingularTransform,
}

pub type GpuResult<T> = std::result::Result<T, GpuError>;

/// Handle-based GPU command interface, modelled on a GLES-style context.
///
/// All methods are called from the worker thread only.
pub trait Gpu {
    /// Makes this context current on the calling thread.
    fn make_current(&mut self) -> GpuResult<()>;

    fn create_texture(&mut self, kind: TextureKind, width: u32, height: u32)
        -> GpuResult<TextureId>;

    /// Reallocates texture storage. Previous contents are discarded.
    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) -> GpuResult<()>;

    fn delete_texture(&mut self, texture: TextureId) -> GpuResult<()>;

    fn texture_size(&self, texture: TextureId) -> GpuResult<(u32, u32)>;

    /// Replaces the contents of `texture` with tightly packed RGBA8 rows,
    /// first row at texture coordinate v = 0.
    fn upload(&mut self, texture: TextureId, width: u32, height: u32, pixels: &[u8])
        -> GpuResult<()>;

    /// Binds `target` as the render target, or restores the default one.
    fn bind_target(&mut self, target: Option<TextureId>) -> GpuResult<()>;

    /// Draws a full-screen quad sampling `source` into the bound target.
    ///
    /// Quad positions in [-1, 1] are mapped by `mvp`; texture coordinates in
    /// [0, 1] are mapped by `tex_matrix` before sampling.
    fn draw(&mut self, source: TextureId, mvp: &Mat4, tex_matrix: &Mat4) -> GpuResult<()>;

    /// Reads the bound render target as RGBA8, bottom row first.
    ///
    /// `out` is resized to fit; returns the target dimensions.
    fn read_pixels(&mut self, out: &mut Vec<u8>) -> GpuResult<(u32, u32)>;

    fn clear(&mut self);

    fn flush(&mut self);
}

/// Creates a GPU context on the worker thread. Called once per worker, so a
/// restarted processor gets a fresh context.
pub type GpuFactory = Arc<dyn Fn() -> GpuResult<Box<dyn Gpu>> + Send + Sync>;
