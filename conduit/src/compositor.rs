use glam::Mat4;

use crate::gpu::{Gpu, GpuError, GpuResult, TextureDrawer, TextureId, TextureKind};

#[derive(Debug, Clone)]
struct PendingSource {
    drawer: TextureDrawer,
    texture: TextureId,
    tex_matrix: Mat4,
}

/// Normalizes the incoming external texture into an RGBA working texture of
/// the target size.
///
/// Compositing is lazy: [`set_source`](Self::set_source) only records the
/// input and the draw happens when the working texture is bound.
#[derive(Debug)]
pub struct SourceCompositor {
    output: TextureId,
    width: u32,
    height: u32,
    pending: Option<PendingSource>,
    bound: bool,
    released: bool,
}

impl SourceCompositor {
    pub fn new(gpu: &mut dyn Gpu, width: u32, height: u32) -> GpuResult<Self> {
        let output = gpu.create_texture(TextureKind::Rgba, width, height)?;
        Ok(Self {
            output,
            width,
            height,
            pending: None,
            bound: false,
            released: false,
        })
    }

    pub fn set_source(&mut self, drawer: &TextureDrawer, texture: TextureId, tex_matrix: Mat4) {
        self.pending = Some(PendingSource {
            drawer: drawer.clone(),
            texture,
            tex_matrix,
        });
    }

    pub fn has_pending_source(&self) -> bool {
        self.pending.is_some()
    }

    pub fn output_texture(&self) -> TextureId {
        self.output
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Makes the working texture the render target, compositing the pending
    /// source into it first.
    pub fn bind(&mut self, gpu: &mut dyn Gpu) -> GpuResult<()> {
        self.ensure_alive()?;
        gpu.bind_target(Some(self.output))?;
        self.bound = true;

        if let Some(pending) = self.pending.take() {
            pending.drawer.draw(gpu, pending.texture, &pending.tex_matrix)?;
        }
        Ok(())
    }

    pub fn unbind(&mut self, gpu: &mut dyn Gpu) -> GpuResult<()> {
        if self.bound {
            self.bound = false;
            gpu.bind_target(None)?;
        }
        Ok(())
    }

    /// Reallocates the working texture. An active bind is dropped.
    pub fn resize(&mut self, gpu: &mut dyn Gpu, width: u32, height: u32) -> GpuResult<()> {
        self.ensure_alive()?;
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }

        self.unbind(gpu)?;
        gpu.resize_texture(self.output, width, height)?;
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn release(&mut self, gpu: &mut dyn Gpu) -> GpuResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.pending = None;
        self.unbind(gpu)?;
        gpu.delete_texture(self.output)
    }

    fn ensure_alive(&self) -> GpuResult<()> {
        if self.released {
            Err(GpuError::UnknownTexture(self.output))
        } else {
            Ok(())
        }
    }
}
