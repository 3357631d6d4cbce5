use glam::{Mat4, Vec3};

use super::{Gpu, GpuError, GpuResult, TextureId};

/// Full-screen textured quad blitter with its own model-view-projection matrix.
#[derive(Debug, Clone)]
pub struct TextureDrawer {
    mvp: Mat4,
    external: bool,
    released: bool,
}

impl TextureDrawer {
    /// `external` selects sampling from platform-filled textures.
    pub fn new(external: bool) -> Self {
        Self {
            mvp: Mat4::IDENTITY,
            external,
            released: false,
        }
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn mvp(&self) -> &Mat4 {
        &self.mvp
    }

    pub fn set_mvp(&mut self, mvp: Mat4) {
        self.mvp = mvp;
    }

    /// Folds a mirror into the MVP matrix: scale (1, -1, 1) when `vertical`,
    /// (-1, 1, 1) otherwise. Applied after the existing matrix.
    pub fn flip(&mut self, vertical: bool) {
        let scale = if vertical {
            Vec3::new(1.0, -1.0, 1.0)
        } else {
            Vec3::new(-1.0, 1.0, 1.0)
        };
        self.mvp = Mat4::from_scale(scale) * self.mvp;
    }

    pub fn draw(&self, gpu: &mut dyn Gpu, texture: TextureId, tex_matrix: &Mat4) -> GpuResult<()> {
        if self.released {
            return Err(GpuError::ContextLost("drawer already released".into()));
        }
        gpu.draw(texture, &self.mvp, tex_matrix)
    }

    pub fn release(&mut self) {
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}
