use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use glam::{Mat4, Vec4};
use hashbrown::HashMap;

use super::{rgba_byte_len, Gpu, GpuError, GpuFactory, GpuResult, TextureId, TextureKind};

/// Counters shared between a [`SoftwareGpu`] and whoever created it.
///
/// The context itself lives on the worker thread; these let the control side
/// observe what happened there.
#[derive(Debug, Default)]
pub struct GpuStats {
    contexts_created: AtomicUsize,
    contexts_destroyed: AtomicUsize,
    live_textures: AtomicUsize,
    draws: AtomicUsize,
    clears: AtomicUsize,
    flushes: AtomicUsize,
}

impl GpuStats {
    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    pub fn contexts_destroyed(&self) -> usize {
        self.contexts_destroyed.load(Ordering::SeqCst)
    }

    pub fn live_textures(&self) -> usize {
        self.live_textures.load(Ordering::SeqCst)
    }

    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct Texture {
    kind: TextureKind,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    fn new(kind: TextureKind, width: u32, height: u32) -> GpuResult<Self> {
        let len = rgba_byte_len(width, height).ok_or(GpuError::InvalidSize { width, height })?;
        Ok(Self {
            kind,
            width,
            height,
            pixels: vec![0; len],
        })
    }

    fn empty() -> Self {
        Self {
            kind: TextureKind::Rgba,
            width: 0,
            height: 0,
            pixels: Vec::new(),
        }
    }

    fn one_pixel() -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![0; 4],
            ..Self::empty()
        }
    }
}

/// CPU implementation of [`Gpu`] over RGBA8 buffers.
///
/// Follows GL conventions: texture row 0 is at v = 0, framebuffer row 0 is
/// the bottom row and readback returns rows in storage order. The default
/// framebuffer is a 1x1 offscreen surface.
#[derive(Debug)]
pub struct SoftwareGpu {
    textures: HashMap<TextureId, Texture>,
    next_id: u32,
    target: Option<TextureId>,
    default_framebuffer: Texture,
    current: bool,
    clear_color: [u8; 4],
    stats: Arc<GpuStats>,
}

impl Default for SoftwareGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareGpu {
    pub fn new() -> Self {
        Self::with_stats(Arc::new(GpuStats::default()))
    }

    pub fn with_stats(stats: Arc<GpuStats>) -> Self {
        stats.contexts_created.fetch_add(1, Ordering::SeqCst);
        Self {
            textures: HashMap::new(),
            next_id: 1,
            target: None,
            default_framebuffer: Texture::one_pixel(),
            current: false,
            clear_color: [0, 0, 0, 0],
            stats,
        }
    }

    /// Factory creating one context per worker, all reporting into `stats`.
    pub fn factory(stats: Arc<GpuStats>) -> GpuFactory {
        Arc::new(move || Ok(Box::new(SoftwareGpu::with_stats(stats.clone())) as Box<dyn Gpu>))
    }

    pub fn stats(&self) -> &Arc<GpuStats> {
        &self.stats
    }

    pub fn set_clear_color(&mut self, rgba: [u8; 4]) {
        self.clear_color = rgba;
    }

    fn ensure_current(&self) -> GpuResult<()> {
        if self.current {
            Ok(())
        } else {
            Err(GpuError::NotCurrent)
        }
    }

    fn texture(&self, id: TextureId) -> GpuResult<&Texture> {
        self.textures.get(&id).ok_or(GpuError::UnknownTexture(id))
    }

    fn texture_mut(&mut self, id: TextureId) -> GpuResult<&mut Texture> {
        self.textures.get_mut(&id).ok_or(GpuError::UnknownTexture(id))
    }

    fn bound_target(&self) -> GpuResult<&Texture> {
        match self.target {
            Some(id) => self.texture(id),
            None => Ok(&self.default_framebuffer),
        }
    }
}

impl Gpu for SoftwareGpu {
    fn make_current(&mut self) -> GpuResult<()> {
        self.current = true;
        Ok(())
    }

    fn create_texture(
        &mut self,
        kind: TextureKind,
        width: u32,
        height: u32,
    ) -> GpuResult<TextureId> {
        self.ensure_current()?;
        // External textures get their size from the first upload.
        if kind == TextureKind::Rgba && (width == 0 || height == 0) {
            return Err(GpuError::InvalidSize { width, height });
        }

        let texture = Texture::new(kind, width, height)?;
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.textures.insert(id, texture);
        self.stats.live_textures.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn resize_texture(&mut self, texture: TextureId, width: u32, height: u32) -> GpuResult<()> {
        self.ensure_current()?;
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        let tex = self.texture_mut(texture)?;
        *tex = Texture::new(tex.kind, width, height)?;
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureId) -> GpuResult<()> {
        self.ensure_current()?;
        self.textures
            .remove(&texture)
            .ok_or(GpuError::UnknownTexture(texture))?;
        if self.target == Some(texture) {
            self.target = None;
        }
        self.stats.live_textures.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn texture_size(&self, texture: TextureId) -> GpuResult<(u32, u32)> {
        let tex = self.texture(texture)?;
        Ok((tex.width, tex.height))
    }

    fn upload(
        &mut self,
        texture: TextureId,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> GpuResult<()> {
        self.ensure_current()?;
        let expected =
            rgba_byte_len(width, height).ok_or(GpuError::InvalidSize { width, height })?;
        if pixels.len() != expected {
            return Err(GpuError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let tex = self.texture_mut(texture)?;
        tex.width = width;
        tex.height = height;
        tex.pixels.clear();
        tex.pixels.extend_from_slice(pixels);
        Ok(())
    }

    fn bind_target(&mut self, target: Option<TextureId>) -> GpuResult<()> {
        self.ensure_current()?;
        if let Some(id) = target {
            if self.texture(id)?.kind != TextureKind::Rgba {
                return Err(GpuError::WrongKind {
                    texture: id,
                    usage: "render target",
                });
            }
        }
        self.target = target;
        Ok(())
    }

    fn draw(&mut self, source: TextureId, mvp: &Mat4, tex_matrix: &Mat4) -> GpuResult<()> {
        self.ensure_current()?;
        if self.target == Some(source) {
            return Err(GpuError::WrongKind {
                texture: source,
                usage: "sampling source of its own render target",
            });
        }
        if mvp.determinant().abs() <= f32::EPSILON {
            return Err(GpuError::SingularTransform);
        }
        let inverse_mvp = mvp.inverse();

        let mut target = match self.target {
            Some(id) => self
                .textures
                .remove(&id)
                .ok_or(GpuError::UnknownTexture(id))?,
            None => std::mem::replace(&mut self.default_framebuffer, Texture::empty()),
        };

        let result = self
            .texture(source)
            .map(|src| rasterize(src, &mut target, &inverse_mvp, tex_matrix));

        match self.target {
            Some(id) => {
                self.textures.insert(id, target);
            }
            None => self.default_framebuffer = target,
        }

        result?;
        self.stats.draws.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_pixels(&mut self, out: &mut Vec<u8>) -> GpuResult<(u32, u32)> {
        self.ensure_current()?;
        let target = self.bound_target()?;
        out.clear();
        out.extend_from_slice(&target.pixels);
        Ok((target.width, target.height))
    }

    fn clear(&mut self) {
        let color = self.clear_color;
        let target = match self.target {
            Some(id) => self.textures.get_mut(&id),
            None => Some(&mut self.default_framebuffer),
        };
        if let Some(target) = target {
            let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(&mut target.pixels);
            pixels.fill(color);
        }
        self.stats.clears.fetch_add(1, Ordering::SeqCst);
    }

    fn flush(&mut self) {
        self.stats.flushes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for SoftwareGpu {
    fn drop(&mut self) {
        if !self.textures.is_empty() {
            tracing::warn!(
                "GPU context destroyed with {} live texture(s)",
                self.textures.len()
            );
            self.stats
                .live_textures
                .fetch_sub(self.textures.len(), Ordering::SeqCst);
        }
        self.stats.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Nearest-sample rasterization of a full-screen quad into `dst`.
fn rasterize(src: &Texture, dst: &mut Texture, inverse_mvp: &Mat4, tex_matrix: &Mat4) {
    if src.width == 0 || src.height == 0 || dst.width == 0 || dst.height == 0 {
        return;
    }

    let src_pixels: &[[u8; 4]] = bytemuck::cast_slice(&src.pixels);
    let (dst_width, dst_height) = (dst.width as usize, dst.height as usize);
    let dst_pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(&mut dst.pixels);

    let last_x = src.width as i64 - 1;
    let last_y = src.height as i64 - 1;

    for y in 0..dst_height {
        let ndc_y = (y as f32 + 0.5) / dst_height as f32 * 2.0 - 1.0;
        for x in 0..dst_width {
            let ndc_x = (x as f32 + 0.5) / dst_width as f32 * 2.0 - 1.0;
            let pos = *inverse_mvp * Vec4::new(ndc_x, ndc_y, 0.0, 1.0);
            let (qx, qy) = (pos.x / pos.w, pos.y / pos.w);
            if !(-1.0..=1.0).contains(&qx) || !(-1.0..=1.0).contains(&qy) {
                continue;
            }

            let uv = Vec4::new((qx + 1.0) * 0.5, (qy + 1.0) * 0.5, 0.0, 1.0);
            let tc = *tex_matrix * uv;

            let sx = ((tc.x * src.width as f32).floor() as i64).clamp(0, last_x) as usize;
            let sy = ((tc.y * src.height as f32).floor() as i64).clamp(0, last_y) as usize;
            dst_pixels[y * dst_width + x] = src_pixels[sy * src.width as usize + sx];
        }
    }
}
