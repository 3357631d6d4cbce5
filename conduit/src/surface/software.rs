use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use common::Slot;
use glam::{Mat4, Vec3};
use parking_lot::Mutex;
use tracing::trace;

use super::{FrameAvailableListener, PlatformSurface, SurfaceError, SurfacePlatform};
use crate::gpu::{rgba_byte_len, Gpu, TextureId};
use crate::notify::NotifyHandle;

/// How a [`SoftwareSurface`] delivers frame-available notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameDelivery {
    /// Through the delivery handler passed at registration.
    #[default]
    Handler,
    /// On the producer's thread, ignoring any handler.
    Inline,
}

/// In-process surface platform fed with RGBA frames from memory.
#[derive(Debug, Clone, Default)]
pub struct SoftwarePlatform {
    delivery: FrameDelivery,
}

impl SoftwarePlatform {
    pub fn new(delivery: FrameDelivery) -> Self {
        Self { delivery }
    }

    pub fn delivery(&self) -> FrameDelivery {
        self.delivery
    }
}

impl SurfacePlatform for SoftwarePlatform {
    type Surface = SoftwareSurface;
    type Producer = SoftwareProducer;

    fn create_surface(
        &self,
        _gpu: &mut dyn Gpu,
        texture: TextureId,
        width: u32,
        height: u32,
    ) -> Result<SoftwareSurface, SurfaceError> {
        Ok(SoftwareSurface {
            texture,
            shared: Arc::new(ProducerShared {
                latest: Slot::new(),
                listener: Mutex::new(None),
                released: AtomicBool::new(false),
                next_sequence: AtomicU64::new(1),
                overwritten: AtomicU64::new(0),
                default_size: (width, height),
                delivery: self.delivery,
            }),
            transform: Mat4::IDENTITY,
            latched: None,
        })
    }
}

/// One queued frame: tightly packed RGBA8 rows, top row first.
#[derive(Debug, Clone)]
pub struct SoftwareFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub sequence: u64,
    pub transform: Mat4,
}

impl SoftwareFrame {
    /// Texture-coordinate transform for top-row-first uploads: v -> 1 - v.
    pub fn default_transform() -> Mat4 {
        Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)) * Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
    }
}

struct Registration {
    listener: FrameAvailableListener,
    handler: Option<NotifyHandle>,
}

struct ProducerShared {
    latest: Slot<SoftwareFrame>,
    listener: Mutex<Option<Registration>>,
    released: AtomicBool,
    next_sequence: AtomicU64,
    overwritten: AtomicU64,
    default_size: (u32, u32),
    delivery: FrameDelivery,
}

/// Producer endpoint of a [`SoftwareSurface`]. Cheap to clone and usable from
/// any thread.
#[derive(Clone)]
pub struct SoftwareProducer {
    shared: Arc<ProducerShared>,
}

impl fmt::Debug for SoftwareProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareProducer")
            .field("default_size", &self.shared.default_size)
            .field("released", &self.is_released())
            .finish()
    }
}

impl SoftwareProducer {
    /// Queues a frame with the default transform and returns its sequence number.
    pub fn queue_frame(&self, width: u32, height: u32, pixels: Vec<u8>) -> Result<u64, SurfaceError> {
        self.queue_frame_with_transform(width, height, pixels, SoftwareFrame::default_transform())
    }

    /// Queues a frame, replacing any frame not yet latched, and fires the
    /// frame-available listener.
    pub fn queue_frame_with_transform(
        &self,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        transform: Mat4,
    ) -> Result<u64, SurfaceError> {
        let shared = &self.shared;
        if shared.released.load(Ordering::Acquire) {
            return Err(SurfaceError::Released);
        }
        let expected = rgba_byte_len(width, height);
        if width == 0 || height == 0 || expected != Some(pixels.len()) {
            return Err(SurfaceError::InvalidFrame {
                width,
                height,
                len: pixels.len(),
            });
        }

        let sequence = shared.next_sequence.fetch_add(1, Ordering::SeqCst);
        let replaced = shared.latest.send(SoftwareFrame {
            width,
            height,
            pixels,
            sequence,
            transform,
        });
        if replaced {
            shared.overwritten.fetch_add(1, Ordering::Relaxed);
            trace!("Frame {} replaced an unlatched frame", sequence);
        }

        self.fire_listener();
        Ok(sequence)
    }

    pub fn default_buffer_size(&self) -> (u32, u32) {
        self.shared.default_size
    }

    /// Frames replaced before the consumer latched them.
    pub fn overwritten_frames(&self) -> u64 {
        self.shared.overwritten.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    fn fire_listener(&self) {
        let (listener, handler) = {
            let registration = self.shared.listener.lock();
            match registration.as_ref() {
                Some(r) => (r.listener.clone(), r.handler.clone()),
                None => return,
            }
        };

        match (self.shared.delivery, handler) {
            (FrameDelivery::Handler, Some(handler)) => {
                handler.post(move || listener());
            }
            _ => listener(),
        }
    }
}

/// Consumer side: latches queued frames into the external texture.
pub struct SoftwareSurface {
    texture: TextureId,
    shared: Arc<ProducerShared>,
    transform: Mat4,
    latched: Option<u64>,
}

impl fmt::Debug for SoftwareSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSurface")
            .field("texture", &self.texture)
            .field("latched", &self.latched)
            .finish()
    }
}

impl SoftwareSurface {
    /// Sequence number of the frame currently in the texture.
    pub fn latched_sequence(&self) -> Option<u64> {
        self.latched
    }
}

impl PlatformSurface for SoftwareSurface {
    type Producer = SoftwareProducer;

    fn producer(&self) -> SoftwareProducer {
        SoftwareProducer {
            shared: self.shared.clone(),
        }
    }

    fn set_on_frame_available(
        &mut self,
        listener: FrameAvailableListener,
        handler: Option<NotifyHandle>,
    ) {
        *self.shared.listener.lock() = Some(Registration { listener, handler });
    }

    fn update_tex_image(&mut self, gpu: &mut dyn Gpu) -> Result<(), SurfaceError> {
        if self.shared.released.load(Ordering::Acquire) {
            return Err(SurfaceError::Released);
        }

        // Nothing new: the texture keeps the previously latched frame.
        let Some(frame) = self.shared.latest.take() else {
            return Ok(());
        };

        gpu.upload(self.texture, frame.width, frame.height, &frame.pixels)?;
        self.transform = frame.transform;
        self.latched = Some(frame.sequence);
        Ok(())
    }

    fn transform_matrix(&self) -> Mat4 {
        self.transform
    }

    fn release(&mut self) {
        self.shared.released.store(true, Ordering::Release);
        self.shared.listener.lock().take();
        self.shared.latest.clear();
    }
}
