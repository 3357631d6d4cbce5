use std::fmt;

use glam::Mat4;
use serde::{Deserialize, Serialize};

use super::bridge::ResultSink;
use crate::gpu::{Gpu, GpuResult, TextureId};
use crate::runtime;

/// Status returned by routines on success.
pub const STATUS_OK: i32 = 0;
/// Status for a frame that was accepted but not processed.
pub const STATUS_DROPPED: i32 = 1;
/// Status for an unsupported argument value.
pub const STATUS_INVALID_ARGUMENT: i32 = -22;

/// Which image the routine hands back with each result.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::FromRepr,
)]
#[repr(i32)]
pub enum ResultFrameType {
    /// The normalized input frame.
    Src = 0,
    /// The processed frame.
    Dst = 1,
    SrcWithOverlay = 2,
    DstWithOverlay = 3,
}

impl ResultFrameType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::from_repr(code)
    }

    pub fn has_overlay(self) -> bool {
        matches!(self, Self::SrcWithOverlay | Self::DstWithOverlay)
    }

    pub fn is_processed(self) -> bool {
        matches!(self, Self::Dst | Self::DstWithOverlay)
    }
}

/// Identifier of one routine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocates a process-unique id.
    pub fn next() -> Self {
        Self(runtime::next_session_id())
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// The processor's exclusive claim on a routine session. Not cloneable; the
/// session is released together with the processor.
#[derive(Debug, PartialEq, Eq)]
pub struct ProcessorHandle {
    session: SessionId,
}

impl ProcessorHandle {
    pub(crate) fn new(session: SessionId) -> Self {
        Self { session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }
}

/// The working texture as handed to [`ProcessingRoutine::process_frame`].
///
/// The texture is bound as the render target for the duration of the call.
pub struct FrameInput<'a> {
    gpu: &'a mut dyn Gpu,
    texture: TextureId,
    width: u32,
    height: u32,
    transform: Mat4,
}

impl fmt::Debug for FrameInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameInput")
            .field("texture", &self.texture)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl<'a> FrameInput<'a> {
    pub(crate) fn new(
        gpu: &'a mut dyn Gpu,
        texture: TextureId,
        (width, height): (u32, u32),
        transform: Mat4,
    ) -> Self {
        Self {
            gpu,
            texture,
            width,
            height,
            transform,
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Sampling transform of the source frame this input was composited from.
    pub fn source_transform(&self) -> &Mat4 {
        &self.transform
    }

    /// Reads the working texture as RGBA8 rows in framebuffer order, bottom
    /// row first. With `flip_vertical` set (the default) and a frame sampled
    /// through the default surface transform, that puts the frame's top row
    /// first; without the flip rows come out bottom-up.
    pub fn read_pixels(&mut self, out: &mut Vec<u8>) -> GpuResult<(u32, u32)> {
        self.gpu.read_pixels(out)
    }
}

/// External image processing routine.
///
/// Status codes follow the native convention: `0` is success, anything else
/// a failure, except [`STATUS_DROPPED`] from `process_frame`. Results are
/// delivered later, from any thread, through the [`ResultSink`] passed to
/// `create_session`.
pub trait ProcessingRoutine: Send + Sync + 'static {
    fn create_session(&self, sink: ResultSink) -> Option<SessionId>;

    fn start_session(&self, session: SessionId, width: u32, height: u32) -> i32;

    fn stop_session(&self, session: SessionId) -> i32;

    /// Called on the worker thread with the working texture bound.
    fn process_frame(&self, session: SessionId, input: &mut FrameInput<'_>) -> i32;

    fn set_result_frame_type(&self, session: SessionId, frame_type: i32) -> i32;

    /// The current result frame type code, negative on failure.
    fn result_frame_type(&self, session: SessionId) -> i32;

    fn release_session(&self, session: SessionId);
}
