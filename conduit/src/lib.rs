//! Hands GPU frames from a platform surface to an image processing routine.
//!
//! An [`ImageProcessor`] owns one routine session and, while started, one
//! worker thread holding the GPU context. The surface producer signals new
//! frames; the worker coalesces the signals, composites the latest frame into
//! a working texture of the requested size and hands it to the routine, whose
//! results flow back to a [`FrameObserver`].

pub mod compositor;
pub mod config;
pub mod error;
pub mod fps;
pub mod gpu;
pub mod notify;
pub mod prelude;
pub mod processor;
pub mod reference;
pub mod runtime;
pub mod surface;
pub mod worker;

#[cfg(test)]
mod tests;

pub use config::ProcessorConfig;
pub use error::{Error, LifecyclePhase, Result};
pub use processor::{
    FrameObserver, ImageProcessor, ImageProcessorBuilder, ProcessingRoutine, ResultFrameType,
    SessionState,
};
