pub use crate::config::ProcessorConfig;
pub use crate::error::{Error, Result};
pub use crate::fps::FrameRateCounter;
pub use crate::gpu::{Gpu, GpuFactory, GpuStats, SoftwareGpu};
pub use crate::processor::{
    FrameInput, FrameObserver, ImageProcessor, ProcessingRoutine, ResultChannel, ResultFrame,
    ResultFrameType, ResultPayload, ResultSink, SessionId, SessionState,
};
pub use crate::reference::ReferenceRoutine;
pub use crate::surface::{FrameDelivery, SoftwarePlatform, SoftwareProducer, SurfacePlatform};
