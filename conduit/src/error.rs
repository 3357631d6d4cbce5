use thiserror::Error;

use crate::gpu::GpuError;
use crate::surface::SurfaceError;

/// Worker phase in which a fatal failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum LifecyclePhase {
    #[strum(to_string = "start")]
    Start,
    #[strum(to_string = "stop")]
    Stop,
}

/// Errors of the pipeline.
///
/// Invalid session state comes in two variants: [`Error::InvalidState`] for
/// use-after-release and lifecycle misuse, and [`Error::Status`] when the
/// processing routine answers with a failure code. Match both with
/// [`Error::is_invalid_state`] rather than on `InvalidState` alone.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// See also [`Error::Status`], which callers treat the same way.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A collaborator reported a failure status code on a synchronous call.
    /// Counts as invalid state; keeps the operation and code for logging.
    #[error("{op} failed with status {code}")]
    Status { op: &'static str, code: i32 },

    /// Latching or compositing a single frame failed; the frame is skipped.
    #[error("Draw abandoned: {0}")]
    TransientDraw(String),

    /// The worker failed while starting or stopping and its thread has exited.
    #[error("Worker {phase} failed: {source}")]
    FatalLifecycle {
        phase: LifecyclePhase,
        #[source]
        source: Box<Error>,
    },

    #[error("Worker thread panicked: {0}")]
    WorkerPanic(String),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    /// Thread spawn or config file failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn fatal(phase: LifecyclePhase, source: Error) -> Self {
        match source {
            already @ Error::FatalLifecycle { .. } => already,
            source => Error::FatalLifecycle {
                phase,
                source: Box::new(source),
            },
        }
    }

    /// True for collaborator status failures and use-after-release, the two
    /// conditions callers see as an invalid session state.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::InvalidState(_) | Error::Status { .. })
    }

    /// True when the GPU context is gone, so no later request can succeed.
    pub fn is_context_lost(&self) -> bool {
        matches!(
            self,
            Error::Gpu(GpuError::ContextLost(_))
                | Error::Surface(SurfaceError::Gpu(GpuError::ContextLost(_)))
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::FatalLifecycle { .. } | Error::WorkerPanic(_))
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Turns a `0 == success` status code into a `Result`.
pub(crate) fn check_status(op: &'static str, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(Error::Status { op, code })
    }
}
