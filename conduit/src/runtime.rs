//! Process-wide state, initialized once on first use.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use common::log_setup::{setup_logging, LogConfig};
use tracing::debug;

#[derive(Debug)]
struct Runtime {
    next_session: AtomicU64,
}

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

fn runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        debug!("conduit runtime initialized");
        Runtime {
            next_session: AtomicU64::new(1),
        }
    })
}

/// Installs logging and initializes the runtime. Safe to call repeatedly;
/// only the first call configures logging.
pub fn init(log: &LogConfig) {
    setup_logging(log);
    runtime();
}

pub(crate) fn next_session_id() -> u64 {
    runtime().next_session.fetch_add(1, Ordering::Relaxed)
}
