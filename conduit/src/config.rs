use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::gpu::MAX_TEXTURE_DIMENSION;

/// Construction-time settings of an [`ImageProcessor`](crate::ImageProcessor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Default buffer size of the render surface.
    pub source_width: u32,
    pub source_height: u32,
    /// How long `start()` waits for the worker. `None` waits until it runs
    /// or fails.
    pub start_timeout_ms: Option<u64>,
    /// Mirror incoming frames vertically while compositing.
    pub flip_vertical: bool,
    pub worker_thread_name: String,
    pub notify_thread_name: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            source_width: 1280,
            source_height: 720,
            start_timeout_ms: None,
            flip_vertical: true,
            worker_thread_name: "ProcessingTask".to_string(),
            notify_thread_name: "OnFrameAvailable".to_string(),
        }
    }
}

impl ProcessorConfig {
    pub fn with_source_size(source_width: u32, source_height: u32) -> Self {
        Self {
            source_width,
            source_height,
            ..Self::default()
        }
    }

    pub fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |edge: u32| (1..=MAX_TEXTURE_DIMENSION).contains(&edge);
        if !in_range(self.source_width) || !in_range(self.source_height) {
            return Err(Error::InvalidArgument(format!(
                "source size must be within 1..={} per edge, got {}x{}",
                MAX_TEXTURE_DIMENSION,
                self.source_width, self.source_height
            )));
        }
        if self.worker_thread_name.is_empty() || self.notify_thread_name.is_empty() {
            return Err(Error::InvalidArgument("thread names must not be empty".into()));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
