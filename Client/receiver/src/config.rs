use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tunables of a streaming session. Field names follow snake case; the
/// capitalised keys of older gallery config files are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub manifest_url: String,
    /// Worker threads of the fetch runtime.
    pub fetch_threads: usize,
    /// Threads per tile decoder; 0 spreads the available cores over the tiles.
    #[serde(alias = "DecodeCapacity")]
    pub decoder_concurrency: usize,
    /// How long a tile waits on its full queue before re-checking cancellation.
    pub write_timeout_ms: u64,
    /// Quality drop per tile of distance from the field of view.
    #[serde(alias = "PredictFactor")]
    pub predict_degrade_factor: f64,
}

fn available_cores() -> usize {
    std::thread::available_parallelism().map_or(1, |cores| cores.get())
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            manifest_url: String::new(),
            fetch_threads: available_cores(),
            decoder_concurrency: 0,
            write_timeout_ms: 80,
            predict_degrade_factor: 1.0,
        }
    }
}

impl SessionConfig {
    pub fn with_manifest_url(manifest_url: &str) -> Self {
        Self {
            manifest_url: manifest_url.to_string(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }

    pub fn resolved_fetch_threads(&self) -> usize {
        self.fetch_threads.max(1)
    }

    pub fn resolved_decoder_concurrency(&self, tiles: usize) -> usize {
        match self.decoder_concurrency {
            0 => (available_cores() / tiles.max(1)).max(1),
            threads => threads,
        }
    }
}
