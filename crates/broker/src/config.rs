use std::path::PathBuf;

use chute_log::{FlushPolicy, Options};
use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};

/// The recognized configuration surface of the broker core.
///
/// Loading these values from a file (or wherever else) is the outer layer's
/// job; this type only defines the shape, the defaults, and the validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Root directory; topic data lives under `<data_directory>/topics/`.
    pub data_directory: PathBuf,
    /// Size in bytes past which a segment is sealed.
    pub max_segment_size: u64,
    /// Largest accepted payload, in bytes.
    pub max_message_size: usize,
    /// Age in milliseconds past which sealed segments may be deleted.
    pub retention_period_ms: u64,
    /// Durability policy applied to every topic log. Flattened, so the
    /// recognized keys are `flush_strategy`, `force_metadata` and
    /// `enable_page_cache`.
    #[serde(flatten)]
    pub flush: FlushPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let defaults = Options::default();
        Self {
            data_directory: PathBuf::from("./data"),
            max_segment_size: defaults.max_segment_size,
            max_message_size: defaults.max_message_size,
            retention_period_ms: defaults.retention_period_ms,
            flush: defaults.flush,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        self.flush.validate().map_err(BrokerError::Log)?;
        Ok(())
    }

    /// The per-topic log options this configuration implies.
    pub fn log_options(&self) -> Options {
        Options {
            max_segment_size: self.max_segment_size,
            max_message_size: self.max_message_size,
            retention_period_ms: self.retention_period_ms,
            flush: self.flush,
        }
    }
}
