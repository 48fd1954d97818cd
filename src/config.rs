use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::chm::DEFAULT_PROBE_INTERVAL;
use crate::error::{GicsError, Result};

/// Whether the VALUE stream may use the shared recency dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    #[default]
    On,
    Off,
}

/// Runtime configuration of an [`Encoder`](crate::Encoder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Identifies the run in logs and in the anomaly report.
    pub run_id: String,
    pub context_mode: ContextMode,
    /// Blocks between recovery probes while a stream is quarantined.
    pub probe_interval: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            run_id: generate_run_id(),
            context_mode: ContextMode::On,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

impl EncoderConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_interval == 0 {
            return Err(GicsError::Config("probe_interval must be at least 1".into()));
        }
        if self.run_id.is_empty() {
            return Err(GicsError::Config("run_id must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_context_mode(mut self, mode: ContextMode) -> Self {
        self.context_mode = mode;
        self
    }

    pub fn with_probe_interval(mut self, probe_interval: u32) -> Self {
        self.probe_interval = probe_interval;
        self
    }
}

/// `run_<unix millis>_<5 hex digits>`
pub fn generate_run_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: u32 = rand::random::<u32>() & 0xF_FFFF;
    format!("run_{millis}_{suffix:05x}")
}
