//! Engine tuning constants, loadable from TOML.
//!
//! Every field has a default, so a partial file (or an empty one) is valid:
//!
//! ```
//! let config = stagebus::EngineConfig::from_toml_str("schedule_lead = 0.2").unwrap();
//! assert_eq!(config.schedule_lead, 0.2);
//! assert_eq!(config.autotune_rate_hz, 20.0);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::graph::BLOCK_FRAMES;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between "now" and the shared start time of a play segment.
    pub schedule_lead: f64,
    /// End-of-song poll interval in seconds.
    pub end_poll_interval: f64,
    /// The song counts as ended this many seconds before its duration.
    pub end_threshold: f64,
    /// Polling must have run this long before it may end the song.
    pub min_monitoring: f64,
    /// Delay before acting on every clip reaching its natural end.
    pub clip_end_debounce: f64,
    pub autotune_rate_hz: f64,
    /// Maximum age of a backing-stem pitch estimate, in seconds.
    pub reference_freshness: f64,
    pub mic_sample_rate: u32,
    /// Wait between tearing down and rebuilding on `reinitialize`.
    pub settle_delay_ms: u64,
    /// Seconds rendered ahead of each device's playback position. Must stay
    /// below `schedule_lead` or segment starts land in audio already queued.
    pub render_ahead_secs: f64,
    /// Duration of master and override gain ramps.
    pub gain_ramp_secs: f32,
    /// Linear gain after the pitch shifter.
    pub makeup_gain: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            schedule_lead: 0.1,
            end_poll_interval: 0.25,
            end_threshold: 0.2,
            min_monitoring: 2.0,
            clip_end_debounce: 0.010,
            autotune_rate_hz: 20.0,
            reference_freshness: 0.1,
            mic_sample_rate: 48_000,
            settle_delay_ms: 500,
            render_ahead_secs: 0.04,
            gain_ramp_secs: 0.05,
            makeup_gain: 1.5,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.autotune_rate_hz > 0.0) {
            return Err(EngineError::Config("autotune_rate_hz must be positive".into()));
        }
        if !(self.end_poll_interval > 0.0) {
            return Err(EngineError::Config("end_poll_interval must be positive".into()));
        }
        if self.mic_sample_rate == 0 {
            return Err(EngineError::Config("mic_sample_rate must be positive".into()));
        }
        if !(self.render_ahead_secs > 0.0) {
            return Err(EngineError::Config("render_ahead_secs must be positive".into()));
        }
        if !(self.render_ahead_secs < self.schedule_lead) {
            return Err(EngineError::Config("render_ahead_secs must be shorter than schedule_lead".into()));
        }
        Ok(())
    }

    /// Render-ahead at `sample_rate`, never less than one block.
    pub fn render_ahead_frames(&self, sample_rate: u32) -> usize {
        ((self.render_ahead_secs * sample_rate as f64).ceil() as usize).max(BLOCK_FRAMES)
    }

    pub fn autotune_interval(&self) -> f64 {
        1.0 / self.autotune_rate_hz
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
