//! Engine configuration
//!
//! All timing constants of the engine live here. Defaults match the values
//! the engine was tuned with; a JSON file may override any subset of them.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Maximum duration of the in-memory capture buffer (10 s)
pub const DEFAULT_BUFFER_DURATION_US: u64 = 10 * 1_000_000;

/// Interval between device notifications (100 ms)
pub const DEFAULT_NOTIFY_INTERVAL_MS: u64 = 100;

/// Size of the level calculation window (0.1 s)
pub const DEFAULT_LEVEL_WINDOW_US: u64 = 100_000;

/// Number of frames handed to the spectrum analyser per calculation
pub const DEFAULT_SPECTRUM_LENGTH_SAMPLES: usize = 4096;

/// Lower edge of the displayed frequency band range
pub const DEFAULT_SPECTRUM_LOW_FREQ: f64 = 0.0;

/// Upper edge of the displayed frequency band range
pub const DEFAULT_SPECTRUM_HIGH_FREQ: f64 = 1000.0;

/// Number of display bands the spectrum is reduced to
pub const DEFAULT_SPECTRUM_NUM_BANDS: usize = 10;

/// Lookahead kept in the sliding window for waveform rendering (0.5 s)
pub const DEFAULT_WAVEFORM_WINDOW_US: u64 = 500_000;

/// Tunable engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub buffer_duration_us: u64,
    pub notify_interval_ms: u64,
    pub level_window_us: u64,
    pub spectrum_length_samples: usize,
    pub spectrum_low_freq: f64,
    pub spectrum_high_freq: f64,
    pub spectrum_num_bands: usize,
    pub waveform_window_us: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_duration_us: DEFAULT_BUFFER_DURATION_US,
            notify_interval_ms: DEFAULT_NOTIFY_INTERVAL_MS,
            level_window_us: DEFAULT_LEVEL_WINDOW_US,
            spectrum_length_samples: DEFAULT_SPECTRUM_LENGTH_SAMPLES,
            spectrum_low_freq: DEFAULT_SPECTRUM_LOW_FREQ,
            spectrum_high_freq: DEFAULT_SPECTRUM_HIGH_FREQ,
            spectrum_num_bands: DEFAULT_SPECTRUM_NUM_BANDS,
            waveform_window_us: DEFAULT_WAVEFORM_WINDOW_US,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file
    ///
    /// Fields missing from the file keep their default values.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| EngineError::FileNotFound {
            path: path.display().to_string(),
            source: Some(e),
        })?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values describe a usable engine
    pub fn validate(&self) -> Result<()> {
        if self.buffer_duration_us == 0 {
            return Err(invalid("buffer_duration_us must be positive"));
        }
        if self.notify_interval_ms == 0 {
            return Err(invalid("notify_interval_ms must be positive"));
        }
        if self.level_window_us == 0 {
            return Err(invalid("level_window_us must be positive"));
        }
        if !self.spectrum_length_samples.is_power_of_two() || self.spectrum_length_samples < 2 {
            return Err(invalid(&format!(
                "spectrum_length_samples must be a power of two, got {}",
                self.spectrum_length_samples
            )));
        }
        if self.spectrum_low_freq < 0.0 || self.spectrum_low_freq >= self.spectrum_high_freq {
            return Err(invalid(&format!(
                "spectrum band range {}..{} Hz is empty",
                self.spectrum_low_freq, self.spectrum_high_freq
            )));
        }
        if self.spectrum_num_bands == 0 {
            return Err(invalid("spectrum_num_bands must be positive"));
        }
        Ok(())
    }

    /// Notify interval expressed in microseconds
    pub fn notify_interval_us(&self) -> u64 {
        self.notify_interval_ms * 1000
    }
}

fn invalid(reason: &str) -> EngineError {
    EngineError::InvalidConfig {
        reason: reason.to_string(),
    }
}
