use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// DMX512 minimum break length.
pub const MIN_BREAK: Duration = Duration::from_micros(88);
/// DMX512 minimum mark-after-break length.
pub const MIN_MARK_AFTER_BREAK: Duration = Duration::from_micros(8);

/// Cadence and line timing of the transmit loop. Stored as microseconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameTiming {
    pub frame_interval_us: u64,
    pub break_us: u64,
    pub mark_after_break_us: u64,
    pub poll_interval_us: u64,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self {
            frame_interval_us: 1_000_000 / 30,
            break_us: 1_000,
            mark_after_break_us: 1_000,
            poll_interval_us: 1_000,
        }
    }
}

impl FrameTiming {
    /// Default timing at a different refresh rate.
    pub fn with_rate_hz(rate_hz: f64) -> Result<Self> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(EngineError::InvalidTiming(format!(
                "frame rate must be positive, got {rate_hz}"
            )));
        }
        let timing = Self {
            frame_interval_us: (1_000_000.0 / rate_hz) as u64,
            ..Self::default()
        };
        timing.validate()?;
        Ok(timing)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(self.frame_interval_us)
    }

    pub fn break_duration(&self) -> Duration {
        Duration::from_micros(self.break_us)
    }

    pub fn mark_after_break(&self) -> Duration {
        Duration::from_micros(self.mark_after_break_us)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn validate(&self) -> Result<()> {
        if self.break_duration() < MIN_BREAK {
            return Err(EngineError::InvalidTiming(format!(
                "break {}us is below the 88us minimum",
                self.break_us
            )));
        }
        if self.mark_after_break() < MIN_MARK_AFTER_BREAK {
            return Err(EngineError::InvalidTiming(format!(
                "mark-after-break {}us is below the 8us minimum",
                self.mark_after_break_us
            )));
        }
        if self.frame_interval_us == 0 {
            return Err(EngineError::InvalidTiming("frame interval is zero".into()));
        }
        if self.poll_interval_us == 0 {
            return Err(EngineError::InvalidTiming("poll interval is zero".into()));
        }
        Ok(())
    }
}
