use anyhow::{Context, Result};
use dmx_engine::FrameTiming;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adapter to drive; the first enumerated one when unset.
    pub serial_number: Option<String>,
    /// How often `run` pushes a frame update into the engine.
    pub update_hz: f64,
    pub timing: FrameTiming,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_number: None,
            update_hz: 30.0,
            timing: FrameTiming::default(),
        }
    }
}

impl Config {
    /// Load from `path`, writing the defaults there first if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading config: {}", path.display()))?;
            let config: Config = serde_json::from_str(&contents)
                .with_context(|| format!("parsing config: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing config: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.update_period()?;
        self.timing.validate()?;
        Ok(())
    }

    /// Time between two frame updates pushed by `run`.
    pub fn update_period(&self) -> Result<Duration> {
        if !self.update_hz.is_finite() || self.update_hz <= 0.0 {
            anyhow::bail!("update_hz must be positive, got {}", self.update_hz);
        }
        Duration::try_from_secs_f64(1.0 / self.update_hz)
            .with_context(|| format!("update_hz {} is too small", self.update_hz))
    }
}
