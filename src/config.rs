use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Sleep `loop_delay_ms` after every turn instead of only yielding.
    #[serde(default)]
    pub slow_motion: bool,
    #[serde(default = "default_loop_delay_ms")]
    pub loop_delay_ms: u64,
    /// Default record limit of observers, 0 keeps every record.
    #[serde(default)]
    pub record_limit: usize,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_ignore_special_places")]
    pub ignore_special_places: bool,
    #[serde(default = "default_net_name")]
    pub net_name: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            slow_motion: false,
            loop_delay_ms: default_loop_delay_ms(),
            record_limit: 0,
            verbose: false,
            ignore_special_places: default_ignore_special_places(),
            net_name: default_net_name(),
        }
    }
}

impl SimConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SimConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Delay between two turns of an actor loop.
    pub fn loop_delay(&self) -> Duration {
        if self.slow_motion {
            Duration::from_millis(self.loop_delay_ms)
        } else {
            Duration::ZERO
        }
    }
}

fn default_loop_delay_ms() -> u64 {
    500
}

fn default_ignore_special_places() -> bool {
    true
}

fn default_net_name() -> String {
    "Net".to_string()
}
