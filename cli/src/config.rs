// Configuration management for the proxima CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/proxima/config.json
// - Linux: ~/.config/proxima/config.json
// - Windows: %APPDATA%\proxima\config.json
//
// `--config <FILE>` overrides the location.

use anyhow::{Context, Result};
use proxima_core::SensorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Engine configuration handed to the transmitter
    pub sensor: SensorConfig,

    /// Defaults for `proxima simulate`
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of simulated centrals
    pub centrals: usize,

    /// Connect/write/read/disconnect cycles per central
    pub rounds: usize,

    /// ATT MTU negotiated by every central (one read chunk is MTU - 1 bytes)
    pub mtu: usize,

    /// Identity payload size of every simulated device
    pub payload_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            centrals: 4,
            rounds: 3,
            mtu: 23,
            payload_size: 129,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensor: SensorConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("proxima");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Config file path: `over` if given, else the platform default
    pub fn config_file(over: Option<&Path>) -> Result<PathBuf> {
        match over {
            Some(path) => Ok(path.to_path_buf()),
            None => Ok(Self::config_dir()?.join("config.json")),
        }
    }

    /// Load config from file, or create default if not exists
    pub fn load(over: Option<&Path>) -> Result<Self> {
        let config_file = Self::config_file(over)?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(over)?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, over: Option<&Path>) -> Result<()> {
        self.validate()?;
        let config_file = Self::config_file(over)?;
        if let Some(parent) = config_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.sensor.validate().context("Invalid sensor configuration")?;
        if self.simulation.mtu < 2 {
            anyhow::bail!("simulation.mtu must be at least 2");
        }
        if self.simulation.payload_size == 0 {
            anyhow::bail!("simulation.payload_size must be positive");
        }
        Ok(())
    }

    /// Set a config value (not saved)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "payload_sharing_time_interval_secs" => {
                self.sensor.payload_sharing_time_interval_secs =
                    value.parse().context("Invalid number of seconds")?;
            }
            "payload_sharing_max_bytes" => {
                self.sensor.payload_sharing_max_bytes =
                    value.parse().context("Invalid byte count")?;
            }
            "centrals" => {
                self.simulation.centrals = value.parse().context("Invalid number")?;
            }
            "rounds" => {
                self.simulation.rounds = value.parse().context("Invalid number")?;
            }
            "mtu" => {
                self.simulation.mtu = value.parse().context("Invalid MTU")?;
            }
            "payload_size" => {
                self.simulation.payload_size = value.parse().context("Invalid byte count")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.validate()
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("service_uuid".to_string(), self.sensor.service_uuid.to_string()),
            (
                "signal_characteristic_uuid".to_string(),
                self.sensor.signal_characteristic_uuid.to_string(),
            ),
            (
                "payload_characteristic_uuid".to_string(),
                self.sensor.payload_characteristic_uuid.to_string(),
            ),
            (
                "payload_sharing_characteristic_uuid".to_string(),
                self.sensor.payload_sharing_characteristic_uuid.to_string(),
            ),
            (
                "payload_sharing_time_interval_secs".to_string(),
                self.sensor.payload_sharing_time_interval_secs.to_string(),
            ),
            (
                "payload_sharing_max_bytes".to_string(),
                self.sensor.payload_sharing_max_bytes.to_string(),
            ),
            ("centrals".to_string(), self.simulation.centrals.to_string()),
            ("rounds".to_string(), self.simulation.rounds.to_string()),
            ("mtu".to_string(), self.simulation.mtu.to_string()),
            ("payload_size".to_string(), self.simulation.payload_size.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sensor, SensorConfig::default());
        assert_eq!(config.simulation.mtu, 23);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_creates_default_at_override() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("proxima.json");

        let config = Config::load(Some(&path)).unwrap();

        assert!(path.exists());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_set_then_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxima.json");

        let mut config = Config::load(Some(&path)).unwrap();
        config.set("payload_sharing_max_bytes", "129").unwrap();
        config.set("centrals", "9").unwrap();
        config.save(Some(&path)).unwrap();

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.get("payload_sharing_max_bytes").as_deref(), Some("129"));
        assert_eq!(reloaded.simulation.centrals, 9);
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("payload_sharing_time_interval_secs", "0").is_err());
        assert!(config.set("mtu", "abc").is_err());
        assert!(config.set("listen_port", "1").is_err());
        assert!(config.get("listen_port").is_none());
    }
}
