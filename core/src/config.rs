//! Sensor configuration
//!
//! Service and characteristic identifiers are shared constants: every
//! interoperating implementation must use the same values byte-for-byte.
//! Serialized to/from JSON and validated on every load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Primary service announced in advertisements
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x428132af_4746_42d3_801e_4572d65bfd9b);

/// Write-only characteristic receiving `[rssi: i32 LE][payload]` from centrals
pub const SIGNAL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xf617b813_092e_437a_8324_e09a80821a11);

/// Read-only characteristic exposing this device's identity payload
pub const PAYLOAD_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x3e98c0f8_8f05_4829_a121_43e38f8933e7);

/// Read-only characteristic exposing the relayed payload bundle
pub const PAYLOAD_SHARING_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x3f98c0f8_8f05_4829_a121_43e38f8933e7);

/// Only devices seen within this window are relayed (5 minutes)
pub const DEFAULT_PAYLOAD_SHARING_TIME_INTERVAL_SECS: u64 = 5 * 60;

/// Sharing bundle budget: two 129-byte payloads
pub const DEFAULT_PAYLOAD_SHARING_MAX_BYTES: usize = 2 * 129;

/// Largest value a single read response can carry (512 minus response overhead)
pub const MAX_SINGLE_RESPONSE_BYTES: usize = 510;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Peripheral sensor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub service_uuid: Uuid,
    pub signal_characteristic_uuid: Uuid,
    pub payload_characteristic_uuid: Uuid,
    pub payload_sharing_characteristic_uuid: Uuid,

    /// Recency window for relay candidates, in seconds
    pub payload_sharing_time_interval_secs: u64,

    /// Total byte budget of one sharing bundle
    pub payload_sharing_max_bytes: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            signal_characteristic_uuid: SIGNAL_CHARACTERISTIC_UUID,
            payload_characteristic_uuid: PAYLOAD_CHARACTERISTIC_UUID,
            payload_sharing_characteristic_uuid: PAYLOAD_SHARING_CHARACTERISTIC_UUID,
            payload_sharing_time_interval_secs: DEFAULT_PAYLOAD_SHARING_TIME_INTERVAL_SECS,
            payload_sharing_max_bytes: DEFAULT_PAYLOAD_SHARING_MAX_BYTES,
        }
    }
}

impl SensorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload_sharing_time_interval(&self) -> Duration {
        Duration::from_secs(self.payload_sharing_time_interval_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payload_sharing_time_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "payload_sharing_time_interval_secs must be > 0".to_string(),
            ));
        }

        if self.payload_sharing_max_bytes == 0
            || self.payload_sharing_max_bytes > MAX_SINGLE_RESPONSE_BYTES
        {
            return Err(ConfigError::Invalid(format!(
                "payload_sharing_max_bytes must be within 1..={}",
                MAX_SINGLE_RESPONSE_BYTES
            )));
        }

        let ids = [
            self.service_uuid,
            self.signal_characteristic_uuid,
            self.payload_characteristic_uuid,
            self.payload_sharing_characteristic_uuid,
        ];
        for (i, a) in ids.iter().enumerate() {
            if ids[i + 1..].contains(a) {
                return Err(ConfigError::Invalid(format!("Duplicate identifier {}", a)));
            }
        }

        Ok(())
    }

    /// Load configuration from JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    /// Save configuration to JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = self.to_json_string()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Convert to pretty JSON string
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        self.validate()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Create from JSON string
    pub fn from_json_string(json: &str) -> Result<Self, ConfigError> {
        let config: SensorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SensorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.payload_sharing_max_bytes, 258);
        assert_eq!(config.payload_sharing_time_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = SensorConfig::default();
        config.payload_sharing_time_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_budget_bounds() {
        let mut config = SensorConfig::default();
        config.payload_sharing_max_bytes = 0;
        assert!(config.validate().is_err());

        config.payload_sharing_max_bytes = MAX_SINGLE_RESPONSE_BYTES + 1;
        assert!(config.validate().is_err());

        config.payload_sharing_max_bytes = MAX_SINGLE_RESPONSE_BYTES;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_identifiers_rejected() {
        let mut config = SensorConfig::default();
        config.payload_sharing_characteristic_uuid = config.payload_characteristic_uuid;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_validates() {
        let config = SensorConfig::default();
        let json = config.to_json_string().unwrap();
        assert_eq!(SensorConfig::from_json_string(&json).unwrap(), config);

        let broken = json.replace("300", "0");
        assert!(SensorConfig::from_json_string(&broken).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.json");

        let mut config = SensorConfig::default();
        config.payload_sharing_max_bytes = 129;
        config.save(&path).unwrap();

        let loaded = SensorConfig::load(&path).unwrap();
        assert_eq!(loaded.payload_sharing_max_bytes, 129);
    }
}
