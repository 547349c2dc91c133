//! Value types shared across the sensor engine.

pub mod int;
pub mod proximity;

pub use int::{Int32, UInt16};
pub use proximity::{Calibration, Proximity, ProximityMeasurementUnit, Rssi};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Stable identifier of a remote device.
///
/// Minted once when the device is first seen and never derived from the
/// transport address, so it survives address rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetIdentifier(Uuid);

impl TargetIdentifier {
    /// Mint a fresh random identifier
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-level address of a peer (volatile, rotates on some platforms)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// PAYLOAD DATA
// ============================================================================

/// Identity payload bytes broadcast by a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadData(Vec<u8>);

impl PayloadData {
    pub fn new(value: Vec<u8>) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short hex form used in logs
    pub fn short_name(&self) -> String {
        let end = self.0.len().min(6);
        hex::encode(&self.0[..end])
    }
}

impl From<Vec<u8>> for PayloadData {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for PayloadData {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl fmt::Display for PayloadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_name())
    }
}

/// Time for which a payload is requested from the supplier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTimestamp(pub SystemTime);

impl PayloadTimestamp {
    pub fn now() -> Self {
        Self(SystemTime::now())
    }
}

impl Default for PayloadTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

// ============================================================================
// CLASSIFICATIONS
// ============================================================================

/// Power state reported by the Bluetooth adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BluetoothState {
    PoweredOn,
    PoweredOff,
    Unsupported,
    Unknown,
}

impl fmt::Display for BluetoothState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BluetoothState::PoweredOn => write!(f, "poweredOn"),
            BluetoothState::PoweredOff => write!(f, "poweredOff"),
            BluetoothState::Unsupported => write!(f, "unsupported"),
            BluetoothState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Platform a remote device runs on
///
/// iOS devices cannot be discovered by scans while in the background, which is
/// why their payloads are worth relaying; Android devices always can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceOperatingSystem {
    Ios,
    Android,
    #[default]
    Unknown,
}

impl fmt::Display for DeviceOperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceOperatingSystem::Ios => write!(f, "ios"),
            DeviceOperatingSystem::Android => write!(f, "android"),
            DeviceOperatingSystem::Unknown => write!(f, "unknown"),
        }
    }
}

/// Sensor that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorType {
    Ble,
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::Ble => write!(f, "BLE"),
        }
    }
}
