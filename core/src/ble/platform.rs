//! Radio-stack seam
//!
//! The engine never talks to a Bluetooth stack directly. Platform bridges
//! implement these traits and forward inbound GATT callbacks to
//! [`GattServerHandler`](super::gatt::GattServerHandler).

use super::gatt::{GattServerHandler, GattService};
use crate::datatype::BluetoothState;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Advertising interval/latency trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseTxPower {
    UltraLow,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub connectable: bool,
    /// Zero means advertise until stopped
    pub timeout: Duration,
    pub tx_power: AdvertiseTxPower,
}

impl AdvertiseSettings {
    /// Low power, connectable, never expires
    pub fn low_power_connectable() -> Self {
        Self {
            mode: AdvertiseMode::LowPower,
            connectable: true,
            timeout: Duration::ZERO,
            tx_power: AdvertiseTxPower::Low,
        }
    }
}

/// Advertisement content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseData {
    pub service_uuids: Vec<Uuid>,
    pub include_device_name: bool,
    pub include_tx_power_level: bool,
}

impl AdvertiseData {
    /// Announce `service_uuid` and nothing else
    pub fn service_only(service_uuid: Uuid) -> Self {
        Self {
            service_uuids: vec![service_uuid],
            include_device_name: false,
            include_tx_power_level: false,
        }
    }
}

/// Advertising failures reported by the stack
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseError {
    #[error("Advertise data too large")]
    DataTooLarge,
    #[error("Too many advertisers")]
    TooManyAdvertisers,
    #[error("Advertising already started")]
    AlreadyStarted,
    #[error("Internal advertising error")]
    InternalError,
    #[error("Advertising not supported")]
    FeatureUnsupported,
    #[error("Unknown advertising error ({0})")]
    Unknown(i32),
}

impl AdvertiseError {
    /// Map a platform failure code
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AdvertiseError::DataTooLarge,
            2 => AdvertiseError::TooManyAdvertisers,
            3 => AdvertiseError::AlreadyStarted,
            4 => AdvertiseError::InternalError,
            5 => AdvertiseError::FeatureUnsupported,
            other => AdvertiseError::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AdvertiseError::DataTooLarge => 1,
            AdvertiseError::TooManyAdvertisers => 2,
            AdvertiseError::AlreadyStarted => 3,
            AdvertiseError::InternalError => 4,
            AdvertiseError::FeatureUnsupported => 5,
            AdvertiseError::Unknown(code) => *code,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,
    #[error("GATT server unavailable: {0}")]
    GattServerUnavailable(String),
    #[error("Advertising failed: {0}")]
    Advertise(#[from] AdvertiseError),
}

/// Observable adapter power state
pub trait BluetoothStateSource: Send + Sync {
    fn bluetooth_state(&self) -> BluetoothState;
}

/// Peripheral side of a Bluetooth LE stack
///
/// Called only from the transmitter's serial worker, except the capability
/// and power-state probes.
pub trait PeripheralRadio: BluetoothStateSource {
    /// Whether the adapter can advertise as a peripheral
    fn is_multiple_advertisement_supported(&self) -> bool;

    /// Open a GATT server; inbound callbacks go to `handler`
    fn open_gatt_server(&self, handler: Arc<GattServerHandler>) -> Result<(), PlatformError>;

    /// Drop every central connected to the open GATT server
    fn cancel_connections(&self);

    fn clear_services(&self);

    fn add_service(&self, service: &GattService) -> Result<(), PlatformError>;

    /// Clear services and close the GATT server, if one is open
    fn close_gatt_server(&self);

    fn start_advertising(
        &self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
    ) -> Result<(), AdvertiseError>;

    /// Stop advertising, if started
    fn stop_advertising(&self);
}

impl fmt::Display for AdvertiseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvertiseMode::LowPower => write!(f, "lowPower"),
            AdvertiseMode::Balanced => write!(f, "balanced"),
            AdvertiseMode::LowLatency => write!(f, "lowLatency"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SERVICE_UUID;

    #[test]
    fn test_advertise_profile() {
        let settings = AdvertiseSettings::low_power_connectable();
        assert_eq!(settings.mode, AdvertiseMode::LowPower);
        assert!(settings.connectable);
        assert_eq!(settings.timeout, Duration::ZERO);
        assert_eq!(settings.tx_power, AdvertiseTxPower::Low);

        let data = AdvertiseData::service_only(SERVICE_UUID);
        assert_eq!(data.service_uuids, vec![SERVICE_UUID]);
        assert!(!data.include_device_name);
        assert!(!data.include_tx_power_level);
    }

    #[test]
    fn test_advertise_error_codes() {
        for code in 1..=5 {
            assert_eq!(AdvertiseError::from_code(code).code(), code);
        }
        assert_eq!(AdvertiseError::from_code(42), AdvertiseError::Unknown(42));
        assert_eq!(AdvertiseError::from_code(3), AdvertiseError::AlreadyStarted);
    }
}
