// Proxima Core: BLE proximity peripheral
//
// Advertises the sensor service, records who wrote to it, and relays
// recently seen payloads to centrals that cannot see each other.
#![allow(clippy::empty_line_after_doc_comments)]

pub mod ble;
pub mod config;
pub mod datatype;
pub mod delegate;
pub mod payload;

pub use ble::{
    BleDatabase, BleDevice, BleTransmitter, ConnectionState, GattResponder, GattResponse,
    GattServerHandler, GattStatus, PayloadSharingData, PeripheralRadio, TransmitterState,
};
pub use config::{ConfigError, SensorConfig};
pub use datatype::{
    BluetoothState, DeviceAddress, DeviceOperatingSystem, Int32, PayloadData, PayloadTimestamp,
    Proximity, Rssi, SensorType, TargetIdentifier, UInt16,
};
pub use delegate::{DelegateRegistry, SensorDelegate};
pub use payload::{FixedPayloadDataSupplier, PayloadDataSupplier};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
