/// BLE peripheral module
///
/// - **database**: neighbor registry keyed by transport address
/// - **sharing**: selection of recently seen payloads to relay to a peer
/// - **gatt**: service definition, signal codec and GATT callback handling
/// - **platform**: traits a platform radio stack implements
/// - **queue**: serial worker for radio mutations
/// - **transmitter**: advertising and GATT server lifecycle
///
/// Radio hardware stays behind the `platform` traits, so everything here is
/// testable without an adapter.

pub mod database;
pub mod gatt;
pub mod platform;
pub mod queue;
pub mod sharing;
pub mod transmitter;

// Re-export commonly used types
pub use database::{BleDatabase, BleDevice, BleDeviceSnapshot};
pub use gatt::{
    ConnectionState, GattCharacteristic, GattError, GattResponder, GattResponse,
    GattServerHandler, GattService, GattStatus, SignalData, SignalDecodeError,
};
pub use platform::{
    AdvertiseData, AdvertiseError, AdvertiseSettings, BluetoothStateSource, PeripheralRadio,
    PlatformError,
};
pub use queue::{OperationQueue, QueueError};
pub use sharing::{PayloadSharingData, PayloadSharingSelector};
pub use transmitter::{BleTransmitter, TransmitterError, TransmitterState};
