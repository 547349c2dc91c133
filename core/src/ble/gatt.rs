/// GATT service definition and request handling for the sensor peripheral
///
/// One primary service with three characteristics:
/// - signal (write): a central reports `[rssi: i32 LE][its identity payload]`
/// - payload (read): this device's identity payload
/// - payload sharing (read): recently seen payloads relayed to the reader
///
/// Read values are computed once per physical connection and cached by
/// address, so chunked (offset) reads see one consistent value. The caches are
/// purged when the connection drops.

use super::database::BleDatabase;
use super::sharing::{PayloadSharingData, PayloadSharingSelector};
use crate::config::SensorConfig;
use crate::datatype::{
    DeviceAddress, Int32, PayloadData, PayloadTimestamp, Proximity, Rssi, SensorType, UInt16,
};
use crate::delegate::DelegateRegistry;
use crate::payload::PayloadDataSupplier;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Size of the RSSI prefix of a signal write
pub const SIGNAL_RSSI_SIZE: usize = 4;

/// GATT characteristic types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattCharacteristic {
    /// Write characteristic receiving RSSI and payload from centrals
    Signal,
    /// Read characteristic exposing this device's payload
    Payload,
    /// Read characteristic exposing relayed payloads
    PayloadSharing,
}

impl GattCharacteristic {
    /// Characteristic UUID under `config`
    pub fn uuid(&self, config: &SensorConfig) -> Uuid {
        match self {
            GattCharacteristic::Signal => config.signal_characteristic_uuid,
            GattCharacteristic::Payload => config.payload_characteristic_uuid,
            GattCharacteristic::PayloadSharing => config.payload_sharing_characteristic_uuid,
        }
    }

    pub fn from_uuid(uuid: &Uuid, config: &SensorConfig) -> Option<Self> {
        [
            GattCharacteristic::Signal,
            GattCharacteristic::Payload,
            GattCharacteristic::PayloadSharing,
        ]
        .into_iter()
        .find(|c| c.uuid(config) == *uuid)
    }

    pub fn properties(&self) -> CharacteristicProperties {
        match self {
            GattCharacteristic::Signal => CharacteristicProperties::Write,
            GattCharacteristic::Payload | GattCharacteristic::PayloadSharing => {
                CharacteristicProperties::Read
            }
        }
    }
}

impl fmt::Display for GattCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GattCharacteristic::Signal => write!(f, "signal"),
            GattCharacteristic::Payload => write!(f, "payload"),
            GattCharacteristic::PayloadSharing => write!(f, "payloadSharing"),
        }
    }
}

/// Access allowed on a characteristic (property and permission are the same here)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicProperties {
    Read,
    Write,
}

/// Characteristic as registered with the platform GATT server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristicDefinition {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Primary service as registered with the platform GATT server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristicDefinition>,
}

impl GattService {
    /// The sensor service: signal, payload and payload sharing, in that order
    pub fn sensor_service(config: &SensorConfig) -> Self {
        let characteristics = [
            GattCharacteristic::Signal,
            GattCharacteristic::Payload,
            GattCharacteristic::PayloadSharing,
        ]
        .into_iter()
        .map(|c| GattCharacteristicDefinition {
            uuid: c.uuid(config),
            properties: c.properties(),
        })
        .collect();

        Self {
            uuid: config.service_uuid,
            characteristics,
        }
    }
}

/// ATT status returned to the central
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    InvalidOffset,
    RequestNotSupported,
    Failure,
}

impl GattStatus {
    /// Status code as used by the platform stack
    pub fn code(&self) -> u16 {
        match self {
            GattStatus::Success => 0x00,
            GattStatus::RequestNotSupported => 0x06,
            GattStatus::InvalidOffset => 0x07,
            GattStatus::Failure => 0x101,
        }
    }
}

/// Response to a single read or write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattResponse {
    pub status: GattStatus,
    pub offset: UInt16,
    pub value: Vec<u8>,
}

impl GattResponse {
    fn success(offset: UInt16, value: Vec<u8>) -> Self {
        Self {
            status: GattStatus::Success,
            offset,
            value,
        }
    }

    fn error(status: GattStatus, offset: UInt16) -> Self {
        Self {
            status,
            offset,
            value: Vec::new(),
        }
    }
}

/// Platform hook for answering a request
pub trait GattResponder: Send + Sync {
    fn send_response(&self, address: &DeviceAddress, request_id: u32, response: GattResponse);
}

/// Connection state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Connecting,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "STATE_CONNECTED"),
            ConnectionState::Connecting => write!(f, "STATE_CONNECTING"),
            ConnectionState::Disconnecting => write!(f, "STATE_DISCONNECTING"),
            ConnectionState::Disconnected => write!(f, "STATE_DISCONNECTED"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalDecodeError {
    #[error("Signal data too short: {0} bytes, need at least 4")]
    TooShort(usize),
}

/// Errors for GATT operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    #[error("Invalid signal data: {0}")]
    InvalidSignal(#[from] SignalDecodeError),
    #[error("Write to non-writable characteristic {0}")]
    NotWritable(Uuid),
}

/// Decoded signal characteristic write: `[rssi: i32 LE][payload]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalData {
    pub rssi: Rssi,
    pub payload: PayloadData,
}

impl SignalData {
    pub fn decode(value: &[u8]) -> Result<Self, SignalDecodeError> {
        let rssi = Int32::from_le_slice(value).ok_or(SignalDecodeError::TooShort(value.len()))?;
        Ok(Self {
            rssi: Rssi::from(rssi),
            payload: PayloadData::from(&value[SIGNAL_RSSI_SIZE..]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SIGNAL_RSSI_SIZE + self.payload.len());
        bytes.extend_from_slice(&Int32::from(self.rssi.value()).to_le_bytes());
        bytes.extend_from_slice(self.payload.value());
        bytes
    }
}

/// GATT server callback logic, shared by every connection
pub struct GattServerHandler {
    config: SensorConfig,
    database: Arc<BleDatabase>,
    delegates: Arc<DelegateRegistry>,
    payload_data_supplier: Arc<dyn PayloadDataSupplier>,
    selector: PayloadSharingSelector,
    /// Per-connection payload, keyed by address
    payload_data: RwLock<HashMap<DeviceAddress, PayloadData>>,
    /// Per-connection sharing bundle, keyed by address
    payload_sharing_data: RwLock<HashMap<DeviceAddress, PayloadSharingData>>,
}

impl GattServerHandler {
    pub fn new(
        config: SensorConfig,
        database: Arc<BleDatabase>,
        delegates: Arc<DelegateRegistry>,
        payload_data_supplier: Arc<dyn PayloadDataSupplier>,
    ) -> Self {
        let selector = PayloadSharingSelector::from_config(&config);
        Self {
            config,
            database,
            delegates,
            payload_data_supplier,
            selector,
            payload_data: RwLock::new(HashMap::new()),
            payload_sharing_data: RwLock::new(HashMap::new()),
        }
    }

    /// Connect registers the central; disconnect drops its per-connection caches
    pub fn on_connection_state_change(&self, address: &DeviceAddress, state: ConnectionState) {
        debug!(%address, %state, "onConnectionStateChange");
        match state {
            ConnectionState::Connected => {
                self.database.device(address);
            }
            ConnectionState::Disconnected => {
                self.payload_data.write().remove(address);
                self.payload_sharing_data.write().remove(address);
            }
            ConnectionState::Connecting | ConnectionState::Disconnecting => {}
        }
    }

    /// Handle a characteristic write. Only the signal characteristic accepts writes.
    pub fn on_characteristic_write_request(
        &self,
        responder: &dyn GattResponder,
        address: &DeviceAddress,
        request_id: u32,
        characteristic: &Uuid,
        response_needed: bool,
        value: &[u8],
    ) {
        let device = self.database.device(address);
        let signal = if *characteristic == self.config.signal_characteristic_uuid {
            SignalData::decode(value).map_err(GattError::from)
        } else {
            Err(GattError::NotWritable(*characteristic))
        };

        let signal = match signal {
            Ok(signal) => signal,
            Err(e) => {
                warn!(central = %device, request_id, error = %e, "didReceiveWrite rejected");
                if response_needed {
                    responder.send_response(
                        address,
                        request_id,
                        GattResponse::error(GattStatus::Failure, UInt16::MIN),
                    );
                }
                return;
            }
        };

        let device = if signal.payload.is_empty() {
            device
        } else {
            self.database
                .associate_payload(address, signal.payload.clone(), SystemTime::now())
        };
        let target = device.identifier();
        let proximity = Proximity::from(signal.rssi);

        if response_needed {
            responder.send_response(
                address,
                request_id,
                GattResponse::success(UInt16::MIN, Vec::new()),
            );
        }

        debug!(%target, "didReceiveWrite -> didDetect");
        self.delegates.detect(SensorType::Ble, &target);
        debug!(%target, proximity = %proximity, "didReceiveWrite -> didMeasure");
        self.delegates.measure(SensorType::Ble, &proximity, &target);
        debug!(%target, payload = %signal.payload, "didReceiveWrite -> didRead");
        self.delegates.read(SensorType::Ble, &signal.payload, &target);
    }

    /// Handle a characteristic read, possibly one chunk of a longer value
    pub fn on_characteristic_read_request(
        &self,
        responder: &dyn GattResponder,
        address: &DeviceAddress,
        request_id: u32,
        characteristic: &Uuid,
        offset: UInt16,
    ) {
        let device = self.database.device(address);
        let response = match GattCharacteristic::from_uuid(characteristic, &self.config) {
            Some(GattCharacteristic::Payload) => {
                let payload = self.connection_payload_data(address);
                Self::chunk(payload.value(), offset)
            }
            Some(GattCharacteristic::PayloadSharing) => {
                let sharing = self.connection_payload_sharing_data(address);
                if sharing.is_empty() {
                    debug!(central = %device, request_id, "didReceiveRead payloadSharing, shared=[]");
                    GattResponse::success(UInt16::MIN, Vec::new())
                } else {
                    debug!(
                        central = %device,
                        request_id,
                        %offset,
                        shared = ?sharing.identifiers,
                        "didReceiveRead payloadSharing"
                    );
                    Self::chunk(&sharing.data, offset)
                }
            }
            Some(GattCharacteristic::Signal) | None => {
                warn!(central = %device, %characteristic, "didReceiveRead, unsupported characteristic");
                GattResponse::error(GattStatus::RequestNotSupported, UInt16::MIN)
            }
        };

        if response.status == GattStatus::InvalidOffset {
            warn!(central = %device, request_id, %offset, "didReceiveRead, invalid offset");
        }
        responder.send_response(address, request_id, response);
    }

    /// Payload served to `address` for the lifetime of its connection
    fn connection_payload_data(&self, address: &DeviceAddress) -> PayloadData {
        if let Some(payload) = self.payload_data.read().get(address) {
            return payload.clone();
        }
        self.payload_data
            .write()
            .entry(address.clone())
            .or_insert_with(|| self.payload_data_supplier.payload(PayloadTimestamp::now()))
            .clone()
    }

    /// Sharing bundle served to `address` for the lifetime of its connection
    fn connection_payload_sharing_data(&self, address: &DeviceAddress) -> PayloadSharingData {
        if let Some(sharing) = self.payload_sharing_data.read().get(address) {
            return sharing.clone();
        }
        self.payload_sharing_data
            .write()
            .entry(address.clone())
            .or_insert_with(|| {
                let peer = self.database.device(address);
                self.selector
                    .select(&peer, &self.database.devices(), SystemTime::now())
            })
            .clone()
    }

    fn chunk(value: &[u8], offset: UInt16) -> GattResponse {
        match value.get(offset.as_usize()..) {
            Some(suffix) => GattResponse::success(offset, suffix.to_vec()),
            None => GattResponse::error(GattStatus::InvalidOffset, offset),
        }
    }
}
