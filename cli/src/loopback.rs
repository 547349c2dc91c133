// In-memory radio for driving the engine without an adapter
//
// The peripheral side implements the platform traits. The central side
// replays what a phone's stack does: connect, write the signal
// characteristic, long-read characteristics in MTU-sized chunks, disconnect.

use anyhow::{bail, Context, Result};
use parking_lot::{Mutex, RwLock};
use proxima_core::ble::platform::{
    AdvertiseData, AdvertiseError, AdvertiseSettings, BluetoothStateSource, PlatformError,
};
use proxima_core::ble::{GattService, SignalData};
use proxima_core::{
    BluetoothState, ConnectionState, DeviceAddress, GattResponder, GattResponse,
    GattServerHandler, GattStatus, PayloadData, PeripheralRadio, Rssi, UInt16,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct LoopbackRadio {
    power: RwLock<BluetoothState>,
    handler: RwLock<Option<Arc<GattServerHandler>>>,
    service: RwLock<Option<GattService>>,
    advertising: RwLock<bool>,
    /// Largest value carried by one read response
    chunk_size: usize,
    last_response: Mutex<Option<GattResponse>>,
}

impl LoopbackRadio {
    pub fn new(power: BluetoothState, mtu: usize) -> Self {
        Self {
            power: RwLock::new(power),
            handler: RwLock::new(None),
            service: RwLock::new(None),
            advertising: RwLock::new(false),
            chunk_size: mtu.saturating_sub(1).max(1),
            last_response: Mutex::new(None),
        }
    }

    pub fn set_power(&self, state: BluetoothState) {
        *self.power.write() = state;
    }

    pub fn is_advertising(&self) -> bool {
        *self.advertising.read()
    }

    fn handler(&self) -> Result<Arc<GattServerHandler>> {
        self.handler.read().clone().context("GATT server is not open")
    }

    fn characteristic(&self, index: usize) -> Result<Uuid> {
        self.service
            .read()
            .as_ref()
            .and_then(|s| s.characteristics.get(index))
            .map(|c| c.uuid)
            .context("Sensor service is not registered")
    }

    fn take_response(&self) -> Result<GattResponse> {
        self.last_response
            .lock()
            .take()
            .context("Peripheral sent no response")
    }
}

impl BluetoothStateSource for LoopbackRadio {
    fn bluetooth_state(&self) -> BluetoothState {
        *self.power.read()
    }
}

impl PeripheralRadio for LoopbackRadio {
    fn is_multiple_advertisement_supported(&self) -> bool {
        true
    }

    fn open_gatt_server(&self, handler: Arc<GattServerHandler>) -> Result<(), PlatformError> {
        if *self.power.read() != BluetoothState::PoweredOn {
            return Err(PlatformError::AdapterUnavailable);
        }
        *self.handler.write() = Some(handler);
        Ok(())
    }

    fn cancel_connections(&self) {
        debug!("loopback: connections cancelled");
    }

    fn clear_services(&self) {
        *self.service.write() = None;
    }

    fn add_service(&self, service: &GattService) -> Result<(), PlatformError> {
        if self.handler.read().is_none() {
            return Err(PlatformError::GattServerUnavailable("not open".to_string()));
        }
        *self.service.write() = Some(service.clone());
        Ok(())
    }

    fn close_gatt_server(&self) {
        *self.service.write() = None;
        *self.handler.write() = None;
    }

    fn start_advertising(
        &self,
        _settings: &AdvertiseSettings,
        data: &AdvertiseData,
    ) -> Result<(), AdvertiseError> {
        let mut advertising = self.advertising.write();
        if *advertising {
            return Err(AdvertiseError::AlreadyStarted);
        }
        debug!(services = ?data.service_uuids, "loopback: advertising");
        *advertising = true;
        Ok(())
    }

    fn stop_advertising(&self) {
        *self.advertising.write() = false;
    }
}

impl GattResponder for LoopbackRadio {
    fn send_response(&self, _address: &DeviceAddress, _request_id: u32, mut response: GattResponse) {
        response.value.truncate(self.chunk_size);
        *self.last_response.lock() = Some(response);
    }
}

/// One simulated central talking to the loopback peripheral
pub struct Central<'a> {
    radio: &'a LoopbackRadio,
    pub address: DeviceAddress,
    next_request_id: u32,
}

impl<'a> Central<'a> {
    pub fn new(radio: &'a LoopbackRadio, address: DeviceAddress) -> Self {
        Self {
            radio,
            address,
            next_request_id: 1,
        }
    }

    fn request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    pub fn connect(&self) -> Result<()> {
        self.radio
            .handler()?
            .on_connection_state_change(&self.address, ConnectionState::Connected);
        Ok(())
    }

    pub fn disconnect(&self) -> Result<()> {
        self.radio
            .handler()?
            .on_connection_state_change(&self.address, ConnectionState::Disconnected);
        Ok(())
    }

    /// Write `[rssi][payload]` to the signal characteristic
    pub fn write_signal(&mut self, rssi: i32, payload: &PayloadData) -> Result<GattStatus> {
        let value = SignalData {
            rssi: Rssi(rssi),
            payload: payload.clone(),
        }
        .encode();
        let uuid = self.radio.characteristic(0)?;
        let request_id = self.request_id();
        self.radio.handler()?.on_characteristic_write_request(
            self.radio,
            &self.address,
            request_id,
            &uuid,
            true,
            &value,
        );
        Ok(self.radio.take_response()?.status)
    }

    pub fn read_payload(&mut self) -> Result<Vec<u8>> {
        let uuid = self.radio.characteristic(1)?;
        self.read_long(&uuid)
    }

    pub fn read_payload_sharing(&mut self) -> Result<Vec<u8>> {
        let uuid = self.radio.characteristic(2)?;
        self.read_long(&uuid)
    }

    /// Read a whole value, one chunk per request, until a short chunk arrives
    fn read_long(&mut self, uuid: &Uuid) -> Result<Vec<u8>> {
        let handler = self.radio.handler()?;
        let mut value = Vec::new();
        loop {
            let offset = u16::try_from(value.len()).context("Value exceeds ATT offset range")?;
            let request_id = self.request_id();
            handler.on_characteristic_read_request(
                self.radio,
                &self.address,
                request_id,
                uuid,
                UInt16::from(offset),
            );
            let response = self.radio.take_response()?;
            if response.status != GattStatus::Success {
                bail!("Read at offset {} failed with status {:?}", offset, response.status);
            }
            let done = response.value.len() < self.radio.chunk_size;
            value.extend_from_slice(&response.value);
            if done {
                return Ok(value);
            }
        }
    }
}
