/// Registry of nearby devices keyed by transport address
///
/// Each address maps to a shared `BleDevice` record. Records are created on
/// first contact under the registry write lock, so two callbacks racing on
/// the same new address always end up with the same record. Enumeration
/// returns owned snapshots, never references into live state.

use crate::datatype::{DeviceAddress, DeviceOperatingSystem, PayloadData, TargetIdentifier};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Mutable part of a device record
#[derive(Debug)]
struct DeviceState {
    address: DeviceAddress,
    operating_system: DeviceOperatingSystem,
    payload_data: Option<PayloadData>,
    /// Payloads already relayed to this device; only ever grows
    payload_sharing_data: HashSet<PayloadData>,
    last_updated_at: SystemTime,
}

/// A remote device known to this sensor
#[derive(Debug)]
pub struct BleDevice {
    identifier: TargetIdentifier,
    state: Mutex<DeviceState>,
}

impl BleDevice {
    fn new(address: DeviceAddress, now: SystemTime) -> Self {
        Self {
            identifier: TargetIdentifier::random(),
            state: Mutex::new(DeviceState {
                address,
                operating_system: DeviceOperatingSystem::Unknown,
                payload_data: None,
                payload_sharing_data: HashSet::new(),
                last_updated_at: now,
            }),
        }
    }

    pub fn identifier(&self) -> TargetIdentifier {
        self.identifier
    }

    pub fn address(&self) -> DeviceAddress {
        self.state.lock().address.clone()
    }

    pub fn operating_system(&self) -> DeviceOperatingSystem {
        self.state.lock().operating_system
    }

    pub fn set_operating_system(&self, operating_system: DeviceOperatingSystem) {
        self.state.lock().operating_system = operating_system;
    }

    pub fn payload_data(&self) -> Option<PayloadData> {
        self.state.lock().payload_data.clone()
    }

    pub fn set_payload_data(&self, payload_data: PayloadData) {
        self.state.lock().payload_data = Some(payload_data);
    }

    /// Payloads already relayed to this device
    pub fn payload_sharing_data(&self) -> HashSet<PayloadData> {
        self.state.lock().payload_sharing_data.clone()
    }

    /// Whether `payload` has already been relayed to this device
    pub fn has_shared(&self, payload: &PayloadData) -> bool {
        self.state.lock().payload_sharing_data.contains(payload)
    }

    /// Record `payload` as relayed to this device; returns false if already known
    pub fn mark_shared(&self, payload: PayloadData) -> bool {
        self.state.lock().payload_sharing_data.insert(payload)
    }

    pub fn last_updated_at(&self) -> SystemTime {
        self.state.lock().last_updated_at
    }

    /// Record a sighting at `now`; earlier times are ignored
    pub fn touch(&self, now: SystemTime) {
        let mut state = self.state.lock();
        if now > state.last_updated_at {
            state.last_updated_at = now;
        }
    }

    /// Time elapsed between the last sighting and `now` (zero if `now` is earlier)
    pub fn time_interval_since_last_update(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_updated_at()).unwrap_or_default()
    }

    /// Point-in-time copy of this record
    pub fn snapshot(&self) -> BleDeviceSnapshot {
        let state = self.state.lock();
        BleDeviceSnapshot {
            identifier: self.identifier,
            address: state.address.clone(),
            operating_system: state.operating_system,
            payload_data: state.payload_data.clone(),
            last_updated_at: state.last_updated_at,
        }
    }

    fn set_address(&self, address: DeviceAddress) {
        self.state.lock().address = address;
    }

    /// Take over what `other` learned: its relay marks and, if this record has
    /// none, its platform classification
    fn absorb(&self, other: &BleDevice) {
        let (operating_system, shared, last_updated_at) = {
            let other = other.state.lock();
            (
                other.operating_system,
                other.payload_sharing_data.clone(),
                other.last_updated_at,
            )
        };

        let mut state = self.state.lock();
        if state.operating_system == DeviceOperatingSystem::Unknown {
            state.operating_system = operating_system;
        }
        state.payload_sharing_data.extend(shared);
        if last_updated_at > state.last_updated_at {
            state.last_updated_at = last_updated_at;
        }
    }
}

impl fmt::Display for BleDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "{}[{},os={}]",
            self.identifier, state.address, state.operating_system
        )
    }
}

/// Owned copy of a device record, detached from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleDeviceSnapshot {
    pub identifier: TargetIdentifier,
    pub address: DeviceAddress,
    pub operating_system: DeviceOperatingSystem,
    pub payload_data: Option<PayloadData>,
    pub last_updated_at: SystemTime,
}

impl BleDeviceSnapshot {
    pub fn time_interval_since_last_update(&self, now: SystemTime) -> Duration {
        now.duration_since(self.last_updated_at).unwrap_or_default()
    }
}

/// Address → device registry shared by all GATT callbacks
#[derive(Default)]
pub struct BleDatabase {
    devices: RwLock<HashMap<DeviceAddress, Arc<BleDevice>>>,
}

impl BleDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the record for `address`, recording a sighting now
    pub fn device(&self, address: &DeviceAddress) -> Arc<BleDevice> {
        self.device_at(address, SystemTime::now())
    }

    /// Get or create the record for `address`, recording a sighting at `now`
    pub fn device_at(&self, address: &DeviceAddress, now: SystemTime) -> Arc<BleDevice> {
        if let Some(device) = self.devices.read().get(address) {
            device.touch(now);
            return device.clone();
        }

        let mut devices = self.devices.write();
        let device = devices
            .entry(address.clone())
            .or_insert_with(|| {
                let device = Arc::new(BleDevice::new(address.clone(), now));
                debug!(identifier = %device.identifier(), %address, "New device");
                device
            })
            .clone();
        drop(devices);

        device.touch(now);
        device
    }

    /// Existing record for `address`, without creating or touching it
    pub fn device_if_present(&self, address: &DeviceAddress) -> Option<Arc<BleDevice>> {
        self.devices.read().get(address).cloned()
    }

    pub fn device_for_identifier(&self, identifier: &TargetIdentifier) -> Option<Arc<BleDevice>> {
        self.devices
            .read()
            .values()
            .find(|d| d.identifier() == *identifier)
            .cloned()
    }

    /// Cache `payload` for the device writing from `address`.
    ///
    /// If another record already carries this payload under a different
    /// address and the record at `address` has never carried one, the
    /// existing record is rebound to `address` so its identifier survives the
    /// address change. The placeholder minted for `address` is folded into
    /// that record, so relay marks and platform classification survive.
    pub fn associate_payload(
        &self,
        address: &DeviceAddress,
        payload: PayloadData,
        now: SystemTime,
    ) -> Arc<BleDevice> {
        let mut devices = self.devices.write();

        let current_is_placeholder = devices
            .get(address)
            .map_or(true, |d| d.payload_data().is_none());

        let previous = if current_is_placeholder && !payload.is_empty() {
            devices
                .iter()
                .find(|(key, d)| *key != address && d.payload_data().as_ref() == Some(&payload))
                .map(|(key, d)| (key.clone(), d.clone()))
        } else {
            None
        };

        let device = match previous {
            Some((old_address, device)) => {
                devices.remove(&old_address);
                device.set_address(address.clone());
                if let Some(placeholder) = devices.insert(address.clone(), device.clone()) {
                    device.absorb(&placeholder);
                }
                debug!(
                    identifier = %device.identifier(),
                    from = %old_address,
                    to = %address,
                    "Device address rotated"
                );
                device
            }
            None => {
                let device = devices
                    .entry(address.clone())
                    .or_insert_with(|| Arc::new(BleDevice::new(address.clone(), now)))
                    .clone();
                device.set_payload_data(payload);
                device
            }
        };
        drop(devices);

        device.touch(now);
        device
    }

    /// Point-in-time snapshot of every record
    pub fn devices(&self) -> Vec<BleDeviceSnapshot> {
        let devices: Vec<Arc<BleDevice>> = self.devices.read().values().cloned().collect();
        devices.iter().map(|d| d.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}
