/// Payload sharing (store-and-forward relay)
///
/// iOS devices in the background cannot be found by scans from other iOS
/// devices, but they can be found by Android devices. An Android peripheral
/// therefore relays recently seen iOS payloads to whichever central reads the
/// sharing characteristic, so two iOS devices can still learn of each other.
///
/// Payloads are recorded as shared with the requesting peer when the bundle is
/// computed, not when delivery is confirmed. A read that never completes still
/// counts as shared.

use super::database::{BleDevice, BleDeviceSnapshot};
use crate::config::SensorConfig;
use crate::datatype::{DeviceOperatingSystem, PayloadData, TargetIdentifier};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Relay bundle for one requesting peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadSharingData {
    /// Devices whose payloads are in `data`, in packing order
    pub identifiers: Vec<TargetIdentifier>,
    /// Concatenated payload bytes
    pub data: Vec<u8>,
}

impl PayloadSharingData {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Nothing new to relay
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty() || self.data.is_empty()
    }
}

/// Chooses which recently seen payloads to relay to a peer
#[derive(Debug, Clone)]
pub struct PayloadSharingSelector {
    time_interval: Duration,
    max_bytes: usize,
}

impl PayloadSharingSelector {
    pub fn new(time_interval: Duration, max_bytes: usize) -> Self {
        Self {
            time_interval,
            max_bytes,
        }
    }

    pub fn from_config(config: &SensorConfig) -> Self {
        Self::new(
            config.payload_sharing_time_interval(),
            config.payload_sharing_max_bytes,
        )
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Build the bundle for `peer` from a registry snapshot.
    ///
    /// Every payload packed is marked as shared with `peer`.
    pub fn select(
        &self,
        peer: &BleDevice,
        devices: &[BleDeviceSnapshot],
        now: SystemTime,
    ) -> PayloadSharingData {
        let peer_id = peer.identifier();
        let mut unknown: Vec<(&BleDeviceSnapshot, &PayloadData)> = Vec::new();
        let mut known: Vec<(&BleDeviceSnapshot, &PayloadData)> = Vec::new();

        for device in devices {
            if device.identifier == peer_id {
                continue;
            }
            if device.time_interval_since_last_update(now) >= self.time_interval {
                continue;
            }
            // Android is always discoverable, relaying it adds nothing
            if device.operating_system != DeviceOperatingSystem::Ios {
                continue;
            }
            let Some(payload) = device.payload_data.as_ref() else {
                continue;
            };
            if peer.has_shared(payload) {
                known.push((device, payload));
            } else {
                unknown.push((device, payload));
            }
        }

        // Most recently seen first, new information before confirmations
        unknown.sort_by(|a, b| b.0.last_updated_at.cmp(&a.0.last_updated_at));
        known.sort_by(|a, b| b.0.last_updated_at.cmp(&a.0.last_updated_at));

        let peer_is_android = peer.operating_system() == DeviceOperatingSystem::Android;
        let mut bundle = PayloadSharingData::empty();

        for (device, payload) in unknown.into_iter().chain(known) {
            // A single hint is enough for an Android peer
            if peer_is_android && !bundle.identifiers.is_empty() {
                break;
            }
            if bundle.data.len() + payload.len() > self.max_bytes {
                break;
            }
            if let Err(e) = bundle.data.try_reserve(payload.len()) {
                warn!(identifier = %device.identifier, error = %e, "Skipping payload, cannot pack");
                continue;
            }
            bundle.data.extend_from_slice(payload.value());
            bundle.identifiers.push(device.identifier);
            peer.mark_shared(payload.clone());
        }

        debug!(
            peer = %peer_id,
            shared = bundle.identifiers.len(),
            bytes = bundle.data.len(),
            "Payload sharing data computed"
        );
        bundle
    }
}
