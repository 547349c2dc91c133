//! BLE peripheral transmitter
//!
//! Owns the advertising lifecycle and the GATT server. `start()` and `stop()`
//! only flip the requested state and enqueue work; every radio mutation runs
//! on the serial [`OperationQueue`], so callers see the effect asynchronously
//! (use [`BleTransmitter::flush`] to wait for it).

use super::database::BleDatabase;
use super::gatt::{GattServerHandler, GattService};
use super::platform::{AdvertiseData, AdvertiseSettings, PeripheralRadio};
use super::queue::{OperationQueue, QueueError};
use crate::config::{ConfigError, SensorConfig};
use crate::datatype::{BluetoothState, PayloadData, PayloadTimestamp};
use crate::delegate::{DelegateRegistry, SensorDelegate};
use crate::payload::PayloadDataSupplier;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterState {
    /// Adapter cannot advertise; terminal
    Unsupported,
    Stopped,
    /// Start requested, waiting for the worker to bring advertising up
    Starting,
    Advertising,
}

impl std::fmt::Display for TransmitterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransmitterState::Unsupported => write!(f, "Unsupported"),
            TransmitterState::Stopped => write!(f, "Stopped"),
            TransmitterState::Starting => write!(f, "Starting"),
            TransmitterState::Advertising => write!(f, "Advertising"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransmitterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Operation queue error: {0}")]
    Queue(#[from] QueueError),
}

/// What is currently up on the radio. Only touched from the worker.
#[derive(Debug, Default)]
struct RadioSession {
    gatt_server: bool,
    advertising: bool,
}

/// State shared between callers and the worker
struct Shared {
    radio: Arc<dyn PeripheralRadio>,
    handler: Arc<GattServerHandler>,
    service: GattService,
    advertise_settings: AdvertiseSettings,
    advertise_data: AdvertiseData,
    state: RwLock<TransmitterState>,
    enabled: AtomicBool,
    session: Mutex<RadioSession>,
}

impl Shared {
    /// Stop advertising, then clear and close the GATT server
    fn teardown(&self, session: &mut RadioSession) {
        if session.advertising {
            self.radio.stop_advertising();
            session.advertising = false;
            info!("Advertising stopped");
        }
        if session.gatt_server {
            self.radio.close_gatt_server();
            session.gatt_server = false;
            info!("GATT server closed");
        }
    }

    /// Replace whatever is up with a fresh GATT server and advertisement
    fn reconfigure(&self) {
        let mut session = self.session.lock();
        self.teardown(&mut session);

        if !self.enabled.load(Ordering::SeqCst) {
            debug!("Reconfigure skipped, transmitter disabled");
            self.settle(TransmitterState::Starting, TransmitterState::Stopped);
            return;
        }

        if let Err(e) = self.radio.open_gatt_server(self.handler.clone()) {
            error!(error = %e, "Failed to open GATT server");
            self.fail();
            return;
        }
        session.gatt_server = true;
        self.radio.cancel_connections();
        self.radio.clear_services();
        if let Err(e) = self.radio.add_service(&self.service) {
            error!(error = %e, "Failed to add sensor service");
            self.teardown(&mut session);
            self.fail();
            return;
        }
        info!(service = %self.service.uuid, "GATT server attached");

        match self
            .radio
            .start_advertising(&self.advertise_settings, &self.advertise_data)
        {
            Ok(()) => {
                session.advertising = true;
                info!(mode = %self.advertise_settings.mode, "Advertising started");
                self.settle(TransmitterState::Starting, TransmitterState::Advertising);
            }
            Err(e) => {
                error!(error = %e, code = e.code(), "Advertising failed to start");
                self.teardown(&mut session);
                self.fail();
            }
        }
    }

    fn shutdown(&self) {
        let mut session = self.session.lock();
        self.teardown(&mut session);
        let next = if self.enabled.load(Ordering::SeqCst) {
            TransmitterState::Starting
        } else {
            TransmitterState::Stopped
        };
        self.settle(TransmitterState::Advertising, next);
    }

    fn fail(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.settle(TransmitterState::Starting, TransmitterState::Stopped);
    }

    /// Move to `to` only if no caller changed the state since the task was queued
    fn settle(&self, from: TransmitterState, to: TransmitterState) {
        let mut state = self.state.write();
        if *state == from {
            *state = to;
        }
    }
}

/// Peripheral transmitter: advertises the sensor service and answers GATT requests
pub struct BleTransmitter {
    shared: Arc<Shared>,
    database: Arc<BleDatabase>,
    delegates: Arc<DelegateRegistry>,
    payload_data_supplier: Arc<dyn PayloadDataSupplier>,
    queue: OperationQueue,
}

impl BleTransmitter {
    /// Create a transmitter and apply the adapter's current power state
    pub fn new(
        config: SensorConfig,
        radio: Arc<dyn PeripheralRadio>,
        payload_data_supplier: Arc<dyn PayloadDataSupplier>,
        database: Arc<BleDatabase>,
    ) -> Result<Self, TransmitterError> {
        config.validate()?;

        let delegates = Arc::new(DelegateRegistry::new());
        let handler = Arc::new(GattServerHandler::new(
            config.clone(),
            database.clone(),
            delegates.clone(),
            payload_data_supplier.clone(),
        ));

        let initial = if radio.is_multiple_advertisement_supported() {
            TransmitterState::Stopped
        } else {
            error!("Multiple advertisement is unsupported, transmitter disabled");
            TransmitterState::Unsupported
        };

        let shared = Arc::new(Shared {
            radio,
            handler,
            service: GattService::sensor_service(&config),
            advertise_settings: AdvertiseSettings::low_power_connectable(),
            advertise_data: AdvertiseData::service_only(config.service_uuid),
            state: RwLock::new(initial),
            enabled: AtomicBool::new(false),
            session: Mutex::new(RadioSession::default()),
        });

        let transmitter = Self {
            shared,
            database,
            delegates,
            payload_data_supplier,
            queue: OperationQueue::new("ble-transmitter")?,
        };

        let power = transmitter.shared.radio.bluetooth_state();
        transmitter.bluetooth_state_changed(power);
        Ok(transmitter)
    }

    pub fn add_delegate(&self, delegate: Arc<dyn SensorDelegate>) {
        self.delegates.add(delegate);
    }

    pub fn remove_delegate(&self, delegate: &Arc<dyn SensorDelegate>) -> bool {
        self.delegates.remove(delegate)
    }

    /// Request advertising. Returns before the radio has changed.
    pub fn start(&self) {
        // Probe outside the state lock; the platform call may be slow
        let power = self.shared.radio.bluetooth_state();

        let mut state = self.shared.state.write();
        match *state {
            TransmitterState::Unsupported => {
                error!("start denied, multiple advertisement unsupported");
                return;
            }
            TransmitterState::Starting | TransmitterState::Advertising => {
                warn!(state = %*state, "start denied, already started");
                return;
            }
            TransmitterState::Stopped => {}
        }

        if power != BluetoothState::PoweredOn {
            warn!(bluetooth = %power, "start denied, bluetooth is not powered on");
            return;
        }

        self.shared.enabled.store(true, Ordering::SeqCst);
        *state = TransmitterState::Starting;
        drop(state);

        let shared = self.shared.clone();
        if let Err(e) = self.queue.execute(move || shared.reconfigure()) {
            error!(error = %e, "start failed, cannot enqueue reconfigure");
            self.shared.fail();
            return;
        }
        debug!("start requested");
    }

    /// Request teardown. Returns before the radio has changed.
    pub fn stop(&self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
        let mut state = self.shared.state.write();
        match *state {
            TransmitterState::Unsupported | TransmitterState::Stopped => {
                warn!(state = %*state, "stop denied, not started");
                return;
            }
            TransmitterState::Starting | TransmitterState::Advertising => {}
        }
        *state = TransmitterState::Stopped;
        drop(state);

        let shared = self.shared.clone();
        if let Err(e) = self.queue.execute(move || shared.shutdown()) {
            error!(error = %e, "stop failed, cannot enqueue teardown");
            return;
        }
        debug!("stop requested");
    }

    /// React to an adapter power transition
    pub fn bluetooth_state_changed(&self, state: BluetoothState) {
        debug!(bluetooth = %state, "Bluetooth state changed");
        match state {
            BluetoothState::PoweredOn => self.start(),
            BluetoothState::PoweredOff => self.stop(),
            BluetoothState::Unsupported | BluetoothState::Unknown => {}
        }
    }

    /// This device's payload as currently supplied
    pub fn payload_data(&self) -> PayloadData {
        self.payload_data_supplier.payload(PayloadTimestamp::now())
    }

    /// Whether the adapter supports advertising
    pub fn is_supported(&self) -> bool {
        *self.shared.state.read() != TransmitterState::Unsupported
    }

    pub fn state(&self) -> TransmitterState {
        *self.shared.state.read()
    }

    /// Whether a GATT server is currently open with the sensor service
    pub fn is_gatt_server_attached(&self) -> bool {
        self.shared.session.lock().gatt_server
    }

    /// Handler the platform bridge forwards GATT callbacks to
    pub fn gatt_handler(&self) -> Arc<GattServerHandler> {
        self.shared.handler.clone()
    }

    pub fn database(&self) -> &Arc<BleDatabase> {
        &self.database
    }

    /// Wait until every queued radio operation has run
    pub fn flush(&self) -> Result<(), QueueError> {
        self.queue.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::platform::{AdvertiseError, BluetoothStateSource, PlatformError};
    use crate::payload::FixedPayloadDataSupplier;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        OpenGattServer,
        CancelConnections,
        ClearServices,
        AddService(usize),
        CloseGattServer,
        StartAdvertising,
        StopAdvertising,
    }

    struct FakeRadio {
        supported: bool,
        power: Mutex<BluetoothState>,
        advertise_failure: Mutex<Option<AdvertiseError>>,
        calls: Mutex<Vec<Call>>,
        /// Runs inside every power-state probe
        on_power_probe: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    }

    impl FakeRadio {
        fn new(supported: bool, power: BluetoothState) -> Arc<Self> {
            Arc::new(Self {
                supported,
                power: Mutex::new(power),
                advertise_failure: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                on_power_probe: Mutex::new(None),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl BluetoothStateSource for FakeRadio {
        fn bluetooth_state(&self) -> BluetoothState {
            let hook = self.on_power_probe.lock().clone();
            if let Some(hook) = hook {
                hook();
            }
            *self.power.lock()
        }
    }

    impl PeripheralRadio for FakeRadio {
        fn is_multiple_advertisement_supported(&self) -> bool {
            self.supported
        }

        fn open_gatt_server(&self, _handler: Arc<GattServerHandler>) -> Result<(), PlatformError> {
            self.calls.lock().push(Call::OpenGattServer);
            Ok(())
        }

        fn cancel_connections(&self) {
            self.calls.lock().push(Call::CancelConnections);
        }

        fn clear_services(&self) {
            self.calls.lock().push(Call::ClearServices);
        }

        fn add_service(&self, service: &GattService) -> Result<(), PlatformError> {
            self.calls.lock().push(Call::AddService(service.characteristics.len()));
            Ok(())
        }

        fn close_gatt_server(&self) {
            self.calls.lock().push(Call::CloseGattServer);
        }

        fn start_advertising(
            &self,
            settings: &AdvertiseSettings,
            data: &AdvertiseData,
        ) -> Result<(), AdvertiseError> {
            assert_eq!(*settings, AdvertiseSettings::low_power_connectable());
            assert!(!data.include_device_name);
            self.calls.lock().push(Call::StartAdvertising);
            match *self.advertise_failure.lock() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn stop_advertising(&self) {
            self.calls.lock().push(Call::StopAdvertising);
        }
    }

    fn transmitter(radio: Arc<FakeRadio>) -> BleTransmitter {
        BleTransmitter::new(
            SensorConfig::default(),
            radio,
            Arc::new(FixedPayloadDataSupplier::new(PayloadData::new(vec![7; 8]))),
            Arc::new(BleDatabase::new()),
        )
        .unwrap()
    }

    const BRING_UP: [Call; 5] = [
        Call::OpenGattServer,
        Call::CancelConnections,
        Call::ClearServices,
        Call::AddService(3),
        Call::StartAdvertising,
    ];

    #[test]
    fn test_powered_on_starts_automatically() {
        let radio = FakeRadio::new(true, BluetoothState::PoweredOn);
        let tx = transmitter(radio.clone());
        tx.flush().unwrap();

        assert_eq!(tx.state(), TransmitterState::Advertising);
        assert!(tx.is_gatt_server_attached());
        assert_eq!(radio.calls(), BRING_UP.to_vec());
    }

    #[test]
    fn test_start_while_powered_off_stays_stopped() {
        let radio = FakeRadio::new(true, BluetoothState::PoweredOff);
        let tx = transmitter(radio.clone());
        tx.start();
        tx.flush().unwrap();

        assert_eq!(tx.state(), TransmitterState::Stopped);
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_unsupported_is_terminal() {
        let radio = FakeRadio::new(false, BluetoothState::PoweredOn);
        let tx = transmitter(radio.clone());
        tx.start();
        tx.bluetooth_state_changed(BluetoothState::PoweredOn);
        tx.stop();
        tx.flush().unwrap();

        assert_eq!(tx.state(), TransmitterState::Unsupported);
        assert!(!tx.is_supported());
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_power_probe_runs_outside_state_lock() {
        let radio = FakeRadio::new(true, BluetoothState::PoweredOff);
        let tx = transmitter(radio.clone());
        tx.flush().unwrap();

        let shared = tx.shared.clone();
        let readable = Arc::new(Mutex::new(Vec::new()));
        let seen = readable.clone();
        *radio.on_power_probe.lock() = Some(Arc::new(move || {
            seen.lock().push(shared.state.try_read().is_some());
        }));
        *radio.power.lock() = BluetoothState::PoweredOn;

        tx.start();
        tx.flush().unwrap();
        *radio.on_power_probe.lock() = None;

        assert_eq!(*readable.lock(), vec![true]);
        assert_eq!(tx.state(), TransmitterState::Advertising);
    }

    #[test]
    fn test_double_start_is_ignored() {
        let radio = FakeRadio::new(true, BluetoothState::PoweredOn);
        let tx = transmitter(radio.clone());
        tx.start();
        tx.flush().unwrap();
        tx.start();
        tx.flush().unwrap();

        assert_eq!(tx.state(), TransmitterState::Advertising);
        assert_eq!(radio.calls(), BRING_UP.to_vec());
    }

    #[test]
    fn test_stop_while_stopped_is_ignored() {
        let radio = FakeRadio::new(true, BluetoothState::PoweredOff);
        let tx = transmitter(radio.clone());
        tx.stop();
        tx.flush().unwrap();

        assert_eq!(tx.state(), TransmitterState::Stopped);
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_power_cycle_orders_teardown_before_bring_up() {
        let radio = FakeRadio::new(true, BluetoothState::PoweredOn);
        let tx = transmitter(radio.clone());
        tx.flush().unwrap();

        *radio.power.lock() = BluetoothState::PoweredOff;
        tx.bluetooth_state_changed(BluetoothState::PoweredOff);
        tx.flush().unwrap();
        assert_eq!(tx.state(), TransmitterState::Stopped);
        assert!(!tx.is_gatt_server_attached());

        *radio.power.lock() = BluetoothState::PoweredOn;
        tx.bluetooth_state_changed(BluetoothState::PoweredOn);
        tx.flush().unwrap();

        let mut expected = BRING_UP.to_vec();
        expected.extend([Call::StopAdvertising, Call::CloseGattServer]);
        expected.extend(BRING_UP);
        assert_eq!(radio.calls(), expected);
        assert_eq!(tx.state(), TransmitterState::Advertising);
    }

    #[test]
    fn test_stop_before_worker_runs_skips_bring_up() {
        let radio = FakeRadio::new(true, BluetoothState::PoweredOff);
        let tx = transmitter(radio.clone());
        *radio.power.lock() = BluetoothState::PoweredOn;

        // Hold the worker so both requests are queued before either runs
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();
        let blocker = gate.clone();
        tx.queue.execute(move || drop(blocker.lock())).unwrap();

        tx.start();
        tx.stop();
        drop(held);
        tx.flush().unwrap();

        assert_eq!(tx.state(), TransmitterState::Stopped);
        assert!(radio.calls().is_empty());
    }

    #[test]
    fn test_advertise_failure_tears_down_gatt() {
        let radio = FakeRadio::new(true, BluetoothState::PoweredOff);
        *radio.advertise_failure.lock() = Some(AdvertiseError::TooManyAdvertisers);
        let tx = transmitter(radio.clone());

        *radio.power.lock() = BluetoothState::PoweredOn;
        tx.start();
        tx.flush().unwrap();

        assert_eq!(tx.state(), TransmitterState::Stopped);
        assert!(!tx.is_gatt_server_attached());
        let mut expected = BRING_UP.to_vec();
        expected.push(Call::CloseGattServer);
        assert_eq!(radio.calls(), expected);

        // A later start retries from scratch
        *radio.advertise_failure.lock() = None;
        tx.start();
        tx.flush().unwrap();
        assert_eq!(tx.state(), TransmitterState::Advertising);
    }

    #[test]
    fn test_payload_data_from_supplier() {
        let tx = transmitter(FakeRadio::new(true, BluetoothState::PoweredOff));
        assert_eq!(tx.payload_data(), PayloadData::new(vec![7; 8]));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SensorConfig {
            payload_sharing_time_interval_secs: 0,
            ..SensorConfig::default()
        };
        let result = BleTransmitter::new(
            config,
            FakeRadio::new(true, BluetoothState::PoweredOn),
            Arc::new(FixedPayloadDataSupplier::new(PayloadData::default())),
            Arc::new(BleDatabase::new()),
        );
        assert!(matches!(result, Err(TransmitterError::Config(_))));
    }
}
