//! Sensor event delegates and their fan-out
//!
//! Delegates are notified synchronously, in registration order, over a
//! snapshot taken when the broadcast starts. Registration changes made during
//! a broadcast apply to the next one. A delegate that panics is logged and
//! skipped; the remaining delegates still receive the event.

use crate::datatype::{PayloadData, Proximity, SensorType, TargetIdentifier};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Observer of sensor events. All methods default to no-ops.
pub trait SensorDelegate: Send + Sync {
    /// A device was detected
    fn did_detect(&self, _sensor: SensorType, _did_detect: &TargetIdentifier) {}

    /// A device's identity payload was read
    fn did_read(&self, _sensor: SensorType, _did_read: &PayloadData, _from_target: &TargetIdentifier) {}

    /// Payloads of other devices were relayed through a device
    fn did_share(
        &self,
        _sensor: SensorType,
        _did_share: &[PayloadData],
        _from_target: &TargetIdentifier,
    ) {
    }

    /// A proximity measurement was taken for a device
    fn did_measure(&self, _sensor: SensorType, _did_measure: &Proximity, _from_target: &TargetIdentifier) {}
}

/// Ordered set of registered delegates
#[derive(Default)]
pub struct DelegateRegistry {
    delegates: RwLock<Vec<Arc<dyn SensorDelegate>>>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a delegate; it receives events after those registered earlier
    pub fn add(&self, delegate: Arc<dyn SensorDelegate>) {
        self.delegates.write().push(delegate);
    }

    /// Unregister a delegate by identity; returns whether it was registered
    pub fn remove(&self, delegate: &Arc<dyn SensorDelegate>) -> bool {
        let mut delegates = self.delegates.write();
        let before = delegates.len();
        let target = Arc::as_ptr(delegate) as *const ();
        delegates.retain(|d| Arc::as_ptr(d) as *const () != target);
        delegates.len() != before
    }

    pub fn len(&self) -> usize {
        self.delegates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegates.read().is_empty()
    }

    pub fn detect(&self, sensor: SensorType, target: &TargetIdentifier) {
        self.broadcast("didDetect", |d| d.did_detect(sensor, target));
    }

    pub fn read(&self, sensor: SensorType, payload: &PayloadData, target: &TargetIdentifier) {
        self.broadcast("didRead", |d| d.did_read(sensor, payload, target));
    }

    pub fn share(&self, sensor: SensorType, payloads: &[PayloadData], target: &TargetIdentifier) {
        self.broadcast("didShare", |d| d.did_share(sensor, payloads, target));
    }

    pub fn measure(&self, sensor: SensorType, proximity: &Proximity, target: &TargetIdentifier) {
        self.broadcast("didMeasure", |d| d.did_measure(sensor, proximity, target));
    }

    fn broadcast<F>(&self, event: &'static str, notify: F)
    where
        F: Fn(&dyn SensorDelegate),
    {
        let snapshot: Vec<Arc<dyn SensorDelegate>> = self.delegates.read().clone();
        for (index, delegate) in snapshot.iter().enumerate() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| notify(delegate.as_ref())));
            if outcome.is_err() {
                error!(event, index, "Delegate panicked, event delivery continues");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::Rssi;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl SensorDelegate for Recorder {
        fn did_detect(&self, _sensor: SensorType, _did_detect: &TargetIdentifier) {
            self.log.lock().push(format!("{}:detect", self.name));
        }

        fn did_share(&self, _sensor: SensorType, did_share: &[PayloadData], _from: &TargetIdentifier) {
            self.log.lock().push(format!("{}:share:{}", self.name, did_share.len()));
        }

        fn did_measure(&self, _sensor: SensorType, did_measure: &Proximity, _from: &TargetIdentifier) {
            self.log.lock().push(format!("{}:measure:{}", self.name, did_measure));
        }
    }

    struct Panicker;

    impl SensorDelegate for Panicker {
        fn did_detect(&self, _sensor: SensorType, _did_detect: &TargetIdentifier) {
            panic!("delegate failure");
        }
    }

    /// Unregisters a victim from inside a broadcast
    struct Remover {
        registry: Arc<DelegateRegistry>,
        victim: Arc<dyn SensorDelegate>,
    }

    impl SensorDelegate for Remover {
        fn did_detect(&self, _sensor: SensorType, _did_detect: &TargetIdentifier) {
            self.registry.remove(&self.victim);
        }
    }

    #[test]
    fn test_broadcast_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = DelegateRegistry::new();
        registry.add(Arc::new(Recorder { name: "a", log: log.clone() }));
        registry.add(Arc::new(Recorder { name: "b", log: log.clone() }));

        let target = TargetIdentifier::random();
        registry.detect(SensorType::Ble, &target);
        registry.measure(SensorType::Ble, &Proximity::from(Rssi(-40)), &target);
        registry.share(SensorType::Ble, &[PayloadData::new(vec![1])], &target);

        assert_eq!(
            *log.lock(),
            vec![
                "a:detect",
                "b:detect",
                "a:measure:RSSI:-40",
                "b:measure:RSSI:-40",
                "a:share:1",
                "b:share:1"
            ]
        );
    }

    #[test]
    fn test_panicking_delegate_is_contained() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = DelegateRegistry::new();
        registry.add(Arc::new(Panicker));
        registry.add(Arc::new(Recorder { name: "after", log: log.clone() }));

        registry.detect(SensorType::Ble, &TargetIdentifier::random());

        assert_eq!(*log.lock(), vec!["after:detect"]);
    }

    #[test]
    fn test_remove_during_broadcast_uses_snapshot() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(DelegateRegistry::new());
        let victim: Arc<dyn SensorDelegate> = Arc::new(Recorder { name: "victim", log: log.clone() });
        registry.add(Arc::new(Remover {
            registry: registry.clone(),
            victim: victim.clone(),
        }));
        registry.add(victim);

        // Victim still sees the in-flight event, but not the next one
        registry.detect(SensorType::Ble, &TargetIdentifier::random());
        registry.detect(SensorType::Ble, &TargetIdentifier::random());

        assert_eq!(*log.lock(), vec!["victim:detect"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_unknown_delegate() {
        let registry = DelegateRegistry::new();
        let stranger: Arc<dyn SensorDelegate> = Arc::new(Panicker);
        assert!(!registry.remove(&stranger));
        assert!(registry.is_empty());
    }
}
