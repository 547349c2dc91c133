//! Identity payload supplier
//!
//! Derivation and rotation of the payload is owned by the host; the engine only
//! asks for the bytes valid at a given time.

use crate::datatype::{PayloadData, PayloadTimestamp};

/// Source of this device's identity payload
#[cfg_attr(test, mockall::automock)]
pub trait PayloadDataSupplier: Send + Sync {
    /// Payload valid at `timestamp`
    fn payload(&self, timestamp: PayloadTimestamp) -> PayloadData;
}

/// Supplier that always returns the same bytes
#[derive(Debug, Clone)]
pub struct FixedPayloadDataSupplier {
    payload: PayloadData,
}

impl FixedPayloadDataSupplier {
    pub fn new(payload: PayloadData) -> Self {
        Self { payload }
    }
}

impl PayloadDataSupplier for FixedPayloadDataSupplier {
    fn payload(&self, _timestamp: PayloadTimestamp) -> PayloadData {
        self.payload.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_supplier_ignores_timestamp() {
        let supplier = FixedPayloadDataSupplier::new(PayloadData::new(vec![1, 2, 3]));
        assert_eq!(supplier.payload(PayloadTimestamp::now()).value(), &[1, 2, 3]);
        assert_eq!(
            supplier.payload(PayloadTimestamp(std::time::UNIX_EPOCH)).value(),
            &[1, 2, 3]
        );
    }
}
