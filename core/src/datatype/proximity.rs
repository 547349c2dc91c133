//! Signal strength and proximity measurements

use super::Int32;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Received signal strength in dBm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rssi(pub i32);

impl Rssi {
    pub fn value(self) -> i32 {
        self.0
    }
}

impl From<Int32> for Rssi {
    fn from(value: Int32) -> Self {
        Self(value.value())
    }
}

impl fmt::Display for Rssi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit of a proximity measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProximityMeasurementUnit {
    Rssi,
}

impl fmt::Display for ProximityMeasurementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProximityMeasurementUnit::Rssi => write!(f, "RSSI"),
        }
    }
}

/// Optional calibration data attached to a measurement (e.g. transmit power)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub unit: ProximityMeasurementUnit,
    pub value: f64,
}

/// A single proximity measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Proximity {
    pub unit: ProximityMeasurementUnit,
    pub value: f64,
    pub calibration: Option<Calibration>,
}

impl Proximity {
    pub fn new(unit: ProximityMeasurementUnit, value: f64) -> Self {
        Self {
            unit,
            value,
            calibration: None,
        }
    }

    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Short form used in logs, e.g. `RSSI:-55`
    pub fn description(&self) -> String {
        match self.calibration {
            Some(c) => format!("{}:{}[{}:{}]", self.unit, self.value, c.unit, c.value),
            None => format!("{}:{}", self.unit, self.value),
        }
    }
}

impl From<Rssi> for Proximity {
    fn from(rssi: Rssi) -> Self {
        Proximity::new(ProximityMeasurementUnit::Rssi, f64::from(rssi.value()))
    }
}

impl fmt::Display for Proximity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proximity_from_rssi() {
        let proximity = Proximity::from(Rssi(-55));
        assert_eq!(proximity.unit, ProximityMeasurementUnit::Rssi);
        assert_eq!(proximity.value, -55.0);
        assert_eq!(proximity.description(), "RSSI:-55");
    }

    #[test]
    fn test_proximity_with_calibration() {
        let proximity = Proximity::from(Rssi(-60)).with_calibration(Calibration {
            unit: ProximityMeasurementUnit::Rssi,
            value: -8.0,
        });
        assert_eq!(proximity.description(), "RSSI:-60[RSSI:-8]");
    }
}
