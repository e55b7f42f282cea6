use std::sync::Arc;

use crate::store::key::{self, EntryKey};
use crate::store::{ReadingStorage, ReadingValue, Scalar, ScalarKind};

/// A node of the battery topology: a single cell, or a pack combining
/// child elements.
///
/// Every element owns its own [`ReadingStorage`]; packs derive their
/// readings from the same keys on their children.
pub trait BatteryElement: Send + Sync {
    fn storage(&self) -> &ReadingStorage;
    fn children(&self) -> &[Arc<dyn BatteryElement>];
}

/// The per-quantity keys a pack aggregates from its children.
pub const AGGREGABLE_KEYS: [EntryKey; 10] = [
    key::VOLTAGE,
    key::CURRENT,
    key::AVERAGE_CURRENT,
    key::TEMPERATURE,
    key::REMAINING_CAPACITY,
    key::FULL_CHARGE_CAPACITY,
    key::RELATIVE_SOC,
    key::ABSOLUTE_SOC,
    key::RUN_TIME,
    key::AVERAGE_RUN_TIME,
];

/// A single electrochemical cell, the leaf of every topology.
pub struct Cell {
    storage: ReadingStorage,
}

impl Cell {
    pub fn new() -> Self {
        let storage = ReadingStorage::new();
        for entry in AGGREGABLE_KEYS {
            storage.create_value(entry, ReadingValue::typed(ScalarKind::Float));
        }
        Self { storage }
    }

    pub fn with_nominal_voltage(nominal_voltage: f64) -> Self {
        let cell = Self::new();
        cell.storage.create_value(
            key::NOMINAL_VOLTAGE,
            ReadingValue::with_value(Scalar::Float(nominal_voltage)),
        );
        cell
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

impl BatteryElement for Cell {
    fn storage(&self) -> &ReadingStorage {
        &self.storage
    }

    fn children(&self) -> &[Arc<dyn BatteryElement>] {
        &[]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::key;

    #[test]
    fn new_cell_has_undefined_aggregable_entries() {
        let cell = Cell::new();
        for entry in AGGREGABLE_KEYS {
            assert!(cell.storage().contains(entry));
            assert_eq!(cell.storage().try_get_value(entry), None);
        }
    }

    #[test]
    fn nominal_voltage_is_recorded_as_a_design_parameter() {
        let cell = Cell::with_nominal_voltage(3.7);
        assert_eq!(
            cell.storage().get::<f64>(key::NOMINAL_VOLTAGE).unwrap(),
            3.7
        );
    }
}
