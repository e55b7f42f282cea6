use serde::{Deserialize, Serialize};

use crate::battery::element::BatteryElement;
use crate::store::key;
use crate::store::Scalar;

/// A serializable point-in-time view of a pack, handed to monitoring
/// subscribers and display layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackSnapshot {
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub average_current: Option<f64>,
    pub temperature: Option<f64>,
    pub remaining_capacity: Option<f64>,
    pub full_charge_capacity: Option<f64>,
    pub relative_state_of_charge: Option<f64>,
    pub absolute_state_of_charge: Option<f64>,
    pub run_time: Option<f64>,
    pub average_run_time: Option<f64>,
    /// Voltages of the leaf cells, in traversal order.
    pub cell_voltages: Vec<Option<f64>>,
}

fn read(element: &dyn BatteryElement, entry: crate::store::EntryKey) -> Option<f64> {
    match element.storage().try_get_value(entry) {
        Some(Scalar::Float(v)) => Some(v),
        Some(Scalar::Int(v)) => Some(v as f64),
        _ => None,
    }
}

fn collect_leaf_voltages(element: &dyn BatteryElement, out: &mut Vec<Option<f64>>) {
    if element.children().is_empty() {
        out.push(read(element, key::VOLTAGE));
        return;
    }
    for child in element.children() {
        collect_leaf_voltages(child.as_ref(), out);
    }
}

impl PackSnapshot {
    pub fn capture(element: &dyn BatteryElement) -> Self {
        let mut cell_voltages = Vec::new();
        collect_leaf_voltages(element, &mut cell_voltages);
        Self {
            voltage: read(element, key::VOLTAGE),
            current: read(element, key::CURRENT),
            average_current: read(element, key::AVERAGE_CURRENT),
            temperature: read(element, key::TEMPERATURE),
            remaining_capacity: read(element, key::REMAINING_CAPACITY),
            full_charge_capacity: read(element, key::FULL_CHARGE_CAPACITY),
            relative_state_of_charge: read(element, key::RELATIVE_SOC),
            absolute_state_of_charge: read(element, key::ABSOLUTE_SOC),
            run_time: read(element, key::RUN_TIME),
            average_run_time: read(element, key::AVERAGE_RUN_TIME),
            cell_voltages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::{Cell, Pack};
    use crate::store::Scalar;
    use std::sync::Arc;

    #[test]
    fn capture_walks_down_to_leaf_cells() {
        let cells: Vec<Arc<Cell>> = (0..3).map(|_| Arc::new(Cell::new())).collect();
        for (i, cell) in cells.iter().enumerate() {
            cell.storage()
                .set(key::VOLTAGE, Scalar::Float(3.6 + i as f64 * 0.1))
                .unwrap();
        }
        let pack = Pack::series(
            cells
                .iter()
                .map(|c| Arc::clone(c) as Arc<dyn BatteryElement>)
                .collect(),
        )
        .unwrap();
        let snapshot = PackSnapshot::capture(&pack);
        assert_eq!(snapshot.cell_voltages, vec![Some(3.6), Some(3.7), Some(3.8)]);
        assert!((snapshot.voltage.unwrap() - 11.1).abs() < 1e-6);
        assert_eq!(snapshot.current, None);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let cell = Cell::new();
        cell.storage()
            .set(key::VOLTAGE, Scalar::Float(3.7))
            .unwrap();
        let snapshot = PackSnapshot::capture(&cell);
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: PackSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
