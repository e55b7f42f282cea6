//! Presentation metadata for the well-known readings.

use crate::battery::BatteryElement;
use crate::store::key::{self, EntryKey};
use crate::store::Scalar;

/// How one reading should be labelled and formatted for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingDescriptor {
    pub key: EntryKey,
    pub title: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    /// Fraction digits when formatting a float.
    pub precision: usize,
}

impl ReadingDescriptor {
    pub fn read(&self, element: &dyn BatteryElement) -> Option<Scalar> {
        element.storage().try_get_value(self.key)
    }

    /// Formatted reading with its unit, or a dash when undefined.
    pub fn format(&self, element: &dyn BatteryElement) -> String {
        match self.read(element) {
            Some(Scalar::Float(v)) => {
                format!("{v:.prec$} {}", self.unit, prec = self.precision)
            }
            Some(value) => {
                if self.unit.is_empty() {
                    value.to_string()
                } else {
                    format!("{value} {}", self.unit)
                }
            }
            None => "-".to_string(),
        }
    }
}

/// Descriptors for the pack-level quantities, in display order.
pub const fn pack_descriptors() -> [ReadingDescriptor; 10] {
    [
        ReadingDescriptor {
            key: key::VOLTAGE,
            title: "Voltage",
            description: "Terminal voltage of the pack",
            unit: "V",
            precision: 3,
        },
        ReadingDescriptor {
            key: key::CURRENT,
            title: "Current",
            description: "Instantaneous current, negative while charging",
            unit: "A",
            precision: 3,
        },
        ReadingDescriptor {
            key: key::AVERAGE_CURRENT,
            title: "Average current",
            description: "Current averaged over the gauge's rolling window",
            unit: "A",
            precision: 3,
        },
        ReadingDescriptor {
            key: key::TEMPERATURE,
            title: "Temperature",
            description: "Hottest reported temperature in the pack",
            unit: "K",
            precision: 1,
        },
        ReadingDescriptor {
            key: key::REMAINING_CAPACITY,
            title: "Remaining capacity",
            description: "Charge left before the pack is empty",
            unit: "Ah",
            precision: 3,
        },
        ReadingDescriptor {
            key: key::FULL_CHARGE_CAPACITY,
            title: "Full charge capacity",
            description: "Capacity the pack holds when fully charged",
            unit: "Ah",
            precision: 3,
        },
        ReadingDescriptor {
            key: key::RELATIVE_SOC,
            title: "Relative state of charge",
            description: "Charge relative to the full-charge capacity",
            unit: "%",
            precision: 0,
        },
        ReadingDescriptor {
            key: key::ABSOLUTE_SOC,
            title: "Absolute state of charge",
            description: "Charge relative to the design capacity",
            unit: "%",
            precision: 0,
        },
        ReadingDescriptor {
            key: key::RUN_TIME,
            title: "Run time",
            description: "Estimated minutes at the present rate",
            unit: "min",
            precision: 0,
        },
        ReadingDescriptor {
            key: key::AVERAGE_RUN_TIME,
            title: "Average run time",
            description: "Estimated minutes at the average rate",
            unit: "min",
            precision: 0,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battery::Cell;

    #[test]
    fn format_renders_floats_with_unit_and_dash_when_undefined() {
        let cell = Cell::new();
        let descriptors = pack_descriptors();
        let voltage = descriptors
            .iter()
            .find(|d| d.key == key::VOLTAGE)
            .copied()
            .unwrap();
        assert_eq!(voltage.format(&cell), "-");
        cell.storage()
            .set(key::VOLTAGE, Scalar::Float(3.7))
            .unwrap();
        assert_eq!(voltage.format(&cell), "3.700 V");
    }

    #[test]
    fn every_descriptor_names_an_aggregable_key() {
        for descriptor in pack_descriptors() {
            assert!(crate::battery::AGGREGABLE_KEYS.contains(&descriptor.key));
            assert!(!descriptor.title.is_empty());
        }
    }
}
