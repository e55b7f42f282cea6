use core::fmt;
use serde::Serialize;

/// Namespaced identifier of one logical reading.
///
/// Keys are value-equal and cheap to copy; the well-known ones are declared
/// as constants below so codecs, aggregation wiring and the display catalog
/// all agree on the same identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EntryKey {
    pub namespace: &'static str,
    pub name: &'static str,
}

impl EntryKey {
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

pub const NS_DESIGN: &str = "design";
pub const NS_PRODUCT: &str = "product";
pub const NS_ACTUALS: &str = "actuals";
pub const NS_HEALTH: &str = "health";

// Design parameters, fixed at recognition time.
pub const NOMINAL_VOLTAGE: EntryKey = EntryKey::new(NS_DESIGN, "nominal_voltage");
pub const DESIGN_VOLTAGE: EntryKey = EntryKey::new(NS_DESIGN, "design_voltage");
pub const DESIGN_CAPACITY: EntryKey = EntryKey::new(NS_DESIGN, "design_capacity");

// Product identity.
pub const MANUFACTURER: EntryKey = EntryKey::new(NS_PRODUCT, "manufacturer");
pub const PRODUCT: EntryKey = EntryKey::new(NS_PRODUCT, "product");
pub const CHEMISTRY: EntryKey = EntryKey::new(NS_PRODUCT, "chemistry");
pub const MANUFACTURE_DATE: EntryKey = EntryKey::new(NS_PRODUCT, "manufacture_date");
pub const SERIAL_NUMBER: EntryKey = EntryKey::new(NS_PRODUCT, "serial_number");
pub const SPECIFICATION_VERSION: EntryKey = EntryKey::new(NS_PRODUCT, "specification_version");

// Continuously acquired readings.
pub const VOLTAGE: EntryKey = EntryKey::new(NS_ACTUALS, "voltage");
pub const CURRENT: EntryKey = EntryKey::new(NS_ACTUALS, "current");
pub const AVERAGE_CURRENT: EntryKey = EntryKey::new(NS_ACTUALS, "average_current");
pub const TEMPERATURE: EntryKey = EntryKey::new(NS_ACTUALS, "temperature");
pub const REMAINING_CAPACITY: EntryKey = EntryKey::new(NS_ACTUALS, "remaining_capacity");
pub const ABSOLUTE_SOC: EntryKey = EntryKey::new(NS_ACTUALS, "absolute_state_of_charge");
pub const RELATIVE_SOC: EntryKey = EntryKey::new(NS_ACTUALS, "relative_state_of_charge");
pub const RUN_TIME: EntryKey = EntryKey::new(NS_ACTUALS, "run_time");
pub const AVERAGE_RUN_TIME: EntryKey = EntryKey::new(NS_ACTUALS, "average_run_time");
pub const BATTERY_MODE: EntryKey = EntryKey::new(NS_ACTUALS, "battery_mode");
pub const BATTERY_STATUS: EntryKey = EntryKey::new(NS_ACTUALS, "battery_status");

// Slowly changing health figures.
pub const FULL_CHARGE_CAPACITY: EntryKey = EntryKey::new(NS_HEALTH, "full_charge_capacity");
pub const CYCLE_COUNT: EntryKey = EntryKey::new(NS_HEALTH, "cycle_count");
pub const CALCULATION_PRECISION: EntryKey = EntryKey::new(NS_HEALTH, "calculation_precision");
