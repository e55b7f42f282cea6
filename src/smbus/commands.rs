//! Smart Battery System command table and word decoders.

use crate::error::{Error, Result};

pub const BATTERY_MODE: u8 = 0x03;
pub const TEMPERATURE: u8 = 0x08;
pub const VOLTAGE: u8 = 0x09;
pub const CURRENT: u8 = 0x0A;
pub const AVERAGE_CURRENT: u8 = 0x0B;
pub const MAX_ERROR: u8 = 0x0C;
pub const RELATIVE_STATE_OF_CHARGE: u8 = 0x0D;
pub const ABSOLUTE_STATE_OF_CHARGE: u8 = 0x0E;
pub const REMAINING_CAPACITY: u8 = 0x0F;
pub const FULL_CHARGE_CAPACITY: u8 = 0x10;
pub const RUN_TIME_TO_EMPTY: u8 = 0x11;
pub const AVERAGE_TIME_TO_EMPTY: u8 = 0x12;
pub const AVERAGE_TIME_TO_FULL: u8 = 0x13;
pub const BATTERY_STATUS: u8 = 0x16;
pub const CYCLE_COUNT: u8 = 0x17;
pub const DESIGN_CAPACITY: u8 = 0x18;
pub const DESIGN_VOLTAGE: u8 = 0x19;
pub const SPECIFICATION_INFO: u8 = 0x1A;
pub const MANUFACTURE_DATE: u8 = 0x1B;
pub const SERIAL_NUMBER: u8 = 0x1C;
pub const MANUFACTURER_NAME: u8 = 0x20;
pub const DEVICE_NAME: u8 = 0x21;
pub const DEVICE_CHEMISTRY: u8 = 0x22;

/// Vendor extension: number of serial cells behind the gauge.
pub const CELL_COUNT: u8 = 0x40;

/// Run times report this when the gauge cannot estimate.
pub const RUN_TIME_UNKNOWN: u16 = 0xFFFF;

/// Per-cell voltage registers, highest command for cell 0.
pub fn cell_voltage_command(cell: usize) -> Result<u8> {
    match cell {
        0 => Ok(0x3F),
        1 => Ok(0x3E),
        2 => Ok(0x3D),
        3 => Ok(0x3C),
        _ => Err(Error::InvalidConfig(format!(
            "no voltage register for cell {cell}"
        ))),
    }
}

/// Decoded SpecificationInfo word: protocol revision plus the powers of
/// ten applied to every voltage and current read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecificationInfo {
    pub version: &'static str,
    pub voltage_scale: f64,
    pub current_scale: f64,
}

pub fn decode_specification_info(word: u16) -> SpecificationInfo {
    let version = match word & 0x00FF {
        0x11 => "1.0",
        0x21 => "1.1",
        0x31 => "1.1.1",
        _ => "unknown",
    };
    SpecificationInfo {
        version,
        voltage_scale: 10f64.powi(((word >> 8) & 0x0F) as i32),
        current_scale: 10f64.powi(((word >> 12) & 0x0F) as i32),
    }
}

/// Decoded ManufactureDate word as an ISO calendar date string.
///
/// The word packs day in bits 0-4, month in bits 5-8 and years since 1980
/// in bits 9-15. Out-of-range day or month decodes to the epoch date.
pub fn decode_manufacture_date(word: u16) -> String {
    let day = word & 0x1F;
    let month = (word >> 5) & 0x0F;
    let year = 1980 + (word >> 9);
    if day == 0 || day > 31 || month == 0 || month > 12 {
        return "1980-01-01".to_string();
    }
    format!("{year:04}-{month:02}-{day:02}")
}
