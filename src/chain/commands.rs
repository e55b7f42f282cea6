//! Command words of the daisy-chain cell monitors.

use crate::chain::pec15::append_pec;

pub const WRCFG: u16 = 0x0001;
pub const RDCFG: u16 = 0x0002;
pub const RDCVA: u16 = 0x0004;
pub const RDCVB: u16 = 0x0006;
pub const RDCVC: u16 = 0x0008;
pub const RDCVD: u16 = 0x000A;
pub const RDAUXA: u16 = 0x000C;
pub const RDAUXB: u16 = 0x000E;
pub const RDSTATA: u16 = 0x0010;
pub const RDSTATB: u16 = 0x0012;

const ADCV_BASE: u16 = 0x0260;
const ADAX_BASE: u16 = 0x0460;
const CVST_BASE: u16 = 0x0207;

/// The four cell-voltage register groups, in channel order.
pub const CELL_VOLTAGE_GROUPS: [u16; 4] = [RDCVA, RDCVB, RDCVC, RDCVD];

/// The two auxiliary register groups: five GPIO channels plus the second
/// reference, in channel order.
pub const AUX_VOLTAGE_GROUPS: [u16; 2] = [RDAUXA, RDAUXB];

/// ADC conversion speed/filter selector, a 3-bit field in conversion
/// commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    Fast = 0x01,
    Normal = 0x02,
    Filtered = 0x03,
}

fn with_mode(base: u16, mode: ConversionMode, permit_discharge: bool, channel: u8) -> u16 {
    base | (((mode as u16) & 0x07) << 7)
        | ((permit_discharge as u16) << 4)
        | ((channel & 0x07) as u16)
}

/// Start a cell-voltage conversion; channel 0 converts all cells.
pub fn start_cell_conversion(mode: ConversionMode, permit_discharge: bool, channel: u8) -> u16 {
    with_mode(ADCV_BASE, mode, permit_discharge, channel)
}

/// Start a GPIO/reference auxiliary conversion.
pub fn start_aux_conversion(mode: ConversionMode, channel: u8) -> u16 {
    with_mode(ADAX_BASE, mode, false, channel)
}

/// Start the cell-voltage self test.
pub fn start_self_test(mode: ConversionMode, test: u8) -> u16 {
    CVST_BASE | (((mode as u16) & 0x07) << 7) | (((test & 0x03) as u16) << 5)
}

/// Command word followed by its PEC, as broadcast on the chain.
pub fn frame(command: u16) -> Vec<u8> {
    let mut frame = command.to_be_bytes().to_vec();
    append_pec(&mut frame);
    frame
}
