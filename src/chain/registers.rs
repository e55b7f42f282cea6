//! Register-group wire format of the daisy-chain monitors.
//!
//! Every register group is 6 data bytes followed by a 2-byte PEC, one block
//! per chip in chain order. Chips past the end of the physical chain clock
//! back the bus idle pattern (all `0xFF`).

use heapless::Vec as BoundedVec;
use static_assertions::const_assert_eq;
use tracing::warn;

use crate::chain::pec15;
use crate::error::{Error, Result};

/// Data bytes per register group.
pub const BLOCK_LEN: usize = 6;

/// Register group plus PEC as it appears on the wire.
pub const BLOCK_WITH_PEC: usize = BLOCK_LEN + 2;

/// The chain is physically bounded by the isolator hardware.
pub const MAX_CHAIN_LENGTH: usize = 32;

/// Voltage channels per register group.
pub const CHANNELS_PER_GROUP: usize = 3;

/// Volts per ADC count.
pub const VOLTAGE_LSB: f64 = 0.0001;

/// Volts per under/overvoltage comparator count.
const THRESHOLD_LSB: f64 = 0.0016;

const_assert_eq!(BLOCK_WITH_PEC, 8);

/// One chip's register group, or `None` when its PEC failed.
pub type ChipBlocks = BoundedVec<Option<[u8; BLOCK_LEN]>, MAX_CHAIN_LENGTH>;

/// Splits a chain response into per-chip register groups, dropping blocks
/// whose PEC does not check out.
///
/// A corrupt block is a per-chip transient: the chip's readings are skipped
/// for this round while the rest of the chain stays usable. A response that
/// is not a whole number of blocks for `chain_length` chips is a protocol
/// consistency fault.
pub fn split_blocks(response: &[u8], chain_length: usize) -> Result<ChipBlocks> {
    if response.len() != chain_length * BLOCK_WITH_PEC {
        return Err(Error::ProtocolConsistency(format!(
            "expected {} register bytes for {} chips, received {}",
            chain_length * BLOCK_WITH_PEC,
            chain_length,
            response.len()
        )));
    }
    let mut blocks = ChipBlocks::new();
    for (index, raw) in response.chunks_exact(BLOCK_WITH_PEC).enumerate() {
        if pec15::verify(raw) {
            let mut block = [0u8; BLOCK_LEN];
            block.copy_from_slice(&raw[..BLOCK_LEN]);
            let _ = blocks.push(Some(block));
        } else {
            warn!(chip = index, "register block failed its crc, skipping");
            let _ = blocks.push(None);
        }
    }
    Ok(blocks)
}

/// The three voltage channels of a register group, in volts.
pub fn decode_voltages(block: &[u8; BLOCK_LEN]) -> [f64; CHANNELS_PER_GROUP] {
    let mut voltages = [0.0; CHANNELS_PER_GROUP];
    for (channel, voltage) in voltages.iter_mut().enumerate() {
        let word = u16::from_le_bytes([block[channel * 2], block[channel * 2 + 1]]);
        *voltage = word as f64 * VOLTAGE_LSB;
    }
    voltages
}

/// Configuration register group of one chip.
#[derive(Debug, Clone, PartialEq)]
pub struct ChipConfig {
    pub adc_option: bool,
    pub reference_on: bool,
    pub gpio_pulldown: [bool; 5],
    /// Undervoltage comparison threshold, volts.
    pub undervoltage: f64,
    /// Overvoltage comparison threshold, volts.
    pub overvoltage: f64,
    pub discharge: [bool; 12],
    /// Discharge watchdog selector, 4 bits.
    pub discharge_timeout: u8,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            adc_option: false,
            reference_on: false,
            gpio_pulldown: [true; 5],
            undervoltage: 2.8,
            overvoltage: 4.2,
            discharge: [false; 12],
            discharge_timeout: 0,
        }
    }
}

impl ChipConfig {
    pub fn encode(&self) -> Result<[u8; BLOCK_LEN]> {
        let uv = ((self.undervoltage / THRESHOLD_LSB).round() as i64).saturating_sub(1);
        let ov = (self.overvoltage / THRESHOLD_LSB).round() as i64;
        if !(0..=0x0FFF).contains(&uv) || !(0..=0x0FFF).contains(&ov) {
            return Err(Error::InvalidConfig(format!(
                "comparator thresholds {}/{} V out of the 12-bit range",
                self.undervoltage, self.overvoltage
            )));
        }
        if self.discharge_timeout > 0x0F {
            return Err(Error::InvalidConfig(format!(
                "discharge timeout {} exceeds 4 bits",
                self.discharge_timeout
            )));
        }
        let (uv, ov) = (uv as u16, ov as u16);
        let mut block = [0u8; BLOCK_LEN];
        block[0] = self.adc_option as u8 | (self.reference_on as u8) << 2;
        for (bit, &on) in self.gpio_pulldown.iter().enumerate() {
            block[0] |= (on as u8) << (3 + bit);
        }
        block[1] = (uv & 0xFF) as u8;
        block[2] = ((uv >> 8) & 0x0F) as u8 | ((ov & 0x0F) as u8) << 4;
        block[3] = ((ov >> 4) & 0xFF) as u8;
        for (bit, &on) in self.discharge[..8].iter().enumerate() {
            block[4] |= (on as u8) << bit;
        }
        for (bit, &on) in self.discharge[8..].iter().enumerate() {
            block[5] |= (on as u8) << bit;
        }
        block[5] |= (self.discharge_timeout & 0x0F) << 4;
        Ok(block)
    }

    pub fn decode(block: &[u8; BLOCK_LEN]) -> Self {
        let uv = block[1] as u16 | ((block[2] & 0x0F) as u16) << 8;
        let ov = ((block[2] >> 4) as u16) | (block[3] as u16) << 4;
        let mut gpio_pulldown = [false; 5];
        for (bit, slot) in gpio_pulldown.iter_mut().enumerate() {
            *slot = block[0] >> (3 + bit) & 1 != 0;
        }
        let mut discharge = [false; 12];
        for (bit, slot) in discharge.iter_mut().enumerate().take(8) {
            *slot = block[4] >> bit & 1 != 0;
        }
        for (bit, slot) in discharge.iter_mut().skip(8).enumerate() {
            *slot = block[5] >> bit & 1 != 0;
        }
        Self {
            adc_option: block[0] & 1 != 0,
            reference_on: block[0] >> 2 & 1 != 0,
            gpio_pulldown,
            undervoltage: (uv + 1) as f64 * THRESHOLD_LSB,
            overvoltage: ov as f64 * THRESHOLD_LSB,
            discharge,
            discharge_timeout: block[5] >> 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::pec15::append_pec;

    fn framed(block: &[u8; BLOCK_LEN]) -> Vec<u8> {
        let mut out = block.to_vec();
        append_pec(&mut out);
        out
    }

    #[test]
    fn voltage_channels_decode_little_endian_at_100uv() {
        let block = [0x10, 0x0F, 0x00, 0x00, 0xFF, 0xFF];
        let voltages = decode_voltages(&block);
        assert!((voltages[0] - 0.3856).abs() < 1e-9);
        assert_eq!(voltages[1], 0.0);
        assert!((voltages[2] - 6.5535).abs() < 1e-9);
    }

    #[test]
    fn split_verifies_each_chip_independently() {
        let good = [0x10, 0x0F, 0x20, 0x0E, 0x30, 0x0D];
        let mut response = framed(&good);
        let mut corrupt = framed(&good);
        corrupt[0] ^= 0xFF;
        response.extend_from_slice(&corrupt);
        let blocks = split_blocks(&response, 2).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], Some(good));
        assert_eq!(blocks[1], None);
    }

    #[test]
    fn wrong_response_geometry_is_a_consistency_fault() {
        let response = framed(&[0u8; BLOCK_LEN]);
        assert!(matches!(
            split_blocks(&response, 2),
            Err(Error::ProtocolConsistency(_))
        ));
    }

    #[test]
    fn config_encodes_its_default_thresholds() {
        let block = ChipConfig::default().encode().unwrap();
        // Pulldowns on, reference off: 0b1111_1000.
        assert_eq!(block[0], 0xF8);
        let back = ChipConfig::decode(&block);
        assert!((back.undervoltage - 2.8).abs() < 1e-3);
        assert!((back.overvoltage - 4.2).abs() < 1e-3);
        assert_eq!(back.gpio_pulldown, [true; 5]);
        assert_eq!(back.discharge, [false; 12]);
    }

    #[test]
    fn config_roundtrips_discharge_and_timeout() {
        let mut config = ChipConfig::default();
        config.discharge[0] = true;
        config.discharge[11] = true;
        config.discharge_timeout = 0x0A;
        config.reference_on = true;
        let back = ChipConfig::decode(&config.encode().unwrap());
        assert_eq!(back.discharge, config.discharge);
        assert_eq!(back.discharge_timeout, 0x0A);
        assert!(back.reference_on);
    }

    #[test]
    fn config_rejects_thresholds_outside_the_comparator_range() {
        let mut config = ChipConfig::default();
        config.overvoltage = 8.0;
        assert!(matches!(config.encode(), Err(Error::InvalidConfig(_))));
        let mut config = ChipConfig::default();
        config.undervoltage = -1.0;
        assert!(matches!(config.encode(), Err(Error::InvalidConfig(_))));
    }
}
