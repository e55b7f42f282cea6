//! PEC-15 packet error code used by the daisy-chain monitor chips.
//!
//! 15-bit CRC, polynomial x^15 + x^14 + x^10 + x^8 + x^7 + x^4 + x^3 + 1,
//! seed 0x0010, bits consumed MSB first. The chips transmit the register
//! left-shifted by one, so the low bit of the wire value is always zero.

const SEED: u16 = 0x0010;
const POLY: u16 = 0x4599;

/// PEC over `data`, as it appears on the wire.
pub fn pec15(data: &[u8]) -> u16 {
    let mut remainder = SEED;
    for &byte in data {
        for bit in (0..8).rev() {
            let din = (byte >> bit) & 1;
            let in0 = din ^ ((remainder >> 14) & 1) as u8;
            remainder <<= 1;
            if in0 != 0 {
                remainder ^= POLY;
            }
            remainder &= 0x7FFF;
        }
    }
    remainder << 1
}

/// Appends the two PEC bytes (big-endian) to `frame` over its current
/// contents.
pub fn append_pec(frame: &mut Vec<u8>) {
    let pec = pec15(frame);
    frame.extend_from_slice(&pec.to_be_bytes());
}

/// Checks the trailing two bytes of `block` against the PEC of the rest.
pub fn verify(block: &[u8]) -> bool {
    if block.len() < 2 {
        return false;
    }
    let (payload, tail) = block.split_at(block.len() - 2);
    pec15(payload) == u16::from_be_bytes([tail[0], tail[1]])
}
