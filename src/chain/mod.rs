//! Daisy-chain cell-monitor protocol client.

pub mod client;
pub mod commands;
pub mod pec15;
pub mod registers;

pub use client::{ChainClient, ChainOptions, AUX_CHANNELS_PER_CHIP, CHANNELS_PER_CHIP};
pub use commands::ConversionMode;
pub use registers::{ChipConfig, MAX_CHAIN_LENGTH};
