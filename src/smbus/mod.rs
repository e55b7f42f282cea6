//! Smart-battery (SBS over SMBus) protocol client.

pub mod client;
pub mod commands;

pub use client::{SmbusClient, DEFAULT_ADDRESS, MAX_BLOCK};
pub use commands::SpecificationInfo;
