//! # packmon
//!
//! Battery pack telemetry core. Talks to smart batteries over two wire
//! protocols — gauge-style devices on an addressed SMBus-like bus and daisy
//! chains of cell-monitor chips — and maintains a reactive, typed reading
//! store over the recognized cell topology. A periodic monitoring service
//! polls a connection and fans pack snapshots out to subscribers.
//!
//! The physical bus driver is not part of this crate; hosts implement the
//! [`transport`] traits over their native I/O and hand the bus to a
//! protocol client.
//!
//! ## Quick start
//!
//! ```no_run
//! use packmon::{MonitoringService, SmbusClient, SmbusBus, TransportError};
//! # struct NativeBus;
//! # impl SmbusBus for NativeBus {
//! #     fn send(&mut self, _: u8, _: &[u8]) -> Result<(), TransportError> { Ok(()) }
//! #     fn receive(&mut self, _: u8, _: usize) -> Result<Vec<u8>, TransportError> { Ok(Vec::new()) }
//! #     fn transceive(&mut self, _: u8, _: &[u8], _: usize) -> Result<Vec<u8>, TransportError> { Ok(Vec::new()) }
//! # }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let client = SmbusClient::new(NativeBus);
//! let service = MonitoringService::new(client);
//! let subscription = service.subscribe(|snapshot| {
//!     println!("pack voltage: {:?}", snapshot.voltage);
//! });
//! # drop(subscription);
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`store`] - typed reading store with change notification
//! - [`battery`] - cells, packs and topology aggregation
//! - [`smbus`] / [`chain`] - the two protocol codecs
//! - [`monitor`] - the polling scheduler
//! - [`catalog`] - display metadata for the well-known readings

pub mod battery;
pub mod catalog;
pub mod chain;
pub mod error;
pub mod monitor;
pub mod smbus;
pub mod store;
pub mod transport;

pub use battery::{BatteryElement, Cell, ChainChipPack, Pack, PackSnapshot, Topology};
pub use chain::{ChainClient, ChainOptions, ChipConfig};
pub use error::{Error, Result};
pub use monitor::{AcquisitionSource, MonitorOptions, MonitorSubscription, MonitoringService};
pub use smbus::SmbusClient;
pub use store::{EntryKey, ReadingStorage, ReadingValue, Scalar, ScalarKind, Subscription};
pub use transport::{ChainBus, RetryPolicy, SmbusBus, TransportError};
