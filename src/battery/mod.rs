//! Battery topology model: cells, series/parallel packs, snapshots.

pub mod element;
pub mod pack;
pub mod snapshot;

pub use element::{BatteryElement, Cell, AGGREGABLE_KEYS};
pub use pack::{ChainChipPack, Pack, Topology};
pub use snapshot::PackSnapshot;
