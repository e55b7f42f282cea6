use std::collections::BTreeMap;
use std::sync::Arc;

use crate::battery::element::{BatteryElement, Cell, AGGREGABLE_KEYS};
use crate::error::{Error, Result};
use crate::store::key::{self, EntryKey};
use crate::store::{
    Aggregation, Distribution, MathValue, ReadingStorage, ReadingValue, ScalarKind, Subscription,
    TypedValue,
};

/// Electrical arrangement of a pack's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Series,
    Parallel,
}

const EQUALITY_TOLERANCE: f64 = 1e-6;

fn aggregation_for(topology: Topology, entry: EntryKey) -> Aggregation {
    let all_equal = Aggregation::AllEqual {
        tolerance: EQUALITY_TOLERANCE,
    };
    match topology {
        Topology::Series => match entry {
            key::VOLTAGE => Aggregation::Sum,
            key::CURRENT | key::AVERAGE_CURRENT => all_equal,
            key::TEMPERATURE => Aggregation::Max,
            key::REMAINING_CAPACITY | key::FULL_CHARGE_CAPACITY => Aggregation::Min,
            key::RELATIVE_SOC | key::ABSOLUTE_SOC => Aggregation::Average,
            _ => Aggregation::Min,
        },
        Topology::Parallel => match entry {
            key::VOLTAGE => all_equal,
            key::CURRENT | key::AVERAGE_CURRENT => Aggregation::Sum,
            key::TEMPERATURE => Aggregation::Max,
            key::REMAINING_CAPACITY | key::FULL_CHARGE_CAPACITY => Aggregation::MinTimesCount,
            key::RELATIVE_SOC | key::ABSOLUTE_SOC => Aggregation::Average,
            _ => Aggregation::Min,
        },
    }
}

/// A pack combining child elements in series or parallel.
///
/// Each aggregable reading is wired as a fallback chain: a directly
/// measured pack-level value shadows the aggregate computed from the
/// children. Child change notifications bubble up through this pack's
/// storage.
pub struct Pack {
    topology: Topology,
    storage: ReadingStorage,
    children: Vec<Arc<dyn BatteryElement>>,
    _forwarders: Vec<Subscription>,
}

impl Pack {
    pub fn series(children: Vec<Arc<dyn BatteryElement>>) -> Result<Self> {
        Self::new(Topology::Series, children)
    }

    pub fn parallel(children: Vec<Arc<dyn BatteryElement>>) -> Result<Self> {
        Self::new(Topology::Parallel, children)
    }

    pub fn new(topology: Topology, children: Vec<Arc<dyn BatteryElement>>) -> Result<Self> {
        if children.is_empty() {
            return Err(Error::InvalidConfig("a pack needs at least one child".into()));
        }
        let storage = ReadingStorage::new();
        for entry in AGGREGABLE_KEYS {
            let aggregation = aggregation_for(topology, entry);
            let distribution = match aggregation {
                Aggregation::Sum => Some(Distribution::SplitEvenly),
                _ => None,
            };
            storage.create_value(
                entry,
                ReadingValue::Fallback(vec![
                    ReadingValue::Typed(TypedValue::undefined(ScalarKind::Float)),
                    ReadingValue::Math(MathValue {
                        children: children.clone(),
                        key: entry,
                        aggregation,
                        distribution,
                    }),
                ]),
            );
        }
        let forwarders = children
            .iter()
            .map(|child| {
                let notifier = storage.notifier();
                child.storage().subscribe(move |entry| notifier.notify(entry))
            })
            .collect();
        Ok(Self {
            topology,
            storage,
            children,
            _forwarders: forwarders,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }
}

impl BatteryElement for Pack {
    fn storage(&self) -> &ReadingStorage {
        &self.storage
    }

    fn children(&self) -> &[Arc<dyn BatteryElement>] {
        &self.children
    }
}

/// The pack slice handled by one chip of a daisy chain: its connected
/// cells in series, keyed by the chip's measurement channel.
pub struct ChainChipPack {
    chain_index: usize,
    cells: BTreeMap<usize, Arc<Cell>>,
    pack: Pack,
}

impl ChainChipPack {
    pub fn new(chain_index: usize, cells: BTreeMap<usize, Arc<Cell>>) -> Result<Self> {
        let children: Vec<Arc<dyn BatteryElement>> = cells
            .values()
            .map(|cell| Arc::clone(cell) as Arc<dyn BatteryElement>)
            .collect();
        let pack = Pack::series(children)?;
        Ok(Self {
            chain_index,
            cells,
            pack,
        })
    }

    pub fn chain_index(&self) -> usize {
        self.chain_index
    }

    /// Cells by measurement channel, in channel order.
    pub fn cells(&self) -> &BTreeMap<usize, Arc<Cell>> {
        &self.cells
    }

    pub fn cell(&self, channel: usize) -> Option<&Arc<Cell>> {
        self.cells.get(&channel)
    }
}

impl BatteryElement for ChainChipPack {
    fn storage(&self) -> &ReadingStorage {
        self.pack.storage()
    }

    fn children(&self) -> &[Arc<dyn BatteryElement>] {
        self.pack.children()
    }
}
