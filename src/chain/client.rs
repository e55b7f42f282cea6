use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::battery::{BatteryElement, Cell, ChainChipPack, Pack, PackSnapshot};
use crate::chain::commands::{self, ConversionMode, AUX_VOLTAGE_GROUPS, CELL_VOLTAGE_GROUPS};
use crate::chain::registers::{
    self, ChipBlocks, ChipConfig, BLOCK_WITH_PEC, CHANNELS_PER_GROUP, MAX_CHAIN_LENGTH,
};
use crate::error::{Error, Result};
use crate::store::key;
use crate::store::Scalar;
use crate::transport::{ChainBus, RetryPolicy, TransportError};

/// Measurement channels per chip.
pub const CHANNELS_PER_CHIP: usize = CELL_VOLTAGE_GROUPS.len() * CHANNELS_PER_GROUP;

/// Auxiliary channels per chip: five GPIO inputs plus the second reference.
pub const AUX_CHANNELS_PER_CHIP: usize = AUX_VOLTAGE_GROUPS.len() * CHANNELS_PER_GROUP;

/// Tuning knobs of the chain client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainOptions {
    /// Settling time between starting a conversion and reading results.
    pub conversion_delay: Duration,
    /// Channels reading below this during recognition are unconnected.
    pub connected_threshold: f64,
    pub mode: ConversionMode,
    pub permit_discharge: bool,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            conversion_delay: Duration::from_millis(3),
            connected_threshold: 0.5,
            mode: ConversionMode::Normal,
            permit_discharge: false,
        }
    }
}

/// Client for a daisy chain of cell-monitor chips.
///
/// `recognize` discovers the chain length and which measurement channels
/// have cells wired to them, then builds one series pack of per-chip packs.
/// `refresh_actuals` runs a conversion and streams per-cell voltages into
/// the hierarchy.
pub struct ChainClient<B: ChainBus> {
    bus: B,
    options: ChainOptions,
    retry: RetryPolicy,
    chain_length: usize,
    chip_packs: Vec<Arc<ChainChipPack>>,
    pack: Option<Pack>,
}

impl<B: ChainBus> ChainClient<B> {
    pub fn new(bus: B) -> Self {
        Self::with_options(bus, ChainOptions::default())
    }

    pub fn with_options(bus: B, options: ChainOptions) -> Self {
        Self {
            bus,
            options,
            retry: RetryPolicy::default(),
            chain_length: 0,
            chip_packs: Vec::new(),
            pack: None,
        }
    }

    pub fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Chips discovered on the chain; zero before recognition.
    pub fn chain_length(&self) -> usize {
        self.chain_length
    }

    pub fn chip_packs(&self) -> &[Arc<ChainChipPack>] {
        &self.chip_packs
    }

    pub fn pack(&self) -> Option<&Pack> {
        self.pack.as_ref()
    }

    /// Counts the chips on the chain by reading status register B addressed
    /// for the longest supported chain: positions past the physical end
    /// clock back the idle pattern.
    pub fn discover(&mut self) -> Result<usize> {
        let frame = commands::frame(commands::RDSTATB);
        let bus = &mut self.bus;
        let response = self
            .retry
            .run(|| Ok(bus.transceive(&frame, MAX_CHAIN_LENGTH * BLOCK_WITH_PEC)?))?;
        let length = response
            .chunks_exact(BLOCK_WITH_PEC)
            .rposition(|block| block.iter().any(|&b| b != 0xFF))
            .map(|index| index + 1)
            .unwrap_or(0);
        if length == 0 {
            return Err(Error::ProtocolConsistency(
                "no chips answered on the chain".into(),
            ));
        }
        debug!(chips = length, "discovered daisy chain");
        self.chain_length = length;
        Ok(length)
    }

    /// Broadcasts one register group read and splits the response per chip.
    pub fn read_groups(&mut self, command: u16) -> Result<ChipBlocks> {
        if self.chain_length == 0 {
            return Err(Error::InvalidConfig("chain not discovered yet".into()));
        }
        let frame = commands::frame(command);
        let length = self.chain_length * BLOCK_WITH_PEC;
        let bus = &mut self.bus;
        let response = self.retry.run(|| Ok(bus.transceive(&frame, length)?))?;
        registers::split_blocks(&response, self.chain_length)
    }

    /// Writes one configuration register group per chip, in chain order.
    pub fn write_config(&mut self, configs: &[ChipConfig]) -> Result<()> {
        if configs.len() != self.chain_length {
            return Err(Error::InvalidConfig(format!(
                "{} configs for a chain of {} chips",
                configs.len(),
                self.chain_length
            )));
        }
        let mut frame = commands::frame(commands::WRCFG);
        for config in configs {
            let mut block = config.encode()?.to_vec();
            crate::chain::pec15::append_pec(&mut block);
            frame.extend_from_slice(&block);
        }
        self.bus.send(&frame).map_err(Error::from)
    }

    pub fn read_config(&mut self) -> Result<Vec<Option<ChipConfig>>> {
        let blocks = self.read_groups(commands::RDCFG)?;
        Ok(blocks
            .iter()
            .map(|block| block.as_ref().map(ChipConfig::decode))
            .collect())
    }

    fn start_conversion(&mut self) -> Result<()> {
        let command =
            commands::start_cell_conversion(self.options.mode, self.options.permit_discharge, 0);
        self.bus.send(&commands::frame(command))?;
        std::thread::sleep(self.options.conversion_delay);
        Ok(())
    }

    /// Reads a run of register groups and reassembles their channels per
    /// chip, in group order. Channels behind a corrupt block read `None`.
    fn read_channel_groups(&mut self, groups: &[u16]) -> Result<Vec<Vec<Option<f64>>>> {
        let mut per_chip: Vec<Vec<Option<f64>>> =
            vec![vec![None; groups.len() * CHANNELS_PER_GROUP]; self.chain_length];
        for (group_index, &group) in groups.iter().enumerate() {
            let blocks = self.read_groups(group)?;
            for (chip, block) in blocks.iter().enumerate() {
                let Some(block) = block else { continue };
                for (channel, voltage) in registers::decode_voltages(block).iter().enumerate() {
                    per_chip[chip][group_index * CHANNELS_PER_GROUP + channel] = Some(*voltage);
                }
            }
        }
        Ok(per_chip)
    }

    /// One full conversion with all four voltage groups read back.
    fn read_all_voltages(&mut self) -> Result<Vec<Vec<Option<f64>>>> {
        self.start_conversion()?;
        self.read_channel_groups(&CELL_VOLTAGE_GROUPS)
    }

    /// One auxiliary conversion with both aux groups read back: five GPIO
    /// voltages plus the second reference per chip.
    pub fn read_aux_voltages(&mut self) -> Result<Vec<Vec<Option<f64>>>> {
        if self.chain_length == 0 {
            return Err(Error::InvalidConfig("chain not discovered yet".into()));
        }
        let command = commands::start_aux_conversion(self.options.mode, 0);
        self.bus.send(&commands::frame(command))?;
        std::thread::sleep(self.options.conversion_delay);
        self.read_channel_groups(&AUX_VOLTAGE_GROUPS)
    }

    /// Discovers the chain, programs default thresholds and maps connected
    /// cells to channels. A repeated call rebuilds the hierarchy from
    /// scratch.
    pub fn recognize(&mut self) -> Result<()> {
        self.discover()?;
        self.write_config(&vec![ChipConfig::default(); self.chain_length])?;
        let per_chip = self.read_all_voltages()?;

        let mut chip_packs = Vec::new();
        for (chip, channels) in per_chip.iter().enumerate() {
            // Geometry must come from a clean read; a chip whose blocks all
            // failed their crc cannot be mapped this round.
            if channels.iter().all(Option::is_none) {
                return Err(Error::Transient(TransportError::Io(format!(
                    "chip {chip} unreadable during recognition"
                ))));
            }
            let mut cells = BTreeMap::new();
            for (channel, voltage) in channels.iter().enumerate() {
                if let Some(v) = *voltage {
                    if v >= self.options.connected_threshold {
                        let cell = Arc::new(Cell::new());
                        cell.storage().set(key::VOLTAGE, Scalar::Float(v))?;
                        cells.insert(channel, cell);
                    }
                }
            }
            if cells.is_empty() {
                warn!(chip, "chip has no connected cells");
                continue;
            }
            chip_packs.push(Arc::new(ChainChipPack::new(chip, cells)?));
        }
        if chip_packs.is_empty() {
            return Err(Error::ProtocolConsistency(
                "no connected cells anywhere on the chain".into(),
            ));
        }
        let pack = Pack::series(
            chip_packs
                .iter()
                .map(|p| Arc::clone(p) as Arc<dyn BatteryElement>)
                .collect(),
        )?;
        debug!(
            chips = self.chain_length,
            cells = chip_packs.iter().map(|p| p.cells().len()).sum::<usize>(),
            "recognized daisy-chain pack"
        );
        self.chip_packs = chip_packs;
        self.pack = Some(pack);
        Ok(())
    }

    /// Runs a conversion and refreshes every mapped cell voltage. Cells
    /// behind a corrupt register block keep their previous reading.
    pub fn refresh_actuals(&mut self) -> Result<()> {
        if self.pack.is_none() {
            self.recognize()?;
            return Ok(());
        }
        let per_chip = self.read_all_voltages()?;
        for chip_pack in &self.chip_packs {
            let channels = per_chip
                .get(chip_pack.chain_index())
                .ok_or_else(|| {
                    Error::ProtocolConsistency(format!(
                        "chip {} vanished from the chain",
                        chip_pack.chain_index()
                    ))
                })?;
            for (&channel, cell) in chip_pack.cells() {
                if let Some(Some(v)) = channels.get(channel) {
                    cell.storage().set(key::VOLTAGE, Scalar::Float(*v))?;
                }
            }
        }
        Ok(())
    }

    /// Chain chips expose no wear registers.
    pub fn refresh_health(&mut self) -> Result<()> {
        Ok(())
    }

    pub fn snapshot(&self) -> Option<PackSnapshot> {
        self.pack.as_ref().map(|pack| PackSnapshot::capture(pack))
    }
}
