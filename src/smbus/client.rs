use std::sync::Arc;

use arrayvec::ArrayString;
use tracing::{debug, warn};

use crate::battery::{BatteryElement, Cell, Pack, PackSnapshot};
use crate::error::{Error, Result};
use crate::smbus::commands::{self, SpecificationInfo};
use crate::store::key;
use crate::store::{ReadingValue, Scalar, ScalarKind};
use crate::transport::{RetryPolicy, SmbusBus};

/// Default slave address of a Smart Battery per the SBS address map.
pub const DEFAULT_ADDRESS: u8 = 0x0B;

/// Longest block payload SBS allows.
pub const MAX_BLOCK: usize = 32;

/// Client for a gauge-style battery behind an addressed bus.
///
/// `recognize` reads the device identity and geometry and builds the cell
/// hierarchy; the refresh operations then stream readings into it. All bus
/// reads run under the retry policy.
pub struct SmbusClient<B: SmbusBus> {
    bus: B,
    address: u8,
    retry: RetryPolicy,
    scales: SpecificationInfo,
    cells: Vec<Arc<Cell>>,
    pack: Option<Pack>,
}

impl<B: SmbusBus> SmbusClient<B> {
    pub fn new(bus: B) -> Self {
        Self::with_address(bus, DEFAULT_ADDRESS)
    }

    pub fn with_address(bus: B, address: u8) -> Self {
        Self {
            bus,
            address,
            retry: RetryPolicy::default(),
            scales: commands::decode_specification_info(0),
            cells: Vec::new(),
            pack: None,
        }
    }

    pub fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn pack(&self) -> Option<&Pack> {
        self.pack.as_ref()
    }

    pub fn cells(&self) -> &[Arc<Cell>] {
        &self.cells
    }

    /// Address-only probe; a NACK means no device is listening.
    pub fn quick_command(&mut self) -> Result<()> {
        self.bus.send(self.address, &[]).map_err(Error::from)
    }

    pub fn read_byte(&mut self, command: u8) -> Result<u8> {
        let address = self.address;
        let bus = &mut self.bus;
        self.retry.run(|| {
            let raw = bus.transceive(address, &[command], 1)?;
            raw.first().copied().ok_or(Error::Transient(
                crate::transport::TransportError::ShortTransfer {
                    expected: 1,
                    received: 0,
                },
            ))
        })
    }

    pub fn write_byte(&mut self, command: u8, value: u8) -> Result<()> {
        self.bus
            .send(self.address, &[command, value])
            .map_err(Error::from)
    }

    pub fn read_word(&mut self, command: u8) -> Result<u16> {
        let address = self.address;
        let bus = &mut self.bus;
        self.retry.run(|| {
            let raw = bus.transceive(address, &[command], 2)?;
            if raw.len() < 2 {
                return Err(Error::Transient(
                    crate::transport::TransportError::ShortTransfer {
                        expected: 2,
                        received: raw.len(),
                    },
                ));
            }
            Ok(u16::from_le_bytes([raw[0], raw[1]]))
        })
    }

    pub fn write_word(&mut self, command: u8, value: u16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        self.bus
            .send(self.address, &[command, lo, hi])
            .map_err(Error::from)
    }

    /// Length-prefixed block read; the reported length is clamped to the
    /// bytes actually received.
    pub fn read_block(&mut self, command: u8) -> Result<Vec<u8>> {
        let address = self.address;
        let bus = &mut self.bus;
        self.retry.run(|| {
            let raw = bus.transceive(address, &[command], 1 + MAX_BLOCK)?;
            let declared = raw.first().copied().unwrap_or(0) as usize;
            let available = raw.len().saturating_sub(1);
            let take = declared.min(available).min(MAX_BLOCK);
            Ok(raw.get(1..1 + take).unwrap_or_default().to_vec())
        })
    }

    pub fn write_block(&mut self, command: u8, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_BLOCK {
            return Err(Error::InvalidConfig(format!(
                "block payload of {} bytes exceeds the SBS limit",
                payload.len()
            )));
        }
        let mut frame = Vec::with_capacity(2 + payload.len());
        frame.push(command);
        frame.push(payload.len() as u8);
        frame.extend_from_slice(payload);
        self.bus.send(self.address, &frame).map_err(Error::from)
    }

    /// ASCII identity string, truncated at the first NUL.
    pub fn read_string(&mut self, command: u8) -> Result<ArrayString<MAX_BLOCK>> {
        let block = self.read_block(command)?;
        let mut text = ArrayString::new();
        for &byte in block.iter().take_while(|&&b| b != 0) {
            if byte.is_ascii() && !byte.is_ascii_control() {
                // Capacity matches the block limit, push cannot fail.
                let _ = text.try_push(byte as char);
            }
        }
        Ok(text)
    }

    fn scaled_voltage(&self, word: u16) -> f64 {
        word as f64 * 0.001 * self.scales.voltage_scale
    }

    fn scaled_current(&self, word: u16) -> f64 {
        (word as i16) as f64 * 0.001 * self.scales.current_scale
    }

    fn scaled_capacity(&self, word: u16) -> f64 {
        word as f64 * 0.001 * self.scales.current_scale
    }

    /// Reads the device identity and geometry and (re)builds the cell
    /// hierarchy. A repeated call replaces the previous hierarchy wholesale.
    pub fn recognize(&mut self) -> Result<()> {
        self.scales = commands::decode_specification_info(
            self.read_word(commands::SPECIFICATION_INFO)?,
        );

        let cell_count = self.read_word(commands::CELL_COUNT)? as usize;
        if !(1..=4).contains(&cell_count) {
            return Err(Error::InvalidConfig(format!(
                "unsupported cell count {cell_count}"
            )));
        }
        let design_voltage_word = self.read_word(commands::DESIGN_VOLTAGE)?;
        let design_voltage = self.scaled_voltage(design_voltage_word);
        let design_capacity_word = self.read_word(commands::DESIGN_CAPACITY)?;
        let design_capacity = self.scaled_capacity(design_capacity_word);
        let nominal = design_voltage / cell_count as f64;

        let cells: Vec<Arc<Cell>> = (0..cell_count)
            .map(|_| Arc::new(Cell::with_nominal_voltage(nominal)))
            .collect();
        let pack = Pack::series(
            cells
                .iter()
                .map(|c| Arc::clone(c) as Arc<dyn BatteryElement>)
                .collect(),
        )?;

        let storage = pack.storage();
        storage.create_value(
            key::DESIGN_VOLTAGE,
            ReadingValue::with_value(Scalar::Float(design_voltage)),
        );
        storage.create_value(
            key::DESIGN_CAPACITY,
            ReadingValue::with_value(Scalar::Float(design_capacity)),
        );
        storage.create_value(
            key::SPECIFICATION_VERSION,
            ReadingValue::with_value(Scalar::Text(self.scales.version.to_string())),
        );

        let manufacturer = self.read_string(commands::MANUFACTURER_NAME)?;
        let product = self.read_string(commands::DEVICE_NAME)?;
        let chemistry = self.read_string(commands::DEVICE_CHEMISTRY)?;
        let date = commands::decode_manufacture_date(self.read_word(commands::MANUFACTURE_DATE)?);
        let serial = self.read_word(commands::SERIAL_NUMBER)?;
        let storage = pack.storage();
        storage.create_value(
            key::MANUFACTURER,
            ReadingValue::with_value(Scalar::Text(manufacturer.to_string())),
        );
        storage.create_value(
            key::PRODUCT,
            ReadingValue::with_value(Scalar::Text(product.to_string())),
        );
        storage.create_value(
            key::CHEMISTRY,
            ReadingValue::with_value(Scalar::Text(chemistry.to_string())),
        );
        storage.create_value(key::MANUFACTURE_DATE, ReadingValue::with_value(Scalar::Text(date)));
        storage.create_value(
            key::SERIAL_NUMBER,
            ReadingValue::with_value(Scalar::Int(serial as i64)),
        );
        storage.create_value(key::BATTERY_MODE, ReadingValue::typed(ScalarKind::Int));
        storage.create_value(key::BATTERY_STATUS, ReadingValue::typed(ScalarKind::Int));
        storage.create_value(key::CYCLE_COUNT, ReadingValue::typed(ScalarKind::Int));
        storage.create_value(
            key::CALCULATION_PRECISION,
            ReadingValue::typed(ScalarKind::Float),
        );

        debug!(
            cell_count,
            design_voltage,
            product = %product,
            "recognized smbus battery"
        );
        self.cells = cells;
        self.pack = Some(pack);
        Ok(())
    }

    fn require_pack(&self) -> Result<&Pack> {
        self.pack
            .as_ref()
            .ok_or_else(|| Error::InvalidConfig("battery not recognized yet".into()))
    }

    /// Slowly changing wear figures.
    pub fn refresh_health(&mut self) -> Result<()> {
        if self.pack.is_none() {
            self.recognize()?;
        }
        let full_charge_word = self.read_word(commands::FULL_CHARGE_CAPACITY)?;
        let full_charge = self.scaled_capacity(full_charge_word);
        let cycles = self.read_word(commands::CYCLE_COUNT)?;
        let max_error = self.read_word(commands::MAX_ERROR)?;
        let precision = 1.0 - max_error as f64 / 100.0;
        let precision = if (0.0..=1.0).contains(&precision) {
            precision
        } else {
            0.0
        };
        let storage = self.require_pack()?.storage();
        storage.set(key::FULL_CHARGE_CAPACITY, Scalar::Float(full_charge))?;
        storage.set(key::CYCLE_COUNT, Scalar::Int(cycles as i64))?;
        storage.set(key::CALCULATION_PRECISION, Scalar::Float(precision))?;
        Ok(())
    }

    /// Fast-moving electrical readings, pack level and per cell.
    pub fn refresh_actuals(&mut self) -> Result<()> {
        if self.pack.is_none() {
            self.recognize()?;
        }

        let voltage_word = self.read_word(commands::VOLTAGE)?;
        let voltage = self.scaled_voltage(voltage_word);
        let current_word = self.read_word(commands::CURRENT)?;
        let current = self.scaled_current(current_word);
        let average_current_word = self.read_word(commands::AVERAGE_CURRENT)?;
        let average_current = self.scaled_current(average_current_word);
        let temperature = self.read_word(commands::TEMPERATURE)? as f64 * 0.1;
        let remaining_word = self.read_word(commands::REMAINING_CAPACITY)?;
        let remaining = self.scaled_capacity(remaining_word);
        let relative_soc = self.read_word(commands::RELATIVE_STATE_OF_CHARGE)? as f64;
        let absolute_soc = self.read_word(commands::ABSOLUTE_STATE_OF_CHARGE)? as f64;
        let mode = self.read_word(commands::BATTERY_MODE)?;
        let status = self.read_word(commands::BATTERY_STATUS)?;

        // Discharging gauges estimate time to empty; charging ones time to
        // full, mirrored into both run-time slots.
        let (run_time, average_run_time) = if current >= 0.0 {
            (
                self.read_word(commands::RUN_TIME_TO_EMPTY)?,
                self.read_word(commands::AVERAGE_TIME_TO_EMPTY)?,
            )
        } else {
            let to_full = self.read_word(commands::AVERAGE_TIME_TO_FULL)?;
            (to_full, to_full)
        };

        let mut cell_voltages = Vec::with_capacity(self.cells.len());
        for index in 0..self.cells.len() {
            let command = commands::cell_voltage_command(index)?;
            let word = self.read_word(command)?;
            cell_voltages.push(self.scaled_voltage(word));
        }

        let pack = self.require_pack()?;
        let storage = pack.storage();
        storage.set(key::VOLTAGE, Scalar::Float(voltage))?;
        storage.set(key::CURRENT, Scalar::Float(current))?;
        storage.set(key::AVERAGE_CURRENT, Scalar::Float(average_current))?;
        storage.set(key::TEMPERATURE, Scalar::Float(temperature))?;
        storage.set(key::REMAINING_CAPACITY, Scalar::Float(remaining))?;
        storage.set(key::RELATIVE_SOC, Scalar::Float(relative_soc))?;
        storage.set(key::ABSOLUTE_SOC, Scalar::Float(absolute_soc))?;
        storage.set(key::BATTERY_MODE, Scalar::Int(mode as i64))?;
        storage.set(key::BATTERY_STATUS, Scalar::Int(status as i64))?;
        if run_time == commands::RUN_TIME_UNKNOWN {
            warn!("gauge reports run time as unknown");
        } else {
            storage.set(key::RUN_TIME, Scalar::Float(run_time as f64))?;
        }
        if average_run_time != commands::RUN_TIME_UNKNOWN {
            storage.set(key::AVERAGE_RUN_TIME, Scalar::Float(average_run_time as f64))?;
        }
        for (cell, cell_voltage) in self.cells.iter().zip(cell_voltages) {
            cell.storage().set(key::VOLTAGE, Scalar::Float(cell_voltage))?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Option<PackSnapshot> {
        self.pack.as_ref().map(|pack| PackSnapshot::capture(pack))
    }
}
