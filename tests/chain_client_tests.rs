use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use packmon::chain::commands;
use packmon::chain::pec15;
use packmon::chain::registers::{BLOCK_LEN, BLOCK_WITH_PEC, MAX_CHAIN_LENGTH};
use packmon::store::key;
use packmon::*;

/// Mutable state of the simulated chain, shared with the test so it can be
/// reshaped after the client takes ownership of the bus.
struct ChainState {
    voltages: Vec<[f64; 12]>,
    /// GPIO and reference voltages per chip, six channels each.
    aux: Vec<[f64; 6]>,
    /// (command, chip) pairs whose next register block is corrupted.
    corrupt: HashSet<(u16, usize)>,
    /// Drop this many trailing bytes from the next group read.
    truncate_next: usize,
    sent: Vec<Vec<u8>>,
}

/// Simulated daisy chain of cell-monitor chips.
struct FakeChain {
    state: Arc<Mutex<ChainState>>,
}

fn fake_chain(voltages: Vec<[f64; 12]>) -> (FakeChain, Arc<Mutex<ChainState>>) {
    let state = Arc::new(Mutex::new(ChainState {
        voltages,
        aux: Vec::new(),
        corrupt: HashSet::new(),
        truncate_next: 0,
        sent: Vec::new(),
    }));
    (
        FakeChain {
            state: Arc::clone(&state),
        },
        state,
    )
}

fn block_for(state: &ChainState, command: u16, chip: usize) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_LEN];
    if let Some(group) = commands::CELL_VOLTAGE_GROUPS
        .iter()
        .position(|&g| g == command)
    {
        for channel in 0..3 {
            let v = state.voltages[chip][group * 3 + channel];
            let word = (v / 0.0001).round() as u16;
            block[channel * 2..channel * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
    } else if let Some(group) = commands::AUX_VOLTAGE_GROUPS
        .iter()
        .position(|&g| g == command)
    {
        for channel in 0..3 {
            let v = state
                .aux
                .get(chip)
                .map(|chip_aux| chip_aux[group * 3 + channel])
                .unwrap_or(0.0);
            let word = (v / 0.0001).round() as u16;
            block[channel * 2..channel * 2 + 2].copy_from_slice(&word.to_le_bytes());
        }
    }
    pec15::append_pec(&mut block);
    if state.corrupt.contains(&(command, chip)) {
        block[0] ^= 0xFF;
    }
    block
}

impl ChainBus for FakeChain {
    fn send(&mut self, frame: &[u8]) -> std::result::Result<(), TransportError> {
        self.state.lock().unwrap().sent.push(frame.to_vec());
        Ok(())
    }

    fn transceive(
        &mut self,
        frame: &[u8],
        response_length: usize,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.sent.push(frame.to_vec());
        let command = u16::from_be_bytes([frame[0], frame[1]]);
        let chips = response_length / BLOCK_WITH_PEC;
        let mut response = Vec::with_capacity(response_length);
        for chip in 0..chips {
            if chip < state.voltages.len() {
                response.extend_from_slice(&block_for(&state, command, chip));
            } else {
                response.extend_from_slice(&[0xFF; BLOCK_WITH_PEC]);
            }
        }
        if state.truncate_next > 0 {
            let keep = response.len().saturating_sub(state.truncate_next);
            response.truncate(keep);
            state.truncate_next = 0;
        }
        Ok(response)
    }
}

fn chip(voltages: &[f64]) -> [f64; 12] {
    let mut channels = [0.0; 12];
    channels[..voltages.len()].copy_from_slice(voltages);
    channels
}

fn quick_options() -> ChainOptions {
    ChainOptions {
        conversion_delay: Duration::from_millis(0),
        ..ChainOptions::default()
    }
}

#[test]
fn test_discovery_counts_answering_chips() {
    let (bus, _) = fake_chain(vec![chip(&[3.7; 4]), chip(&[3.7; 4]), chip(&[3.7; 3])]);
    let mut client = ChainClient::with_options(bus, quick_options());
    assert_eq!(client.discover().unwrap(), 3);
    assert_eq!(client.chain_length(), 3);
}

#[test]
fn test_empty_chain_is_a_consistency_fault() {
    let (bus, _) = fake_chain(Vec::new());
    let mut client = ChainClient::with_options(bus, quick_options());
    assert!(matches!(
        client.discover(),
        Err(Error::ProtocolConsistency(_))
    ));
}

#[test]
fn test_recognition_maps_connected_channels_only() {
    // Chip 0 has four cells on channels 0..4, chip 1 three on 0..3; the
    // remaining channels float near zero and must not become cells.
    let (bus, _) = fake_chain(vec![
        chip(&[3.70, 3.71, 3.72, 3.73]),
        chip(&[3.65, 3.66, 3.67]),
    ]);
    let mut client = ChainClient::with_options(bus, quick_options());
    client.recognize().unwrap();

    assert_eq!(client.chip_packs().len(), 2);
    assert_eq!(client.chip_packs()[0].cells().len(), 4);
    assert_eq!(client.chip_packs()[1].cells().len(), 3);

    let total: f64 = 3.70 + 3.71 + 3.72 + 3.73 + 3.65 + 3.66 + 3.67;
    let pack_voltage = client
        .pack()
        .unwrap()
        .storage()
        .get::<f64>(key::VOLTAGE)
        .unwrap();
    assert!((pack_voltage - total).abs() < 1e-6);
}

#[test]
fn test_refresh_follows_changing_cell_voltages() {
    let (bus, state) = fake_chain(vec![chip(&[3.70, 3.70, 3.70])]);
    let mut client = ChainClient::with_options(bus, quick_options());
    client.recognize().unwrap();

    // Simulate discharge and poll again.
    state.lock().unwrap().voltages[0] = chip(&[3.55, 3.56, 3.57]);
    client.refresh_actuals().unwrap();

    let snapshot = client.snapshot().unwrap();
    assert_eq!(snapshot.cell_voltages.len(), 3);
    assert!((snapshot.cell_voltages[0].unwrap() - 3.55).abs() < 1e-6);
    assert!((snapshot.voltage.unwrap() - (3.55 + 3.56 + 3.57)).abs() < 1e-6);
}

#[test]
fn test_aux_read_reassembles_gpio_and_reference_channels() {
    let (bus, state) = fake_chain(vec![chip(&[3.70; 4]), chip(&[3.70; 4])]);
    state.lock().unwrap().aux = vec![
        [0.5, 0.6, 0.7, 0.8, 0.9, 3.0],
        [1.5, 1.6, 1.7, 1.8, 1.9, 3.0],
    ];
    let mut client = ChainClient::with_options(bus, quick_options());
    client.discover().unwrap();

    let aux = client.read_aux_voltages().unwrap();
    assert_eq!(aux.len(), 2);
    assert_eq!(aux[0].len(), 6);
    assert!((aux[0][0].unwrap() - 0.5).abs() < 1e-6);
    assert!((aux[0][5].unwrap() - 3.0).abs() < 1e-6);
    assert!((aux[1][3].unwrap() - 1.8).abs() < 1e-6);

    // The auxiliary conversion was started before the group reads.
    let adax = commands::frame(commands::start_aux_conversion(
        commands::ConversionMode::Normal,
        0,
    ));
    assert!(state.lock().unwrap().sent.contains(&adax));

    // A corrupt aux group blanks only that chip's three channels.
    state.lock().unwrap().corrupt.insert((commands::RDAUXB, 0));
    let aux = client.read_aux_voltages().unwrap();
    assert_eq!(aux[0][3], None);
    assert!((aux[0][0].unwrap() - 0.5).abs() < 1e-6);
    assert!((aux[1][3].unwrap() - 1.8).abs() < 1e-6);
}

#[test]
fn test_corrupt_block_keeps_previous_reading_for_that_chip() {
    let (bus, state) = fake_chain(vec![chip(&[3.70, 3.70, 3.70]), chip(&[3.80, 3.80, 3.80])]);
    let mut client = ChainClient::with_options(bus, quick_options());
    client.recognize().unwrap();

    {
        let mut state = state.lock().unwrap();
        state.voltages[0] = chip(&[3.50, 3.50, 3.50]);
        state.voltages[1] = chip(&[3.60, 3.60, 3.60]);
        // Chip 0's first voltage group arrives corrupted from here on.
        state.corrupt.insert((commands::CELL_VOLTAGE_GROUPS[0], 0));
    }
    client.refresh_actuals().unwrap();

    let chip0 = &client.chip_packs()[0];
    let chip1 = &client.chip_packs()[1];
    // Chip 0 keeps its pre-fault readings, chip 1 is live.
    let v = chip0.cell(0).unwrap().storage().get::<f64>(key::VOLTAGE).unwrap();
    assert!((v - 3.70).abs() < 1e-6);
    let v = chip1.cell(0).unwrap().storage().get::<f64>(key::VOLTAGE).unwrap();
    assert!((v - 3.60).abs() < 1e-6);
}

#[test]
fn test_short_response_is_a_consistency_fault() {
    let (bus, state) = fake_chain(vec![chip(&[3.70, 3.70, 3.70])]);
    let mut client = ChainClient::with_options(bus, quick_options());
    client.recognize().unwrap();

    state.lock().unwrap().truncate_next = 2;
    assert!(matches!(
        client.refresh_actuals(),
        Err(Error::ProtocolConsistency(_))
    ));
    // The fault clears with the next clean response.
    client.refresh_actuals().unwrap();
}

#[test]
fn test_config_write_frames_every_chip_with_its_own_pec() {
    let (bus, state) = fake_chain(vec![chip(&[3.70; 4])]);
    let mut client = ChainClient::with_options(bus, quick_options());
    client.discover().unwrap();
    client.write_config(&[ChipConfig::default()]).unwrap();

    let frame = state.lock().unwrap().sent.last().cloned().unwrap();
    // Command word, command PEC, then one 8-byte block per chip.
    assert_eq!(frame.len(), 4 + BLOCK_WITH_PEC);
    assert_eq!(&frame[..4], &[0x00, 0x01, 0x3D, 0x6E]);
    assert!(pec15::verify(&frame[4..]));

    assert!(matches!(
        client.write_config(&[ChipConfig::default(), ChipConfig::default()]),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn test_config_reads_back_decoded_per_chip() {
    let (bus, _) = fake_chain(vec![chip(&[3.70; 4])]);
    let mut client = ChainClient::with_options(bus, quick_options());
    client.discover().unwrap();
    // The fake chain answers RDCFG with zeroed blocks; decoding yields the
    // all-off configuration.
    let configs = client.read_config().unwrap();
    assert_eq!(configs.len(), 1);
    let config = configs[0].as_ref().unwrap();
    assert_eq!(config.discharge, [false; 12]);
    assert!(!config.reference_on);
}

#[test]
fn test_max_chain_length_is_the_discovery_horizon() {
    let (bus, state) = fake_chain(vec![chip(&[3.7; 12]); MAX_CHAIN_LENGTH]);
    let mut client = ChainClient::with_options(bus, quick_options());
    assert_eq!(client.discover().unwrap(), MAX_CHAIN_LENGTH);
    // Discovery always addresses the longest supported chain.
    let request = state.lock().unwrap().sent[0].clone();
    assert_eq!(&request[..2], &commands::RDSTATB.to_be_bytes());
}
