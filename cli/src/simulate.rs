// `proxima simulate`: a peripheral and a crowd of centrals on a loopback radio
//
// Every central has a fixed identity payload and a platform. Each round it
// connects (sometimes from a rotated address), writes its signal, reads the
// peripheral's payload and the relay bundle, then disconnects.

use crate::config::Config;
use crate::loopback::{Central, LoopbackRadio};
use anyhow::{Context, Result};
use colored::*;
use proxima_core::{
    BleDatabase, BleTransmitter, BluetoothState, DeviceAddress, DeviceOperatingSystem,
    FixedPayloadDataSupplier, PayloadData, Proximity, SensorDelegate, SensorType,
    TargetIdentifier, TransmitterState,
};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::Arc;

/// Prints every delegate event as it fires
struct ConsoleDelegate;

impl SensorDelegate for ConsoleDelegate {
    fn did_detect(&self, sensor: SensorType, did_detect: &TargetIdentifier) {
        println!("    {} {} {}", sensor, "didDetect ".bright_green(), did_detect);
    }

    fn did_read(&self, sensor: SensorType, did_read: &PayloadData, from_target: &TargetIdentifier) {
        println!(
            "    {} {} {} ({} bytes) from {}",
            sensor,
            "didRead   ".bright_cyan(),
            did_read.short_name(),
            did_read.len(),
            from_target
        );
    }

    fn did_share(&self, sensor: SensorType, did_share: &[PayloadData], from_target: &TargetIdentifier) {
        println!(
            "    {} {} {} payloads via {}",
            sensor,
            "didShare  ".bright_magenta(),
            did_share.len(),
            from_target
        );
    }

    fn did_measure(&self, sensor: SensorType, did_measure: &Proximity, from_target: &TargetIdentifier) {
        println!(
            "    {} {} {} from {}",
            sensor,
            "didMeasure".bright_yellow(),
            did_measure,
            from_target
        );
    }
}

struct SimulatedCentral {
    name: String,
    operating_system: DeviceOperatingSystem,
    payload: PayloadData,
    address: DeviceAddress,
}

fn random_address(rng: &mut StdRng) -> DeviceAddress {
    let bytes: [u8; 6] = rng.gen();
    // Locally administered, random static
    let first = bytes[0] | 0xC0;
    DeviceAddress::new(format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        first, bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    ))
}

fn random_payload(rng: &mut StdRng, size: usize) -> PayloadData {
    let mut bytes = vec![0u8; size];
    rng.fill_bytes(&mut bytes);
    PayloadData::new(bytes)
}

pub fn run(config: &Config, centrals: usize, rounds: usize, seed: u64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let payload_size = config.simulation.payload_size;

    println!("{}", "Proxima loopback simulation".bold());
    println!("  Centrals: {}  Rounds: {}  MTU: {}  Seed: {}", centrals, rounds, config.simulation.mtu, seed);
    println!();

    let radio = Arc::new(LoopbackRadio::new(BluetoothState::PoweredOff, config.simulation.mtu));
    let database = Arc::new(BleDatabase::new());
    let transmitter = BleTransmitter::new(
        config.sensor.clone(),
        radio.clone(),
        Arc::new(FixedPayloadDataSupplier::new(random_payload(&mut rng, payload_size))),
        database.clone(),
    )
    .context("Failed to create transmitter")?;
    transmitter.add_delegate(Arc::new(ConsoleDelegate));

    radio.set_power(BluetoothState::PoweredOn);
    transmitter.bluetooth_state_changed(BluetoothState::PoweredOn);
    transmitter.flush()?;
    if transmitter.state() != TransmitterState::Advertising {
        anyhow::bail!("Transmitter failed to start ({})", transmitter.state());
    }
    println!(
        "  {} Advertising, payload {}",
        "✓".green(),
        transmitter.payload_data().short_name().bright_cyan()
    );
    println!();

    let mut crowd: Vec<SimulatedCentral> = (0..centrals)
        .map(|i| {
            let operating_system = if rng.gen_bool(0.5) {
                DeviceOperatingSystem::Ios
            } else {
                DeviceOperatingSystem::Android
            };
            SimulatedCentral {
                name: format!("central-{}", i + 1),
                operating_system,
                payload: random_payload(&mut rng, payload_size),
                address: random_address(&mut rng),
            }
        })
        .collect();

    for round in 1..=rounds {
        println!("{}", format!("Round {}", round).bold());

        for sim in crowd.iter_mut() {
            if round > 1 && rng.gen_bool(0.3) {
                sim.address = random_address(&mut rng);
            }
            println!(
                "  {} ({}) at {}",
                sim.name.bright_cyan(),
                sim.operating_system,
                sim.address
            );

            let mut central = Central::new(&radio, sim.address.clone());
            central.connect()?;
            // Platform classification comes from the scanner in a real stack
            database
                .device(&sim.address)
                .set_operating_system(sim.operating_system);

            let rssi = rng.gen_range(-95..=-35);
            let status = central.write_signal(rssi, &sim.payload)?;
            if status != proxima_core::GattStatus::Success {
                println!("    {} signal write rejected: {:?}", "✗".red(), status);
            }

            let payload = central.read_payload()?;
            println!("    read payload: {} bytes", payload.len());

            let relayed = central.read_payload_sharing()?;
            let count = relayed.len() / payload_size;
            if relayed.is_empty() {
                println!("    read sharing: {}", "nothing new".dimmed());
            } else {
                println!("    read sharing: {} bytes, {} payloads", relayed.len(), count);
                for chunk in relayed.chunks(payload_size) {
                    let shared = PayloadData::from(chunk);
                    let origin = crowd_name(&database, &shared);
                    println!("      {} {}", "•".bright_green(), origin.unwrap_or_else(|| shared.short_name()));
                }
            }

            central.disconnect()?;
        }
        println!();
    }

    println!("{}", "Neighbor database".bold());
    let mut devices = database.devices();
    devices.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
    for device in devices {
        println!(
            "  {} {:<8} {} {}",
            device.identifier,
            device.operating_system.to_string(),
            device.address,
            device
                .payload_data
                .as_ref()
                .map(|p| p.short_name())
                .unwrap_or_else(|| "-".to_string())
                .dimmed()
        );
    }

    transmitter.stop();
    transmitter.flush()?;
    println!();
    println!("  {} Stopped ({} devices seen)", "✓".green(), database.len());

    Ok(())
}

/// Address of the record carrying `payload`, if it is known
fn crowd_name(database: &BleDatabase, payload: &PayloadData) -> Option<String> {
    database
        .devices()
        .into_iter()
        .find(|d| d.payload_data.as_ref() == Some(payload))
        .map(|d| format!("{} at {}", d.identifier, d.address))
}
