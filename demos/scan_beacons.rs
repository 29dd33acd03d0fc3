//! Listen for sensor node beacons and print decoded measurements.
//!
//! Run with: cargo run --example scan_beacons --features scanner

use sensor_beacon_ble::ble::scanner::{BeaconFilter, BeaconScanner};
use sensor_beacon_ble::Result;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensor_beacon_ble=info".parse().unwrap()),
        )
        .init();

    let scanner = BeaconScanner::new(BeaconFilter::default()).await?;
    let mut sightings = scanner.subscribe();
    scanner.start_scanning().await?;

    println!("Listening for beacons for 30 seconds...");

    let deadline = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            Ok(sighting) = sightings.recv() => {
                println!(
                    "{} ({}) rssi={:?}: {:?}",
                    sighting.identifier,
                    sighting.local_name.as_deref().unwrap_or("?"),
                    sighting.rssi,
                    sighting.measurement
                );
            }
            _ = &mut deadline => break,
        }
    }

    scanner.stop_scanning().await?;
    println!("Nodes seen: {}", scanner.latest_sightings().len());
    Ok(())
}
