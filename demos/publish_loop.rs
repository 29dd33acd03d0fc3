//! Publish CO2 and temperature readings the way a sensor node's main loop does.
//!
//! Run with: cargo run --example publish_loop

use sensor_beacon_ble::ble::SimulatedRadio;
use sensor_beacon_ble::{Measurement, Publisher, PublisherConfig, Result};
use std::time::Duration;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensor_beacon_ble=debug".parse().unwrap()),
        )
        .init();

    let radio = SimulatedRadio::new();
    let air = radio.handle();

    let mut publisher = Publisher::new(radio, PublisherConfig::default());
    publisher.power_on();

    // Stand-in for the calibrated gas sensor.
    let mut ppm = 410.0;
    let mut co2_sensor = move || {
        ppm += 3.7;
        ppm
    };

    for counter in 0..5u8 {
        let (value, frame) =
            publisher.sample_and_publish_co2(&mut co2_sensor, counter, Duration::from_millis(200))?;
        println!(
            "CO2 {:.1} ppm -> major={} minor={} decoded={:?}",
            value,
            frame.major,
            frame.minor,
            Measurement::decode(&frame)
        );

        let frame = publisher.publish_temperature(21 + counter as i16, counter, Duration::from_millis(200))?;
        println!(
            "Temperature -> major={:#06x} minor={} decoded={:?}",
            frame.major,
            frame.minor as i16,
            Measurement::decode(&frame)
        );
    }

    let frame = publisher.publish_free_payload(b"node-7 ok", Duration::from_millis(200))?;
    println!("Free payload body: {:?}", String::from_utf8_lossy(frame.body()));

    println!("Still advertising: {}", air.is_advertising());
    Ok(())
}
