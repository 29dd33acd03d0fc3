//! Expose an environment service and play the part of a connecting client.
//!
//! Run with: cargo run --example gatt_service

use sensor_beacon_ble::ble::uuids::APPLE_COMPANY_ID;
use sensor_beacon_ble::ble::SimulatedRadio;
use sensor_beacon_ble::{
    Characteristic, CharacteristicProperties, ConnectionMonitor, Emitter, RadioIdentity, Result,
    SecurityMode, Service, TxPower,
};
use std::sync::mpsc;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sensor_beacon_ble=debug".parse().unwrap()),
        )
        .init();

    let radio = SimulatedRadio::new();
    let client = radio.handle();

    let mut emitter = Emitter::new(
        radio,
        RadioIdentity::new("env-node", APPLE_COMPANY_ID, TxPower::Zero),
    );
    emitter.power_on();

    let monitor = ConnectionMonitor::new();
    monitor.install(&mut emitter)?;
    let mut events = monitor.subscribe();

    let co2 = Characteristic::with_properties(
        "co2",
        CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        SecurityMode::Open,
        SecurityMode::NoAccess,
        4,
    );
    let command = Characteristic::with_properties(
        "cmd",
        CharacteristicProperties::WRITE,
        SecurityMode::Open,
        SecurityMode::Open,
        16,
    );

    let env = Service::with("env", [&co2, &command]);
    env.log_uuid();

    let report = emitter.register_and_activate(&env)?;
    println!("Activation: {:?}", report);

    // Writes arrive on the stack's context; hand them to the main loop.
    let (tx, rx) = mpsc::channel();
    command.install_write_callback(move |event| {
        let _ = tx.send(event);
    });

    client.connect(1, 23);
    client.subscribe(1, co2.uuid());
    client.client_write(1, command.uuid(), b"interval=60");

    while let Ok(event) = events.try_recv() {
        println!("Connection event: {:?}", event);
    }
    for write in rx.try_iter() {
        println!(
            "Write from {}: {:?}",
            write.conn_handle,
            String::from_utf8_lossy(&write.data)
        );
    }

    let reading: u32 = 415;
    let sent = co2.notify(&mut emitter, &reading.to_le_bytes())?;
    println!("Notified {} bytes to {:?}", sent, monitor.connected_handles());

    client.disconnect(1, 0x13);
    println!("Connected after disconnect: {}", monitor.is_any_connected());

    Ok(())
}
