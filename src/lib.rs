//! # sensor-beacon-ble
//!
//! BLE emitter core for environmental sensor nodes (nRF52 class).
//!
//! Sensor readings are broadcast as iBeacon-style advertisements whose
//! major and minor fields carry the measurement. The same radio can also
//! expose a GATT service to connected clients.
//!
//! ## Features
//!
//! - **Beacon advertising**: byte-exact iBeacon frames with a configurable
//!   company ID
//! - **Free payload advertising**: up to 21 application bytes in the beacon slot
//! - **GATT services**: characteristics with name-derived UUIDs, write
//!   callbacks and notifications
//! - **Publisher**: publish a measurement, hold it on air, stop
//! - **Simulator**: an in-memory radio stack for tests and demos
//!
//! ## Quick Start
//!
//! ```rust
//! use sensor_beacon_ble::ble::SimulatedRadio;
//! use sensor_beacon_ble::{Publisher, PublisherConfig, Result};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let radio = SimulatedRadio::new();
//!     let air = radio.handle();
//!
//!     let mut publisher = Publisher::new(radio, PublisherConfig::default());
//!     publisher.power_on();
//!
//!     publisher.publish_temperature(21, 0, Duration::from_millis(10))?;
//!     assert!(!air.is_advertising());
//!     Ok(())
//! }
//! ```
//!
//! On target, implement [`RadioStack`] over the vendor stack and hand it to
//! the [`Emitter`] or [`Publisher`]. The radio must be powered on before any
//! other operation; calls made earlier fail with [`Error::RadioNotPowered`].
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types
//! - `scanner`: Host-side [`BeaconScanner`](ble::scanner::BeaconScanner)
//!   built on `btleplug`

pub mod ble;
pub mod data;
pub mod emitter;
pub mod error;
pub mod publisher;
pub mod utils;

pub use emitter::{Emitter, RadioIdentity, TxPower};
pub use error::{Error, Result};
pub use publisher::{Hold, Publisher, PublisherConfig, ThreadHold};

pub use ble::advertising::{AdvertisingParams, AdvertisingState, BeaconFrame, FreePayloadFrame};
pub use ble::characteristics::{Characteristic, CharacteristicProperties, SecurityMode};
pub use ble::connection::{ConnectionInfo, ConnectionMonitor, ConnectionState};
pub use ble::service::Service;
pub use ble::stack::{RadioStack, StackStatus};
pub use ble::uuids::EntityUuid;
pub use data::{BeaconFields, Measurement, MeasurementId, MeasurementSource};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<Emitter<ble::SimulatedRadio>>();
        let _ = std::any::TypeId::of::<Publisher<ble::SimulatedRadio>>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<Characteristic>();
        let _ = std::any::TypeId::of::<BeaconFrame>();
        let _ = std::any::TypeId::of::<ConnectionMonitor>();
    }
}
