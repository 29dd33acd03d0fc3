//! BLE building blocks.
//!
//! This module holds the advertising frame layouts, the GATT service and
//! characteristic model, the stack capability interface and its in-memory
//! implementation.

pub mod advertising;
pub mod characteristics;
pub mod connection;
#[cfg(feature = "scanner")]
pub mod scanner;
pub mod service;
pub mod simulated;
pub mod stack;
pub mod uuids;

pub use advertising::{
    AdvertisingKind, AdvertisingParams, AdvertisingState, BeaconFrame, FreePayloadFrame,
};
pub use characteristics::{Characteristic, CharacteristicProperties, SecurityMode, WriteEvent};
pub use connection::{
    ConnHandle, ConnectionEvent, ConnectionEventKind, ConnectionInfo, ConnectionMonitor,
    ConnectionState,
};
#[cfg(feature = "scanner")]
pub use scanner::{BeaconFilter, BeaconScanner, BeaconSighting};
pub use service::{CharacteristicActivation, Service, ServiceActivation};
pub use simulated::{RadioCall, SimulatedRadio, SimulatorHandle};
pub use stack::{RadioStack, StackStatus};
pub use uuids::*;
