//! Sensor data carried by the beacon.
//!
//! This module defines how measurements are packed into beacon fields and
//! the interface to the sensor that produces them.

pub mod measurement;
pub mod source;

pub use measurement::{BeaconFields, Measurement, MeasurementId};
pub use source::MeasurementSource;
