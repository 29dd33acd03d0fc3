//! Error types for the sensor-beacon-ble crate.

use thiserror::Error;

use crate::ble::stack::StackStatus;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[cfg(feature = "scanner")]
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[cfg(feature = "scanner")]
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The radio was used before `power_on()` was called.
    ///
    /// This is a caller bug: every advertising, service and callback
    /// operation requires the radio to be powered first.
    #[error("Radio not powered on")]
    RadioNotPowered,

    /// The BLE stack rejected the registration of a service or characteristic.
    #[error("Activation of {entity} failed with stack status {status}")]
    ActivationFailed {
        /// Name of the service or characteristic that failed.
        entity: String,
        /// Raw status code reported by the stack.
        status: StackStatus,
    },

    /// The service did not fit in the advertising payload.
    #[error("Service {service} rejected by advertising payload")]
    AdvertisingRejected {
        /// Name of the rejected service.
        service: String,
    },

    /// The stack refused an advertising configuration step.
    #[error("Advertising operation failed: {operation}")]
    AdvertisingFailed {
        /// The stack call that failed.
        operation: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Invalid advertising data was received.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_failed_display() {
        let err = Error::ActivationFailed {
            entity: "co2".to_string(),
            status: StackStatus::INVALID_STATE,
        };
        assert_eq!(
            err.to_string(),
            "Activation of co2 failed with stack status 8 (invalid state)"
        );
    }

    #[test]
    fn test_radio_not_powered_display() {
        assert_eq!(Error::RadioNotPowered.to_string(), "Radio not powered on");
    }
}
