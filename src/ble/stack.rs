//! Capability interface over the vendor BLE stack.
//!
//! The emitter core never talks to a radio driver directly. Everything it
//! needs from the vendor stack is expressed by [`RadioStack`], which is
//! implemented by the board support layer on target and by
//! [`SimulatedRadio`](crate::ble::simulated::SimulatedRadio) in tests.

use std::sync::Arc;

use crate::ble::advertising::BeaconFrame;
use crate::ble::characteristics::{CharacteristicProperties, SecurityMode, WriteEvent};
use crate::ble::connection::{ConnHandle, ConnectionInfo};
use crate::ble::uuids::EntityUuid;
use crate::error::{Error, Result};

/// Callback invoked by the stack when a client connects.
pub type ConnectCallback = Arc<dyn Fn(ConnHandle) + Send + Sync>;

/// Callback invoked by the stack when a link closes, with the HCI reason code.
pub type DisconnectCallback = Arc<dyn Fn(ConnHandle, u8) + Send + Sync>;

/// Callback invoked by the stack when a client writes a characteristic.
pub type WriteCallback = Arc<dyn Fn(WriteEvent) + Send + Sync>;

/// Raw status code returned by stack registration calls.
///
/// Codes follow the Nordic SoftDevice `NRF_ERROR_*` numbering used by the
/// nRF52 Bluefruit stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StackStatus(pub u32);

impl StackStatus {
    /// Operation succeeded.
    pub const SUCCESS: Self = Self(0);
    /// Internal stack error.
    pub const INTERNAL: Self = Self(3);
    /// No memory left for the attribute table.
    pub const NO_MEM: Self = Self(4);
    /// Not found.
    pub const NOT_FOUND: Self = Self(5);
    /// Invalid parameter combination.
    pub const INVALID_PARAM: Self = Self(7);
    /// Called in the wrong state (e.g. radio not started).
    pub const INVALID_STATE: Self = Self(8);
    /// Data exceeds the allowed size.
    pub const DATA_SIZE: Self = Self(12);

    /// Check if the status reports success.
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }

    /// Short description of the status code.
    pub fn name(&self) -> &'static str {
        match self.0 {
            0 => "success",
            3 => "internal",
            4 => "no memory",
            5 => "not found",
            7 => "invalid param",
            8 => "invalid state",
            12 => "data size",
            _ => "unknown",
        }
    }

    /// Convert into a `Result`, naming the entity that was being registered.
    pub fn into_result(self, entity: &str) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(Error::ActivationFailed {
                entity: entity.to_string(),
                status: self,
            })
        }
    }
}

impl std::fmt::Display for StackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

/// The value the stack needs to register or advertise a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Name the UUID was derived from.
    pub name: String,
    /// Service UUID.
    pub uuid: EntityUuid,
}

/// The value the stack needs to register a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicHandle {
    /// Name the UUID was derived from.
    pub name: String,
    /// Characteristic UUID.
    pub uuid: EntityUuid,
    /// GATT properties bitmask.
    pub properties: CharacteristicProperties,
    /// Permission required to read.
    pub read_permission: SecurityMode,
    /// Permission required to write.
    pub write_permission: SecurityMode,
    /// Maximum value length in bytes.
    pub max_len: u16,
}

/// Operations the emitter core consumes from the vendor BLE stack.
///
/// Calls other than [`begin`](RadioStack::begin) are only valid once the
/// radio has been started; the [`Emitter`](crate::Emitter) enforces that
/// ordering before delegating here.
#[cfg_attr(test, mockall::automock)]
pub trait RadioStack {
    /// Start the radio and the SoftDevice.
    fn begin(&mut self);

    /// Set the GAP device name.
    fn set_name(&mut self, name: &str);

    /// Set the transmit power in dBm. Returns false for unsupported levels.
    fn set_tx_power(&mut self, dbm: i8) -> bool;

    /// Start advertising. A timeout of 0 advertises until stopped.
    fn advertising_start(&mut self, timeout_secs: u16) -> bool;

    /// Stop advertising.
    fn advertising_stop(&mut self) -> bool;

    /// Whether an advertisement is currently running.
    fn advertising_is_running(&self) -> bool;

    /// Replace the advertising data with flags plus the beacon frame.
    fn advertising_set_beacon(&mut self, beacon: &BeaconFrame) -> bool;

    /// Append a flags AD structure.
    fn advertising_add_flags(&mut self, flags: u8) -> bool;

    /// Append a raw AD structure of the given type.
    fn advertising_add_data(&mut self, ad_type: u8, data: &[u8]) -> bool;

    /// Clear the advertising data.
    fn advertising_clear_data(&mut self);

    /// Clear the scan response data.
    fn scan_response_clear_data(&mut self);

    /// Append the device name to the scan response.
    fn scan_response_add_name(&mut self) -> bool;

    /// Set the advertising interval in 0.625 ms units.
    fn advertising_set_interval(&mut self, min: u16, max: u16);

    /// Set how long the fast advertising mode lasts.
    fn advertising_set_fast_timeout(&mut self, secs: u16);

    /// Restart advertising automatically when a client disconnects.
    fn advertising_restart_on_disconnect(&mut self, enable: bool);

    /// Add a service UUID to the advertising payload.
    fn advertising_add_service(&mut self, service: &ServiceHandle) -> bool;

    /// Register a service in the attribute table.
    fn service_begin(&mut self, service: &ServiceHandle) -> StackStatus;

    /// Register a characteristic under the most recently registered service.
    fn characteristic_begin(
        &mut self,
        characteristic: &CharacteristicHandle,
        on_write: WriteCallback,
    ) -> StackStatus;

    /// Update the local value of a characteristic. Returns bytes stored.
    fn characteristic_write(&mut self, uuid: &EntityUuid, data: &[u8]) -> u16;

    /// Notify subscribed clients. Returns bytes sent.
    fn characteristic_notify(&mut self, uuid: &EntityUuid, data: &[u8]) -> u16;

    /// Install the connection-established callback.
    fn set_connect_callback(&mut self, callback: ConnectCallback);

    /// Install the connection-terminated callback.
    fn set_disconnect_callback(&mut self, callback: DisconnectCallback);

    /// Look up a live connection.
    fn connection(&self, handle: ConnHandle) -> Option<ConnectionInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_status() {
        assert!(StackStatus::SUCCESS.is_success());
        assert!(!StackStatus::INVALID_STATE.is_success());
        assert_eq!(StackStatus(99).name(), "unknown");
        assert_eq!(format!("{}", StackStatus::NO_MEM), "4 (no memory)");
    }

    #[test]
    fn test_stack_status_into_result() {
        assert!(StackStatus::SUCCESS.into_result("env").is_ok());

        match StackStatus::INVALID_PARAM.into_result("env") {
            Err(Error::ActivationFailed { entity, status }) => {
                assert_eq!(entity, "env");
                assert_eq!(status, StackStatus::INVALID_PARAM);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
