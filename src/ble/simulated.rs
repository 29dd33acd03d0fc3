//! In-memory radio stack.
//!
//! [`SimulatedRadio`] implements [`RadioStack`] without hardware so the
//! emitter can be exercised in tests and demos. It models the parts of the
//! vendor stack the emitter depends on:
//!
//! - every call except `begin` fails until the radio is started
//! - advertising data is limited to 31 bytes
//! - a running advertisement cannot be reconfigured or started again
//! - advertising stops when a client connects and restarts on disconnect
//!   if configured to
//! - characteristics register under the last registered service and are
//!   checked against their permissions
//! - notifications reach only subscribed, connected clients and are limited
//!   by the link MTU
//!
//! The radio itself is moved into the emitter. Tests keep a
//! [`SimulatorHandle`] to inspect what was configured and to play the role
//! of a connecting client.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

use crate::ble::advertising::{
    BeaconFrame, ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE, ADV_PAYLOAD_MAX_LEN,
    AD_TYPE_128BIT_SERVICE_UUID_COMPLETE, AD_TYPE_COMPLETE_LOCAL_NAME, AD_TYPE_FLAGS,
    AD_TYPE_MANUFACTURER_SPECIFIC_DATA,
};
use crate::ble::characteristics::{CharacteristicProperties, WriteEvent};
use crate::ble::connection::{ConnHandle, ConnectionInfo};
use crate::ble::stack::{
    CharacteristicHandle, ConnectCallback, DisconnectCallback, RadioStack, ServiceHandle,
    StackStatus, WriteCallback,
};
use crate::ble::uuids::EntityUuid;

/// A stack call recorded by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    /// `begin`
    Begin,
    /// `set_name`
    SetName(String),
    /// `set_tx_power`
    SetTxPower(i8),
    /// `advertising_start`
    Start(u16),
    /// `advertising_stop`
    Stop,
    /// `advertising_set_beacon`
    SetBeacon(BeaconFrame),
    /// `advertising_add_flags`
    AddFlags(u8),
    /// `advertising_add_data`
    AddData(u8, Vec<u8>),
    /// `advertising_clear_data`
    ClearData,
    /// `scan_response_clear_data`
    ClearScanResponse,
    /// `scan_response_add_name`
    AddName,
    /// `advertising_set_interval`
    SetInterval(u16, u16),
    /// `advertising_set_fast_timeout`
    SetFastTimeout(u16),
    /// `advertising_restart_on_disconnect`
    RestartOnDisconnect(bool),
    /// `advertising_add_service`
    AddService(String),
    /// `service_begin`
    ServiceBegin(String),
    /// `characteristic_begin`
    CharacteristicBegin(String),
}

struct SimCharacteristic {
    handle: CharacteristicHandle,
    service: EntityUuid,
    value: Vec<u8>,
    subscribers: HashSet<ConnHandle>,
    on_write: WriteCallback,
}

#[derive(Default)]
struct SimState {
    begun: bool,
    name: String,
    tx_power: i8,
    running: bool,
    resume_on_disconnect: bool,
    timeout_secs: u16,
    adv_data: Vec<(u8, Vec<u8>)>,
    scan_response: Vec<(u8, Vec<u8>)>,
    interval: (u16, u16),
    fast_timeout_secs: u16,
    restart_on_disconnect: bool,
    services: Vec<ServiceHandle>,
    characteristics: Vec<SimCharacteristic>,
    connections: HashMap<ConnHandle, ConnectionInfo>,
    connect_cb: Option<ConnectCallback>,
    disconnect_cb: Option<DisconnectCallback>,
    next_service_failure: Option<StackStatus>,
    calls: Vec<RadioCall>,
}

fn encoded_len(structures: &[(u8, Vec<u8>)]) -> usize {
    structures.iter().map(|(_, data)| 2 + data.len()).sum()
}

fn encode(structures: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ADV_PAYLOAD_MAX_LEN);
    for (ad_type, data) in structures {
        out.push((data.len() + 1) as u8);
        out.push(*ad_type);
        out.extend_from_slice(data);
    }
    out
}

impl SimState {
    fn push_ad(&mut self, ad_type: u8, data: &[u8]) -> bool {
        if self.running {
            return false;
        }
        if encoded_len(&self.adv_data) + 2 + data.len() > ADV_PAYLOAD_MAX_LEN {
            return false;
        }
        self.adv_data.push((ad_type, data.to_vec()));
        true
    }

    fn characteristic_mut(&mut self, uuid: &EntityUuid) -> Option<&mut SimCharacteristic> {
        self.characteristics
            .iter_mut()
            .find(|c| &c.handle.uuid == uuid)
    }
}

/// An in-memory [`RadioStack`].
pub struct SimulatedRadio {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedRadio {
    /// Create a radio that has not been started.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
        }
    }

    /// A handle for inspecting the radio and simulating clients.
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: self.state.clone(),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        f(&mut self.state.lock())
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioStack for SimulatedRadio {
    fn begin(&mut self) {
        self.with(|s| {
            s.calls.push(RadioCall::Begin);
            s.begun = true;
        });
    }

    fn set_name(&mut self, name: &str) {
        self.with(|s| {
            s.calls.push(RadioCall::SetName(name.to_string()));
            if s.begun {
                s.name = name.to_string();
            }
        });
    }

    fn set_tx_power(&mut self, dbm: i8) -> bool {
        self.with(|s| {
            s.calls.push(RadioCall::SetTxPower(dbm));
            let supported = matches!(dbm, -40 | -20 | -16 | -12 | -8 | -4 | 0 | 3 | 4);
            if s.begun && supported {
                s.tx_power = dbm;
                true
            } else {
                false
            }
        })
    }

    fn advertising_start(&mut self, timeout_secs: u16) -> bool {
        self.with(|s| {
            s.calls.push(RadioCall::Start(timeout_secs));
            if !s.begun || s.running || s.adv_data.is_empty() {
                return false;
            }
            s.running = true;
            s.timeout_secs = timeout_secs;
            trace!("Simulated advertising started");
            true
        })
    }

    fn advertising_stop(&mut self) -> bool {
        self.with(|s| {
            s.calls.push(RadioCall::Stop);
            if !s.begun {
                return false;
            }
            s.running = false;
            s.resume_on_disconnect = false;
            true
        })
    }

    fn advertising_is_running(&self) -> bool {
        self.state.lock().running
    }

    fn advertising_set_beacon(&mut self, beacon: &BeaconFrame) -> bool {
        self.with(|s| {
            s.calls.push(RadioCall::SetBeacon(*beacon));
            if !s.begun || s.running {
                return false;
            }
            s.adv_data.clear();
            s.push_ad(AD_TYPE_FLAGS, &[ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE])
                && s.push_ad(
                    AD_TYPE_MANUFACTURER_SPECIFIC_DATA,
                    &beacon.manufacturer_data(),
                )
        })
    }

    fn advertising_add_flags(&mut self, flags: u8) -> bool {
        self.with(|s| {
            s.calls.push(RadioCall::AddFlags(flags));
            s.begun && s.push_ad(AD_TYPE_FLAGS, &[flags])
        })
    }

    fn advertising_add_data(&mut self, ad_type: u8, data: &[u8]) -> bool {
        self.with(|s| {
            s.calls.push(RadioCall::AddData(ad_type, data.to_vec()));
            s.begun && s.push_ad(ad_type, data)
        })
    }

    fn advertising_clear_data(&mut self) {
        self.with(|s| {
            s.calls.push(RadioCall::ClearData);
            if s.begun && !s.running {
                s.adv_data.clear();
            }
        });
    }

    fn scan_response_clear_data(&mut self) {
        self.with(|s| {
            s.calls.push(RadioCall::ClearScanResponse);
            if s.begun && !s.running {
                s.scan_response.clear();
            }
        });
    }

    fn scan_response_add_name(&mut self) -> bool {
        self.with(|s| {
            s.calls.push(RadioCall::AddName);
            if !s.begun || s.running {
                return false;
            }
            // Re-adding replaces the previous name entry.
            s.scan_response
                .retain(|(t, _)| *t != AD_TYPE_COMPLETE_LOCAL_NAME);
            let name = s.name.as_bytes().to_vec();
            if encoded_len(&s.scan_response) + 2 + name.len() > ADV_PAYLOAD_MAX_LEN {
                return false;
            }
            s.scan_response.push((AD_TYPE_COMPLETE_LOCAL_NAME, name));
            true
        })
    }

    fn advertising_set_interval(&mut self, min: u16, max: u16) {
        self.with(|s| {
            s.calls.push(RadioCall::SetInterval(min, max));
            if s.begun {
                s.interval = (min, max);
            }
        });
    }

    fn advertising_set_fast_timeout(&mut self, secs: u16) {
        self.with(|s| {
            s.calls.push(RadioCall::SetFastTimeout(secs));
            if s.begun {
                s.fast_timeout_secs = secs;
            }
        });
    }

    fn advertising_restart_on_disconnect(&mut self, enable: bool) {
        self.with(|s| {
            s.calls.push(RadioCall::RestartOnDisconnect(enable));
            if s.begun {
                s.restart_on_disconnect = enable;
            }
        });
    }

    fn advertising_add_service(&mut self, service: &ServiceHandle) -> bool {
        self.with(|s| {
            s.calls.push(RadioCall::AddService(service.name.clone()));
            s.begun
                && s.push_ad(
                    AD_TYPE_128BIT_SERVICE_UUID_COMPLETE,
                    service.uuid.as_bytes(),
                )
        })
    }

    fn service_begin(&mut self, service: &ServiceHandle) -> StackStatus {
        self.with(|s| {
            s.calls.push(RadioCall::ServiceBegin(service.name.clone()));
            if !s.begun {
                return StackStatus::INVALID_STATE;
            }
            if let Some(status) = s.next_service_failure.take() {
                return status;
            }
            if s.services.iter().any(|known| known.uuid == service.uuid) {
                return StackStatus::INVALID_STATE;
            }
            s.services.push(service.clone());
            StackStatus::SUCCESS
        })
    }

    fn characteristic_begin(
        &mut self,
        characteristic: &CharacteristicHandle,
        on_write: WriteCallback,
    ) -> StackStatus {
        self.with(|s| {
            s.calls
                .push(RadioCall::CharacteristicBegin(characteristic.name.clone()));
            if !s.begun {
                return StackStatus::INVALID_STATE;
            }
            let service = match s.services.last() {
                Some(service) => service.uuid,
                None => return StackStatus::INVALID_STATE,
            };

            let props = characteristic.properties;
            let readable = props.contains(CharacteristicProperties::READ);
            if characteristic.max_len == 0
                || (props.is_writable() && !characteristic.write_permission.allows_access())
                || (readable && !characteristic.read_permission.allows_access())
            {
                return StackStatus::INVALID_PARAM;
            }

            if s.characteristics
                .iter()
                .any(|c| c.service == service && c.handle.uuid == characteristic.uuid)
            {
                return StackStatus::INVALID_STATE;
            }

            s.characteristics.push(SimCharacteristic {
                handle: characteristic.clone(),
                service,
                value: Vec::new(),
                subscribers: HashSet::new(),
                on_write,
            });
            StackStatus::SUCCESS
        })
    }

    fn characteristic_write(&mut self, uuid: &EntityUuid, data: &[u8]) -> u16 {
        self.with(|s| {
            let chr = match s.characteristic_mut(uuid) {
                Some(chr) => chr,
                None => return 0,
            };
            let len = data.len().min(chr.handle.max_len as usize);
            chr.value = data[..len].to_vec();
            len as u16
        })
    }

    fn characteristic_notify(&mut self, uuid: &EntityUuid, data: &[u8]) -> u16 {
        self.with(|s| {
            let connections = s.connections.clone();
            let chr = match s.characteristic_mut(uuid) {
                Some(chr) => chr,
                None => return 0,
            };
            if !chr.handle.properties.can_push() {
                return 0;
            }

            let len = data.len().min(chr.handle.max_len as usize);
            chr.value = data[..len].to_vec();

            let link_limit = chr
                .subscribers
                .iter()
                .filter_map(|h| connections.get(h))
                .map(|c| c.max_notify_len() as usize)
                .min();

            match link_limit {
                Some(limit) => len.min(limit) as u16,
                None => 0,
            }
        })
    }

    fn set_connect_callback(&mut self, callback: ConnectCallback) {
        self.with(|s| s.connect_cb = Some(callback));
    }

    fn set_disconnect_callback(&mut self, callback: DisconnectCallback) {
        self.with(|s| s.disconnect_cb = Some(callback));
    }

    fn connection(&self, handle: ConnHandle) -> Option<ConnectionInfo> {
        self.state.lock().connections.get(&handle).copied()
    }
}

/// Inspection and client-side control of a [`SimulatedRadio`].
#[derive(Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatorHandle {
    /// Whether `begin` was called.
    pub fn is_begun(&self) -> bool {
        self.state.lock().begun
    }

    /// Whether an advertisement is on air.
    pub fn is_advertising(&self) -> bool {
        self.state.lock().running
    }

    /// Timeout passed to the last successful start.
    pub fn advertising_timeout(&self) -> u16 {
        self.state.lock().timeout_secs
    }

    /// GAP device name.
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Transmit power in dBm.
    pub fn tx_power(&self) -> i8 {
        self.state.lock().tx_power
    }

    /// Advertising interval (min, max) in 0.625 ms units.
    pub fn interval(&self) -> (u16, u16) {
        self.state.lock().interval
    }

    /// Fast mode duration in seconds.
    pub fn fast_timeout_secs(&self) -> u16 {
        self.state.lock().fast_timeout_secs
    }

    /// Whether advertising restarts after a disconnect.
    pub fn restarts_on_disconnect(&self) -> bool {
        self.state.lock().restart_on_disconnect
    }

    /// Advertising payload as transmitted.
    pub fn advertising_data(&self) -> Vec<u8> {
        encode(&self.state.lock().adv_data)
    }

    /// Scan response payload as transmitted.
    pub fn scan_response_data(&self) -> Vec<u8> {
        encode(&self.state.lock().scan_response)
    }

    /// Contents of the manufacturer specific AD structure, if present.
    pub fn manufacturer_data(&self) -> Option<Vec<u8>> {
        self.state
            .lock()
            .adv_data
            .iter()
            .find(|(t, _)| *t == AD_TYPE_MANUFACTURER_SPECIFIC_DATA)
            .map(|(_, data)| data.clone())
    }

    /// Names of registered services, in registration order.
    pub fn services(&self) -> Vec<String> {
        self.state
            .lock()
            .services
            .iter()
            .map(|s| s.name.clone())
            .collect()
    }

    /// Names of registered characteristics, in registration order.
    pub fn characteristics(&self) -> Vec<String> {
        self.state
            .lock()
            .characteristics
            .iter()
            .map(|c| c.handle.name.clone())
            .collect()
    }

    /// Current value of a characteristic.
    pub fn value(&self, uuid: &EntityUuid) -> Option<Vec<u8>> {
        self.state
            .lock()
            .characteristics
            .iter()
            .find(|c| &c.handle.uuid == uuid)
            .map(|c| c.value.clone())
    }

    /// Every stack call so far.
    pub fn calls(&self) -> Vec<RadioCall> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Make the next service registration fail with `status`.
    pub fn fail_next_service(&self, status: StackStatus) {
        self.state.lock().next_service_failure = Some(status);
    }

    /// A client connects. Advertising stops while the link is up.
    ///
    /// Runs the connect callback, as the stack would, after the state is
    /// updated.
    pub fn connect(&self, handle: ConnHandle, mtu: u16) {
        let callback = {
            let mut s = self.state.lock();
            s.connections.insert(
                handle,
                ConnectionInfo {
                    handle,
                    peer_address: [0xC0, 0xFF, 0xEE, 0x00, 0x00, handle as u8],
                    mtu,
                },
            );
            if s.running {
                s.running = false;
                s.resume_on_disconnect = true;
            }
            s.connect_cb.clone()
        };

        if let Some(callback) = callback {
            callback(handle);
        }
    }

    /// A client disconnects with an HCI reason.
    pub fn disconnect(&self, handle: ConnHandle, reason: u8) {
        let callback = {
            let mut s = self.state.lock();
            if s.connections.remove(&handle).is_none() {
                return;
            }
            for chr in s.characteristics.iter_mut() {
                chr.subscribers.remove(&handle);
            }
            if s.resume_on_disconnect && s.connections.is_empty() {
                s.resume_on_disconnect = false;
                s.running = s.restart_on_disconnect;
            }
            s.disconnect_cb.clone()
        };

        if let Some(callback) = callback {
            callback(handle, reason);
        }
    }

    /// A connected client enables notifications. Returns false if the
    /// link or the characteristic is unknown, or it cannot notify.
    pub fn subscribe(&self, handle: ConnHandle, uuid: &EntityUuid) -> bool {
        let mut s = self.state.lock();
        if !s.connections.contains_key(&handle) {
            return false;
        }
        match s.characteristic_mut(uuid) {
            Some(chr) if chr.handle.properties.can_push() => {
                chr.subscribers.insert(handle);
                true
            }
            _ => false,
        }
    }

    /// A connected client writes a characteristic. Runs the write callback.
    /// Returns false if the write is not permitted.
    pub fn client_write(&self, handle: ConnHandle, uuid: &EntityUuid, data: &[u8]) -> bool {
        let callback = {
            let mut s = self.state.lock();
            if !s.connections.contains_key(&handle) {
                return false;
            }
            let chr = match s.characteristic_mut(uuid) {
                Some(chr) => chr,
                None => return false,
            };
            if !chr.handle.properties.is_writable()
                || !chr.handle.write_permission.allows_access()
            {
                return false;
            }
            let len = data.len().min(chr.handle.max_len as usize);
            chr.value = data[..len].to_vec();
            chr.on_write.clone()
        };

        callback(WriteEvent {
            conn_handle: handle,
            characteristic: *uuid,
            data: data.to_vec(),
        });
        true
    }
}
