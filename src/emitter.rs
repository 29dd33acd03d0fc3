//! Radio and advertising manager.
//!
//! The [`Emitter`] owns the radio stack for the lifetime of the program.
//! It enforces the one ordering rule of the vendor stack: the radio must be
//! powered on before anything else is configured. Every advertisement it
//! starts first stops the previous one, so at most one advertising
//! configuration is ever live.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ble::advertising::{
    AdvertisingKind, AdvertisingParams, AdvertisingState, BeaconFrame, FreePayloadFrame,
    ADVERTISE_FOREVER, ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE, ADV_PAYLOAD_MAX_LEN,
    AD_TYPE_MANUFACTURER_SPECIFIC_DATA,
};
use crate::ble::connection::{ConnHandle, ConnectionInfo};
use crate::ble::service::{Service, ServiceActivation};
use crate::ble::stack::RadioStack;
use crate::error::{Error, Result};
use crate::utils::interval_units_to_duration;

/// Transmit power levels supported by the nRF52832 radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i8)]
pub enum TxPower {
    /// -40 dBm.
    Minus40 = -40,
    /// -20 dBm.
    Minus20 = -20,
    /// -16 dBm.
    Minus16 = -16,
    /// -12 dBm.
    Minus12 = -12,
    /// -8 dBm.
    Minus8 = -8,
    /// -4 dBm.
    Minus4 = -4,
    /// 0 dBm.
    #[default]
    Zero = 0,
    /// +3 dBm.
    Plus3 = 3,
    /// +4 dBm.
    Plus4 = 4,
}

impl TxPower {
    /// Look up a supported level.
    pub fn from_dbm(dbm: i8) -> Result<Self> {
        match dbm {
            -40 => Ok(Self::Minus40),
            -20 => Ok(Self::Minus20),
            -16 => Ok(Self::Minus16),
            -12 => Ok(Self::Minus12),
            -8 => Ok(Self::Minus8),
            -4 => Ok(Self::Minus4),
            0 => Ok(Self::Zero),
            3 => Ok(Self::Plus3),
            4 => Ok(Self::Plus4),
            _ => Err(Error::InvalidParameter {
                name: "tx_power".to_string(),
                value: format!("{} dBm", dbm),
            }),
        }
    }

    /// Level in dBm.
    pub fn dbm(&self) -> i8 {
        *self as i8
    }
}

impl std::fmt::Display for TxPower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:+} dBm", self.dbm())
    }
}

/// Per-device radio configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RadioIdentity {
    name: String,
    manufacturer_id: u16,
    tx_power: TxPower,
}

impl RadioIdentity {
    /// Longest name that fits a scan response next to its AD header.
    pub const MAX_NAME_LEN: usize = ADV_PAYLOAD_MAX_LEN - 2;

    /// Create an identity. Names longer than [`MAX_NAME_LEN`](Self::MAX_NAME_LEN)
    /// bytes are cut with a warning.
    pub fn new(name: &str, manufacturer_id: u16, tx_power: TxPower) -> Self {
        let mut name = name.to_string();
        if name.len() > Self::MAX_NAME_LEN {
            let mut cut = Self::MAX_NAME_LEN;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            warn!(
                "Device name {:?} longer than {} bytes, truncating",
                name,
                Self::MAX_NAME_LEN
            );
            name.truncate(cut);
        }

        Self {
            name,
            manufacturer_id,
            tx_power,
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bluetooth company identifier used in advertisements.
    pub fn manufacturer_id(&self) -> u16 {
        self.manufacturer_id
    }

    /// Transmit power.
    pub fn tx_power(&self) -> TxPower {
        self.tx_power
    }
}

/// Radio and advertising manager.
///
/// Takes ownership of the radio stack, so one physical radio is driven by
/// exactly one emitter.
pub struct Emitter<R: RadioStack> {
    radio: R,
    identity: RadioIdentity,
    params: AdvertisingParams,
    powered: bool,
    kind: Option<AdvertisingKind>,
}

impl<R: RadioStack> Emitter<R> {
    /// Create an emitter with default advertising parameters.
    ///
    /// The radio is not touched until [`power_on`](Self::power_on).
    pub fn new(radio: R, identity: RadioIdentity) -> Self {
        Self::with_params(radio, identity, AdvertisingParams::default())
    }

    /// Create an emitter with explicit advertising parameters.
    pub fn with_params(radio: R, identity: RadioIdentity, params: AdvertisingParams) -> Self {
        Self {
            radio,
            identity,
            params,
            powered: false,
            kind: None,
        }
    }

    /// Device identity.
    pub fn identity(&self) -> &RadioIdentity {
        &self.identity
    }

    /// Advertising parameters.
    pub fn params(&self) -> &AdvertisingParams {
        &self.params
    }

    /// Replace the advertising parameters used by the next advertisement.
    pub fn set_params(&mut self, params: AdvertisingParams) {
        self.params = params;
    }

    /// The radio stack, read-only.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Give the radio stack back, consuming the emitter.
    pub fn into_radio(self) -> R {
        self.radio
    }

    /// Check if [`power_on`](Self::power_on) has been called.
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// The radio, if it is powered.
    pub(crate) fn powered_radio(&mut self) -> Result<&mut R> {
        if self.powered {
            Ok(&mut self.radio)
        } else {
            Err(Error::RadioNotPowered)
        }
    }

    /// Start the radio. Calling it again is a no-op.
    pub fn power_on(&mut self) {
        if self.powered {
            debug!("Radio already powered");
            return;
        }

        info!("Powering on radio as {:?}", self.identity.name);
        self.radio.begin();
        self.powered = true;
        self.stop_advertising();
    }

    /// Start the radio and install both connection callbacks.
    pub fn power_on_with_callbacks<C, D>(&mut self, on_connect: C, on_disconnect: D) -> Result<()>
    where
        C: Fn(ConnHandle) + Send + Sync + 'static,
        D: Fn(ConnHandle, u8) + Send + Sync + 'static,
    {
        self.power_on();
        self.install_connect_callback(on_connect)?;
        self.install_disconnect_callback(on_disconnect)
    }

    /// Stop the running advertisement, if any. Always safe to call.
    pub fn stop_advertising(&mut self) {
        if !self.powered {
            return;
        }

        if self.radio.advertising_is_running() {
            debug!("Stopping advertisement");
            if !self.radio.advertising_stop() {
                warn!("Stack refused to stop advertising");
            }
        }

        self.kind = None;
    }

    /// Check if an advertisement is on air.
    pub fn is_advertising(&self) -> bool {
        self.powered && self.radio.advertising_is_running()
    }

    /// Current advertising state.
    pub fn state(&self) -> AdvertisingState {
        match self.kind {
            Some(kind) if self.is_advertising() => AdvertisingState::Advertising(kind),
            _ => AdvertisingState::Idle,
        }
    }

    /// Advertise an iBeacon frame until stopped.
    ///
    /// Any running advertisement is stopped first. The frame is tagged with
    /// the identity's manufacturer ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioNotPowered`] before [`power_on`](Self::power_on),
    /// or [`Error::AdvertisingFailed`] if the stack refuses the frame or the
    /// start.
    pub fn start_beacon(
        &mut self,
        uuid: [u8; 16],
        major: u16,
        minor: u16,
        measured_power: i8,
    ) -> Result<BeaconFrame> {
        self.powered_radio()?;
        self.stop_advertising();

        let frame = BeaconFrame::new(uuid, major, minor, measured_power)
            .with_manufacturer(self.identity.manufacturer_id);

        let tx_power = self.identity.tx_power;
        let params = self.params;
        let radio = &mut self.radio;

        if !radio.set_tx_power(tx_power.dbm()) {
            warn!("Stack rejected tx power {}", tx_power);
        }
        radio.set_name(&self.identity.name);
        if !radio.scan_response_add_name() {
            warn!("Device name did not fit in the scan response");
        }

        check(radio.advertising_set_beacon(&frame), "set beacon")?;
        radio.advertising_restart_on_disconnect(params.restart_on_disconnect);
        radio.advertising_set_interval(params.interval_min, params.interval_max);
        check(radio.advertising_start(ADVERTISE_FOREVER), "start")?;

        self.kind = Some(AdvertisingKind::Beacon);

        info!(
            "Beacon advertising: major={} minor={} power={} every {:?}",
            major,
            minor,
            measured_power,
            interval_units_to_duration(params.interval_min)
        );

        Ok(frame)
    }

    /// Advertise caller bytes in the beacon slot until stopped.
    ///
    /// Payloads shorter than 21 bytes keep the `'-'` filler in the unused
    /// slots; longer payloads are cut at 21 bytes with a warning.
    pub fn start_free_payload(&mut self, payload: &[u8]) -> Result<FreePayloadFrame> {
        self.powered_radio()?;
        self.stop_advertising();

        let frame = FreePayloadFrame::new(payload).with_manufacturer(self.identity.manufacturer_id);
        if frame.is_truncated() {
            warn!(
                "Free payload of {} bytes truncated to {}",
                payload.len(),
                frame.payload_len()
            );
        }

        let params = self.params;
        let radio = &mut self.radio;

        radio.advertising_clear_data();
        radio.scan_response_clear_data();
        radio.set_name(&self.identity.name);
        if !radio.scan_response_add_name() {
            warn!("Device name did not fit in the scan response");
        }

        check(
            radio.advertising_add_flags(ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE),
            "add flags",
        )?;
        check(
            radio.advertising_add_data(
                AD_TYPE_MANUFACTURER_SPECIFIC_DATA,
                &frame.manufacturer_data(),
            ),
            "add manufacturer data",
        )?;
        radio.advertising_restart_on_disconnect(params.restart_on_disconnect);
        radio.advertising_set_interval(params.interval_min, params.interval_max);
        radio.advertising_set_fast_timeout(params.fast_timeout_secs);
        check(radio.advertising_start(ADVERTISE_FOREVER), "start")?;

        self.kind = Some(AdvertisingKind::FreePayload);

        info!("Free payload advertising: {} bytes", frame.payload_len());

        Ok(frame)
    }

    /// Add a service's UUID to the advertising payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdvertisingRejected`] if the stack refuses it,
    /// typically because the payload has no room left.
    pub fn register_service(&mut self, service: &Service<'_>) -> Result<()> {
        let radio = self.powered_radio()?;

        debug!("Adding service {} to advertising", service.name());
        if radio.advertising_add_service(&service.handle()) {
            Ok(())
        } else {
            warn!("Service {} not added to advertising", service.name());
            Err(Error::AdvertisingRejected {
                service: service.name().to_string(),
            })
        }
    }

    /// Register a service for advertising, then activate it.
    ///
    /// Activation runs even when the advertising registration was
    /// rejected; the report records both outcomes.
    pub fn register_and_activate(&mut self, service: &Service<'_>) -> Result<ServiceActivation> {
        let advertised = match self.register_service(service) {
            Ok(()) => true,
            Err(Error::AdvertisingRejected { .. }) => false,
            Err(e) => return Err(e),
        };

        let mut report = service.activate(self)?;
        report.advertised = Some(advertised);
        Ok(report)
    }

    /// Install the connection-established callback, replacing any previous one.
    ///
    /// The callback runs on the stack's event context and must not block.
    pub fn install_connect_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: Fn(ConnHandle) + Send + Sync + 'static,
    {
        let radio = self.powered_radio()?;
        radio.set_connect_callback(Arc::new(callback));
        debug!("Connect callback installed");
        Ok(())
    }

    /// Install the connection-terminated callback, replacing any previous one.
    ///
    /// The callback receives the connection handle and the HCI reason code.
    pub fn install_disconnect_callback<F>(&mut self, callback: F) -> Result<()>
    where
        F: Fn(ConnHandle, u8) + Send + Sync + 'static,
    {
        let radio = self.powered_radio()?;
        radio.set_disconnect_callback(Arc::new(callback));
        debug!("Disconnect callback installed");
        Ok(())
    }

    /// Look up a live connection. Returns `None` for stale handles.
    pub fn get_connection(&self, handle: ConnHandle) -> Option<ConnectionInfo> {
        if !self.powered {
            return None;
        }
        self.radio.connection(handle)
    }
}

fn check(ok: bool, operation: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        warn!("Advertising step failed: {}", operation);
        Err(Error::AdvertisingFailed {
            operation: operation.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::stack::MockRadioStack;
    use crate::ble::uuids::{APPLE_COMPANY_ID, DEFAULT_BEACON_UUID};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn identity() -> RadioIdentity {
        RadioIdentity::new("yesyes", APPLE_COMPANY_ID, TxPower::Plus4)
    }

    #[test]
    fn test_tx_power() {
        assert_eq!(TxPower::from_dbm(4).unwrap(), TxPower::Plus4);
        assert_eq!(TxPower::Minus40.dbm(), -40);
        assert!(TxPower::from_dbm(5).is_err());
        assert_eq!(TxPower::Plus4.to_string(), "+4 dBm");
    }

    #[test]
    fn test_identity_truncates_long_name() {
        let id = RadioIdentity::new(&"x".repeat(40), 0x004C, TxPower::Zero);
        assert_eq!(id.name().len(), RadioIdentity::MAX_NAME_LEN);
    }

    #[test]
    fn test_unpowered_emitter_does_not_touch_radio() {
        // No expectations: any stack call would panic.
        let mut emitter = Emitter::new(MockRadioStack::new(), identity());

        assert!(!emitter.is_powered());
        assert!(!emitter.is_advertising());
        assert_eq!(emitter.state(), AdvertisingState::Idle);
        emitter.stop_advertising();

        assert!(matches!(
            emitter.start_beacon(DEFAULT_BEACON_UUID, 1, 2, -53),
            Err(Error::RadioNotPowered)
        ));
        assert!(matches!(
            emitter.start_free_payload(b"abc"),
            Err(Error::RadioNotPowered)
        ));
        assert!(matches!(
            emitter.install_connect_callback(|_| {}),
            Err(Error::RadioNotPowered)
        ));
        assert!(emitter.get_connection(0).is_none());
    }

    #[test]
    fn test_power_on_is_idempotent() {
        let mut radio = MockRadioStack::new();
        radio.expect_begin().times(1).return_const(());
        radio.expect_advertising_is_running().return_const(false);

        let mut emitter = Emitter::new(radio, identity());
        emitter.power_on();
        emitter.power_on();
        assert!(emitter.is_powered());
    }

    #[test]
    fn test_start_beacon_stops_running_advertisement_first() {
        let mut seq = Sequence::new();
        let mut radio = MockRadioStack::new();

        radio
            .expect_begin()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        radio
            .expect_advertising_is_running()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(false);

        // start_beacon: a free payload is still on air
        radio
            .expect_advertising_is_running()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        radio
            .expect_advertising_stop()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        radio
            .expect_set_tx_power()
            .with(eq(4))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        radio
            .expect_set_name()
            .withf(|name: &str| name == "yesyes")
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        radio
            .expect_scan_response_add_name()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        radio
            .expect_advertising_set_beacon()
            .withf(|frame: &BeaconFrame| frame.major == 1234 && frame.company_id == 0x004C)
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);
        radio
            .expect_advertising_restart_on_disconnect()
            .with(eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        radio
            .expect_advertising_set_interval()
            .with(eq(100), eq(100))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        radio
            .expect_advertising_start()
            .with(eq(0))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(true);

        let mut emitter = Emitter::new(radio, identity());
        emitter.power_on();
        let frame = emitter
            .start_beacon(DEFAULT_BEACON_UUID, 1234, 123, -53)
            .unwrap();
        assert_eq!(frame.minor, 123);
    }

    #[test]
    fn test_start_failure_is_reported() {
        let mut radio = MockRadioStack::new();
        radio.expect_begin().return_const(());
        radio.expect_advertising_is_running().return_const(false);
        radio.expect_set_tx_power().return_const(true);
        radio.expect_set_name().return_const(());
        radio.expect_scan_response_add_name().return_const(true);
        radio.expect_advertising_set_beacon().return_const(true);
        radio
            .expect_advertising_restart_on_disconnect()
            .return_const(());
        radio.expect_advertising_set_interval().return_const(());
        radio.expect_advertising_start().return_const(false);

        let mut emitter = Emitter::new(radio, identity());
        emitter.power_on();

        match emitter.start_beacon(DEFAULT_BEACON_UUID, 0, 0, 0) {
            Err(Error::AdvertisingFailed { operation }) => assert_eq!(operation, "start"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(emitter.state(), AdvertisingState::Idle);
    }
}
