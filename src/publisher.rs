//! Measurement publisher.
//!
//! The [`Publisher`] drives one [`Emitter`] with a fixed beacon UUID. Each
//! publish starts a beacon carrying the measurement, holds it on air for a
//! caller-chosen duration and stops it again, so the node only transmits
//! while it has something to say.
//!
//! ```
//! use sensor_beacon_ble::ble::SimulatedRadio;
//! use sensor_beacon_ble::{Publisher, PublisherConfig};
//! use std::time::Duration;
//!
//! let mut publisher = Publisher::with_hold(
//!     SimulatedRadio::new(),
//!     PublisherConfig::default(),
//!     |_: Duration| {},
//! );
//! publisher.power_on();
//!
//! let frame = publisher
//!     .publish_co2(123.4, 7, Duration::from_millis(500))
//!     .unwrap();
//! assert_eq!(frame.major, 1234);
//! assert!(!publisher.emitter().is_advertising());
//! ```

use std::time::Duration;
use tracing::{debug, info};

use crate::ble::advertising::{AdvertisingParams, BeaconFrame, FreePayloadFrame};
use crate::ble::stack::RadioStack;
use crate::ble::uuids::{APPLE_COMPANY_ID, DEFAULT_BEACON_UUID};
use crate::data::{BeaconFields, MeasurementId, MeasurementSource};
use crate::emitter::{Emitter, RadioIdentity, TxPower};
use crate::error::Result;
use crate::utils::hex_string;

/// Keeps an advertisement on air for a while.
///
/// Holding is synchronous and cannot be cancelled.
pub trait Hold {
    /// Block for `duration`.
    fn hold(&mut self, duration: Duration);
}

/// Holds by sleeping the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadHold;

impl Hold for ThreadHold {
    fn hold(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<F> Hold for F
where
    F: FnMut(Duration),
{
    fn hold(&mut self, duration: Duration) {
        self(duration)
    }
}

/// Publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PublisherConfig {
    /// Radio identity.
    pub identity: RadioIdentity,
    /// UUID carried by every beacon.
    pub beacon_uuid: [u8; 16],
    /// RSSI at one metre, in dBm.
    pub measured_power: i8,
    /// Advertising parameters.
    pub params: AdvertisingParams,
}

impl PublisherConfig {
    /// Default device name.
    pub const DEFAULT_NAME: &'static str = "yesyes";
    /// Default measured power.
    pub const DEFAULT_MEASURED_POWER: i8 = -53;
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            identity: RadioIdentity::new(Self::DEFAULT_NAME, APPLE_COMPANY_ID, TxPower::Plus4),
            beacon_uuid: DEFAULT_BEACON_UUID,
            measured_power: Self::DEFAULT_MEASURED_POWER,
            params: AdvertisingParams::default(),
        }
    }
}

/// Publishes measurements as short-lived beacons.
pub struct Publisher<R: RadioStack, H: Hold = ThreadHold> {
    emitter: Emitter<R>,
    beacon_uuid: [u8; 16],
    measured_power: i8,
    hold: H,
}

impl<R: RadioStack> Publisher<R> {
    /// Create a publisher that holds by sleeping.
    ///
    /// The radio is not powered on; call [`power_on`](Self::power_on) once
    /// the rest of the system is set up.
    pub fn new(radio: R, config: PublisherConfig) -> Self {
        Self::with_hold(radio, config, ThreadHold)
    }
}

impl<R: RadioStack, H: Hold> Publisher<R, H> {
    /// Create a publisher with a custom hold.
    pub fn with_hold(radio: R, config: PublisherConfig, hold: H) -> Self {
        Self {
            emitter: Emitter::with_params(radio, config.identity, config.params),
            beacon_uuid: config.beacon_uuid,
            measured_power: config.measured_power,
            hold,
        }
    }

    /// Power on the radio.
    pub fn power_on(&mut self) {
        self.emitter.power_on();
    }

    /// The underlying emitter.
    pub fn emitter(&self) -> &Emitter<R> {
        &self.emitter
    }

    /// The underlying emitter, for GATT setup or callbacks.
    pub fn emitter_mut(&mut self) -> &mut Emitter<R> {
        &mut self.emitter
    }

    /// Beacon UUID.
    pub fn beacon_uuid(&self) -> &[u8; 16] {
        &self.beacon_uuid
    }

    /// Publish a tagged measurement: `major = (id << 8) | counter`,
    /// `minor = value` truncated to `i16`.
    ///
    /// # Errors
    ///
    /// Returns the emitter's error if the beacon could not be started. The
    /// hold is skipped in that case.
    pub fn publish(
        &mut self,
        id: MeasurementId,
        value: f64,
        counter: u8,
        hold: Duration,
    ) -> Result<BeaconFrame> {
        debug!("Publishing {} = {} (counter {})", id, value, counter);
        self.advertise(BeaconFields::tagged(id, value, counter), hold)
    }

    /// Publish a CO2 reading: `major = round(ppm * 10)`, `minor = ppm`
    /// truncated. The counter is not transmitted.
    pub fn publish_co2(&mut self, ppm: f64, counter: u8, hold: Duration) -> Result<BeaconFrame> {
        debug!("Publishing CO2 = {} ppm (counter {})", ppm, counter);
        self.advertise(BeaconFields::co2(ppm), hold)
    }

    /// Publish a temperature in whole degrees.
    pub fn publish_temperature(
        &mut self,
        celsius: i16,
        counter: u8,
        hold: Duration,
    ) -> Result<BeaconFrame> {
        self.publish(MeasurementId::Temperature, f64::from(celsius), counter, hold)
    }

    /// Publish a noise level.
    pub fn publish_noise(&mut self, db: f64, counter: u8, hold: Duration) -> Result<BeaconFrame> {
        self.publish(MeasurementId::Noise, db, counter, hold)
    }

    /// Sample `source` once and publish the reading as CO2.
    ///
    /// Returns the sampled value with the frame that carried it.
    pub fn sample_and_publish_co2<S: MeasurementSource + ?Sized>(
        &mut self,
        source: &mut S,
        counter: u8,
        hold: Duration,
    ) -> Result<(f64, BeaconFrame)> {
        let ppm = source.sample_calibrated_value();
        let frame = self.publish_co2(ppm, counter, hold)?;
        Ok((ppm, frame))
    }

    /// Advertise raw bytes for `hold`, then stop.
    pub fn publish_free_payload(
        &mut self,
        payload: &[u8],
        hold: Duration,
    ) -> Result<FreePayloadFrame> {
        let frame = self.emitter.start_free_payload(payload)?;
        debug!("Free payload on air: {}", hex_string(frame.body()));

        self.hold.hold(hold);
        self.emitter.stop_advertising();

        Ok(frame)
    }

    fn advertise(&mut self, fields: BeaconFields, hold: Duration) -> Result<BeaconFrame> {
        let frame = self.emitter.start_beacon(
            self.beacon_uuid,
            fields.major,
            fields.minor,
            self.measured_power,
        )?;

        self.hold.hold(hold);
        self.emitter.stop_advertising();

        info!(
            "Published major={:#06x} minor={} for {:?}",
            fields.major, fields.minor as i16, hold
        );
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::stack::MockRadioStack;
    use crate::error::Error;
    use mockall::predicate::eq;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn publisher_with(
        radio: MockRadioStack,
        holds: Arc<Mutex<Vec<Duration>>>,
    ) -> Publisher<MockRadioStack, impl Hold> {
        Publisher::with_hold(radio, PublisherConfig::default(), move |d: Duration| {
            holds.lock().push(d)
        })
    }

    fn accepting_radio() -> MockRadioStack {
        let mut radio = MockRadioStack::new();
        radio.expect_begin().return_const(());
        radio.expect_set_tx_power().return_const(true);
        radio.expect_set_name().return_const(());
        radio.expect_scan_response_add_name().return_const(true);
        radio
            .expect_advertising_restart_on_disconnect()
            .return_const(());
        radio.expect_advertising_set_interval().return_const(());
        radio.expect_advertising_start().return_const(true);
        radio
    }

    #[test]
    fn test_default_config() {
        let config = PublisherConfig::default();
        assert_eq!(config.identity.name(), "yesyes");
        assert_eq!(config.identity.manufacturer_id(), 0x004C);
        assert_eq!(config.identity.tx_power(), TxPower::Plus4);
        assert_eq!(config.beacon_uuid, DEFAULT_BEACON_UUID);
        assert_eq!(config.measured_power, -53);
    }

    #[test]
    fn test_publish_temperature_fields_and_hold() {
        let mut radio = accepting_radio();
        // power_on, start_beacon, and the stop after the hold
        let running = Arc::new(Mutex::new(vec![false, false, true]));
        let states = running.clone();
        radio
            .expect_advertising_is_running()
            .times(3)
            .returning(move || states.lock().remove(0));
        radio
            .expect_advertising_set_beacon()
            .withf(|frame: &BeaconFrame| {
                frame.major == (12 << 8) + 5 && frame.minor as i16 == -7 && frame.measured_power == -53
            })
            .times(1)
            .return_const(true);
        radio.expect_advertising_stop().times(1).return_const(true);

        let holds = Arc::new(Mutex::new(Vec::new()));
        let mut publisher = publisher_with(radio, holds.clone());
        publisher.power_on();

        publisher
            .publish_temperature(-7, 5, Duration::from_millis(250))
            .unwrap();
        assert_eq!(*holds.lock(), vec![Duration::from_millis(250)]);
    }

    #[test]
    fn test_publish_noise_uses_noise_id() {
        let mut radio = accepting_radio();
        radio.expect_advertising_is_running().return_const(false);
        radio
            .expect_advertising_set_beacon()
            .withf(|frame: &BeaconFrame| frame.major == 0x0D01 && frame.minor == 62)
            .times(1)
            .return_const(true);

        let holds = Arc::new(Mutex::new(Vec::new()));
        let mut publisher = publisher_with(radio, holds);
        publisher.power_on();
        publisher
            .publish_noise(62.8, 1, Duration::ZERO)
            .unwrap();
    }

    #[test]
    fn test_sample_and_publish_co2() {
        let mut radio = accepting_radio();
        radio.expect_advertising_is_running().return_const(false);
        radio
            .expect_advertising_set_beacon()
            .with(eq(BeaconFrame::new(DEFAULT_BEACON_UUID, 4125, 412, -53)))
            .times(1)
            .return_const(true);

        let holds = Arc::new(Mutex::new(Vec::new()));
        let mut publisher = publisher_with(radio, holds);
        publisher.power_on();

        let mut source = || 412.5;
        let (ppm, frame) = publisher
            .sample_and_publish_co2(&mut source, 0, Duration::ZERO)
            .unwrap();
        assert_eq!(ppm, 412.5);
        assert_eq!(frame.major, 4125);
    }

    #[test]
    fn test_failed_start_skips_hold() {
        let mut radio = MockRadioStack::new();
        radio.expect_begin().return_const(());
        radio.expect_advertising_is_running().return_const(false);
        radio.expect_set_tx_power().return_const(true);
        radio.expect_set_name().return_const(());
        radio.expect_scan_response_add_name().return_const(true);
        radio.expect_advertising_set_beacon().return_const(false);

        let holds = Arc::new(Mutex::new(Vec::new()));
        let mut publisher = publisher_with(radio, holds.clone());
        publisher.power_on();

        assert!(matches!(
            publisher.publish_co2(400.0, 0, Duration::from_secs(1)),
            Err(Error::AdvertisingFailed { .. })
        ));
        assert!(holds.lock().is_empty());
    }

    #[test]
    fn test_publish_before_power_on() {
        let holds = Arc::new(Mutex::new(Vec::new()));
        let mut publisher = publisher_with(MockRadioStack::new(), holds.clone());

        assert!(matches!(
            publisher.publish_co2(400.0, 0, Duration::from_secs(1)),
            Err(Error::RadioNotPowered)
        ));
        assert!(holds.lock().is_empty());
    }
}
