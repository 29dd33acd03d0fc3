//! Advertising frame construction.
//!
//! Builds the manufacturer-specific data carried by the emitter's
//! advertisements. Both frame kinds share the same layout:
//!
//! ```text
//! | company ID (2, LE) | type 0x02 | length 21 | body (21 bytes) |
//! ```
//!
//! For a beacon the body is `UUID(16) + major(2, BE) + minor(2, BE) + measured power(1)`.
//! For a free payload the body is caller data padded with `'-'`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::ble::uuids::APPLE_COMPANY_ID;
use crate::error::{Error, Result};

/// AD type: flags.
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// AD type: complete list of 128-bit service UUIDs.
pub const AD_TYPE_128BIT_SERVICE_UUID_COMPLETE: u8 = 0x07;
/// AD type: complete local name.
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
/// AD type: manufacturer specific data.
pub const AD_TYPE_MANUFACTURER_SPECIFIC_DATA: u8 = 0xFF;

/// LE only, general discoverable mode.
pub const ADV_FLAGS_LE_ONLY_GENERAL_DISC_MODE: u8 = 0x06;

/// Maximum size of a legacy advertising or scan response payload.
pub const ADV_PAYLOAD_MAX_LEN: usize = 31;

/// Beacon type byte in the manufacturer data prefix.
pub const BEACON_TYPE: u8 = 0x02;
/// Length of the frame body following the prefix.
pub const FRAME_BODY_LEN: usize = 21;
/// Length of the company ID + type + length prefix.
pub const FRAME_PREFIX_LEN: usize = 4;
/// Total manufacturer data length (prefix + body).
pub const MANUFACTURER_DATA_LEN: usize = FRAME_PREFIX_LEN + FRAME_BODY_LEN;

/// Filler for body bytes a free payload does not cover.
pub const FREE_PAYLOAD_FILLER: u8 = b'-';

/// Advertising timeout meaning "until stopped".
pub const ADVERTISE_FOREVER: u16 = 0;

fn frame_prefix(company_id: u16, buf: &mut BytesMut) {
    buf.put_u16_le(company_id);
    buf.put_u8(BEACON_TYPE);
    buf.put_u8(FRAME_BODY_LEN as u8);
}

/// The kind of advertisement currently on air.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdvertisingKind {
    /// iBeacon-style frame.
    Beacon,
    /// Application bytes in the beacon slot.
    FreePayload,
}

impl std::fmt::Display for AdvertisingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Beacon => write!(f, "Beacon"),
            Self::FreePayload => write!(f, "FreePayload"),
        }
    }
}

/// Advertising state of a powered radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdvertisingState {
    /// Nothing on air.
    #[default]
    Idle,
    /// One advertisement of the given kind is on air.
    Advertising(AdvertisingKind),
}

impl AdvertisingState {
    /// Check if an advertisement is running.
    pub fn is_advertising(&self) -> bool {
        matches!(self, Self::Advertising(_))
    }

    /// The kind on air, if any.
    pub fn kind(&self) -> Option<AdvertisingKind> {
        match self {
            Self::Idle => None,
            Self::Advertising(kind) => Some(*kind),
        }
    }
}

impl std::fmt::Display for AdvertisingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Advertising(kind) => write!(f, "Advertising({})", kind),
        }
    }
}

/// Timing parameters applied to every advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdvertisingParams {
    /// Minimum interval in 0.625 ms units.
    pub interval_min: u16,
    /// Maximum interval in 0.625 ms units.
    pub interval_max: u16,
    /// Seconds spent in fast mode (free-payload advertisements only).
    pub fast_timeout_secs: u16,
    /// Restart advertising when a client disconnects.
    pub restart_on_disconnect: bool,
}

impl AdvertisingParams {
    /// Default interval, 100 units (62.5 ms).
    pub const DEFAULT_INTERVAL: u16 = 100;
    /// Default fast mode duration.
    pub const DEFAULT_FAST_TIMEOUT_SECS: u16 = 1;
}

impl Default for AdvertisingParams {
    fn default() -> Self {
        Self {
            interval_min: Self::DEFAULT_INTERVAL,
            interval_max: Self::DEFAULT_INTERVAL,
            fast_timeout_secs: Self::DEFAULT_FAST_TIMEOUT_SECS,
            restart_on_disconnect: true,
        }
    }
}

/// An iBeacon-style frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BeaconFrame {
    /// Bluetooth company identifier placed in the prefix.
    pub company_id: u16,
    /// Proximity UUID, in the byte order it is transmitted.
    pub uuid: [u8; 16],
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
    /// RSSI at one metre, in dBm.
    pub measured_power: i8,
}

impl BeaconFrame {
    /// Create a beacon frame tagged with Apple's company ID.
    pub fn new(uuid: [u8; 16], major: u16, minor: u16, measured_power: i8) -> Self {
        Self {
            company_id: APPLE_COMPANY_ID,
            uuid,
            major,
            minor,
            measured_power,
        }
    }

    /// Tag the frame with another company ID.
    pub fn with_manufacturer(mut self, company_id: u16) -> Self {
        self.company_id = company_id;
        self
    }

    /// The 21-byte body: UUID, major, minor, measured power.
    pub fn body(&self) -> [u8; FRAME_BODY_LEN] {
        let mut body = [0u8; FRAME_BODY_LEN];
        body[..16].copy_from_slice(&self.uuid);
        body[16..18].copy_from_slice(&self.major.to_be_bytes());
        body[18..20].copy_from_slice(&self.minor.to_be_bytes());
        body[20] = self.measured_power as u8;
        body
    }

    /// Prefix and body, as placed in the manufacturer specific AD structure.
    pub fn manufacturer_data(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MANUFACTURER_DATA_LEN);
        frame_prefix(self.company_id, &mut buf);
        buf.put_slice(&self.body());
        buf.freeze()
    }

    /// Parse manufacturer data that starts with the company ID.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MANUFACTURER_DATA_LEN {
            return Err(Error::InvalidData {
                context: format!(
                    "Beacon data too short: {} bytes (need {})",
                    data.len(),
                    MANUFACTURER_DATA_LEN
                ),
            });
        }

        let company_id = u16::from_le_bytes([data[0], data[1]]);
        Self::from_manufacturer_payload(company_id, &data[2..])
    }

    /// Parse the bytes following the company ID.
    ///
    /// Scanners usually report manufacturer data keyed by company ID with
    /// the ID itself stripped.
    pub fn from_manufacturer_payload(company_id: u16, payload: &[u8]) -> Result<Self> {
        if payload.len() < FRAME_BODY_LEN + 2 {
            return Err(Error::InvalidData {
                context: format!("Beacon payload too short: {} bytes", payload.len()),
            });
        }

        if payload[0] != BEACON_TYPE || payload[1] as usize != FRAME_BODY_LEN {
            return Err(Error::InvalidData {
                context: format!(
                    "Not a beacon frame: type {:#04x}, length {}",
                    payload[0], payload[1]
                ),
            });
        }

        let body = &payload[2..2 + FRAME_BODY_LEN];
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&body[..16]);

        Ok(Self {
            company_id,
            uuid,
            major: u16::from_be_bytes([body[16], body[17]]),
            minor: u16::from_be_bytes([body[18], body[19]]),
            measured_power: body[20] as i8,
        })
    }
}

/// Application bytes carried in the beacon slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreePayloadFrame {
    company_id: u16,
    body: [u8; FRAME_BODY_LEN],
    requested_len: usize,
}

impl FreePayloadFrame {
    /// Build a frame from caller bytes.
    ///
    /// Shorter payloads leave the remaining body bytes at `'-'`; longer ones
    /// are cut at 21 bytes (see [`is_truncated`](Self::is_truncated)).
    pub fn new(payload: &[u8]) -> Self {
        let mut body = [FREE_PAYLOAD_FILLER; FRAME_BODY_LEN];
        let copied = payload.len().min(FRAME_BODY_LEN);
        body[..copied].copy_from_slice(&payload[..copied]);

        Self {
            company_id: APPLE_COMPANY_ID,
            body,
            requested_len: payload.len(),
        }
    }

    /// Tag the frame with another company ID.
    pub fn with_manufacturer(mut self, company_id: u16) -> Self {
        self.company_id = company_id;
        self
    }

    /// The company ID in the prefix.
    pub fn company_id(&self) -> u16 {
        self.company_id
    }

    /// The 21-byte body.
    pub fn body(&self) -> &[u8; FRAME_BODY_LEN] {
        &self.body
    }

    /// Number of caller bytes that made it into the body.
    pub fn payload_len(&self) -> usize {
        self.requested_len.min(FRAME_BODY_LEN)
    }

    /// Whether caller bytes were dropped.
    pub fn is_truncated(&self) -> bool {
        self.requested_len > FRAME_BODY_LEN
    }

    /// Prefix and body, as placed in the manufacturer specific AD structure.
    pub fn manufacturer_data(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MANUFACTURER_DATA_LEN);
        frame_prefix(self.company_id, &mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The body is always 21 bytes and the prefix never depends on it.
        #[test]
        fn beacon_prefix_independent_of_payload(
            uuid in any::<[u8; 16]>(),
            major: u16,
            minor: u16,
            power: i8,
        ) {
            let frame = BeaconFrame::new(uuid, major, minor, power);
            prop_assert_eq!(frame.body().len(), FRAME_BODY_LEN);

            let data = frame.manufacturer_data();
            prop_assert_eq!(&data[..4], &[0x4C, 0x00, BEACON_TYPE, 21][..]);
        }

        /// Free payloads of any length fill exactly the 21-byte body.
        #[test]
        fn free_payload_always_fills_body(payload in proptest::collection::vec(any::<u8>(), 0..64)) {
            let frame = FreePayloadFrame::new(&payload);
            let copied = payload.len().min(FRAME_BODY_LEN);

            prop_assert_eq!(frame.manufacturer_data().len(), MANUFACTURER_DATA_LEN);
            prop_assert_eq!(&frame.body()[..copied], &payload[..copied]);
            prop_assert!(frame.body()[copied..].iter().all(|&b| b == FREE_PAYLOAD_FILLER));
        }
    }
}
