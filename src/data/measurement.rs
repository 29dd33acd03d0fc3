//! Measurement encoding in beacon major/minor fields.
//!
//! Two encodings share the beacon slot:
//!
//! - **Tagged**: `major = (id << 8) | counter`, `minor = value`. The high
//!   byte of major names the measurement and the low byte is a rolling
//!   counter so receivers can tell repeated readings apart.
//! - **CO2**: `major = round(ppm * 10)`, `minor = ppm` truncated. It keeps a
//!   decimal of precision but carries no measurement ID.
//!
//! A receiver cannot always tell them apart: a CO2 reading between 281.6
//! and 358.3 ppm has a major whose high byte is a valid measurement ID.
//! [`Measurement::decode`] resolves this with the redundancy of the CO2
//! encoding (minor is the truncated major / 10), which only misreads a
//! tagged frame whose value happens to match.

use crate::ble::advertising::BeaconFrame;

/// Identifier placed in the high byte of a tagged major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MeasurementId {
    /// CO2 concentration, ppm.
    Co2 = 11,
    /// Temperature, °C.
    Temperature = 12,
    /// Noise level, dB.
    Noise = 13,
}

impl MeasurementId {
    /// Look up an ID from its raw value.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            11 => Some(Self::Co2),
            12 => Some(Self::Temperature),
            13 => Some(Self::Noise),
            _ => None,
        }
    }

    /// Raw value.
    pub fn to_raw(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Co2 => write!(f, "CO2"),
            Self::Temperature => write!(f, "Temperature"),
            Self::Noise => write!(f, "Noise"),
        }
    }
}

/// Values for the major and minor fields of a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BeaconFields {
    /// Major field.
    pub major: u16,
    /// Minor field.
    pub minor: u16,
}

impl BeaconFields {
    /// Tagged encoding.
    ///
    /// # Example
    ///
    /// ```
    /// use sensor_beacon_ble::data::{BeaconFields, MeasurementId};
    ///
    /// let fields = BeaconFields::tagged(MeasurementId::Temperature, 21.7, 5);
    /// assert_eq!(fields.major, 0x0C05);
    /// assert_eq!(fields.minor, 21);
    /// ```
    pub fn tagged(id: MeasurementId, value: f64, counter: u8) -> Self {
        Self {
            major: (u16::from(id.to_raw()) << 8) | u16::from(counter),
            minor: value_to_minor(value),
        }
    }

    /// CO2 encoding. The major saturates at 0 and 6553.5 ppm.
    pub fn co2(ppm: f64) -> Self {
        Self {
            major: (ppm * 10.0).round() as u16,
            minor: value_to_minor(ppm),
        }
    }
}

/// Truncate towards zero and saturate to the `i16` range, then reinterpret
/// as the unsigned field. NaN becomes 0.
pub fn value_to_minor(value: f64) -> u16 {
    value as i16 as u16
}

/// A measurement recovered from a beacon.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Measurement {
    /// A CO2 frame.
    Co2 {
        /// Concentration with one decimal, in ppm.
        ppm: f64,
    },
    /// A tagged frame.
    Tagged {
        /// Measurement type.
        id: MeasurementId,
        /// Rolling counter.
        counter: u8,
        /// Integer value.
        value: i16,
    },
}

impl Measurement {
    /// Decode a frame, preferring the CO2 reading when the fields are
    /// consistent with it. Returns `None` if neither encoding fits.
    pub fn decode(frame: &BeaconFrame) -> Option<Self> {
        if looks_like_co2(frame) {
            return Some(Self::decode_co2(frame));
        }
        Self::decode_tagged(frame)
    }

    /// Decode as a tagged frame. Returns `None` if the high byte of major
    /// is not a known ID.
    pub fn decode_tagged(frame: &BeaconFrame) -> Option<Self> {
        let id = MeasurementId::from_raw((frame.major >> 8) as u8)?;
        Some(Self::Tagged {
            id,
            counter: (frame.major & 0xFF) as u8,
            value: frame.minor as i16,
        })
    }

    /// Decode as a CO2 frame. Every frame decodes.
    pub fn decode_co2(frame: &BeaconFrame) -> Self {
        Self::Co2 {
            ppm: f64::from(frame.major) / 10.0,
        }
    }

    /// Measurement type.
    pub fn id(&self) -> MeasurementId {
        match self {
            Self::Co2 { .. } => MeasurementId::Co2,
            Self::Tagged { id, .. } => *id,
        }
    }

    /// Value as a float.
    pub fn value(&self) -> f64 {
        match self {
            Self::Co2 { ppm } => *ppm,
            Self::Tagged { value, .. } => f64::from(*value),
        }
    }
}

fn looks_like_co2(frame: &BeaconFrame) -> bool {
    let ppm = f64::from(frame.major) / 10.0;
    let diff = ppm - f64::from(frame.minor as i16);
    diff > -0.1 && diff < 1.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::DEFAULT_BEACON_UUID;

    fn frame(fields: BeaconFields) -> BeaconFrame {
        BeaconFrame::new(DEFAULT_BEACON_UUID, fields.major, fields.minor, -53)
    }

    #[test]
    fn test_measurement_id() {
        assert_eq!(MeasurementId::from_raw(11), Some(MeasurementId::Co2));
        assert_eq!(MeasurementId::from_raw(13), Some(MeasurementId::Noise));
        assert_eq!(MeasurementId::from_raw(14), None);
        assert_eq!(MeasurementId::Temperature.to_raw(), 12);
        assert_eq!(MeasurementId::Co2.to_string(), "CO2");
    }

    #[test]
    fn test_tagged_encoding() {
        let fields = BeaconFields::tagged(MeasurementId::Temperature, -12.9, 7);
        assert_eq!(fields.major, (12 << 8) + 7);
        assert_eq!(fields.minor as i16, -12);
    }

    #[test]
    fn test_minor_saturates() {
        assert_eq!(value_to_minor(40000.0) as i16, i16::MAX);
        assert_eq!(value_to_minor(-40000.0) as i16, i16::MIN);
        assert_eq!(value_to_minor(f64::NAN), 0);
    }

    #[test]
    fn test_co2_encoding() {
        let fields = BeaconFields::co2(123.4);
        assert_eq!(fields.major, 1234);
        assert_eq!(fields.minor, 123);

        // Rounded, not truncated.
        assert_eq!(BeaconFields::co2(415.96).major, 4160);
        assert_eq!(BeaconFields::co2(-3.0).major, 0);
    }

    #[test]
    fn test_decode_prefers_consistent_co2() {
        // 300.2 ppm has major 3002 = 0x0BBA, whose high byte is the CO2 ID.
        let co2 = frame(BeaconFields::co2(300.2));
        match Measurement::decode(&co2) {
            Some(Measurement::Co2 { ppm }) => assert!((ppm - 300.2).abs() < 1e-9),
            other => panic!("unexpected decode: {:?}", other),
        }

        let temp = frame(BeaconFields::tagged(MeasurementId::Temperature, 21.0, 3));
        assert_eq!(
            Measurement::decode(&temp),
            Some(Measurement::Tagged {
                id: MeasurementId::Temperature,
                counter: 3,
                value: 21,
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_frames() {
        let unknown = BeaconFrame::new(DEFAULT_BEACON_UUID, 0x0101, 999, -53);
        assert_eq!(Measurement::decode(&unknown), None);
    }

    #[test]
    fn test_measurement_accessors() {
        let m = Measurement::Tagged {
            id: MeasurementId::Noise,
            counter: 0,
            value: -4,
        };
        assert_eq!(m.id(), MeasurementId::Noise);
        assert_eq!(m.value(), -4.0);
        assert_eq!(Measurement::Co2 { ppm: 412.5 }.id(), MeasurementId::Co2);
    }
}
