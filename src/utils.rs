//! Utility functions for the sensor-beacon-ble crate.

use std::time::Duration;

/// Length of one advertising interval unit in microseconds.
pub const INTERVAL_UNIT_MICROS: u64 = 625;

/// Convert advertising interval units (0.625 ms) to a duration.
///
/// # Example
///
/// ```
/// use sensor_beacon_ble::utils::interval_units_to_duration;
/// use std::time::Duration;
///
/// assert_eq!(interval_units_to_duration(160), Duration::from_millis(100));
/// ```
pub fn interval_units_to_duration(units: u16) -> Duration {
    Duration::from_micros(u64::from(units) * INTERVAL_UNIT_MICROS)
}

/// Convert a duration to advertising interval units, rounding down and
/// saturating at `u16::MAX`.
pub fn duration_to_interval_units(duration: Duration) -> u16 {
    let units = duration.as_micros() / u128::from(INTERVAL_UNIT_MICROS);
    u16::try_from(units).unwrap_or(u16::MAX)
}

/// Format bytes as space-separated hex, as printed in logs.
pub fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_conversion() {
        assert_eq!(interval_units_to_duration(100), Duration::from_micros(62_500));
        assert_eq!(duration_to_interval_units(Duration::from_millis(100)), 160);
        assert_eq!(duration_to_interval_units(Duration::from_micros(624)), 0);
        assert_eq!(duration_to_interval_units(Duration::from_secs(3600)), u16::MAX);
    }

    #[test]
    fn test_interval_roundtrip_exact_units() {
        for units in [0u16, 1, 32, 100, 16384] {
            assert_eq!(
                duration_to_interval_units(interval_units_to_duration(units)),
                units
            );
        }
    }

    #[test]
    fn test_hex_string() {
        assert_eq!(hex_string(&[0x4C, 0x00, 0x02, 0x15]), "4C 00 02 15");
        assert_eq!(hex_string(&[]), "");
    }
}
