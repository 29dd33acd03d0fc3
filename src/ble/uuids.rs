//! UUIDs and identifiers used by the emitter.
//!
//! Service and characteristic UUIDs are not registered 128-bit values: they
//! are derived from a short readable name so a scanner shows the name
//! directly when it prints the UUID.

use tracing::warn;
use uuid::Uuid;

/// Apple's Bluetooth company identifier, used for iBeacon frames.
pub const APPLE_COMPANY_ID: u16 = 0x004C;

/// Length of an entity UUID in bytes.
pub const ENTITY_UUID_LEN: usize = 16;

/// Initial buffer contents before a name is encoded into it.
pub const ENTITY_UUID_FILL: [u8; ENTITY_UUID_LEN] = *b"0123456789ABCDEF";

/// Beacon UUID broadcast by the sensor node.
pub const DEFAULT_BEACON_UUID: [u8; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

/// Copy `name` into `buf` in reverse byte order.
///
/// The first byte of the name lands in the last slot of the buffer, the
/// second in the one before it, and so on. Names longer than the buffer are
/// cut; slots the name does not reach keep whatever the caller put there.
///
/// Returns the number of bytes copied.
///
/// # Example
///
/// ```
/// use sensor_beacon_ble::ble::uuids::encode_reversed;
///
/// let mut buf = [b'.'; 6];
/// assert_eq!(encode_reversed("abc", &mut buf), 3);
/// assert_eq!(&buf, b"...cba");
/// ```
pub fn encode_reversed(name: &str, buf: &mut [u8]) -> usize {
    let bytes = name.as_bytes();
    let count = bytes.len().min(buf.len());
    let last = buf.len().saturating_sub(1);

    for (i, &b) in bytes.iter().take(count).enumerate() {
        buf[last - i] = b;
    }

    count
}

/// A 128-bit identifier derived from a readable name.
///
/// Bytes are stored least-significant first, which is the order the BLE
/// stack expects for 128-bit UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityUuid([u8; ENTITY_UUID_LEN]);

impl EntityUuid {
    /// Derive a UUID from a name.
    ///
    /// Names longer than 16 bytes are truncated and a warning is logged.
    /// Two names that agree on their first 16 bytes produce the same UUID.
    pub fn from_name(name: &str) -> Self {
        let mut bytes = ENTITY_UUID_FILL;
        let copied = encode_reversed(name, &mut bytes);

        if copied < name.len() {
            warn!(
                "Name {:?} is {} bytes, UUID keeps only the first {}",
                name,
                name.len(),
                copied
            );
        }

        Self(bytes)
    }

    /// Wrap raw bytes (least-significant first).
    pub const fn from_bytes(bytes: [u8; ENTITY_UUID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw bytes, least-significant first.
    pub fn as_bytes(&self) -> &[u8; ENTITY_UUID_LEN] {
        &self.0
    }

    /// Convert to a standard UUID (most-significant byte first).
    pub fn to_uuid(&self) -> Uuid {
        let mut be = self.0;
        be.reverse();
        Uuid::from_bytes(be)
    }

    /// The UUID read most-significant byte first as text.
    ///
    /// For a name-derived UUID this starts with the name itself.
    pub fn to_text(&self) -> String {
        self.0.iter().rev().map(|&b| b as char).collect()
    }
}

impl From<EntityUuid> for Uuid {
    fn from(value: EntityUuid) -> Self {
        value.to_uuid()
    }
}

impl std::fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_reversed_places_name_at_the_end() {
        let mut buf = ENTITY_UUID_FILL;
        assert_eq!(encode_reversed("env", &mut buf), 3);
        assert_eq!(&buf, b"0123456789ABCvne");
    }

    #[test]
    fn test_encode_reversed_truncates() {
        let mut buf = [0u8; 4];
        assert_eq!(encode_reversed("abcdef", &mut buf), 4);
        assert_eq!(&buf, b"dcba");
    }

    #[test]
    fn test_encode_reversed_empty() {
        let mut buf = ENTITY_UUID_FILL;
        assert_eq!(encode_reversed("", &mut buf), 0);
        assert_eq!(buf, ENTITY_UUID_FILL);

        let mut empty: [u8; 0] = [];
        assert_eq!(encode_reversed("abc", &mut empty), 0);
    }

    #[test]
    fn test_entity_uuid_text() {
        let uuid = EntityUuid::from_name("co2");
        assert_eq!(uuid.to_text(), "co2CBA9876543210");
    }

    #[test]
    fn test_entity_uuid_to_uuid() {
        let uuid = EntityUuid::from_name("co2");
        let std_uuid = uuid.to_uuid();
        assert_eq!(&std_uuid.as_bytes()[..3], b"co2");
        assert_eq!(Uuid::from(uuid), std_uuid);
    }

    #[test]
    fn test_entity_uuid_long_name_collides() {
        let a = EntityUuid::from_name("0123456789abcdefXYZ");
        let b = EntityUuid::from_name("0123456789abcdef");
        assert_eq!(a, b);
    }

    #[test]
    fn test_apple_company_id() {
        assert_eq!(APPLE_COMPANY_ID.to_le_bytes(), [0x4C, 0x00]);
    }
}
