//! GATT characteristic handling.
//!
//! A [`Characteristic`] describes one attribute exposed to connected
//! clients. It is created without touching the radio and registered later,
//! usually through [`Service::activate`](crate::ble::service::Service::activate).

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::ble::connection::ConnHandle;
use crate::ble::stack::{CharacteristicHandle, RadioStack, StackStatus, WriteCallback};
use crate::ble::uuids::EntityUuid;
use crate::emitter::Emitter;
use crate::error::Result;

/// GATT characteristic properties bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties(pub u8);

impl CharacteristicProperties {
    /// No properties.
    pub const NONE: Self = Self(0x00);
    /// Value may be broadcast.
    pub const BROADCAST: Self = Self(0x01);
    /// Value may be read.
    pub const READ: Self = Self(0x02);
    /// Value may be written without response.
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    /// Value may be written.
    pub const WRITE: Self = Self(0x08);
    /// Value changes may be notified.
    pub const NOTIFY: Self = Self(0x10);
    /// Value changes may be indicated.
    pub const INDICATE: Self = Self(0x20);

    /// Raw bitmask.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Check if all bits of `other` are set.
    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if any write property is set.
    pub fn is_writable(&self) -> bool {
        (self.0 & (Self::WRITE.0 | Self::WRITE_WITHOUT_RESPONSE.0)) != 0
    }

    /// Check if notify or indicate is set.
    pub fn can_push(&self) -> bool {
        (self.0 & (Self::NOTIFY.0 | Self::INDICATE.0)) != 0
    }
}

impl std::ops::BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Security requirement for reading or writing an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SecurityMode {
    /// Access forbidden.
    NoAccess = 0,
    /// No security required.
    #[default]
    Open = 1,
    /// Encrypted link, no MITM protection.
    EncryptedNoMitm = 2,
    /// Encrypted link with MITM protection.
    EncryptedWithMitm = 3,
    /// Signed data, no MITM protection.
    SignedNoMitm = 4,
    /// Signed data with MITM protection.
    SignedWithMitm = 5,
}

impl SecurityMode {
    /// Check if this mode grants any access.
    pub fn allows_access(&self) -> bool {
        !matches!(self, Self::NoAccess)
    }
}

/// A client write delivered by the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteEvent {
    /// Connection the write came from.
    pub conn_handle: ConnHandle,
    /// Characteristic that was written.
    pub characteristic: EntityUuid,
    /// Bytes written.
    pub data: Vec<u8>,
}

/// One GATT characteristic.
pub struct Characteristic {
    name: String,
    uuid: EntityUuid,
    properties: CharacteristicProperties,
    read_permission: SecurityMode,
    write_permission: SecurityMode,
    max_len: u16,
    /// Shared with the trampoline handed to the stack, so the callback can
    /// be replaced after activation.
    write_callback: Arc<RwLock<Option<WriteCallback>>>,
}

impl Characteristic {
    /// Default maximum value length (default ATT MTU minus header).
    pub const DEFAULT_MAX_LEN: u16 = 20;

    /// Create a characteristic with stack defaults: no properties, open
    /// read, no write access.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uuid: EntityUuid::from_name(name),
            properties: CharacteristicProperties::NONE,
            read_permission: SecurityMode::Open,
            write_permission: SecurityMode::NoAccess,
            max_len: Self::DEFAULT_MAX_LEN,
            write_callback: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a characteristic with explicit properties, permissions and size.
    pub fn with_properties(
        name: &str,
        properties: CharacteristicProperties,
        read_permission: SecurityMode,
        write_permission: SecurityMode,
        max_len: u16,
    ) -> Self {
        let mut characteristic = Self::new(name);
        characteristic.set_properties_permissions_and_size(
            properties,
            read_permission,
            write_permission,
            max_len,
        );
        characteristic
    }

    /// Replace properties, permissions and size. Takes effect on the next
    /// activation.
    pub fn set_properties_permissions_and_size(
        &mut self,
        properties: CharacteristicProperties,
        read_permission: SecurityMode,
        write_permission: SecurityMode,
        max_len: u16,
    ) {
        self.properties = properties;
        self.read_permission = read_permission;
        self.write_permission = write_permission;
        self.max_len = max_len;
    }

    /// Name the UUID was derived from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Characteristic UUID.
    pub fn uuid(&self) -> &EntityUuid {
        &self.uuid
    }

    /// Properties bitmask.
    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// Read and write permissions.
    pub fn permissions(&self) -> (SecurityMode, SecurityMode) {
        (self.read_permission, self.write_permission)
    }

    /// Maximum value length.
    pub fn max_len(&self) -> u16 {
        self.max_len
    }

    /// The value handed to the stack at registration.
    pub fn handle(&self) -> CharacteristicHandle {
        CharacteristicHandle {
            name: self.name.clone(),
            uuid: self.uuid,
            properties: self.properties,
            read_permission: self.read_permission,
            write_permission: self.write_permission,
            max_len: self.max_len,
        }
    }

    /// Register this characteristic with the stack.
    ///
    /// It is attached to the service registered most recently. There is no
    /// retry; a rejected registration is returned as
    /// [`Error::ActivationFailed`](crate::Error::ActivationFailed).
    ///
    /// # Errors
    ///
    /// Returns [`Error::RadioNotPowered`](crate::Error::RadioNotPowered) if
    /// the emitter was never powered on.
    pub fn activate<R: RadioStack>(&self, emitter: &mut Emitter<R>) -> Result<()> {
        let radio = emitter.powered_radio()?;
        self.begin(radio).into_result(&self.name)
    }

    /// Issue the stack registration and log its status.
    pub(crate) fn begin<R: RadioStack + ?Sized>(&self, radio: &mut R) -> StackStatus {
        let slot = self.write_callback.clone();
        let trampoline: WriteCallback = Arc::new(move |event: WriteEvent| {
            let callback = slot.read().clone();
            if let Some(callback) = callback {
                callback(event);
            }
        });

        let status = radio.characteristic_begin(&self.handle(), trampoline);

        if status.is_success() {
            debug!("Characteristic {} ({}) registered", self.name, self.uuid);
        } else {
            error!(
                "Characteristic {} registration failed: status {}",
                self.name, status
            );
        }

        status
    }

    /// Set the local value. Returns the number of bytes stored, which may
    /// be less than `data.len()`.
    pub fn write<R: RadioStack>(&self, emitter: &mut Emitter<R>, data: &[u8]) -> Result<usize> {
        let radio = emitter.powered_radio()?;
        let written = radio.characteristic_write(&self.uuid, data) as usize;
        trace!("Wrote {} of {} bytes to {}", written, data.len(), self.name);
        Ok(written)
    }

    /// Notify subscribed clients. Best effort: returns 0 when nobody is
    /// connected or subscribed, and may send fewer bytes than requested.
    pub fn notify<R: RadioStack>(&self, emitter: &mut Emitter<R>, data: &[u8]) -> Result<usize> {
        let radio = emitter.powered_radio()?;
        let sent = radio.characteristic_notify(&self.uuid, data) as usize;
        trace!("Notified {} of {} bytes on {}", sent, data.len(), self.name);
        Ok(sent)
    }

    /// Install the write callback, replacing any previous one.
    ///
    /// The callback runs on the stack's event context. It must return
    /// quickly and should only record the write for the main loop.
    pub fn install_write_callback<F>(&self, callback: F)
    where
        F: Fn(WriteEvent) + Send + Sync + 'static,
    {
        *self.write_callback.write() = Some(Arc::new(callback));
    }

    /// Check if a write callback is installed.
    pub fn has_write_callback(&self) -> bool {
        self.write_callback.read().is_some()
    }
}

impl std::fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Characteristic")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("properties", &self.properties)
            .field("read_permission", &self.read_permission)
            .field("write_permission", &self.write_permission)
            .field("max_len", &self.max_len)
            .field("has_write_callback", &self.has_write_callback())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::stack::MockRadioStack;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_properties() {
        let props = CharacteristicProperties::READ | CharacteristicProperties::NOTIFY;
        assert_eq!(props.bits(), 0x12);
        assert!(props.contains(CharacteristicProperties::READ));
        assert!(!props.contains(CharacteristicProperties::WRITE));
        assert!(props.can_push());
        assert!(!props.is_writable());
        assert!(CharacteristicProperties::WRITE_WITHOUT_RESPONSE.is_writable());
    }

    #[test]
    fn test_security_mode() {
        assert!(!SecurityMode::NoAccess.allows_access());
        assert!(SecurityMode::Open.allows_access());
        assert_eq!(SecurityMode::default(), SecurityMode::Open);
    }

    #[test]
    fn test_new_uses_stack_defaults() {
        let chr = Characteristic::new("co2");
        assert_eq!(chr.name(), "co2");
        assert_eq!(chr.uuid(), &EntityUuid::from_name("co2"));
        assert_eq!(chr.properties(), CharacteristicProperties::NONE);
        assert_eq!(chr.permissions(), (SecurityMode::Open, SecurityMode::NoAccess));
        assert_eq!(chr.max_len(), Characteristic::DEFAULT_MAX_LEN);
        assert!(!chr.has_write_callback());
    }

    #[test]
    fn test_with_properties_handle() {
        let chr = Characteristic::with_properties(
            "co2",
            CharacteristicProperties::NOTIFY,
            SecurityMode::Open,
            SecurityMode::Open,
            4,
        );
        let handle = chr.handle();
        assert_eq!(handle.name, "co2");
        assert_eq!(handle.properties, CharacteristicProperties::NOTIFY);
        assert_eq!(handle.write_permission, SecurityMode::Open);
        assert_eq!(handle.max_len, 4);
    }

    #[test]
    fn test_write_callback_replaced_after_begin() {
        let chr = Characteristic::new("cmd");
        let captured: Arc<RwLock<Option<WriteCallback>>> = Arc::new(RwLock::new(None));

        let mut radio = MockRadioStack::new();
        let sink = captured.clone();
        radio
            .expect_characteristic_begin()
            .times(1)
            .returning(move |_, on_write| {
                *sink.write() = Some(on_write);
                StackStatus::SUCCESS
            });

        assert!(chr.begin(&mut radio).is_success());
        let trampoline = captured.read().clone().unwrap();

        let event = WriteEvent {
            conn_handle: 0,
            characteristic: *chr.uuid(),
            data: vec![1],
        };

        // No callback yet: the write is dropped.
        trampoline(event.clone());

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        chr.install_write_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        trampoline(event.clone());

        let counter = second.clone();
        chr.install_write_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        trampoline(event);

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_begin_reports_stack_status() {
        let chr = Characteristic::new("co2");
        let mut radio = MockRadioStack::new();
        radio
            .expect_characteristic_begin()
            .returning(|_, _| StackStatus::INVALID_PARAM);

        assert_eq!(chr.begin(&mut radio), StackStatus::INVALID_PARAM);
    }
}
