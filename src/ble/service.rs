//! GATT services.
//!
//! A [`Service`] groups characteristics under one UUID. It borrows its
//! characteristics: they are owned by the caller and must outlive the
//! service, which the borrow checker enforces.

use tracing::{error, info, warn};

use crate::ble::characteristics::Characteristic;
use crate::ble::stack::{RadioStack, ServiceHandle, StackStatus};
use crate::ble::uuids::EntityUuid;
use crate::emitter::Emitter;
use crate::error::{Error, Result};

/// Registration outcome of one characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicActivation {
    /// Characteristic name.
    pub name: String,
    /// Stack status.
    pub status: StackStatus,
}

/// Registration outcome of a service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceActivation {
    /// Service name.
    pub service: String,
    /// Stack status of the service registration.
    pub status: StackStatus,
    /// Characteristic outcomes, in activation order.
    pub characteristics: Vec<CharacteristicActivation>,
    /// Whether the service made it into the advertising payload, when
    /// that was attempted.
    pub advertised: Option<bool>,
}

impl ServiceActivation {
    /// Check if every registration succeeded.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
            && self.characteristics.iter().all(|c| c.status.is_success())
            && self.advertised != Some(false)
    }

    /// Names of characteristics the stack rejected.
    pub fn failed_characteristics(&self) -> Vec<&str> {
        self.characteristics
            .iter()
            .filter(|c| !c.status.is_success())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Turn the first failed registration into an error.
    pub fn into_result(self) -> Result<Self> {
        self.status.into_result(&self.service)?;
        for characteristic in &self.characteristics {
            characteristic.status.into_result(&characteristic.name)?;
        }
        if self.advertised == Some(false) {
            return Err(Error::AdvertisingRejected {
                service: self.service,
            });
        }
        Ok(self)
    }
}

/// A GATT service and the characteristics it exposes.
#[derive(Debug)]
pub struct Service<'a> {
    name: String,
    uuid: EntityUuid,
    characteristics: Vec<&'a Characteristic>,
}

impl<'a> Service<'a> {
    /// Create an empty service.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uuid: EntityUuid::from_name(name),
            characteristics: Vec::new(),
        }
    }

    /// Create a service with characteristics, in activation order.
    pub fn with<I>(name: &str, characteristics: I) -> Self
    where
        I: IntoIterator<Item = &'a Characteristic>,
    {
        let mut service = Self::new(name);
        service.characteristics.extend(characteristics);
        service
    }

    /// Append a characteristic. Duplicates are not detected.
    pub fn add_characteristic(&mut self, characteristic: &'a Characteristic) -> &mut Self {
        self.characteristics.push(characteristic);
        self
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Service UUID.
    pub fn uuid(&self) -> &EntityUuid {
        &self.uuid
    }

    /// Characteristics in activation order.
    pub fn characteristics(&self) -> &[&'a Characteristic] {
        &self.characteristics
    }

    /// Number of characteristics.
    pub fn len(&self) -> usize {
        self.characteristics.len()
    }

    /// Check if the service has no characteristics.
    pub fn is_empty(&self) -> bool {
        self.characteristics.is_empty()
    }

    /// The value the stack uses to register or advertise this service.
    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            name: self.name.clone(),
            uuid: self.uuid,
        }
    }

    /// Log the UUID as text.
    pub fn log_uuid(&self) {
        info!("Service {} UUID: {}", self.name, self.uuid.to_text());
    }

    /// Register the service, then each characteristic in insertion order.
    ///
    /// A rejected service registration does not stop characteristic
    /// activation; check [`ServiceActivation::is_success`] or use
    /// [`activate_strict`](Self::activate_strict). Activating twice issues
    /// the registrations again.
    ///
    /// # Errors
    ///
    /// Only [`Error::RadioNotPowered`]; stack rejections are in the report.
    pub fn activate<R: RadioStack>(&self, emitter: &mut Emitter<R>) -> Result<ServiceActivation> {
        let radio = emitter.powered_radio()?;

        let status = self.begin(radio);
        if !status.is_success() {
            warn!(
                "Service {} not registered, activating its characteristics anyway",
                self.name
            );
        }

        let characteristics = self
            .characteristics
            .iter()
            .map(|c| CharacteristicActivation {
                name: c.name().to_string(),
                status: c.begin(radio),
            })
            .collect();

        Ok(ServiceActivation {
            service: self.name.clone(),
            status,
            characteristics,
            advertised: None,
        })
    }

    /// Like [`activate`](Self::activate), but stops at the first rejection.
    ///
    /// # Errors
    ///
    /// [`Error::ActivationFailed`] naming the service or characteristic the
    /// stack rejected.
    pub fn activate_strict<R: RadioStack>(
        &self,
        emitter: &mut Emitter<R>,
    ) -> Result<ServiceActivation> {
        let radio = emitter.powered_radio()?;

        let status = self.begin(radio);
        status.into_result(&self.name)?;

        let mut characteristics = Vec::with_capacity(self.characteristics.len());
        for characteristic in &self.characteristics {
            let status = characteristic.begin(radio);
            status.into_result(characteristic.name())?;
            characteristics.push(CharacteristicActivation {
                name: characteristic.name().to_string(),
                status,
            });
        }

        Ok(ServiceActivation {
            service: self.name.clone(),
            status,
            characteristics,
            advertised: None,
        })
    }

    fn begin<R: RadioStack + ?Sized>(&self, radio: &mut R) -> StackStatus {
        let status = radio.service_begin(&self.handle());
        if status.is_success() {
            info!("Service {} registered ({})", self.name, self.uuid);
        } else {
            error!("Service {} registration failed: status {}", self.name, status);
        }
        status
    }
}
