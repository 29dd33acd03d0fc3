//! Receiver-side beacon scanning.
//!
//! [`BeaconScanner`] runs on a host with a BLE adapter and listens for the
//! sensor node's beacons, decoding each one back into a [`Measurement`].
//! Available with the `scanner` feature.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

use crate::ble::advertising::BeaconFrame;
use crate::ble::uuids::{APPLE_COMPANY_ID, DEFAULT_BEACON_UUID};
use crate::data::Measurement;
use crate::error::{Error, Result};

/// A beacon received from a node.
#[derive(Debug, Clone)]
pub struct BeaconSighting {
    /// The BLE peripheral identifier.
    pub identifier: String,
    /// Decoded beacon frame.
    pub frame: BeaconFrame,
    /// Measurement carried by the frame, if it decodes.
    pub measurement: Option<Measurement>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised local name.
    pub local_name: Option<String>,
}

/// Which beacons the scanner reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconFilter {
    /// Company ID in the manufacturer data.
    pub company_id: u16,
    /// Beacon UUID.
    pub uuid: [u8; 16],
}

impl Default for BeaconFilter {
    fn default() -> Self {
        Self {
            company_id: APPLE_COMPANY_ID,
            uuid: DEFAULT_BEACON_UUID,
        }
    }
}

impl BeaconFilter {
    /// Decode manufacturer data if it is a matching beacon.
    pub fn matches(&self, manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<BeaconFrame> {
        let payload = manufacturer_data.get(&self.company_id)?;
        let frame = BeaconFrame::from_manufacturer_payload(self.company_id, payload).ok()?;
        (frame.uuid == self.uuid).then_some(frame)
    }
}

/// Scanner for sensor node beacons.
pub struct BeaconScanner {
    adapter: Adapter,
    filter: BeaconFilter,
    is_scanning: Arc<RwLock<bool>>,
    /// Last sighting per peripheral.
    latest: Arc<RwLock<HashMap<String, BeaconSighting>>>,
    event_tx: broadcast::Sender<BeaconSighting>,
    scan_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl BeaconScanner {
    /// Create a scanner on the first adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(filter: BeaconFilter) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, filter))
    }

    /// Create a scanner on a specific adapter.
    pub fn with_adapter(adapter: Adapter, filter: BeaconFilter) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            adapter,
            filter,
            is_scanning: Arc::new(RwLock::new(false)),
            latest: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            scan_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start scanning.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning cannot be started.
    pub async fn start_scanning(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan for sensor beacons");

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let filter = self.filter;
        let is_scanning = self.is_scanning.clone();
        let latest = self.latest.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        Self::handle_event(event, &adapter, &filter, &latest, &event_tx).await;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {
                        if !*is_scanning.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)?;

        let handle = self.scan_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Last sighting of every node seen so far.
    pub fn latest_sightings(&self) -> HashMap<String, BeaconSighting> {
        self.latest.read().clone()
    }

    /// Subscribe to sightings.
    pub fn subscribe(&self) -> broadcast::Receiver<BeaconSighting> {
        self.event_tx.subscribe()
    }

    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        filter: &BeaconFilter,
        latest: &Arc<RwLock<HashMap<String, BeaconSighting>>>,
        event_tx: &broadcast::Sender<BeaconSighting>,
    ) {
        match event {
            CentralEvent::ManufacturerDataAdvertisement {
                id,
                manufacturer_data,
            } => {
                if let Some(frame) = filter.matches(&manufacturer_data) {
                    trace!("Beacon advertisement from {:?}", id);
                    Self::record(adapter, id, frame, latest, event_tx).await;
                }
            }
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                trace!("Device seen: {:?}", id);
            }
            _ => {}
        }
    }

    async fn record(
        adapter: &Adapter,
        id: PeripheralId,
        frame: BeaconFrame,
        latest: &Arc<RwLock<HashMap<String, BeaconSighting>>>,
        event_tx: &broadcast::Sender<BeaconSighting>,
    ) {
        let properties = match adapter.peripheral(&id).await {
            Ok(peripheral) => peripheral.properties().await.ok().flatten(),
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                None
            }
        };

        let sighting = BeaconSighting {
            identifier: id.to_string(),
            frame,
            measurement: Measurement::decode(&frame),
            rssi: properties.as_ref().and_then(|p| p.rssi),
            local_name: properties.and_then(|p| p.local_name),
        };

        debug!(
            "Beacon {} major={} minor={} -> {:?}",
            sighting.identifier, frame.major, frame.minor, sighting.measurement
        );

        latest
            .write()
            .insert(sighting.identifier.clone(), sighting.clone());

        let _ = event_tx.send(sighting);
    }
}

impl Drop for BeaconScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_own_beacons() {
        let frame = BeaconFrame::new(DEFAULT_BEACON_UUID, 1234, 123, -53);
        let data = frame.manufacturer_data();

        let mut adverts = HashMap::new();
        adverts.insert(APPLE_COMPANY_ID, data[2..].to_vec());

        assert_eq!(BeaconFilter::default().matches(&adverts), Some(frame));
    }

    #[test]
    fn test_filter_rejects_other_beacons() {
        let other = BeaconFrame::new([0xEE; 16], 1, 2, -59).manufacturer_data();
        let mut adverts = HashMap::new();
        adverts.insert(APPLE_COMPANY_ID, other[2..].to_vec());
        assert_eq!(BeaconFilter::default().matches(&adverts), None);

        let mut wrong_company = HashMap::new();
        wrong_company.insert(0x0059, vec![0x02, 21]);
        assert_eq!(BeaconFilter::default().matches(&wrong_company), None);
    }

    #[test]
    fn test_sighting_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<BeaconSighting>();
    }
}
