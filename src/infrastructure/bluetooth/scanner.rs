//! BLE Scanner Module
//!
//! Timed discovery passes over the host adapter.

use crate::domain::models::DeviceRecord;
use crate::error::ScanError;
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A source of discovery passes.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan for `timeout` and return every distinct device seen, in order of
    /// first sighting. No devices is an empty list, not an error.
    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceRecord>, ScanError>;
}

/// Scanner backed by the first adapter btleplug reports.
pub struct BleScanner {
    central: Adapter,
}

impl BleScanner {
    pub async fn new() -> Result<Self, ScanError> {
        let manager = Manager::new().await.map_err(scan_error)?;
        let central = manager
            .adapters()
            .await
            .map_err(scan_error)?
            .into_iter()
            .next()
            .ok_or_else(|| ScanError::AdapterUnavailable("no bluetooth adapter found".into()))?;

        if let Ok(info) = central.adapter_info().await {
            info!("Using Bluetooth adapter: {}", info);
        }
        Ok(Self { central })
    }

    /// The adapter discovery handles belong to.
    pub fn central(&self) -> &Adapter {
        &self.central
    }
}

#[async_trait]
impl Scanner for BleScanner {
    async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceRecord>, ScanError> {
        info!("Starting BLE scan for {:?}", timeout);

        let mut events = self.central.events().await.map_err(scan_error)?;
        self.central
            .start_scan(ScanFilter::default())
            .await
            .map_err(scan_error)?;

        // Devices cached from an earlier pass only produce updates, so both
        // event kinds count as a sighting.
        let deadline = Instant::now() + timeout;
        let mut sighted: Vec<PeripheralId> = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(CentralEvent::DeviceDiscovered(id)))
                | Ok(Some(CentralEvent::DeviceUpdated(id))) => {
                    if !sighted.contains(&id) {
                        sighted.push(id);
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }

        if let Err(e) = self.central.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        let mut records = Vec::with_capacity(sighted.len());
        for id in sighted {
            let peripheral = match self.central.peripheral(&id).await {
                Ok(peripheral) => peripheral,
                Err(e) => {
                    debug!("Dropping sighting {:?}: {}", id, e);
                    continue;
                }
            };
            let properties = peripheral.properties().await.ok().flatten();
            records.push(DeviceRecord {
                name: properties.as_ref().and_then(|p| p.local_name.clone()),
                address: peripheral_address(&peripheral),
                rssi: properties.as_ref().and_then(|p| p.rssi),
            });
        }

        let records = distinct_by_address(records);
        info!("Scan finished, {} device(s) seen", records.len());
        Ok(records)
    }
}

/// Address string used for matching. CoreBluetooth hides MAC addresses, so
/// hosts that report an all-zero address fall back to the peripheral id.
pub(crate) fn peripheral_address(peripheral: &Peripheral) -> String {
    let address = peripheral.address();
    if address.into_inner() == [0u8; 6] {
        format!("{:?}", peripheral.id())
    } else {
        address.to_string()
    }
}

/// Keep the first record per address (case-insensitive), preserving order.
pub fn distinct_by_address(records: impl IntoIterator<Item = DeviceRecord>) -> Vec<DeviceRecord> {
    let mut distinct: Vec<DeviceRecord> = Vec::new();
    for record in records {
        if !distinct.iter().any(|seen| seen.has_address(&record.address)) {
            distinct.push(record);
        }
    }
    distinct
}

/// Records whose advertised name contains `needle`, ignoring case.
pub fn filter_by_name(records: Vec<DeviceRecord>, needle: &str) -> Vec<DeviceRecord> {
    let needle = needle.to_lowercase();
    records
        .into_iter()
        .filter(|record| {
            record
                .name
                .as_deref()
                .map(|name| name.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .collect()
}

/// One discovery pass, optionally narrowed to names containing `name_filter`.
pub async fn list_devices<S: Scanner + ?Sized>(
    scanner: &S,
    timeout: Duration,
    name_filter: Option<&str>,
) -> Result<Vec<DeviceRecord>, ScanError> {
    let devices = scanner.discover(timeout).await?;
    Ok(match name_filter {
        Some(needle) => filter_by_name(devices, needle),
        None => devices,
    })
}

pub(crate) fn scan_error(err: btleplug::Error) -> ScanError {
    match err {
        btleplug::Error::PermissionDenied => {
            ScanError::PermissionDenied("bluetooth access was refused".into())
        }
        btleplug::Error::NotSupported(reason) => ScanError::AdapterUnavailable(reason),
        other => ScanError::Failed(other.to_string()),
    }
}
