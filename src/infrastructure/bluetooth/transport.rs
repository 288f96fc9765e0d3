//! Transport Module
//!
//! The capability every printer link offers, and the sum type that picks a
//! backend once at construction.

use crate::domain::models::{DeviceRecord, PrinterModel, TransportState};
use crate::error::{ConnectError, Error, Result};
use crate::infrastructure::bluetooth::gatt::{BtleplugDevice, GattTransport};
use crate::infrastructure::bluetooth::protocol::LinkConfig;
use crate::infrastructure::bluetooth::scanner::BleScanner;
use async_trait::async_trait;

#[cfg(target_os = "linux")]
use crate::infrastructure::bluetooth::bluez::BluezConnector;
#[cfg(target_os = "linux")]
use crate::infrastructure::bluetooth::peripheral::PeripheralTransport;

/// Called once per notification payload, in arrival order.
pub type NotificationHandler = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Session I/O with one printer.
///
/// `write`, `subscribe` and `unsubscribe` are only valid while `Connected`;
/// in any other state they fail with [`Error::NotConnected`] without touching
/// the radio. Writes are not pipelined: await each one before the next.
#[async_trait]
pub trait Transport: Send {
    fn state(&self) -> TransportState;

    /// One connection attempt. Leaves the link `Connected`, or `Failed` with
    /// the radio handle released.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Idempotent. Releases the handle even if the platform call fails;
    /// errors are logged, never returned.
    async fn disconnect(&mut self);

    async fn write(&mut self, data: &[u8]) -> Result<()>;

    async fn subscribe(&mut self, handler: NotificationHandler) -> Result<()>;

    async fn unsubscribe(&mut self) -> Result<()>;
}

pub(crate) fn ensure_connected(state: TransportState) -> Result<()> {
    match state {
        TransportState::Connected => Ok(()),
        state => Err(Error::NotConnected { state }),
    }
}

/// Which backend a printer session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// GATT client over btleplug. Default for every model and host.
    Gatt,
    /// BlueZ link addressed by MAC. Linux only, P15 only.
    Peripheral,
}

impl TransportKind {
    pub fn for_model(model: PrinterModel) -> Self {
        if cfg!(target_os = "linux") && model.uses_fixed_address() {
            Self::Peripheral
        } else {
            Self::Gatt
        }
    }
}

/// A printer link with its backend chosen at construction.
pub enum PrinterTransport {
    Gatt(GattTransport<BtleplugDevice>),
    #[cfg(target_os = "linux")]
    Peripheral(PeripheralTransport<BluezConnector>),
}

impl PrinterTransport {
    /// Build the transport for `record`. GATT links look the device up in the
    /// scanner's adapter; peripheral links only need the address.
    pub async fn open(
        kind: TransportKind,
        record: &DeviceRecord,
        scanner: &BleScanner,
        config: LinkConfig,
    ) -> Result<Self> {
        match kind {
            TransportKind::Gatt => {
                let device = BtleplugDevice::locate(scanner.central(), &record.address).await?;
                Ok(Self::Gatt(GattTransport::new(device, config)))
            }
            #[cfg(target_os = "linux")]
            TransportKind::Peripheral => {
                let connector = BluezConnector::new().await?;
                Ok(Self::Peripheral(PeripheralTransport::new(
                    connector,
                    record.address.clone(),
                    config,
                )))
            }
            #[cfg(not(target_os = "linux"))]
            TransportKind::Peripheral => Err(ConnectError::AdapterUnavailable(
                "the peripheral link is only available on Linux".into(),
            )
            .into()),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Gatt(_) => TransportKind::Gatt,
            #[cfg(target_os = "linux")]
            Self::Peripheral(_) => TransportKind::Peripheral,
        }
    }
}

#[async_trait]
impl Transport for PrinterTransport {
    fn state(&self) -> TransportState {
        match self {
            Self::Gatt(link) => link.state(),
            #[cfg(target_os = "linux")]
            Self::Peripheral(link) => link.state(),
        }
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        match self {
            Self::Gatt(link) => link.connect().await,
            #[cfg(target_os = "linux")]
            Self::Peripheral(link) => link.connect().await,
        }
    }

    async fn disconnect(&mut self) {
        match self {
            Self::Gatt(link) => link.disconnect().await,
            #[cfg(target_os = "linux")]
            Self::Peripheral(link) => link.disconnect().await,
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Gatt(link) => link.write(data).await,
            #[cfg(target_os = "linux")]
            Self::Peripheral(link) => link.write(data).await,
        }
    }

    async fn subscribe(&mut self, handler: NotificationHandler) -> Result<()> {
        match self {
            Self::Gatt(link) => link.subscribe(handler).await,
            #[cfg(target_os = "linux")]
            Self::Peripheral(link) => link.subscribe(handler).await,
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        match self {
            Self::Gatt(link) => link.unsubscribe().await,
            #[cfg(target_os = "linux")]
            Self::Peripheral(link) => link.unsubscribe().await,
        }
    }
}
