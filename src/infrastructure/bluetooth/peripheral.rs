//! Peripheral Link Transport
//!
//! Write-only link addressed directly by MAC string. The MTU is fixed before
//! the first write and payloads are split to fit it.

use crate::domain::models::TransportState;
use crate::error::{ConnectError, DisconnectError, Error, Result, WriteError};
use crate::infrastructure::bluetooth::protocol::{chunk_payload, LinkConfig};
use crate::infrastructure::bluetooth::transport::{ensure_connected, NotificationHandler, Transport};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Opens links by MAC address, without a prior discovery handle.
#[async_trait]
pub trait PeripheralConnector: Send + Sync {
    type Link: PeripheralLink + 'static;

    async fn open(&self, address: &str) -> Result<Self::Link, ConnectError>;
}

#[async_trait]
pub trait PeripheralLink: Send + Sync {
    /// Ask for `mtu` before any other traffic on the link.
    async fn set_mtu(&mut self, mtu: u16) -> Result<(), ConnectError>;

    /// Resolve a characteristic handle that accepts write-without-response.
    async fn resolve_characteristic(&mut self, uuid: Uuid) -> Result<(), ConnectError>;

    /// ATT MTU the platform settled on, if it reports one.
    async fn negotiated_mtu(&self) -> Result<Option<u16>, ConnectError>;

    /// Write without response. `data` always fits in one packet.
    async fn write_command(&self, data: &[u8]) -> Result<(), WriteError>;

    async fn close(&mut self) -> Result<(), DisconnectError>;
}

pub struct PeripheralTransport<C: PeripheralConnector> {
    connector: C,
    address: String,
    config: LinkConfig,
    state: TransportState,
    link: Option<C::Link>,
    mtu: u16,
}

impl<C: PeripheralConnector> PeripheralTransport<C> {
    pub fn new(connector: C, address: String, config: LinkConfig) -> Self {
        Self {
            connector,
            address,
            mtu: config.mtu,
            config,
            state: TransportState::Disconnected,
            link: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// MTU in effect for the current link.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Open the link and size writes for it. The link is held on `self` as
    /// soon as it exists, so an attempt dropped halfway is still released by
    /// `disconnect` or drop.
    async fn open_link(&mut self) -> Result<u16, ConnectError> {
        let link = self.connector.open(&self.address).await?;
        let link = self.link.insert(link);

        link.set_mtu(self.config.mtu).await?;
        link.resolve_characteristic(self.config.characteristic).await?;
        let negotiated = link.negotiated_mtu().await?;
        Ok(effective_mtu(self.config.mtu, negotiated))
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.close().await {
                warn!("Closing link to {} failed: {}", self.address, e);
            }
        }
    }
}

/// Writes are sized for the smaller of what was asked for and what the
/// platform reports.
pub fn effective_mtu(requested: u16, negotiated: Option<u16>) -> u16 {
    negotiated.map_or(requested, |mtu| mtu.min(requested))
}

#[async_trait]
impl<C: PeripheralConnector> Transport for PeripheralTransport<C> {
    fn state(&self) -> TransportState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.state == TransportState::Connected {
            debug!("Already connected to {}", self.address);
            return Ok(());
        }
        self.close_link().await;

        self.state = TransportState::Connecting;
        info!("Connecting to {}...", self.address);

        match self.open_link().await {
            Ok(mtu) => {
                self.mtu = mtu;
                // the printer drops writes that arrive right after the handshake
                tokio::time::sleep(self.config.settle_delay).await;
                self.state = TransportState::Connected;
                info!("Connected to {} (mtu {})", self.address, mtu);
                Ok(())
            }
            Err(e) => {
                warn!("Connecting to {} failed: {}", self.address, e);
                self.close_link().await;
                self.state = TransportState::Failed;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.state == TransportState::Disconnected {
            debug!("Disconnect requested while already disconnected");
            return;
        }
        if let Some(mut link) = self.link.take() {
            match link.close().await {
                Ok(()) => info!("Disconnected from {}", self.address),
                Err(e) => error!("Error during peripheral disconnect from {}: {}", self.address, e),
            }
        }
        self.state = TransportState::Disconnected;
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        ensure_connected(self.state)?;
        let Some(link) = self.link.as_ref() else {
            return Err(Error::NotConnected { state: self.state });
        };
        for chunk in chunk_payload(data, self.mtu) {
            link.write_command(chunk).await?;
        }
        Ok(())
    }

    async fn subscribe(&mut self, _handler: NotificationHandler) -> Result<()> {
        ensure_connected(self.state)?;
        Err(WriteError::Unsupported("notifications").into())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        ensure_connected(self.state)?;
        Err(WriteError::Unsupported("notifications").into())
    }
}

impl<C: PeripheralConnector> Drop for PeripheralTransport<C> {
    fn drop(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let address = self.address.clone();
            runtime.spawn(async move {
                if let Err(e) = link.close().await {
                    warn!("Disconnect on drop failed for {}: {}", address, e);
                }
            });
        }
    }
}
