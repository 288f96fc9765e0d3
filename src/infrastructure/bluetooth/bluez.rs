//! BlueZ Peripheral Link
//!
//! Talks to the BlueZ daemon over D-Bus through `bluer`. Devices are
//! addressed by MAC directly; no discovery pass is needed beforehand.

use crate::error::{ConnectError, DisconnectError, WriteError};
use crate::infrastructure::bluetooth::peripheral::{PeripheralConnector, PeripheralLink};
use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::gatt::{CharacteristicFlags, WriteOp};
use bluer::{Adapter, Address, Device, ErrorKind, Session};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SERVICES_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct BluezConnector {
    _session: Session,
    adapter: Adapter,
}

impl BluezConnector {
    pub async fn new() -> Result<Self, ConnectError> {
        let session = Session::new()
            .await
            .map_err(|e| ConnectError::AdapterUnavailable(e.to_string()))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| ConnectError::AdapterUnavailable(e.to_string()))?;
        adapter.set_powered(true).await.map_err(connect_error)?;

        info!("Using Bluetooth adapter: {}", adapter.name());
        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

#[async_trait]
impl PeripheralConnector for BluezConnector {
    type Link = BluezLink;

    async fn open(&self, address: &str) -> Result<BluezLink, ConnectError> {
        let addr: Address = address
            .parse()
            .map_err(|_| ConnectError::InvalidAddress(address.to_string()))?;
        let device = self.adapter.device(addr).map_err(connect_error)?;

        if !device.is_connected().await.map_err(connect_error)? {
            debug!("Opening BlueZ link to {}", addr);
            device.connect().await.map_err(connect_error)?;
        }

        Ok(BluezLink {
            device,
            characteristic: None,
            requested_mtu: None,
        })
    }
}

pub struct BluezLink {
    device: Device,
    characteristic: Option<Characteristic>,
    requested_mtu: Option<u16>,
}

impl BluezLink {
    async fn wait_services_resolved(&self) -> Result<(), ConnectError> {
        let deadline = tokio::time::Instant::now() + SERVICES_RESOLVE_TIMEOUT;
        while !self.device.is_services_resolved().await.map_err(connect_error)? {
            if tokio::time::Instant::now() >= deadline {
                return Err(ConnectError::Transient(
                    "timed out waiting for service resolution".into(),
                ));
            }
            tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
        }
        Ok(())
    }
}

#[async_trait]
impl PeripheralLink for BluezLink {
    // BlueZ runs the ATT MTU exchange itself; the request only caps what
    // writes are sized for.
    async fn set_mtu(&mut self, mtu: u16) -> Result<(), ConnectError> {
        debug!("Requesting mtu {} for {}", mtu, self.device.address());
        self.requested_mtu = Some(mtu);
        Ok(())
    }

    async fn resolve_characteristic(&mut self, uuid: Uuid) -> Result<(), ConnectError> {
        self.wait_services_resolved().await?;

        let mut read_only_match = false;
        for service in self.device.services().await.map_err(connect_error)? {
            for characteristic in service.characteristics().await.map_err(connect_error)? {
                if characteristic.uuid().await.map_err(connect_error)? != uuid {
                    continue;
                }
                let flags = characteristic.flags().await.map_err(connect_error)?;
                if accepts_commands(&flags) {
                    self.characteristic = Some(characteristic);
                    return Ok(());
                }
                read_only_match = true;
            }
        }
        if read_only_match {
            warn!("Characteristic {} found but does not accept write commands", uuid);
        }
        Err(ConnectError::CharacteristicNotFound(uuid))
    }

    async fn negotiated_mtu(&self) -> Result<Option<u16>, ConnectError> {
        let Some(characteristic) = self.characteristic.as_ref() else {
            return Ok(None);
        };
        // older BlueZ releases do not expose the MTU property
        match characteristic.mtu().await {
            Ok(mtu) => {
                debug!(
                    "{} negotiated mtu {} (requested {:?})",
                    self.device.address(),
                    mtu,
                    self.requested_mtu
                );
                Ok(Some(u16::try_from(mtu).unwrap_or(u16::MAX)))
            }
            Err(e) => {
                debug!("MTU not reported for {}: {}", self.device.address(), e);
                Ok(None)
            }
        }
    }

    async fn write_command(&self, data: &[u8]) -> Result<(), WriteError> {
        let Some(characteristic) = self.characteristic.as_ref() else {
            return Err(WriteError::Platform("characteristic not resolved".into()));
        };
        let request = CharacteristicWriteRequest {
            op_type: WriteOp::Command,
            ..Default::default()
        };
        characteristic
            .write_ext(data, &request)
            .await
            .map_err(|e| WriteError::Platform(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), DisconnectError> {
        self.characteristic = None;
        self.device
            .disconnect()
            .await
            .map_err(|e| DisconnectError(e.to_string()))
    }
}

fn accepts_commands(flags: &CharacteristicFlags) -> bool {
    flags.write_without_response
}

fn connect_error(err: bluer::Error) -> ConnectError {
    match &err.kind {
        ErrorKind::NotAuthorized | ErrorKind::NotPermitted => {
            ConnectError::PermissionDenied(err.message.clone())
        }
        ErrorKind::NotAvailable | ErrorKind::NotSupported => {
            ConnectError::AdapterUnavailable(err.message.clone())
        }
        ErrorKind::InvalidAddress(address) => ConnectError::InvalidAddress(address.clone()),
        // NotReady, InProgress, ConnectionAttemptFailed and the rest are
        // worth another attempt
        _ => ConnectError::Transient(err.to_string()),
    }
}
