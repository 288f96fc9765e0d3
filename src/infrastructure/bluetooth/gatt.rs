//! GATT Client Transport
//!
//! Cross-platform link addressed by a handle obtained from discovery. Writes
//! and notifications both go through the printer characteristic.

use crate::domain::models::TransportState;
use crate::error::{ConnectError, DisconnectError, Error, Result, WriteError};
use crate::infrastructure::bluetooth::protocol::LinkConfig;
use crate::infrastructure::bluetooth::scanner::peripheral_address;
use crate::infrastructure::bluetooth::transport::{ensure_connected, NotificationHandler, Transport};
use async_trait::async_trait;
use btleplug::api::{Central as _, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Platform operations the GATT transport needs from a discovered device.
#[async_trait]
pub trait GattDevice: Clone + Send + Sync + 'static {
    type Characteristic: Clone + Send + Sync + 'static;

    fn address(&self) -> String;

    async fn connect(&self) -> Result<(), ConnectError>;

    /// Run service discovery and return the characteristic, if present.
    async fn find_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Self::Characteristic, ConnectError>;

    async fn write(&self, characteristic: &Self::Characteristic, data: &[u8])
        -> Result<(), WriteError>;

    async fn notifications(
        &self,
        characteristic: &Self::Characteristic,
    ) -> Result<NotificationStream, WriteError>;

    async fn stop_notifications(&self, characteristic: &Self::Characteristic)
        -> Result<(), WriteError>;

    async fn disconnect(&self) -> Result<(), DisconnectError>;
}

pub struct GattTransport<D: GattDevice> {
    device: D,
    config: LinkConfig,
    state: TransportState,
    characteristic: Option<D::Characteristic>,
    notifier: Option<JoinHandle<()>>,
}

impl<D: GattDevice> GattTransport<D> {
    pub fn new(device: D, config: LinkConfig) -> Self {
        Self {
            device,
            config,
            state: TransportState::Disconnected,
            characteristic: None,
            notifier: None,
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    async fn open_link(&self) -> Result<D::Characteristic, ConnectError> {
        self.device.connect().await?;
        self.device
            .find_characteristic(self.config.service, self.config.characteristic)
            .await
    }

    fn stop_notifier(&mut self) {
        if let Some(notifier) = self.notifier.take() {
            notifier.abort();
        }
    }

    /// Drop every handle and ask the platform to close the link.
    async fn release(&mut self) {
        self.stop_notifier();
        self.characteristic = None;
        if let Err(e) = self.device.disconnect().await {
            error!("Error during GATT disconnect from {}: {}", self.device.address(), e);
        }
    }

    fn connected_characteristic(&self) -> Result<&D::Characteristic> {
        ensure_connected(self.state)?;
        self.characteristic.as_ref().ok_or(Error::NotConnected { state: self.state })
    }
}

#[async_trait]
impl<D: GattDevice> Transport for GattTransport<D> {
    fn state(&self) -> TransportState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.state == TransportState::Connected {
            debug!("Already connected to {}", self.device.address());
            return Ok(());
        }

        self.state = TransportState::Connecting;
        info!("Connecting to {}...", self.device.address());

        match self.open_link().await {
            Ok(characteristic) => {
                self.characteristic = Some(characteristic);
                self.state = TransportState::Connected;
                info!("Connected to {}", self.device.address());
                Ok(())
            }
            Err(e) => {
                warn!("Connecting to {} failed: {}", self.device.address(), e);
                self.release().await;
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
        self.release().await;
        self.state = TransportState::Disconnected;
        info!("Disconnected from {}", self.device.address());
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let characteristic = self.connected_characteristic()?;
        self.device.write(characteristic, data).await?;
        Ok(())
    }

    async fn subscribe(&mut self, mut handler: NotificationHandler) -> Result<()> {
        let characteristic = self.connected_characteristic()?.clone();
        let mut stream = self.device.notifications(&characteristic).await?;

        // A single forwarding task keeps payloads in radio order.
        self.stop_notifier();
        self.notifier = Some(tokio::spawn(async move {
            while let Some(payload) = stream.next().await {
                handler(payload.as_slice());
            }
        }));
        debug!("Subscribed to notifications on {}", self.config.characteristic);
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        let characteristic = self.connected_characteristic()?.clone();
        if self.notifier.is_some() {
            self.stop_notifier();
            self.device.stop_notifications(&characteristic).await?;
            debug!("Unsubscribed from {}", self.config.characteristic);
        }
        Ok(())
    }
}

impl<D: GattDevice> Drop for GattTransport<D> {
    fn drop(&mut self) {
        self.stop_notifier();
        // a failed connect has already released the handle
        if matches!(
            self.state,
            TransportState::Disconnected | TransportState::Failed
        ) {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let device = self.device.clone();
            runtime.spawn(async move {
                if let Err(e) = device.disconnect().await {
                    warn!("Disconnect on drop failed for {}: {}", device.address(), e);
                }
            });
        }
    }
}

/// btleplug peripheral, as handed out by the scanner's adapter.
#[derive(Clone)]
pub struct BtleplugDevice {
    peripheral: Peripheral,
}

impl BtleplugDevice {
    /// Find the peripheral discovery reported at `address`.
    pub async fn locate(central: &Adapter, address: &str) -> Result<Self, ConnectError> {
        let peripherals = central.peripherals().await.map_err(connect_error)?;
        peripherals
            .into_iter()
            .find(|p| peripheral_address(p).eq_ignore_ascii_case(address))
            .map(|peripheral| Self { peripheral })
            .ok_or_else(|| ConnectError::UnknownDevice(address.to_string()))
    }
}

#[async_trait]
impl GattDevice for BtleplugDevice {
    type Characteristic = Characteristic;

    fn address(&self) -> String {
        peripheral_address(&self.peripheral)
    }

    async fn connect(&self) -> Result<(), ConnectError> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            return Ok(());
        }
        self.peripheral.connect().await.map_err(connect_error)
    }

    async fn find_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, ConnectError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(connect_error)?;
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(ConnectError::CharacteristicNotFound(characteristic))
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<(), WriteError> {
        self.peripheral
            .write(characteristic, data, WriteType::WithoutResponse)
            .await
            .map_err(|e| WriteError::Platform(e.to_string()))
    }

    async fn notifications(
        &self,
        characteristic: &Characteristic,
    ) -> Result<NotificationStream, WriteError> {
        self.peripheral
            .subscribe(characteristic)
            .await
            .map_err(|e| WriteError::Subscribe(e.to_string()))?;
        let stream = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| WriteError::Subscribe(e.to_string()))?;

        let uuid = characteristic.uuid;
        Ok(stream
            .filter_map(move |n| futures::future::ready((n.uuid == uuid).then_some(n.value)))
            .boxed())
    }

    async fn stop_notifications(&self, characteristic: &Characteristic) -> Result<(), WriteError> {
        self.peripheral
            .unsubscribe(characteristic)
            .await
            .map_err(|e| WriteError::Subscribe(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), DisconnectError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| DisconnectError(e.to_string()))
    }
}

fn connect_error(err: btleplug::Error) -> ConnectError {
    match err {
        btleplug::Error::PermissionDenied => {
            ConnectError::PermissionDenied("bluetooth access was refused".into())
        }
        btleplug::Error::NotSupported(reason) => ConnectError::AdapterUnavailable(reason),
        btleplug::Error::InvalidBDAddr(e) => ConnectError::InvalidAddress(e.to_string()),
        // device vanished, timed out or dropped mid-handshake
        other => ConnectError::Transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::mock::MockGattDevice;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn transport(device: &MockGattDevice) -> GattTransport<MockGattDevice> {
        GattTransport::new(device.clone(), LinkConfig::default())
    }

    #[tokio::test]
    async fn test_connect_then_write() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        let mut link = transport(&device);

        link.connect().await.unwrap();
        assert_eq!(link.state(), TransportState::Connected);

        link.write(&[0x55, 0x55, 0x40]).await.unwrap();
        assert_eq!(device.writes(), vec![vec![0x55, 0x55, 0x40]]);
    }

    #[tokio::test]
    async fn test_write_before_connect_makes_no_platform_call() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        let mut link = transport(&device);

        let err = link.write(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotConnected {
                state: TransportState::Disconnected
            }
        ));
        assert_eq!(device.platform_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_connect_releases_handle() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        device.fail_next_connect(ConnectError::Transient("le-connection-abort".into()));
        let mut link = transport(&device);

        let err = link.connect().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(link.state(), TransportState::Failed);
        assert_eq!(device.disconnect_calls(), 1);

        let calls = device.platform_calls();
        assert!(matches!(
            link.write(&[1]).await,
            Err(Error::NotConnected {
                state: TransportState::Failed
            })
        ));
        assert_eq!(device.platform_calls(), calls);
    }

    #[tokio::test]
    async fn test_drop_after_failed_connect_does_not_disconnect_again() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        device.fail_next_connect(ConnectError::Transient("le-connection-abort".into()));
        let mut link = transport(&device);
        assert!(link.connect().await.is_err());
        assert_eq!(device.disconnect_calls(), 1);

        drop(link);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(device.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_drop_while_connected_disconnects() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        let mut link = transport(&device);
        link.connect().await.unwrap();

        drop(link);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(device.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_characteristic_fails_connect() {
        let device = MockGattDevice::new("11:22:33:44:55:66").without_characteristic();
        let mut link = transport(&device);

        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::CharacteristicNotFound(_)));
        assert_eq!(link.state(), TransportState::Failed);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_swallows_errors() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        let mut link = transport(&device);
        link.connect().await.unwrap();

        device.fail_disconnects();
        link.disconnect().await;
        assert_eq!(link.state(), TransportState::Disconnected);
        assert_eq!(device.disconnect_calls(), 1);

        link.disconnect().await;
        assert_eq!(device.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_notifications_arrive_in_order() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        let mut link = transport(&device);
        link.connect().await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        link.subscribe(Box::new(move |payload: &[u8]| {
            sink.lock().unwrap().push(payload.to_vec());
        }))
        .await
        .unwrap();

        for i in 0..5u8 {
            device.notify(vec![0x55, i]);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let received = received.lock().unwrap().clone();
        assert_eq!(received, (0..5u8).map(|i| vec![0x55, i]).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        let mut link = transport(&device);
        link.connect().await.unwrap();

        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        link.subscribe(Box::new(move |_: &[u8]| *sink.lock().unwrap() += 1))
            .await
            .unwrap();
        device.notify(vec![1]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        link.unsubscribe().await.unwrap();
        assert!(device.stopped_notifications());
        device.notify(vec![2]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let device = MockGattDevice::new("11:22:33:44:55:66");
        let mut link = transport(&device);

        let err = link.subscribe(Box::new(|_: &[u8]| {})).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
        let err = link.unsubscribe().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
        assert_eq!(device.platform_calls(), 0);
    }
}
