//! In-memory stand-ins for the radio, for exercising the transport
//! lifecycle without hardware. Every fake counts the platform calls it
//! receives so callers can assert that rejected operations never reached it.

use crate::domain::models::{DeviceRecord, TransportState};
use crate::error::{ConnectError, DisconnectError, Result, ScanError, WriteError};
use crate::infrastructure::bluetooth::gatt::{GattDevice, NotificationStream};
use crate::infrastructure::bluetooth::peripheral::{PeripheralConnector, PeripheralLink};
use crate::infrastructure::bluetooth::scanner::Scanner;
use crate::infrastructure::bluetooth::transport::{ensure_connected, NotificationHandler, Transport};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct MockScanner {
    devices: Vec<DeviceRecord>,
    error: Option<ScanError>,
    scans: AtomicUsize,
}

impl MockScanner {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    pub fn failing(error: ScanError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_sample_data() -> Self {
        Self::new(vec![
            DeviceRecord::new(Some("D110_ABC123"), "11:22:33:44:55:66", Some(-58)),
            DeviceRecord::new(Some("B21_XYZ"), "77:88:99:AA:BB:CC", Some(-71)),
            DeviceRecord::new(None, "03:0D:7A:D6:5E:B1", Some(-64)),
        ])
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scanner for MockScanner {
    async fn discover(&self, _timeout: Duration) -> Result<Vec<DeviceRecord>, ScanError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.devices.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct GattLog {
    connect_failures: VecDeque<ConnectError>,
    missing_characteristic: bool,
    fail_disconnects: bool,
    platform_calls: usize,
    connect_calls: usize,
    disconnect_calls: usize,
    writes: Vec<Vec<u8>>,
    notify_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    stopped_notifications: bool,
}

/// Fake GATT peripheral. Clones share state, so a test can keep one handle
/// while the transport owns another.
#[derive(Debug, Clone)]
pub struct MockGattDevice {
    address: String,
    log: Arc<Mutex<GattLog>>,
}

impl MockGattDevice {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            log: Arc::default(),
        }
    }

    pub fn without_characteristic(self) -> Self {
        lock(&self.log).missing_characteristic = true;
        self
    }

    /// Queue a failure for the next `connect` call.
    pub fn fail_next_connect(&self, error: ConnectError) {
        lock(&self.log).connect_failures.push_back(error);
    }

    pub fn fail_disconnects(&self) {
        lock(&self.log).fail_disconnects = true;
    }

    /// Deliver a notification to the current subscriber, if any.
    pub fn notify(&self, payload: Vec<u8>) {
        if let Some(tx) = &lock(&self.log).notify_tx {
            let _ = tx.unbounded_send(payload);
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.log).writes.clone()
    }

    pub fn platform_calls(&self) -> usize {
        lock(&self.log).platform_calls
    }

    pub fn connect_calls(&self) -> usize {
        lock(&self.log).connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        lock(&self.log).disconnect_calls
    }

    pub fn stopped_notifications(&self) -> bool {
        lock(&self.log).stopped_notifications
    }
}

#[async_trait]
impl GattDevice for MockGattDevice {
    type Characteristic = Uuid;

    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self) -> Result<(), ConnectError> {
        let mut log = lock(&self.log);
        log.platform_calls += 1;
        log.connect_calls += 1;
        match log.connect_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn find_characteristic(&self, _service: Uuid, characteristic: Uuid) -> Result<Uuid, ConnectError> {
        let mut log = lock(&self.log);
        log.platform_calls += 1;
        if log.missing_characteristic {
            Err(ConnectError::CharacteristicNotFound(characteristic))
        } else {
            Ok(characteristic)
        }
    }

    async fn write(&self, _characteristic: &Uuid, data: &[u8]) -> Result<(), WriteError> {
        let mut log = lock(&self.log);
        log.platform_calls += 1;
        log.writes.push(data.to_vec());
        Ok(())
    }

    async fn notifications(&self, _characteristic: &Uuid) -> Result<NotificationStream, WriteError> {
        let (tx, rx) = mpsc::unbounded();
        let mut log = lock(&self.log);
        log.platform_calls += 1;
        log.notify_tx = Some(tx);
        log.stopped_notifications = false;
        Ok(rx.boxed())
    }

    async fn stop_notifications(&self, _characteristic: &Uuid) -> Result<(), WriteError> {
        let mut log = lock(&self.log);
        log.platform_calls += 1;
        log.notify_tx = None;
        log.stopped_notifications = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DisconnectError> {
        let mut log = lock(&self.log);
        log.platform_calls += 1;
        log.disconnect_calls += 1;
        log.notify_tx = None;
        if log.fail_disconnects {
            Err(DisconnectError("org.bluez.Error.Failed".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct PeripheralLog {
    open_failures: VecDeque<ConnectError>,
    missing_characteristic: bool,
    negotiated_mtu: Option<u16>,
    resolve_delay: Duration,
    fail_closes: bool,
    platform_calls: usize,
    opened: Vec<String>,
    mtus: Vec<u16>,
    writes: Vec<Vec<u8>>,
    closes: usize,
}

/// Shared view into what a [`MockPeripheralConnector`] and its links saw.
#[derive(Debug, Clone, Default)]
pub struct PeripheralMonitor {
    log: Arc<Mutex<PeripheralLog>>,
}

impl PeripheralMonitor {
    /// Queue a failure for the next `open` call.
    pub fn fail_next_open(&self, error: ConnectError) {
        lock(&self.log).open_failures.push_back(error);
    }

    pub fn fail_closes(&self) {
        lock(&self.log).fail_closes = true;
    }

    pub fn open_attempts(&self) -> usize {
        lock(&self.log).opened.len()
    }

    pub fn opened_addresses(&self) -> Vec<String> {
        lock(&self.log).opened.clone()
    }

    pub fn requested_mtus(&self) -> Vec<u16> {
        lock(&self.log).mtus.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.log).writes.clone()
    }

    pub fn closes(&self) -> usize {
        lock(&self.log).closes
    }

    pub fn platform_calls(&self) -> usize {
        lock(&self.log).platform_calls
    }
}

#[derive(Debug, Default)]
pub struct MockPeripheralConnector {
    monitor: PeripheralMonitor,
}

impl MockPeripheralConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_characteristic(self) -> Self {
        lock(&self.monitor.log).missing_characteristic = true;
        self
    }

    /// Report `mtu` as the value the platform negotiated.
    pub fn with_negotiated_mtu(self, mtu: u16) -> Self {
        lock(&self.monitor.log).negotiated_mtu = Some(mtu);
        self
    }

    /// Make characteristic resolution take `delay`.
    pub fn with_resolve_delay(self, delay: Duration) -> Self {
        lock(&self.monitor.log).resolve_delay = delay;
        self
    }

    pub fn monitor(&self) -> PeripheralMonitor {
        self.monitor.clone()
    }
}

#[async_trait]
impl PeripheralConnector for MockPeripheralConnector {
    type Link = MockPeripheralLink;

    async fn open(&self, address: &str) -> Result<MockPeripheralLink, ConnectError> {
        let mut log = lock(&self.monitor.log);
        log.platform_calls += 1;
        log.opened.push(address.to_string());
        match log.open_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(MockPeripheralLink {
                monitor: self.monitor.clone(),
            }),
        }
    }
}

#[derive(Debug)]
pub struct MockPeripheralLink {
    monitor: PeripheralMonitor,
}

#[async_trait]
impl PeripheralLink for MockPeripheralLink {
    async fn set_mtu(&mut self, mtu: u16) -> Result<(), ConnectError> {
        let mut log = lock(&self.monitor.log);
        log.platform_calls += 1;
        log.mtus.push(mtu);
        Ok(())
    }

    async fn resolve_characteristic(&mut self, uuid: Uuid) -> Result<(), ConnectError> {
        let (missing, delay) = {
            let mut log = lock(&self.monitor.log);
            log.platform_calls += 1;
            (log.missing_characteristic, log.resolve_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if missing {
            Err(ConnectError::CharacteristicNotFound(uuid))
        } else {
            Ok(())
        }
    }

    async fn negotiated_mtu(&self) -> Result<Option<u16>, ConnectError> {
        let mut log = lock(&self.monitor.log);
        log.platform_calls += 1;
        Ok(log.negotiated_mtu)
    }

    async fn write_command(&self, data: &[u8]) -> Result<(), WriteError> {
        let mut log = lock(&self.monitor.log);
        log.platform_calls += 1;
        log.writes.push(data.to_vec());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DisconnectError> {
        let mut log = lock(&self.monitor.log);
        log.platform_calls += 1;
        log.closes += 1;
        if log.fail_closes {
            Err(DisconnectError("peripheral already gone".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct TransportLog {
    connect_results: VecDeque<Result<(), ConnectError>>,
    exhausted_result: Option<ConnectError>,
    connect_delay: Duration,
    connect_attempts: usize,
    disconnects: usize,
    writes: Vec<Vec<u8>>,
}

/// Shared view into a [`MockTransport`] after it has been handed off.
#[derive(Debug, Clone, Default)]
pub struct TransportMonitor {
    log: Arc<Mutex<TransportLog>>,
}

impl TransportMonitor {
    pub fn connect_attempts(&self) -> usize {
        lock(&self.log).connect_attempts
    }

    pub fn disconnects(&self) -> usize {
        lock(&self.log).disconnects
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.log).writes.clone()
    }
}

/// Scripted transport: each `connect` pops the next queued outcome. Once the
/// script runs out it succeeds, unless built with [`MockTransport::always_failing`].
#[derive(Debug, Default)]
pub struct MockTransport {
    state: TransportState,
    subscribed: bool,
    monitor: TransportMonitor,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_results(results: impl IntoIterator<Item = Result<(), ConnectError>>) -> Self {
        let transport = Self::default();
        lock(&transport.monitor.log).connect_results = results.into_iter().collect();
        transport
    }

    /// Fail every attempt with `error`.
    pub fn always_failing(error: ConnectError) -> Self {
        let transport = Self::default();
        lock(&transport.monitor.log).exhausted_result = Some(error);
        transport
    }

    /// Make every connect attempt take `delay` before resolving.
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        lock(&self.monitor.log).connect_delay = delay;
        self
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn monitor(&self) -> TransportMonitor {
        self.monitor.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn state(&self) -> TransportState {
        self.state
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.state = TransportState::Connecting;
        let (outcome, delay) = {
            let mut log = lock(&self.monitor.log);
            log.connect_attempts += 1;
            let outcome = match log.connect_results.pop_front() {
                Some(outcome) => outcome,
                None => match &log.exhausted_result {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                },
            };
            (outcome, log.connect_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state = match outcome {
            Ok(()) => TransportState::Connected,
            Err(_) => TransportState::Failed,
        };
        outcome
    }

    async fn disconnect(&mut self) {
        if self.state == TransportState::Disconnected {
            return;
        }
        lock(&self.monitor.log).disconnects += 1;
        self.subscribed = false;
        self.state = TransportState::Disconnected;
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        ensure_connected(self.state)?;
        lock(&self.monitor.log).writes.push(data.to_vec());
        Ok(())
    }

    async fn subscribe(&mut self, _handler: NotificationHandler) -> Result<()> {
        ensure_connected(self.state)?;
        self.subscribed = true;
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        ensure_connected(self.state)?;
        self.subscribed = false;
        Ok(())
    }
}
