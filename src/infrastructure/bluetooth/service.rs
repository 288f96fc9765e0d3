//! Session Service
//!
//! Runs the full flow for one printer: discovery, selection, transport
//! construction and supervised connect.

use crate::domain::models::{DeviceRecord, DeviceSelector, PrinterModel, RetryPolicy};
use crate::domain::settings::BleSettings;
use crate::error::Result;
use crate::infrastructure::bluetooth::protocol::LinkConfig;
use crate::infrastructure::bluetooth::resolver::DeviceResolver;
use crate::infrastructure::bluetooth::scanner::{BleScanner, Scanner};
use crate::infrastructure::bluetooth::supervisor::ConnectionSupervisor;
use crate::infrastructure::bluetooth::transport::{PrinterTransport, Transport, TransportKind};
use std::future::Future;
use tracing::info;

/// Resolve `selector`, build a transport for the match and connect it.
///
/// `make_transport` runs once, after a device has been found. The returned
/// supervisor is `Connected`.
pub async fn connect_device<S, T, F, Fut>(
    resolver: &DeviceResolver<S>,
    selector: &DeviceSelector,
    policy: RetryPolicy,
    make_transport: F,
) -> Result<ConnectionSupervisor<T>>
where
    S: Scanner,
    T: Transport,
    F: FnOnce(DeviceRecord) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let record = resolver.resolve(selector).await?;
    let transport = make_transport(record).await?;

    let supervisor = ConnectionSupervisor::new(transport, policy);
    supervisor.connect_with_retry().await?;
    Ok(supervisor)
}

/// Open a connected session with the first printer of `model` in range.
pub async fn open_session(
    model: PrinterModel,
    settings: &BleSettings,
) -> Result<ConnectionSupervisor<PrinterTransport>> {
    let config = LinkConfig::from_settings(settings)?;
    let selector = DeviceSelector::for_model(model, &settings.p15_address);
    let kind = TransportKind::for_model(model);
    info!("Opening {} session over {:?} link", model, kind);

    let resolver = DeviceResolver::new(BleScanner::new().await?, settings.scan_timeout());
    let scanner = resolver.scanner();
    connect_device(&resolver, &selector, settings.retry_policy(), |record| async move {
        PrinterTransport::open(kind, &record, scanner, config).await
    })
    .await
}
