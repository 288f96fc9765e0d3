//! BLE transport for Niimbot-style label printers.
//!
//! Finds a printer by model, opens a link to it with bounded retries, and
//! moves opaque protocol frames in both directions. Frame encoding lives
//! above this crate.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{
    ConnectionAttempt, DeviceRecord, DeviceSelector, PrinterModel, RetryPolicy, TransportState,
};
pub use domain::settings::{BleSettings, LogSettings, Settings, SettingsService};
pub use error::{ConnectError, Error, Result, ScanError, WriteError};
pub use infrastructure::bluetooth::{
    connect_device, list_devices, open_session, BleScanner, ConnectionSupervisor, DeviceResolver,
    NotificationHandler, PrinterTransport, Scanner, Transport, TransportKind,
};
