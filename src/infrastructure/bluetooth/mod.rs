//! Bluetooth Module
//!
//! BLE transport for Niimbot-style label printers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  service::open_session                   │
//! │        (scan → resolve → build transport → connect)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌────────────┐
//! │  Scanner  │  │  Resolver  │  │ Supervisor │
//! │           │  │            │  │            │
//! │ - one     │  │ - name     │  │ - retry    │
//! │   pass    │  │   prefix   │  │ - cancel   │
//! │ - dedup   │  │ - address  │  │            │
//! └───────────┘  └────────────┘  └─────┬──────┘
//!                                      │
//!                          ┌───────────┴───────────┐
//!                          ▼                       ▼
//!                   ┌────────────┐         ┌──────────────┐
//!                   │    GATT    │         │  Peripheral  │
//!                   │ (btleplug) │         │ (BlueZ, P15) │
//!                   └────────────┘         └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, addresses, link defaults and payload chunking
//! - [`scanner`] - BLE device discovery
//! - [`resolver`] - Target selection from a discovery pass
//! - [`transport`] - The link capability and backend selection
//! - [`gatt`] - GATT client link
//! - [`peripheral`] - Write-only link addressed by MAC
//! - [`supervisor`] - Connection retry and cancellation
//! - [`service`] - Session opening
//! - [`mock`] - In-memory fakes for tests

#[cfg(target_os = "linux")]
pub mod bluez;
pub mod gatt;
pub mod mock;
pub mod peripheral;
pub mod protocol;
pub mod resolver;
pub mod scanner;
pub mod service;
pub mod supervisor;
pub mod transport;

pub use resolver::DeviceResolver;
pub use scanner::{list_devices, BleScanner, Scanner};
pub use service::{connect_device, open_session};
pub use supervisor::ConnectionSupervisor;
pub use transport::{NotificationHandler, PrinterTransport, Transport, TransportKind};
