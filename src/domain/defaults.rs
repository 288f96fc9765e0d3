//! Printer identifiers and link defaults.

/// Printer service UUID
pub const SERVICE_UUID: &str = "0000ff00-0000-1000-8000-00805f9b34fb";

/// Write/notify characteristic UUID - every packet goes through this one
pub const CHAR_UUID: &str = "0000ff02-0000-1000-8000-00805f9b34fb";

/// Factory MAC address of the Marklife P15, which advertises no usable name
pub const P15_MAC_ADDRESS: &str = "03:0D:7A:D6:5E:B1";

/// MTU requested by the peripheral link before the first write
pub const DEFAULT_PERIPHERAL_MTU: u16 = 100;

pub const DEFAULT_SCAN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2_000;

/// Pause after the peripheral link comes up, before the first write
pub const SETTLE_DELAY_MS: u64 = 500;
