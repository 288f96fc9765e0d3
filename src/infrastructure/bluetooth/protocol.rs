//! Printer Link Constants
//!
//! Identifiers and link parameters shared by both transports. Packet framing
//! is the caller's concern; this module only knows where bytes go.

use crate::domain::settings::BleSettings;
use crate::error::{Error, Result};
use std::time::Duration;
use uuid::Uuid;

pub use crate::domain::defaults::{
    CHAR_UUID, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_PERIPHERAL_MTU, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_SCAN_TIMEOUT_MS, P15_MAC_ADDRESS, SERVICE_UUID, SETTLE_DELAY_MS,
};

/// ATT opcode + handle, subtracted from the MTU to get the usable payload
pub const ATT_HEADER_LEN: usize = 3;

/// Runtime form of the link-related settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub mtu: u16,
    pub settle_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service: Uuid::from_u128(0x0000ff00_0000_1000_8000_00805f9b34fb),
            characteristic: Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb),
            mtu: DEFAULT_PERIPHERAL_MTU,
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
        }
    }
}

impl LinkConfig {
    pub fn from_settings(settings: &BleSettings) -> Result<Self> {
        Ok(Self {
            service: parse_uuid(&settings.service_uuid)?,
            characteristic: parse_uuid(&settings.characteristic_uuid)?,
            mtu: settings.peripheral_mtu,
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
        })
    }
}

/// Parse a UUID string from settings
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim())
        .map_err(|e| Error::Config(format!("invalid UUID {:?}: {}", uuid_str, e)))
}

/// Split a payload into writes that fit in one ATT packet at `mtu`.
pub fn chunk_payload(data: &[u8], mtu: u16) -> std::slice::Chunks<'_, u8> {
    let max_payload = (mtu as usize).saturating_sub(ATT_HEADER_LEN).max(1);
    data.chunks(max_payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid() {
        let uuid = parse_uuid(CHAR_UUID).unwrap();
        assert_eq!(uuid, LinkConfig::default().characteristic);
        assert_eq!(parse_uuid(SERVICE_UUID).unwrap(), LinkConfig::default().service);
        assert!(matches!(parse_uuid("ff02"), Err(Error::Config(_))));
    }

    #[test]
    fn test_link_config_from_default_settings() {
        let config = LinkConfig::from_settings(&BleSettings::default()).unwrap();
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_chunk_payload() {
        let data = vec![0xAB; 200];
        let sizes: Vec<usize> = chunk_payload(&data, 100).map(<[u8]>::len).collect();
        assert_eq!(sizes, vec![97, 97, 6]);

        // degenerate MTU still makes progress
        assert_eq!(chunk_payload(&[1, 2], 2).count(), 2);
        assert_eq!(chunk_payload(&[], 100).count(), 0);
    }
}
