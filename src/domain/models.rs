use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A device seen during one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
}

impl DeviceRecord {
    pub fn new(name: Option<&str>, address: impl Into<String>, rssi: Option<i16>) -> Self {
        Self {
            name: name.map(str::to_string),
            address: address.into(),
            rssi,
        }
    }

    /// Advertised name, or "Unknown" for devices that never sent one.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }

    /// Case-insensitive prefix match. Unnamed devices never match.
    pub fn name_starts_with(&self, prefix: &str) -> bool {
        self.name
            .as_deref()
            .map(|name| name.to_lowercase().starts_with(&prefix.to_lowercase()))
            .unwrap_or(false)
    }
}

/// How a printer is picked out of a discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    NamePrefix(String),
    /// Fixed factory address, for models that do not advertise a usable name.
    Address(String),
}

impl DeviceSelector {
    pub fn for_model(model: PrinterModel, fixed_address: &str) -> Self {
        if model.uses_fixed_address() {
            Self::Address(fixed_address.to_string())
        } else {
            Self::NamePrefix(model.name().to_string())
        }
    }

    pub fn matches(&self, record: &DeviceRecord) -> bool {
        match self {
            Self::NamePrefix(prefix) => record.name_starts_with(prefix),
            Self::Address(address) => record.has_address(address),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamePrefix(prefix) => write!(f, "name prefix {:?}", prefix),
            Self::Address(address) => write!(f, "address {}", address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One step of the connect retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAttempt {
    /// 1-based
    pub attempt_number: u32,
    pub max_attempts: u32,
    /// Wait applied after this attempt if it fails transiently.
    pub delay: Duration,
}

impl ConnectionAttempt {
    pub fn is_last(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }
}

/// Constant-delay retry bound for connection establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> impl Iterator<Item = ConnectionAttempt> {
        let max_attempts = self.max_attempts.max(1);
        let delay = self.delay;
        (1..=max_attempts).map(move |attempt_number| ConnectionAttempt {
            attempt_number,
            max_attempts,
            delay,
        })
    }
}

/// Supported Niimbot / Marklife printer models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterModel {
    B1,
    B18,
    B21,
    D11,
    D110,
    /// Marklife P15, identified only by its factory MAC address.
    P15,
}

impl PrinterModel {
    pub const ALL: [PrinterModel; 6] = [
        Self::B1,
        Self::B18,
        Self::B21,
        Self::D11,
        Self::D110,
        Self::P15,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::B1 => "b1",
            Self::B18 => "b18",
            Self::B21 => "b21",
            Self::D11 => "d11",
            Self::D110 => "d110",
            Self::P15 => "p15",
        }
    }

    pub fn uses_fixed_address(&self) -> bool {
        matches!(self, Self::P15)
    }
}

impl fmt::Display for PrinterModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_uppercase())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown printer model {0:?}")]
pub struct UnknownModelError(pub String);

impl FromStr for PrinterModel {
    type Err = UnknownModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|model| model.name() == wanted)
            .ok_or_else(|| UnknownModelError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_match_ignores_case() {
        let record = DeviceRecord::new(Some("D110_ABC123"), "11:22:33:44:55:66", Some(-60));
        assert!(record.name_starts_with("d110"));
        assert!(record.name_starts_with("D11"));
        assert!(!record.name_starts_with("b21"));
    }

    #[test]
    fn test_unnamed_record_never_matches_prefix() {
        let record = DeviceRecord::new(None, "03:0D:7A:D6:5E:B1", None);
        assert!(!record.name_starts_with(""));
        assert!(!DeviceSelector::NamePrefix("p15".into()).matches(&record));
        assert_eq!(record.display_name(), "Unknown");
    }

    #[test]
    fn test_address_selector_ignores_case() {
        let record = DeviceRecord::new(None, "aa:bb:cc:dd:ee:ff", None);
        let selector = DeviceSelector::Address("AA:BB:CC:DD:EE:FF".into());
        assert!(selector.matches(&record));
    }

    #[test]
    fn test_selector_for_model() {
        assert_eq!(
            DeviceSelector::for_model(PrinterModel::P15, "03:0D:7A:D6:5E:B1"),
            DeviceSelector::Address("03:0D:7A:D6:5E:B1".into())
        );
        assert_eq!(
            DeviceSelector::for_model(PrinterModel::D110, "03:0D:7A:D6:5E:B1"),
            DeviceSelector::NamePrefix("d110".into())
        );
    }

    #[test]
    fn test_model_from_str() {
        assert_eq!("D110".parse::<PrinterModel>(), Ok(PrinterModel::D110));
        assert_eq!(" p15 ".parse::<PrinterModel>(), Ok(PrinterModel::P15));
        assert_eq!(
            "m2".parse::<PrinterModel>(),
            Err(UnknownModelError("m2".to_string()))
        );
    }

    #[test]
    fn test_retry_policy_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let attempts: Vec<_> = policy.attempts().collect();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0].attempt_number, 1);
        assert!(!attempts[1].is_last());
        assert!(attempts[2].is_last());

        // zero is clamped to a single attempt
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts().count(), 1);
    }
}
