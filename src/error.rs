use crate::domain::models::{DeviceSelector, TransportState};
use thiserror::Error;
use uuid::Uuid;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced to the printer protocol layer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Nothing matched in a single discovery pass. The caller decides whether
    /// to rescan.
    #[error("no device matching {selector} was found")]
    DeviceNotFound { selector: DeviceSelector },

    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// An operation was sequenced outside the `Connected` state.
    #[error("link is not connected (state: {state})")]
    NotConnected { state: TransportState },

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("bluetooth permission denied: {0}")]
    PermissionDenied(String),

    #[error("scan failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    /// Radio not ready, or the link dropped during the handshake.
    #[error("link dropped while connecting: {0}")]
    Transient(String),

    #[error("bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("bluetooth permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid device address {0:?}")]
    InvalidAddress(String),

    #[error("device {0} is not known to the adapter")]
    UnknownDevice(String),

    #[error("characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    #[error("could not connect after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ConnectError>,
    },

    #[error("connect cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl ConnectError {
    /// Only transient failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Attempts consumed, for errors produced by the retry loop.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } | Self::Cancelled { attempts } => Some(*attempts),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("characteristic write failed: {0}")]
    Platform(String),

    #[error("notification subscription failed: {0}")]
    Subscribe(String),

    #[error("{0} not supported by this link")]
    Unsupported(&'static str),
}

/// Platform failure while tearing a link down. Logged, never propagated.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("disconnect failed: {0}")]
pub struct DisconnectError(pub String);
