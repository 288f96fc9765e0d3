//! Device Resolver Module
//!
//! Picks the target printer out of a single discovery pass.

use crate::domain::models::{DeviceRecord, DeviceSelector};
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::scanner::Scanner;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DeviceResolver<S> {
    scanner: S,
    timeout: Duration,
}

impl<S: Scanner> DeviceResolver<S> {
    pub fn new(scanner: S, timeout: Duration) -> Self {
        Self { scanner, timeout }
    }

    /// Run one discovery pass and return the first record matching
    /// `selector`. Never rescans; retry policy belongs to the caller.
    pub async fn resolve(&self, selector: &DeviceSelector) -> Result<DeviceRecord> {
        info!("Looking for printer by {}", selector);
        let devices = self.scanner.discover(self.timeout).await?;
        debug!("Discovery returned {} device(s)", devices.len());

        match select(&devices, selector) {
            Some(record) => {
                info!(
                    "Found printer {} at {}",
                    record.display_name(),
                    record.address
                );
                Ok(record.clone())
            }
            None => {
                warn!("No device matching {} in this pass", selector);
                Err(Error::DeviceNotFound {
                    selector: selector.clone(),
                })
            }
        }
    }

    pub fn scanner(&self) -> &S {
        &self.scanner
    }

    pub fn into_scanner(self) -> S {
        self.scanner
    }
}

/// First record matching `selector`, in discovery order.
pub fn select<'a>(devices: &'a [DeviceRecord], selector: &DeviceSelector) -> Option<&'a DeviceRecord> {
    devices.iter().find(|record| selector.matches(record))
}
