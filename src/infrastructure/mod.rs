//! Infrastructure Layer
//!
//! Platform-facing code: the Bluetooth stack and logging setup.

pub mod bluetooth;
pub mod logging;
