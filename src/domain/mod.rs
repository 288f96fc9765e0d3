//! Domain Module
//!
//! Plain values shared by every layer: discovered devices, selectors,
//! link states, retry policy and persisted settings.

pub mod defaults;
pub mod models;
pub mod settings;
