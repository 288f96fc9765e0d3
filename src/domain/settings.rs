use crate::domain::models::RetryPolicy;
use crate::domain::defaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "niim_ble".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Radio and link parameters. UUIDs and the P15 address are read-only
/// identifiers; they live here so a different firmware can be targeted
/// without a rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BleSettings {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: String,
    #[serde(default = "default_p15_address")]
    pub p15_address: String,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_connect_max_attempts")]
    pub connect_max_attempts: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_peripheral_mtu")]
    pub peripheral_mtu: u16,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            characteristic_uuid: default_characteristic_uuid(),
            p15_address: default_p15_address(),
            scan_timeout_ms: default_scan_timeout_ms(),
            connect_max_attempts: default_connect_max_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            peripheral_mtu: default_peripheral_mtu(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl BleSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_max_attempts,
            Duration::from_millis(self.connect_retry_delay_ms),
        )
    }
}

fn default_service_uuid() -> String {
    defaults::SERVICE_UUID.to_string()
}
fn default_characteristic_uuid() -> String {
    defaults::CHAR_UUID.to_string()
}
fn default_p15_address() -> String {
    defaults::P15_MAC_ADDRESS.to_string()
}
fn default_scan_timeout_ms() -> u64 {
    defaults::DEFAULT_SCAN_TIMEOUT_MS
}
fn default_connect_max_attempts() -> u32 {
    defaults::DEFAULT_CONNECT_ATTEMPTS
}
fn default_connect_retry_delay_ms() -> u64 {
    defaults::DEFAULT_RETRY_DELAY_MS
}
fn default_peripheral_mtu() -> u16 {
    defaults::DEFAULT_PERIPHERAL_MTU
}
fn default_settle_delay_ms() -> u64 {
    defaults::SETTLE_DELAY_MS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub ble: BleSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Loads `<config dir>/NiimBle/settings.json`, falling back to defaults
    /// when the file is missing or unreadable.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("NiimBle");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_printer_constants() {
        let ble = BleSettings::default();
        assert_eq!(ble.characteristic_uuid, "0000ff02-0000-1000-8000-00805f9b34fb");
        assert_eq!(ble.p15_address, "03:0D:7A:D6:5E:B1");
        assert_eq!(ble.peripheral_mtu, 100);
        assert_eq!(ble.retry_policy(), RetryPolicy::default());
        assert_eq!(ble.scan_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "ble": { "connect_max_attempts": 3 } }"#).unwrap();
        assert_eq!(settings.ble.connect_max_attempts, 3);
        assert_eq!(settings.ble.connect_retry_delay_ms, 2000);
        assert_eq!(settings.log_settings, LogSettings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut service = SettingsService::with_path(path.clone());
        assert_eq!(service.get(), &Settings::default());

        service.get_mut().ble.scan_timeout_ms = 8000;
        service.get_mut().log_settings.level = "debug".to_string();
        service.save().unwrap();

        let reloaded = SettingsService::with_path(path);
        assert_eq!(reloaded.get().ble.scan_timeout_ms, 8000);
        assert_eq!(reloaded.get().log_settings.level, "debug");
    }

    #[test]
    fn test_unreadable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        let service = SettingsService::with_path(path);
        assert_eq!(service.get(), &Settings::default());
    }
}
