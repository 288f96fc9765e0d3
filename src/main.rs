use anyhow::Result;
use niim_ble::infrastructure::logging;
use niim_ble::{list_devices, BleScanner, SettingsService};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get();
    let _log_guard = logging::init_logger(&settings.log_settings)?;
    info!("Settings loaded from {}", settings_service.path().display());

    let name_filter = std::env::args().nth(1);
    let scanner = BleScanner::new().await?;
    let devices = list_devices(&scanner, settings.ble.scan_timeout(), name_filter.as_deref()).await?;

    if devices.is_empty() {
        println!("No devices found");
    }
    for device in &devices {
        println!("Found device: {} at {}", device.display_name(), device.address);
    }
    Ok(())
}
