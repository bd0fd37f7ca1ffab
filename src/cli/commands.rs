//! Subcommand handlers.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::args::ConfigAction;
use crate::config::{default_path as get_config_path, Config, DEFAULT_CONFIG_TOML};
use crate::control::{ControlHandle, OverlayConfig, SolidColorRenderer};
use crate::driver::{DriverRuntime, DriverSettings, RawSink};
use crate::session::{CaptureBackend, CaptureSessionManager, FfmpegBackend, SyntheticBackend};
use crate::store::KeyValueStore;

/// Heartbeats older than this mean the driver is gone or wedged.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

fn open_control(config: &Config) -> Result<ControlHandle, String> {
    let canvas = config.canvas().map_err(|e| e.to_string())?;
    ControlHandle::open(&config.shared_dir(), config.safe_area_mode(), canvas)
        .map_err(|e| e.to_string())
}

/// Run the driver process until Ctrl+C.
pub fn run_driver(config: &Config, synthetic: bool) -> Result<(), String> {
    let backend: Arc<dyn CaptureBackend> = if synthetic {
        Arc::new(SyntheticBackend::default())
    } else {
        Arc::new(FfmpegBackend)
    };
    let shared_dir = config.shared_dir();
    let kv = Arc::new(KeyValueStore::open(&shared_dir).map_err(|e| e.to_string())?);
    let session = CaptureSessionManager::new(backend, Some(kv));

    let capture = config.capture_configuration().map_err(|e| e.to_string())?;
    let settings: DriverSettings = config.driver_settings();
    let mut driver = DriverRuntime::new(
        &shared_dir,
        session,
        Box::new(RawSink::new(std::io::stdout())),
        capture,
        settings,
    )
    .map_err(|e| e.to_string())?;

    let shutdown = driver.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| format!("Failed to set Ctrl+C handler: {}", e))?;

    log::info!("driver starting (shared dir: {})", shared_dir.display());
    driver.run().map_err(|e| e.to_string())
}

/// Publish an overlay built from preset + tokens.
pub fn update_overlay(
    config: &Config,
    preset: String,
    tokens: Vec<(String, String)>,
) -> Result<(), String> {
    let control = open_control(config)?;
    let overlay = OverlayConfig {
        preset_id: preset,
        tokens: tokens.into_iter().collect::<BTreeMap<_, _>>(),
    };
    let aspect = config
        .capture_configuration()
        .map_err(|e| e.to_string())?
        .resolution
        .aspect();
    let metadata = control
        .update_overlay(&SolidColorRenderer::default(), &overlay, aspect)
        .map_err(|e| e.to_string())?;
    println!(
        "Overlay published: {}x{} ({}, safe for {})",
        metadata.width, metadata.height, metadata.preset_id, metadata.aspect_bucket
    );
    Ok(())
}

/// Remove the current overlay; the driver drops to pass-through.
pub fn clear_overlay(config: &Config) -> Result<(), String> {
    let control = open_control(config)?;
    control.clear_overlay().map_err(|e| e.to_string())?;
    println!("Overlay cleared.");
    Ok(())
}

/// Ask the driver to start or stop streaming.
pub fn request_streaming(config: &Config, start: bool) -> Result<(), String> {
    let control = open_control(config)?;
    if start {
        control.request_start().map_err(|e| e.to_string())?;
        println!("Start requested.");
    } else {
        control.request_stop().map_err(|e| e.to_string())?;
        println!("Stop requested.");
    }
    Ok(())
}

/// Ask the driver to switch capture devices.
pub fn select_device(config: &Config, id: &str) -> Result<(), String> {
    let control = open_control(config)?;
    control.select_device(id).map_err(|e| e.to_string())?;
    println!("Device change requested: {}", id);
    Ok(())
}

/// List available capture devices and print them to stdout.
pub fn list_devices() -> Result<(), String> {
    let devices = FfmpegBackend.list_devices().map_err(|e| e.to_string())?;
    if devices.is_empty() {
        println!("No capture devices found.");
        println!();
        println!("Make sure a camera is connected and permissions are granted.");
        println!("On macOS, grant access in System Settings > Privacy & Security > Camera.");
    } else {
        println!("Available capture devices:");
        for device in devices {
            println!("  {}", device);
        }
        println!();
        println!("Use 'camstage select-device <id>' to switch.");
    }
    Ok(())
}

/// Show driver status and health.
pub fn show_status(config: &Config) -> Result<(), String> {
    let control = open_control(config)?;
    // Wake the driver so a fresh record lands for the next read.
    let _ = control.announce();

    let record = control.status();
    let healthy = control.healthy(HEALTH_TIMEOUT);

    println!("Driver status: {}", record.status.label());
    if let Some(device) = &record.active_device {
        println!("Active device: {}", device);
    }
    if record.recovering {
        println!("Recovery in progress.");
    }
    if record.last_heartbeat_ms == 0 {
        println!("Health: never seen (driver not running?)");
    } else if healthy {
        println!("Health: ok");
    } else {
        println!("Health: stale heartbeat (driver gone or wedged)");
    }
    Ok(())
}

/// Handle config subcommand actions.
pub fn handle_config_action(config: &Config, action: ConfigAction) -> Result<(), String> {
    match action {
        ConfigAction::Show => {
            let capture = config.capture_configuration().map_err(|e| e.to_string())?;
            println!("Current configuration:");
            println!("  Shared dir: {}", config.shared_dir().display());
            println!("  Device: {:?}", capture.device);
            println!(
                "  Resolution: {} (fallback {})",
                capture.resolution, capture.fallback
            );
            println!("  Safe-area mode: {:?}", config.safe_area_mode());
            println!("  Heartbeat: {} ms", config.driver.heartbeat_ms);
            println!("  Stall timeout: {} ms", config.driver.stall_timeout_ms);
            println!();

            let config_path = get_config_path();
            if config_path.exists() {
                println!("Config file: {} (exists)", config_path.display());
            } else {
                println!("Config file: {} (not found)", config_path.display());
            }
            Ok(())
        }
        ConfigAction::Init => {
            let config_path = get_config_path();
            if config_path.exists() {
                return Err(format!(
                    "Config file already exists: {}\nUse 'camstage config show' to view current settings.",
                    config_path.display()
                ));
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Error creating config directory: {}", e))?;
            }
            std::fs::write(&config_path, DEFAULT_CONFIG_TOML)
                .map_err(|e| format!("Error writing config file: {}", e))?;
            println!("Created config file: {}", config_path.display());
            Ok(())
        }
    }
}
