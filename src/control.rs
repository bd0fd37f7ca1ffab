//! Control process surface.
//!
//! The control side renders the overlay, publishes it through the shared
//! asset store, and steers the driver with events. It never touches the
//! capture session directly; everything crosses the process boundary through
//! the stores and the event bridge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{EventBridge, EventName};
use crate::compositor::OverlayBitmap;
use crate::geometry::{compute_safe_area, SafeAreaMode};
use crate::status::{StatusReader, StatusRecord};
use crate::store::{
    AssetDescriptor, AssetMetadata, AssetStore, KeyValueStore, StoreError, AUTO_START_KEY,
    OVERLAY_CONFIG_KEY, SELECTED_DEVICE_KEY,
};

/// What the overlay should show: a preset plus its token values
/// (title, subtitle, accent color and so on, as the preset defines them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OverlayConfig {
    pub preset_id: String,
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

/// Renders an overlay configuration into an RGBA bitmap of the requested
/// pixel size. Implementations live above this crate (text layout, theming);
/// [`SolidColorRenderer`] is the built-in placeholder.
pub trait OverlayRenderer {
    fn render(
        &self,
        config: &OverlayConfig,
        width: u32,
        height: u32,
    ) -> Result<OverlayBitmap, ControlError>;
}

/// Placeholder renderer: a translucent solid band. Good enough to see the
/// pipeline end to end before a real renderer is plugged in.
pub struct SolidColorRenderer {
    pub rgba: [u8; 4],
}

impl Default for SolidColorRenderer {
    fn default() -> Self {
        // Dark lower-third band at ~80% opacity.
        Self {
            rgba: [20, 20, 28, 204],
        }
    }
}

impl OverlayRenderer for SolidColorRenderer {
    fn render(
        &self,
        _config: &OverlayConfig,
        width: u32,
        height: u32,
    ) -> Result<OverlayBitmap, ControlError> {
        if width == 0 || height == 0 {
            return Err(ControlError::Render("zero-sized overlay".to_string()));
        }
        Ok(OverlayBitmap::solid(width, height, self.rgba))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("overlay rendering failed: {0}")]
    Render(String),
}

/// Control-side handle over the shared directory.
pub struct ControlHandle {
    kv: Arc<KeyValueStore>,
    assets: AssetStore,
    bridge: Arc<EventBridge>,
    reader: StatusReader,
    mode: SafeAreaMode,
    /// Output canvas in pixels (the virtual camera's frame size).
    canvas: (u32, u32),
}

impl ControlHandle {
    pub fn open(
        shared_dir: &Path,
        mode: SafeAreaMode,
        canvas: (u32, u32),
    ) -> Result<Self, ControlError> {
        let kv = Arc::new(KeyValueStore::open(shared_dir)?);
        Ok(Self {
            reader: StatusReader::new(Arc::clone(&kv)),
            kv,
            assets: AssetStore::open(shared_dir)?,
            bridge: Arc::new(EventBridge::open(shared_dir)?),
            mode,
            canvas,
        })
    }

    /// Announce this control process to the driver so it re-publishes its
    /// current status.
    pub fn announce(&self) -> Result<(), ControlError> {
        self.bridge.publish(EventName::AppConnected)?;
        Ok(())
    }

    /// Render `config` into the canvas's safe area, persist the asset, and
    /// notify the driver. Returns the metadata of the published asset.
    ///
    /// `input_aspect` is the aspect ratio of the live camera feed; the safe
    /// area accounts for how consuming platforms will crop it.
    pub fn update_overlay<R: OverlayRenderer>(
        &self,
        renderer: &R,
        config: &OverlayConfig,
        input_aspect: f64,
    ) -> Result<AssetMetadata, ControlError> {
        let safe = compute_safe_area(self.mode, input_aspect, self.canvas);
        let width = (safe.width * self.canvas.0 as f64).round() as u32;
        let height = (safe.height * self.canvas.1 as f64).round() as u32;

        let bitmap = renderer.render(config, width, height)?;
        self.kv.set_json(OVERLAY_CONFIG_KEY, config)?;
        let metadata = self.assets.write(
            &bitmap.data,
            AssetDescriptor {
                width: bitmap.width,
                height: bitmap.height,
                color_space: "sRGB".to_string(),
                preset_id: config.preset_id.clone(),
                aspect_bucket: aspect_bucket(input_aspect),
            },
        )?;
        self.bridge.publish(EventName::OverlayChanged)?;
        log::info!(
            "overlay published: {}x{} ({})",
            metadata.width,
            metadata.height,
            metadata.preset_id
        );
        Ok(metadata)
    }

    /// Remove the overlay; the driver drops to pass-through.
    pub fn clear_overlay(&self) -> Result<(), ControlError> {
        self.assets.clear()?;
        self.kv.remove(OVERLAY_CONFIG_KEY);
        self.bridge.publish(EventName::OverlayChanged)?;
        Ok(())
    }

    /// Last overlay configuration published, if any.
    pub fn overlay_config(&self) -> Option<OverlayConfig> {
        self.kv.get_json(OVERLAY_CONFIG_KEY)
    }

    /// Ask the driver to start streaming.
    pub fn request_start(&self) -> Result<(), ControlError> {
        self.bridge.publish(EventName::StartStream)?;
        Ok(())
    }

    /// Ask the driver to stop streaming.
    pub fn request_stop(&self) -> Result<(), ControlError> {
        self.bridge.publish(EventName::StopStream)?;
        Ok(())
    }

    /// Ask the driver to switch capture devices. The id is authoritative
    /// state; the event is only the wake-up.
    pub fn select_device(&self, device_id: &str) -> Result<(), ControlError> {
        self.bridge.publish_with_payload(
            EventName::DeviceChanged,
            &self.kv,
            SELECTED_DEVICE_KEY,
            &device_id,
        )?;
        Ok(())
    }

    /// Whether the driver should start streaming as soon as it launches.
    pub fn set_auto_start(&self, enabled: bool) -> Result<(), ControlError> {
        self.kv.set_json(AUTO_START_KEY, &enabled)?;
        Ok(())
    }

    /// Driver status as last persisted.
    pub fn status(&self) -> StatusRecord {
        self.reader.read_status()
    }

    /// Driver liveness from heartbeat recency.
    pub fn healthy(&self, timeout: Duration) -> bool {
        self.reader.is_healthy(timeout)
    }
}

/// Human-readable bucket for an aspect ratio, stored with the asset so a
/// consumer can tell which crop family the overlay was sized for.
pub fn aspect_bucket(aspect: f64) -> String {
    const BUCKETS: [(f64, &str); 5] = [
        (16.0 / 9.0, "16x9"),
        (4.0 / 3.0, "4x3"),
        (3.0 / 2.0, "3x2"),
        (1.0, "1x1"),
        (9.0 / 16.0, "9x16"),
    ];
    if !aspect.is_finite() || aspect <= 0.0 {
        return "16x9".to_string();
    }
    let mut best = BUCKETS[0];
    for candidate in BUCKETS {
        if (candidate.0 - aspect).abs() < (best.0 - aspect).abs() {
            best = candidate;
        }
    }
    best.1.to_string()
}
