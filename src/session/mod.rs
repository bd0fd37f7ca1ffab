//! Capture session management: device discovery, permission negotiation,
//! session configuration with resolution fallback, and device switching.
//!
//! The manager walks a small state machine:
//!
//! ```text
//! unconfigured -> configuring -> configured -> running <-> stopped
//! ```
//!
//! `switch_device` re-enters `configuring`. Discovery is built lazily once
//! and reused; a `device-changed` event invalidates the cache. All device
//! matching is by stable identifier.

mod device;
mod permissions;
mod synthetic;

pub use device::{
    CaptureBackend, DeviceInfo, FfmpegBackend, Frame, FrameSource, Resolution, VIRTUAL_DEVICE_ID,
};
pub use permissions::PermissionGate;
pub use synthetic::SyntheticBackend;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::recovery::PipelineError;
use crate::store::{KeyValueStore, PREFERRED_DEVICE_KEY};

/// Which device a configuration asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    /// Any suitable camera (first non-self discovered device).
    #[default]
    Any,
    /// A specific device by stable id.
    Id(String),
}

/// A capture session request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfiguration {
    #[serde(default)]
    pub device: DeviceSelection,
    /// Primary resolution preset.
    #[serde(default)]
    pub resolution: Resolution,
    /// Tried when the primary preset is unsupported. Negotiation never
    /// degrades past this to some arbitrary preset.
    #[serde(default = "fallback_default")]
    pub fallback: Resolution,
}

fn fallback_default() -> Resolution {
    Resolution::LOW
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            device: DeviceSelection::Any,
            resolution: Resolution::MEDIUM,
            fallback: Resolution::LOW,
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    Configuring,
    Configured,
    Running,
    Stopped,
}

/// Owns the capture session for one process.
pub struct CaptureSessionManager {
    backend: Arc<dyn CaptureBackend>,
    kv: Option<Arc<KeyValueStore>>,
    gate: PermissionGate,
    state: SessionState,
    devices: Option<Vec<DeviceInfo>>,
    config: Option<CaptureConfiguration>,
    active: Option<(DeviceInfo, Resolution)>,
    source: Option<Box<dyn FrameSource>>,
}

impl CaptureSessionManager {
    /// `kv` (when present) supplies the OS-level user-preferred camera id.
    pub fn new(backend: Arc<dyn CaptureBackend>, kv: Option<Arc<KeyValueStore>>) -> Self {
        Self {
            backend,
            kv,
            gate: PermissionGate::new(),
            state: SessionState::Unconfigured,
            devices: None,
            config: None,
            active: None,
            source: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn active_device(&self) -> Option<&DeviceInfo> {
        self.active.as_ref().map(|(d, _)| d)
    }

    pub fn active_resolution(&self) -> Option<Resolution> {
        self.active.as_ref().map(|(_, r)| *r)
    }

    /// Discovered devices, built once and reused.
    pub fn devices(&mut self) -> Result<&[DeviceInfo], PipelineError> {
        if self.devices.is_none() {
            let found = self.backend.list_devices()?;
            log::info!("discovered {} capture device(s)", found.len());
            self.devices = Some(found);
        }
        Ok(self.devices.as_deref().unwrap_or(&[]))
    }

    /// Drop the discovery cache (the shared `device-changed` event calls this).
    pub fn invalidate_devices(&mut self) {
        self.devices = None;
    }

    /// Forget a denied permission attempt; only a user action should do this.
    pub fn reset_permission(&self) {
        self.gate.reset();
    }

    /// Negotiate permission, device and resolution for `config`.
    pub fn configure(&mut self, config: CaptureConfiguration) -> Result<(), PipelineError> {
        let previous = self.state;
        self.state = SessionState::Configuring;

        let result = self.try_configure(&config);
        match result {
            Ok(active) => {
                log::info!(
                    "configured session: {} at {}",
                    active.0.name,
                    active.1
                );
                // Reconfiguring tears down any open source.
                self.source = None;
                self.active = Some(active);
                self.config = Some(config);
                self.state = SessionState::Configured;
                Ok(())
            }
            Err(e) => {
                self.state = if self.active.is_some() {
                    previous
                } else {
                    SessionState::Unconfigured
                };
                Err(e)
            }
        }
    }

    fn try_configure(
        &mut self,
        config: &CaptureConfiguration,
    ) -> Result<(DeviceInfo, Resolution), PipelineError> {
        let backend = Arc::clone(&self.backend);
        self.gate.request(|| backend.request_permission())?;

        let device = self.select_device(&config.device)?;
        let resolution = self.negotiate_resolution(&device, config)?;
        Ok((device, resolution))
    }

    /// Device selection policy, in order: requested id if discovered, the
    /// user-preferred id from the shared store, first non-self device, typed
    /// failure. The virtual camera itself is never selectable.
    ///
    /// The preference is deliberately checked before the first-non-self
    /// fallback: the other way around it could never match once any camera
    /// is plugged in.
    fn select_device(&mut self, selection: &DeviceSelection) -> Result<DeviceInfo, PipelineError> {
        let preferred = self
            .kv
            .as_ref()
            .and_then(|kv| kv.get(PREFERRED_DEVICE_KEY))
            .map(|s| s.trim().to_string());
        let devices = self.devices()?;

        if let DeviceSelection::Id(id) = selection {
            if let Some(device) = devices.iter().find(|d| d.id == *id && !d.is_self()) {
                return Ok(device.clone());
            }
            log::warn!("requested device '{}' not discovered, applying fallback policy", id);
        }

        if let Some(pref) = preferred {
            if let Some(device) = devices.iter().find(|d| d.id == pref && !d.is_self()) {
                return Ok(device.clone());
            }
        }

        if let Some(device) = devices.iter().find(|d| !d.is_self()) {
            return Ok(device.clone());
        }

        let wanted = match selection {
            DeviceSelection::Any => "any".to_string(),
            DeviceSelection::Id(id) => id.clone(),
        };
        Err(PipelineError::DeviceNotFound(wanted))
    }

    /// Primary preset, else fallback preset, else a typed failure. Never an
    /// arbitrary preset.
    fn negotiate_resolution(
        &self,
        device: &DeviceInfo,
        config: &CaptureConfiguration,
    ) -> Result<Resolution, PipelineError> {
        if self.backend.supports(device, config.resolution) {
            return Ok(config.resolution);
        }
        if self.backend.supports(device, config.fallback) {
            log::warn!(
                "{} unsupported on {}, falling back to {}",
                config.resolution,
                device.name,
                config.fallback
            );
            return Ok(config.fallback);
        }
        Err(PipelineError::ConfigurationFailed(format!(
            "neither {} nor {} supported on {}",
            config.resolution, config.fallback, device.name
        )))
    }

    /// Open the stream for the configured device.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        match self.state {
            SessionState::Configured | SessionState::Stopped => {}
            SessionState::Running => return Ok(()),
            _ => {
                return Err(PipelineError::ConfigurationFailed(
                    "session not configured".to_string(),
                ))
            }
        }
        let (device, resolution) = self
            .active
            .clone()
            .ok_or_else(|| PipelineError::ConfigurationFailed("no active device".to_string()))?;
        self.source = Some(self.backend.open(&device, resolution)?);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Tear down the stream. In-flight frame reads are invalidated with it.
    pub fn stop(&mut self) {
        self.source = None;
        if self.state == SessionState::Running {
            self.state = SessionState::Stopped;
        }
    }

    /// Switch to `id`. An unknown id fails synchronously and leaves the
    /// current session untouched.
    pub fn switch_device(&mut self, id: &str) -> Result<(), PipelineError> {
        let config = self.config.clone().unwrap_or_default();

        let device = self
            .devices()?
            .iter()
            .find(|d| d.id == id && !d.is_self())
            .cloned()
            .ok_or_else(|| PipelineError::DeviceNotFound(id.to_string()))?;
        let resolution = self.negotiate_resolution(&device, &config)?;

        let was_running = self.state == SessionState::Running;
        self.state = SessionState::Configuring;
        self.source = None;
        self.active = Some((device, resolution));
        self.config = Some(CaptureConfiguration {
            device: DeviceSelection::Id(id.to_string()),
            ..config
        });
        self.state = SessionState::Configured;

        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Pull the next frame while running.
    pub fn next_frame(&mut self) -> Result<Frame, PipelineError> {
        match self.source.as_mut() {
            Some(source) if self.state == SessionState::Running => source.next_frame(),
            _ => Err(PipelineError::SessionInterrupted(
                "session not running".to_string(),
            )),
        }
    }

    /// Lightweight recovery: reopen the stream without a full teardown.
    pub fn reconnect(&mut self) -> Result<(), PipelineError> {
        let (device, resolution) = self
            .active
            .clone()
            .ok_or_else(|| PipelineError::ConfigurationFailed("no active device".to_string()))?;
        self.source = Some(self.backend.open(&device, resolution)?);
        self.state = SessionState::Running;
        Ok(())
    }

    /// Full recovery: rebuild the session from fresh discovery.
    pub fn rebuild(&mut self) -> Result<(), PipelineError> {
        let config = self.config.clone().unwrap_or_default();
        self.stop();
        self.invalidate_devices();
        self.configure(config)?;
        self.start()
    }
}
