//! Driver process runtime.
//!
//! Owns the capture session and the frame loop: pull a live frame, composite
//! the current overlay (pass-through when none exists), hand the result to
//! the output sink. Reacts to cross-process events by flag, never by doing
//! work on the poller thread, and runs the recovery ladder when the capture
//! side faults. The loop never crashes the process over a per-frame or
//! per-session fault.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::bridge::{EventBridge, EventName};
use crate::compositor::{composite, OverlayBitmap};
use crate::recovery::{PipelineError, RecoveryDecision, RecoveryManager, RecoveryStrategy, Watchdog};
use crate::session::{CaptureConfiguration, CaptureSessionManager, Frame, SessionState};
use crate::status::{RuntimeStatus, StatusWriter};
use crate::store::{AssetStore, KeyValueStore, StoreError, AUTO_START_KEY, SELECTED_DEVICE_KEY};

/// Where composited frames go. In production this feeds the virtual camera;
/// tests collect frames instead.
pub trait FrameSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), PipelineError>;
}

/// Sink that streams raw RGB24 to any writer (stdout in practice, for piping
/// into the virtual-camera loopback).
pub struct RawSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> RawSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> FrameSink for RawSink<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), PipelineError> {
        self.out
            .write_all(&frame.data)
            .and_then(|_| self.out.flush())
            .map_err(|e| PipelineError::BufferFailed(format!("sink write failed: {}", e)))
    }
}

/// Timing knobs for the driver loop.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// How often the heartbeat timestamp is refreshed while streaming.
    pub heartbeat_interval: Duration,
    /// Silence on the frame path longer than this counts as a stall.
    pub stall_timeout: Duration,
    /// Watchdog check cadence.
    pub watchdog_interval: Duration,
    /// Defensive overlay re-check cadence, in case an event was missed.
    pub asset_refresh_interval: Duration,
    /// Sleep between control checks while not streaming.
    pub idle_poll: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1500),
            stall_timeout: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(1),
            asset_refresh_interval: Duration::from_secs(2),
            idle_poll: Duration::from_millis(50),
        }
    }
}

/// Event flags set on the bridge poller thread and consumed by the loop.
#[derive(Default)]
struct EventFlags {
    overlay_dirty: AtomicBool,
    start_requested: AtomicBool,
    stop_requested: AtomicBool,
    device_dirty: AtomicBool,
    app_connected: AtomicBool,
}

/// The driver process: capture session + compositor + status reporting.
pub struct DriverRuntime {
    kv: Arc<KeyValueStore>,
    assets: AssetStore,
    bridge: Arc<EventBridge>,
    status: StatusWriter,
    session: CaptureSessionManager,
    recovery: RecoveryManager,
    sink: Box<dyn FrameSink>,
    config: CaptureConfiguration,
    settings: DriverSettings,
    flags: Arc<EventFlags>,
    stalled: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    overlay: Option<OverlayBitmap>,
    overlay_hash: Option<String>,
    last_refresh: Instant,
    last_heartbeat: Instant,
}

impl DriverRuntime {
    pub fn new(
        shared_dir: &Path,
        session: CaptureSessionManager,
        sink: Box<dyn FrameSink>,
        config: CaptureConfiguration,
        settings: DriverSettings,
    ) -> Result<Self, StoreError> {
        let kv = Arc::new(KeyValueStore::open(shared_dir)?);
        let bridge = Arc::new(EventBridge::open(shared_dir)?);
        let status = StatusWriter::new(Arc::clone(&kv), Arc::clone(&bridge));
        Ok(Self {
            kv,
            assets: AssetStore::open(shared_dir)?,
            bridge,
            status,
            session,
            recovery: RecoveryManager::default(),
            sink,
            config,
            settings,
            flags: Arc::new(EventFlags::default()),
            stalled: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            overlay: None,
            overlay_hash: None,
            last_refresh: Instant::now(),
            last_heartbeat: Instant::now(),
        })
    }

    /// Flag other threads (signal handlers, tests) flip to end [`run`].
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn subscribe_events(&self) {
        let pairs: [(EventName, fn(&EventFlags) -> &AtomicBool); 5] = [
            (EventName::OverlayChanged, |f| &f.overlay_dirty),
            (EventName::StartStream, |f| &f.start_requested),
            (EventName::StopStream, |f| &f.stop_requested),
            (EventName::DeviceChanged, |f| &f.device_dirty),
            (EventName::AppConnected, |f| &f.app_connected),
        ];
        for (event, flag) in pairs {
            let flags = Arc::clone(&self.flags);
            self.bridge.subscribe(event, move || {
                flag(&flags).store(true, Ordering::SeqCst);
            });
        }
    }

    /// The driver main loop. Returns when the shutdown flag is set.
    pub fn run(&mut self) -> Result<(), StoreError> {
        self.subscribe_events();
        self.status.publish(RuntimeStatus::Idle, None, false)?;
        self.reload_overlay();

        let stalled = Arc::clone(&self.stalled);
        let watchdog = Watchdog::spawn(
            self.settings.stall_timeout,
            self.settings.watchdog_interval,
            move |_| stalled.store(true, Ordering::SeqCst),
        );
        let ticker = watchdog.ticker();

        if self.kv.get_json::<bool>(AUTO_START_KEY).unwrap_or(false) {
            log::info!("auto-start requested");
            self.start_streaming();
        }

        while !self.shutdown.load(Ordering::SeqCst) {
            self.consume_flags();

            if self.session.state() != SessionState::Running {
                // Nothing is supposed to be flowing; the stall flag is noise.
                self.stalled.store(false, Ordering::SeqCst);
                thread::sleep(self.settings.idle_poll);
                continue;
            }

            if self.stalled.swap(false, Ordering::SeqCst) {
                self.handle_error(PipelineError::FrameTimeout(self.settings.stall_timeout));
                continue;
            }

            match self.pump_frame() {
                Ok(()) => {
                    ticker.touch();
                    if self.recovery.consecutive_errors() > 0 {
                        self.recovery.record_success();
                        self.publish_status(RuntimeStatus::Streaming, false);
                    }
                    if self.last_heartbeat.elapsed() >= self.settings.heartbeat_interval {
                        self.last_heartbeat = Instant::now();
                        if let Err(e) = self.status.heartbeat() {
                            log::warn!("heartbeat write failed: {}", e);
                        }
                    }
                }
                Err(e) => self.handle_error(e),
            }
        }

        drop(watchdog);
        self.session.stop();
        self.status.publish(RuntimeStatus::Stopping, None, false)?;
        self.status.publish(RuntimeStatus::Idle, None, false)
    }

    /// One frame through the pipeline: capture, composite, sink.
    fn pump_frame(&mut self) -> Result<(), PipelineError> {
        let mut frame = self.session.next_frame()?;
        if let Some(overlay) = &self.overlay {
            composite(&mut frame, overlay);
        }
        self.sink.write_frame(&frame)
    }

    /// Apply event flags. Order matters: stop beats start when both raced in.
    fn consume_flags(&mut self) {
        if self.flags.stop_requested.swap(false, Ordering::SeqCst) {
            self.flags.start_requested.store(false, Ordering::SeqCst);
            log::info!("stop requested");
            self.session.stop();
            self.publish_status(RuntimeStatus::Idle, false);
        }
        if self.flags.start_requested.swap(false, Ordering::SeqCst) {
            log::info!("start requested");
            self.start_streaming();
        }
        if self.flags.device_dirty.swap(false, Ordering::SeqCst) {
            self.apply_device_change();
        }
        if self.flags.overlay_dirty.swap(false, Ordering::SeqCst) {
            self.reload_overlay();
        } else if self.last_refresh.elapsed() >= self.settings.asset_refresh_interval {
            // Defensive re-check in case a publish was missed.
            self.last_refresh = Instant::now();
            let current = self
                .overlay_hash
                .as_deref()
                .map(|h| self.assets.is_current(h))
                .unwrap_or_else(|| self.assets.read_metadata().is_none());
            if !current {
                self.reload_overlay();
            }
        }
        if self.flags.app_connected.swap(false, Ordering::SeqCst) {
            // A control process just attached; re-announce where we stand.
            let streaming = self.session.state() == SessionState::Running;
            let status = if streaming {
                RuntimeStatus::Streaming
            } else {
                RuntimeStatus::Idle
            };
            self.publish_status(status, self.recovery.in_recovery_mode());
        }
    }

    fn start_streaming(&mut self) {
        self.publish_status(RuntimeStatus::Starting, false);
        let result = match self.session.state() {
            SessionState::Unconfigured => self
                .session
                .configure(self.config.clone())
                .and_then(|_| self.session.start()),
            _ => self.session.start(),
        };
        match result {
            Ok(()) => {
                self.recovery.record_success();
                // A slow start can outlast the stall timeout; the flag the
                // watchdog raised meanwhile predates the stream.
                self.stalled.store(false, Ordering::SeqCst);
                self.publish_status(RuntimeStatus::Streaming, false);
            }
            Err(e) => self.handle_error(e),
        }
    }

    fn apply_device_change(&mut self) {
        self.session.invalidate_devices();
        let Some(id) = self.kv.get(SELECTED_DEVICE_KEY) else {
            return;
        };
        let id = id.trim().trim_matches('"').to_string();
        log::info!("device change requested: {}", id);
        match self.session.switch_device(&id) {
            Ok(()) => {
                if self.session.state() == SessionState::Running {
                    self.publish_status(RuntimeStatus::Streaming, false);
                }
            }
            Err(e) => {
                // Unknown id: the running session is untouched, just report.
                log::warn!("device switch failed: {}", e);
                let recovering = self.recovery.in_recovery_mode();
                self.publish_status_error(&e, recovering);
            }
        }
    }

    /// Load the shared overlay pair; absence means pass-through.
    fn reload_overlay(&mut self) {
        self.last_refresh = Instant::now();
        let (metadata, bitmap) = match (self.assets.read_metadata(), self.assets.read_bitmap()) {
            (Some(m), Some(b)) => (m, b),
            _ => {
                if self.overlay.take().is_some() {
                    log::info!("overlay cleared, passing frames through");
                }
                self.overlay_hash = None;
                return;
            }
        };

        let expected =
            metadata.width as usize * metadata.height as usize * OverlayBitmap::BYTES_PER_PIXEL;
        if bitmap.len() != expected {
            log::warn!(
                "overlay bitmap is {} bytes, expected {}; keeping previous overlay",
                bitmap.len(),
                expected
            );
            return;
        }

        log::info!(
            "overlay loaded: {}x{} preset {}",
            metadata.width,
            metadata.height,
            metadata.preset_id
        );
        self.overlay_hash = Some(metadata.content_hash.clone());
        self.overlay = Some(OverlayBitmap {
            data: bitmap,
            width: metadata.width,
            height: metadata.height,
        });
    }

    /// Classify a fault, mirror it into the status record, and run the
    /// chosen recovery strategy.
    fn handle_error(&mut self, error: PipelineError) {
        log::error!("pipeline fault: {}", error);
        match self.recovery.record_error(&error) {
            RecoveryDecision::GiveUp => {
                self.publish_status_error(&error, false);
                self.session.stop();
            }
            RecoveryDecision::Suppressed => {}
            RecoveryDecision::Recover(strategy) => {
                self.publish_status_error(&error, true);
                self.recovery.begin_recovery();
                match self.execute_strategy(strategy) {
                    Ok(()) => {
                        self.recovery.record_success();
                        // A stall flagged while this recovery was in flight
                        // is obsolete; consuming it later would tear down the
                        // session we just brought back.
                        self.stalled.store(false, Ordering::SeqCst);
                        self.publish_status(RuntimeStatus::Streaming, false);
                        log::info!("recovery succeeded ({:?})", strategy);
                    }
                    Err(e) => {
                        self.recovery.end_recovery();
                        log::warn!("recovery attempt failed: {}", e);
                    }
                }
            }
        }
    }

    fn execute_strategy(&mut self, strategy: RecoveryStrategy) -> Result<(), PipelineError> {
        match strategy {
            RecoveryStrategy::Lightweight => self.session.reconnect(),
            RecoveryStrategy::Full => self.session.rebuild(),
            RecoveryStrategy::Backoff(delay) => {
                log::info!("backing off for {:?}", delay);
                self.sleep_interruptible(delay);
                if self.shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
                self.session.reconnect()
            }
        }
    }

    /// Sleep in slices so shutdown stays responsive during a long backoff.
    fn sleep_interruptible(&self, total: Duration) {
        let slice = Duration::from_millis(100);
        let deadline = Instant::now() + total;
        while Instant::now() < deadline && !self.shutdown.load(Ordering::SeqCst) {
            thread::sleep(slice.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    fn publish_status(&self, status: RuntimeStatus, recovering: bool) {
        let device = self.session.active_device().map(|d| d.name.clone());
        if let Err(e) = self.status.publish(status, device, recovering) {
            log::warn!("status publish failed: {}", e);
        }
    }

    fn publish_status_error(&self, error: &PipelineError, recovering: bool) {
        self.publish_status(RuntimeStatus::Error(error.to_string()), recovering);
    }
}
