//! Fault classification, recovery-strategy selection and the stall watchdog.
//!
//! Every capture-side fault maps to a default strategy: a lightweight
//! reconnect, a full session rebuild, or a capped exponential backoff for
//! conditions that tend to resolve themselves. A consecutive-error counter
//! escalates to a full rebuild at the ceiling, and a single success wipes
//! the slate. Recovery is non-reentrant: faults observed while a recovery
//! is in flight are logged and suppressed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::store::now_millis;

/// Capture pipeline fault taxonomy. Per-frame and per-session faults are
/// handled locally in the driver loop and never crash the process.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("capture device not found: {0}")]
    DeviceNotFound(String),

    #[error("capture device busy: {0}")]
    DeviceBusy(String),

    #[error("session configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("buffer/sample creation failed: {0}")]
    BufferFailed(String),

    #[error("no frame produced within {0:?}")]
    FrameTimeout(Duration),

    #[error("capture session interrupted: {0}")]
    SessionInterrupted(String),
}

/// How the driver should try to get frames flowing again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryStrategy {
    /// Reconnect the output / reset buffers without tearing the session down.
    Lightweight,
    /// Rebuild the capture session from scratch.
    Full,
    /// Wait out a self-resolving condition, then retry lightweight.
    Backoff(Duration),
}

/// Outcome of classifying a fault.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryDecision {
    /// Run the given strategy.
    Recover(RecoveryStrategy),
    /// Terminal: needs user action (permission, missing device). No retry.
    GiveUp,
    /// A recovery is already in flight; the fault was logged and dropped.
    Suppressed,
}

/// Maximum consecutive errors before every strategy escalates to full.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Cap on the exponential backoff delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Exponential backoff delay: `min(2^attempt, cap)` seconds.
pub fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let secs = 2u64.saturating_pow(attempt.min(32));
    Duration::from_secs(secs).min(cap)
}

/// Tracks consecutive faults and picks strategies. Lives only inside the
/// driver process; nothing here is persisted.
pub struct RecoveryManager {
    consecutive_errors: u32,
    in_recovery: bool,
    last_strategy: Option<RecoveryStrategy>,
    max_consecutive_errors: u32,
    backoff_cap: Duration,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_BACKOFF_CAP)
    }
}

impl RecoveryManager {
    pub fn new(max_consecutive_errors: u32, backoff_cap: Duration) -> Self {
        Self {
            consecutive_errors: 0,
            in_recovery: false,
            last_strategy: None,
            max_consecutive_errors: max_consecutive_errors.max(1),
            backoff_cap,
        }
    }

    /// Classify a fault and pick a strategy.
    ///
    /// Terminal faults (permission denied, device not found after the
    /// fallback policy already ran) return [`RecoveryDecision::GiveUp`]
    /// regardless of the counter. At the escalation ceiling every
    /// recoverable fault forces a full rebuild.
    pub fn record_error(&mut self, error: &PipelineError) -> RecoveryDecision {
        if self.in_recovery {
            log::warn!("fault during in-flight recovery, suppressed: {}", error);
            return RecoveryDecision::Suppressed;
        }

        self.consecutive_errors += 1;

        if matches!(
            error,
            PipelineError::PermissionDenied | PipelineError::DeviceNotFound(_)
        ) {
            log::error!("terminal fault, user action required: {}", error);
            return RecoveryDecision::GiveUp;
        }

        let strategy = if self.consecutive_errors >= self.max_consecutive_errors {
            log::warn!(
                "{} consecutive errors, escalating to full rebuild ({})",
                self.consecutive_errors,
                error
            );
            RecoveryStrategy::Full
        } else {
            self.default_strategy(error)
        };

        self.last_strategy = Some(strategy);
        RecoveryDecision::Recover(strategy)
    }

    fn default_strategy(&self, error: &PipelineError) -> RecoveryStrategy {
        match error {
            PipelineError::DeviceBusy(_) => {
                // attempt is zero-based over the current error streak
                RecoveryStrategy::Backoff(backoff_delay(
                    self.consecutive_errors.saturating_sub(1),
                    self.backoff_cap,
                ))
            }
            PipelineError::SessionInterrupted(_) => RecoveryStrategy::Full,
            PipelineError::ConfigurationFailed(_) | PipelineError::FrameTimeout(_) => {
                // Lightweight first, full once a lightweight attempt has
                // already been burned on the current streak.
                if self.last_strategy == Some(RecoveryStrategy::Lightweight) {
                    RecoveryStrategy::Full
                } else {
                    RecoveryStrategy::Lightweight
                }
            }
            PipelineError::BufferFailed(_) => RecoveryStrategy::Lightweight,
            PipelineError::PermissionDenied | PipelineError::DeviceNotFound(_) => {
                // Unreachable; terminal faults never reach strategy selection.
                RecoveryStrategy::Full
            }
        }
    }

    /// Mark a recovery as started; faults are suppressed until it ends.
    pub fn begin_recovery(&mut self) {
        self.in_recovery = true;
    }

    /// A recovery attempt ended without success. The streak stands.
    pub fn end_recovery(&mut self) {
        self.in_recovery = false;
    }

    /// Any successful frame resets the streak and clears recovery mode.
    pub fn record_success(&mut self) {
        self.consecutive_errors = 0;
        self.in_recovery = false;
        self.last_strategy = None;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn in_recovery_mode(&self) -> bool {
        self.in_recovery
    }

    pub fn last_strategy(&self) -> Option<RecoveryStrategy> {
        self.last_strategy
    }
}

/// Cloneable handle the frame loop uses to report progress to the watchdog.
#[derive(Clone)]
pub struct FrameTicker {
    last_frame_ms: Arc<AtomicU64>,
}

impl FrameTicker {
    /// Record that a frame was just produced.
    pub fn touch(&self) {
        self.last_frame_ms.store(now_millis(), Ordering::SeqCst);
    }
}

/// Watches "time since last frame" on a fixed interval and synthesizes a
/// [`PipelineError::FrameTimeout`] on stall, catching silent hangs that
/// never raise an explicit error. Fires once per stall; a fresh frame
/// re-arms it.
pub struct Watchdog {
    last_frame_ms: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn spawn<F>(stall_timeout: Duration, check_interval: Duration, on_stall: F) -> Self
    where
        F: Fn(PipelineError) + Send + 'static,
    {
        let last_frame_ms = Arc::new(AtomicU64::new(now_millis()));
        let stop = Arc::new(AtomicBool::new(false));

        let last_clone = Arc::clone(&last_frame_ms);
        let stop_clone = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut fired_for: u64 = 0;
            while !stop_clone.load(Ordering::SeqCst) {
                thread::sleep(check_interval);
                let last = last_clone.load(Ordering::SeqCst);
                let age = now_millis().saturating_sub(last);
                if age > stall_timeout.as_millis() as u64 && fired_for != last {
                    fired_for = last;
                    on_stall(PipelineError::FrameTimeout(stall_timeout));
                }
            }
        });

        Self {
            last_frame_ms,
            stop,
            handle: Some(handle),
        }
    }

    /// Handle for the frame loop to report progress.
    pub fn ticker(&self) -> FrameTicker {
        FrameTicker {
            last_frame_ms: Arc::clone(&self.last_frame_ms),
        }
    }

    /// Stop the watchdog thread and wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
