//! Health/status protocol between the driver and the control process.
//!
//! The driver is the only writer: it persists a status record and bumps a
//! heartbeat timestamp every second or two while streaming. The control
//! process only reads. There is no call path between the two, so liveness
//! is always inferred from heartbeat recency: a record claiming
//! `streaming` with a stale heartbeat is unhealthy, never last-known-good.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::{EventBridge, EventName};
use crate::store::{now_millis, KeyValueStore, StoreError, RUNTIME_STATUS_KEY};

/// Driver lifecycle state as the driver reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum RuntimeStatus {
    #[default]
    Idle,
    Starting,
    Streaming,
    Stopping,
    Error(String),
}

impl RuntimeStatus {
    /// Short label for status lines.
    pub fn label(&self) -> &str {
        match self {
            RuntimeStatus::Idle => "idle",
            RuntimeStatus::Starting => "starting",
            RuntimeStatus::Streaming => "streaming",
            RuntimeStatus::Stopping => "stopping",
            RuntimeStatus::Error(_) => "error",
        }
    }
}

/// The record the driver persists under `runtime-status.v1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusRecord {
    pub status: RuntimeStatus,
    /// Unix-millis of the last heartbeat (or status write).
    pub last_heartbeat_ms: u64,
    /// Name of the device currently feeding the stream, if any.
    pub active_device: Option<String>,
    /// True while an automatic recovery is in flight. Lets the control UI
    /// show "retrying" instead of "gave up, needs user action".
    pub recovering: bool,
}

/// Driver-side writer. Cloneable; the driver's frame loop calls
/// [`StatusWriter::heartbeat`] inline so heartbeat recency tracks the loop.
#[derive(Clone)]
pub struct StatusWriter {
    kv: Arc<KeyValueStore>,
    bridge: Arc<EventBridge>,
}

impl StatusWriter {
    pub fn new(kv: Arc<KeyValueStore>, bridge: Arc<EventBridge>) -> Self {
        Self { kv, bridge }
    }

    /// Persist a new status (with a fresh heartbeat) and broadcast
    /// `status-changed.v1`.
    ///
    /// An error status must not be followed by `Streaming` until a recovery
    /// actually succeeded; the driver loop owns that transition.
    pub fn publish(
        &self,
        status: RuntimeStatus,
        active_device: Option<String>,
        recovering: bool,
    ) -> Result<(), StoreError> {
        let record = StatusRecord {
            status,
            last_heartbeat_ms: now_millis(),
            active_device,
            recovering,
        };
        log::debug!("status -> {} (recovering: {})", record.status.label(), recovering);
        self.bridge.publish_with_payload(
            EventName::StatusChanged,
            &self.kv,
            RUNTIME_STATUS_KEY,
            &record,
        )
    }

    /// Timestamp-only update. Keeps the current status and device, fires no
    /// event; called every 1-2 s while streaming.
    pub fn heartbeat(&self) -> Result<(), StoreError> {
        let mut record: StatusRecord = self
            .kv
            .get_json(RUNTIME_STATUS_KEY)
            .unwrap_or_default();
        record.last_heartbeat_ms = now_millis();
        self.kv.set_json(RUNTIME_STATUS_KEY, &record)
    }
}

/// Control-side reader.
#[derive(Clone)]
pub struct StatusReader {
    kv: Arc<KeyValueStore>,
}

impl StatusReader {
    pub fn new(kv: Arc<KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Current record; idle with no heartbeat if the driver never wrote.
    pub fn read_status(&self) -> StatusRecord {
        self.kv.get_json(RUNTIME_STATUS_KEY).unwrap_or_default()
    }

    /// Liveness from heartbeat recency alone. The status value never makes
    /// a stale driver look healthy.
    pub fn is_healthy(&self, timeout: Duration) -> bool {
        let record = self.read_status();
        if record.last_heartbeat_ms == 0 {
            return false;
        }
        let age_ms = now_millis().saturating_sub(record.last_heartbeat_ms);
        age_ms <= timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixtures(dir: &TempDir) -> (StatusWriter, StatusReader, Arc<KeyValueStore>) {
        let kv = Arc::new(KeyValueStore::open(dir.path()).unwrap());
        let bridge = Arc::new(EventBridge::open(dir.path()).unwrap());
        (
            StatusWriter::new(Arc::clone(&kv), bridge),
            StatusReader::new(Arc::clone(&kv)),
            kv,
        )
    }

    #[test]
    fn test_default_status_is_idle() {
        let dir = TempDir::new().unwrap();
        let (_, reader, _) = fixtures(&dir);
        let record = reader.read_status();
        assert_eq!(record.status, RuntimeStatus::Idle);
        assert_eq!(record.last_heartbeat_ms, 0);
        assert!(record.active_device.is_none());
    }

    #[test]
    fn test_never_written_is_unhealthy() {
        let dir = TempDir::new().unwrap();
        let (_, reader, _) = fixtures(&dir);
        assert!(!reader.is_healthy(Duration::from_secs(10)));
    }

    #[test]
    fn test_publish_then_read() {
        let dir = TempDir::new().unwrap();
        let (writer, reader, _) = fixtures(&dir);

        writer
            .publish(
                RuntimeStatus::Streaming,
                Some("FaceTime HD Camera".to_string()),
                false,
            )
            .unwrap();

        let record = reader.read_status();
        assert_eq!(record.status, RuntimeStatus::Streaming);
        assert_eq!(record.active_device.as_deref(), Some("FaceTime HD Camera"));
        assert!(record.last_heartbeat_ms > 0);
        assert!(reader.is_healthy(Duration::from_secs(10)));
    }

    #[test]
    fn test_heartbeat_refreshes_timestamp_only() {
        let dir = TempDir::new().unwrap();
        let (writer, reader, _) = fixtures(&dir);

        writer
            .publish(RuntimeStatus::Streaming, Some("cam".to_string()), false)
            .unwrap();
        let before = reader.read_status();

        std::thread::sleep(Duration::from_millis(5));
        writer.heartbeat().unwrap();
        let after = reader.read_status();

        assert_eq!(after.status, before.status);
        assert_eq!(after.active_device, before.active_device);
        assert!(after.last_heartbeat_ms >= before.last_heartbeat_ms);
    }

    #[test]
    fn test_stale_heartbeat_is_unhealthy_despite_streaming_status() {
        // status=streaming, heartbeat 15 s stale, timeout 10 s -> unhealthy.
        let dir = TempDir::new().unwrap();
        let (_, reader, kv) = fixtures(&dir);

        let record = StatusRecord {
            status: RuntimeStatus::Streaming,
            last_heartbeat_ms: now_millis() - 15_000,
            active_device: Some("cam".to_string()),
            recovering: false,
        };
        kv.set_json(RUNTIME_STATUS_KEY, &record).unwrap();

        assert!(!reader.is_healthy(Duration::from_secs(10)));
        // The stale status value itself is still readable; only liveness
        // is affected.
        assert_eq!(reader.read_status().status, RuntimeStatus::Streaming);
    }

    #[test]
    fn test_fresh_heartbeat_is_healthy_regardless_of_error_status() {
        let dir = TempDir::new().unwrap();
        let (writer, reader, _) = fixtures(&dir);

        writer
            .publish(RuntimeStatus::Error("device busy".to_string()), None, true)
            .unwrap();

        assert!(reader.is_healthy(Duration::from_secs(10)));
        let record = reader.read_status();
        assert_eq!(
            record.status,
            RuntimeStatus::Error("device busy".to_string())
        );
        assert!(record.recovering);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(RuntimeStatus::Idle.label(), "idle");
        assert_eq!(RuntimeStatus::Error("x".to_string()).label(), "error");
    }
}
