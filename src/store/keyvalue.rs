//! Group-shared key-value namespace.
//!
//! One file per key under the shared directory. Keys carry a `.v1` version
//! suffix so a future format change can migrate by introducing `.v2` keys
//! next to the old ones. Writes go through a temp file plus atomic rename,
//! so a reader in the other process sees either the old value or the new
//! one, never a torn write.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use super::StoreError;

/// Serialized `StatusRecord` written by the driver.
pub const RUNTIME_STATUS_KEY: &str = "runtime-status.v1";
/// Device id the user selected in the control process.
pub const SELECTED_DEVICE_KEY: &str = "selected-device.v1";
/// OS-level user-preferred camera id, if any.
pub const PREFERRED_DEVICE_KEY: &str = "preferred-device.v1";
/// Whether the driver should start streaming as soon as it launches.
pub const AUTO_START_KEY: &str = "auto-start.v1";
/// Overlay configuration (preset id + token values) for the current asset.
pub const OVERLAY_CONFIG_KEY: &str = "overlay-config.v1";

/// Counter used to keep temp file names unique within a process.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// File-per-key store over a shared directory.
#[derive(Debug, Clone)]
pub struct KeyValueStore {
    dir: PathBuf,
}

impl KeyValueStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self { dir })
    }

    /// The backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read the raw string value for `key`. Absence is a normal steady state.
    pub fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.key_path(key)).ok()
    }

    /// Atomically write the raw string value for `key`.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key);
        atomic_write(&path, value.as_bytes())
    }

    /// Read and decode a JSON value for `key`.
    ///
    /// A missing key and an undecodable value both read as `None`; a value
    /// written by a newer version is indistinguishable from absence here.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        serde_json::from_str(&raw).ok()
    }

    /// Encode and atomically write a JSON value for `key`.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(value)?;
        self.set(key, &encoded)
    }

    /// Remove `key`. Returns whether a value existed.
    pub fn remove(&self, key: &str) -> bool {
        std::fs::remove_file(self.key_path(key)).is_ok()
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

/// Write `bytes` to `path` via a unique temp file and atomic rename.
///
/// The temp file lives in the same directory so the rename never crosses a
/// filesystem boundary. On any failure the temp file is removed and the
/// previous value at `path` is left intact.
pub(super) fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "value".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp-{}-{}", file_name, process::id(), seq));

    let io_err = |p: &Path, e: std::io::Error| StoreError::Io {
        path: p.to_path_buf(),
        source: e,
    };

    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let kv = KeyValueStore::open(dir.path()).unwrap();
        assert!(kv.get("runtime-status.v1").is_none());
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let kv = KeyValueStore::open(dir.path()).unwrap();
        kv.set(SELECTED_DEVICE_KEY, "cam-7").unwrap();
        assert_eq!(kv.get(SELECTED_DEVICE_KEY).as_deref(), Some("cam-7"));
    }

    #[test]
    fn test_set_overwrites_previous_value() {
        let dir = TempDir::new().unwrap();
        let kv = KeyValueStore::open(dir.path()).unwrap();
        kv.set(AUTO_START_KEY, "true").unwrap();
        kv.set(AUTO_START_KEY, "false").unwrap();
        assert_eq!(kv.get(AUTO_START_KEY).as_deref(), Some("false"));
    }

    #[test]
    fn test_json_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Pref {
            device: String,
            auto_start: bool,
        }

        let dir = TempDir::new().unwrap();
        let kv = KeyValueStore::open(dir.path()).unwrap();
        let pref = Pref {
            device: "cam-1".to_string(),
            auto_start: true,
        };
        kv.set_json("prefs.v1", &pref).unwrap();
        assert_eq!(kv.get_json::<Pref>("prefs.v1"), Some(pref));
    }

    #[test]
    fn test_get_json_undecodable_value_is_none() {
        let dir = TempDir::new().unwrap();
        let kv = KeyValueStore::open(dir.path()).unwrap();
        kv.set("prefs.v1", "not json at all").unwrap();
        assert!(kv.get_json::<Vec<u32>>("prefs.v1").is_none());
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let kv = KeyValueStore::open(dir.path()).unwrap();
        kv.set("k.v1", "v").unwrap();
        assert!(kv.remove("k.v1"));
        assert!(!kv.remove("k.v1"));
        assert!(kv.get("k.v1").is_none());
    }

    #[test]
    fn test_two_stores_share_the_same_directory() {
        // Stand-in for the two-process case: both sides open the same dir.
        let dir = TempDir::new().unwrap();
        let writer = KeyValueStore::open(dir.path()).unwrap();
        let reader = KeyValueStore::open(dir.path()).unwrap();
        writer.set(SELECTED_DEVICE_KEY, "cam-2").unwrap();
        assert_eq!(reader.get(SELECTED_DEVICE_KEY).as_deref(), Some("cam-2"));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let kv = KeyValueStore::open(dir.path()).unwrap();
        for i in 0..20 {
            kv.set("k.v1", &format!("value-{}", i)).unwrap();
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
