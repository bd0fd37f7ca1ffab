//! The shared overlay asset: a bitmap file plus a metadata sidecar.
//!
//! The control process is the only writer; the driver only reads. The pair
//! is replaced whole on every write (bitmap first, then metadata, each via
//! atomic rename) and a reader that catches the window where only one half
//! exists reports "no asset yet" rather than an error. Absence of an asset
//! is the normal pass-through state, not a failure.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::keyvalue::atomic_write;
use super::{now_millis, StoreError};

const BITMAP_FILE: &str = "overlay.rgba";
const METADATA_FILE: &str = "overlay.json";

/// Caller-supplied description of a bitmap being written.
#[derive(Debug, Clone)]
pub struct AssetDescriptor {
    pub width: u32,
    pub height: u32,
    pub color_space: String,
    pub preset_id: String,
    pub aspect_bucket: String,
}

/// Metadata persisted next to the bitmap. Immutable once written; a new
/// overlay replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub width: u32,
    pub height: u32,
    pub color_space: String,
    pub preset_id: String,
    pub aspect_bucket: String,
    /// Truncated hex SHA-256 of the bitmap bytes.
    pub content_hash: String,
    /// Unix-millis write time.
    pub updated_at: u64,
}

/// Deterministic content hash for bitmap bytes.
/// First 16 bytes of SHA-256 as hex (32 chars), enough to detect staleness.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// File-backed store for the current overlay bitmap + metadata pair.
pub struct AssetStore {
    dir: PathBuf,
    // Serializes writers within this process; cross-process safety comes
    // from the atomic renames, not from this lock.
    write_lock: Mutex<()>,
}

impl AssetStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// The backing directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replace the current asset with `bitmap`. Returns the metadata that
    /// was persisted (hash and timestamp filled in here).
    ///
    /// The bitmap lands before the metadata so a reader never sees metadata
    /// pointing at bytes that are not there yet. Failure leaves the previous
    /// pair intact.
    pub fn write(
        &self,
        bitmap: &[u8],
        descriptor: AssetDescriptor,
    ) -> Result<AssetMetadata, StoreError> {
        let metadata = AssetMetadata {
            width: descriptor.width,
            height: descriptor.height,
            color_space: descriptor.color_space,
            preset_id: descriptor.preset_id,
            aspect_bucket: descriptor.aspect_bucket,
            content_hash: content_hash(bitmap),
            updated_at: now_millis(),
        };
        let encoded = serde_json::to_vec(&metadata)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        atomic_write(&self.dir.join(BITMAP_FILE), bitmap)?;
        atomic_write(&self.dir.join(METADATA_FILE), &encoded)?;
        Ok(metadata)
    }

    /// Read the current metadata, or `None` if there is no complete asset.
    pub fn read_metadata(&self) -> Option<AssetMetadata> {
        // Require both halves; a lone metadata file is a write in progress.
        if !self.dir.join(BITMAP_FILE).exists() {
            return None;
        }
        let raw = std::fs::read(self.dir.join(METADATA_FILE)).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Read the current bitmap bytes, or `None` if there is no complete asset.
    pub fn read_bitmap(&self) -> Option<Vec<u8>> {
        if !self.dir.join(METADATA_FILE).exists() {
            return None;
        }
        std::fs::read(self.dir.join(BITMAP_FILE)).ok()
    }

    /// Remove the current asset. Returns whether an asset existed.
    /// Metadata goes first so readers drop to "no asset" immediately.
    pub fn clear(&self) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let had_metadata = std::fs::remove_file(self.dir.join(METADATA_FILE)).is_ok();
        let had_bitmap = std::fs::remove_file(self.dir.join(BITMAP_FILE)).is_ok();
        Ok(had_metadata || had_bitmap)
    }

    /// True if `hash` matches the currently stored asset.
    pub fn is_current(&self, hash: &str) -> bool {
        self.read_metadata()
            .map(|m| m.content_hash == hash)
            .unwrap_or(false)
    }
}
