//! Cross-process shared state: the overlay asset pair and the key-value
//! namespace both processes read and write.
//!
//! Everything here is file-backed under one group-shared directory. Writers
//! stage into temp files and `rename` into place; readers treat a missing or
//! half-present entry as "nothing there yet", never as an error. No process
//! ever blocks on the other.

mod asset;
mod keyvalue;

pub use asset::{AssetDescriptor, AssetMetadata, AssetStore, content_hash};
pub use keyvalue::{
    KeyValueStore, AUTO_START_KEY, OVERLAY_CONFIG_KEY, PREFERRED_DEVICE_KEY, RUNTIME_STATUS_KEY,
    SELECTED_DEVICE_KEY,
};

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Atomic temp-write + rename for callers outside this module (the event
/// bridge shares the store's write discipline for its counter files).
pub(crate) fn atomic_write_raw(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    keyvalue::atomic_write(path, bytes)
}

/// Errors that can occur in the shared stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O failed at '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode store value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Milliseconds since the unix epoch. Clock skew before 1970 reads as 0.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_recent() {
        // Anything after 2020-01-01 counts as a sane clock.
        assert!(now_millis() > 1_577_836_800_000);
    }
}
