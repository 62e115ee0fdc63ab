//! Last-ID Tracker
//!
//! Remembers the highest event id handed to the consumer so a reconnect (or
//! a restart, when a file is attached) resumes right after it.
//!
//! # File Format
//!
//! ```json
//! {"last_id":"1690000000000-3"}
//! ```
//!
//! Writes go to a sibling temporary file which is then renamed over the
//! target. A missing or unreadable file means "no prior state".

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::event::EventId;

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum LastIdError {
    /// Filesystem operation failed.
    #[error("last-id file {path}: {source}")]
    Io {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Record could not be serialized.
    #[error("last-id encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// On-disk record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastIdRecord {
    /// Highest observed id, `null` before the first event.
    pub last_id: Option<EventId>,
}

#[derive(Debug, Default)]
struct TrackerState {
    last_id: Option<EventId>,
    path: Option<PathBuf>,
    dirty: bool,
}

/// In-memory watermark with an optional file mirror.
#[derive(Debug, Default)]
pub struct LastIdTracker {
    state: Mutex<TrackerState>,
    /// Held for a whole flush so records reach the file in order.
    writing: Mutex<()>,
}

impl LastIdTracker {
    /// Empty tracker with no file.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest id observed so far.
    #[must_use]
    pub fn last_id(&self) -> Option<EventId> {
        self.state.lock().last_id
    }

    /// Record a dispatched event.
    ///
    /// Returns `false` if `id` is not newer than the current watermark, in
    /// which case the event has already been delivered.
    pub fn observe(&self, id: EventId) -> bool {
        let mut state = self.state.lock();
        if state.last_id.is_some_and(|current| id <= current) {
            return false;
        }
        state.last_id = Some(id);
        state.dirty = true;
        true
    }

    /// Overwrite the watermark with a caller-supplied resume point.
    pub fn set(&self, id: EventId) {
        let mut state = self.state.lock();
        state.last_id = Some(id);
        state.dirty = true;
    }

    /// Mirror the watermark to `path`.
    ///
    /// The file seeds the watermark only when nothing has been observed or
    /// set in this process.
    pub fn attach(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        let restored = load(&path);
        let mut state = self.state.lock();
        if state.last_id.is_none() {
            if let Some(id) = restored {
                tracing::info!(last_id = %id, path = %path.display(), "Restored last event id");
            }
            state.last_id = restored;
        }
        state.path = Some(path);
    }

    /// Attached file, if any.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    /// Write the watermark if it changed since the last flush.
    ///
    /// Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written; the dirty flag is kept
    /// so the next flush retries.
    pub fn flush(&self) -> Result<bool, LastIdError> {
        let _writing = self.writing.lock();
        let (path, record) = {
            let mut state = self.state.lock();
            let Some(path) = state.path.clone() else {
                return Ok(false);
            };
            if !state.dirty {
                return Ok(false);
            }
            state.dirty = false;
            (
                path,
                LastIdRecord {
                    last_id: state.last_id,
                },
            )
        };

        if let Err(e) = store(&path, &record) {
            self.state.lock().dirty = true;
            return Err(e);
        }

        tracing::debug!(path = %path.display(), last_id = ?record.last_id, "Flushed last event id");
        Ok(true)
    }

    /// Flush, logging instead of returning failures.
    pub fn flush_logged(&self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Failed to persist last event id");
        }
    }
}

/// Read a record from `path`. Missing or corrupt files yield `None`.
#[must_use]
pub fn load(path: &Path) -> Option<EventId> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read last-id file");
            return None;
        }
    };

    match serde_json::from_str::<LastIdRecord>(&text) {
        Ok(record) => record.last_id,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring corrupt last-id file");
            None
        }
    }
}

/// Atomically replace `path` with `record`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file cannot be
/// written or renamed.
pub fn store(path: &Path, record: &LastIdRecord) -> Result<(), LastIdError> {
    let io_err = |source| LastIdError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let body = serde_json::to_vec(record)?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, body).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| OsString::from("last_id"), OsString::from);
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EventId {
        s.parse().unwrap()
    }

    #[test]
    fn observe_only_moves_forward() {
        let tracker = LastIdTracker::new();
        assert!(tracker.observe(id("100-0")));
        assert!(tracker.observe(id("100-1")));
        assert!(!tracker.observe(id("100-1")));
        assert!(!tracker.observe(id("99-5")));
        assert_eq!(tracker.last_id(), Some(id("100-1")));
    }

    #[test]
    fn set_can_rewind() {
        let tracker = LastIdTracker::new();
        tracker.observe(id("200-0"));
        tracker.set(id("150-0"));
        assert_eq!(tracker.last_id(), Some(id("150-0")));
        assert!(tracker.observe(id("160-0")));
    }

    #[test]
    fn persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let tracker = LastIdTracker::new();
        tracker.attach(&path);
        tracker.observe(id("1690000000000-3"));
        assert!(tracker.flush().unwrap());
        assert!(!tracker.flush().unwrap(), "clean tracker writes nothing");

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"{"last_id":"1690000000000-3"}"#);
        assert!(!tmp_path(&path).exists());

        let restored = LastIdTracker::new();
        restored.attach(&path);
        assert_eq!(restored.last_id(), Some(id("1690000000000-3")));
    }

    #[test]
    fn file_does_not_override_in_memory_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        store(&path, &LastIdRecord { last_id: Some(id("1-0")) }).unwrap();

        let tracker = LastIdTracker::new();
        tracker.set(id("5-0"));
        tracker.attach(&path);
        assert_eq!(tracker.last_id(), Some(id("5-0")));
    }

    #[test]
    fn missing_and_corrupt_files_mean_no_state() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("absent.json")), None);

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{not json").unwrap();
        assert_eq!(load(&corrupt), None);

        let bad_id = dir.path().join("bad_id.json");
        std::fs::write(&bad_id, r#"{"last_id":"yesterday"}"#).unwrap();
        assert_eq!(load(&bad_id), None);

        let null = dir.path().join("null.json");
        std::fs::write(&null, r#"{"last_id":null}"#).unwrap();
        assert_eq!(load(&null), None);
    }

    #[test]
    fn concurrent_flushes_leave_newest_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let tracker = LastIdTracker::new();
        tracker.attach(&path);

        std::thread::scope(|s| {
            for worker in 0..4_u64 {
                let tracker = &tracker;
                s.spawn(move || {
                    for serial in 0..50 {
                        tracker.observe(EventId::new(1_000 + serial, worker));
                        tracker.flush().unwrap();
                    }
                });
            }
        });
        tracker.flush().unwrap();

        assert_eq!(load(&path), tracker.last_id());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn flush_without_file_is_noop() {
        let tracker = LastIdTracker::new();
        tracker.observe(id("1-0"));
        assert!(!tracker.flush().unwrap());
    }

    #[test]
    fn failed_flush_stays_dirty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("occupied");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("child"), "x").unwrap();

        let tracker = LastIdTracker::new();
        tracker.attach(&path);
        tracker.observe(id("1-0"));
        assert!(tracker.flush().is_err());
        assert!(tracker.state.lock().dirty);
    }
}
