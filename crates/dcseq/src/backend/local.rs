use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::key::merge_spellings;
use crate::{BackendKind, DEFAULT_FLOOR, Deadline, Error, Result, SequenceBackend, SequenceKey};

const B: BackendKind = BackendKind::LocalFile;

/// Default location of the local state file.
pub const DEFAULT_LOCAL_PATH: &str = "dc_sequence_state_v2.json";

/// A [`SequenceBackend`] over a flat JSON object on local disk.
///
/// Calls within one process are serialised by a mutex and each save replaces
/// the file atomically. Separate processes sharing the file can still
/// overwrite each other's increments.
#[derive(Debug)]
pub struct LocalFileStore {
    path: PathBuf,
    floor: u64,
    lock: Mutex<()>,
}

impl LocalFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            floor: DEFAULT_FLOOR,
            lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<SequenceKey, u64>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(Error::transient(
                    B,
                    format!("cannot read {}: {e}", self.path.display()),
                ));
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let raw: BTreeMap<String, u64> = serde_json::from_str(&content)
            .map_err(|e| Error::corrupt(B, format!("{} is not valid: {e}", self.path.display())))?;
        Ok(merge_spellings(raw))
    }

    /// Writes to a temporary file beside the target and renames it into
    /// place, so a crash never leaves a half-written file.
    fn save(&self, values: &BTreeMap<SequenceKey, u64>) -> Result<()> {
        let io_error = |e: std::io::Error| {
            Error::transient(B, format!("cannot write {}: {e}", self.path.display()))
        };
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let encoded = serde_json::to_string_pretty(values)
            .map_err(|e| Error::corrupt(B, format!("cannot encode counters: {e}")))?;

        let mut file = NamedTempFile::new_in(dir).map_err(io_error)?;
        file.write_all(encoded.as_bytes()).map_err(io_error)?;
        file.as_file().sync_all().map_err(io_error)?;
        file.persist(&self.path).map_err(|e| io_error(e.error))?;
        Ok(())
    }
}

impl SequenceBackend for LocalFileStore {
    fn kind(&self) -> BackendKind {
        B
    }

    fn next_value_until(&self, key: &SequenceKey, deadline: Deadline) -> Result<u64> {
        if deadline.is_expired() {
            return Err(Error::DeadlineExceeded {
                backend: B,
                attempts: 0,
            });
        }
        let _guard = self.lock.lock();
        let mut values = self.load()?;
        let next = values.get(key).copied().unwrap_or(self.floor) + 1;
        values.insert(key.clone(), next);
        self.save(&values)?;
        Ok(next)
    }

    fn current_value(&self, key: &SequenceKey) -> Result<u64> {
        let _guard = self.lock.lock();
        Ok(self.load()?.get(key).copied().unwrap_or(self.floor))
    }

    fn list_all(&self) -> Result<BTreeMap<SequenceKey, u64>> {
        let _guard = self.lock.lock();
        self.load()
    }

    fn set_value(&self, key: &SequenceKey, value: u64) -> Result<()> {
        let _guard = self.lock.lock();
        let mut values = self.load()?;
        values.insert(key.clone(), value);
        self.save(&values)
    }
}
