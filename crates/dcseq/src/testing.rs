//! In-memory stand-ins for the remote stores.

use core::time::Duration;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::{
    BackendKind, ContentStore, DEFAULT_FLOOR, Deadline, Error, Result, RpcClient, SequenceBackend,
    SequenceDocument, SequenceKey, SheetClient, Sleeper, VersionedContent,
};

/// Records requested sleeps instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleep {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleep {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().clone()
    }
}

impl Sleeper for RecordingSleep {
    fn sleep(&self, dur: Duration) {
        self.slept.lock().push(dur);
    }
}

/// A worksheet held in memory.
#[derive(Debug, Default)]
pub struct MemorySheet {
    rows: Mutex<Vec<Vec<String>>>,
}

impl MemorySheet {
    pub fn with_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().clone()
    }
}

/// Splits an A1 cell like `B12` into a 0-based column and 1-based row.
fn parse_cell(cell: &str) -> (usize, usize) {
    let split = cell.find(|c: char| c.is_ascii_digit()).unwrap_or(cell.len());
    let (letters, digits) = cell.split_at(split);
    let column = letters
        .bytes()
        .fold(0, |acc, b| acc * 26 + usize::from(b - b'A' + 1))
        - 1;
    (column, digits.parse().unwrap())
}

impl SheetClient for MemorySheet {
    fn ensure_worksheet(&self, header: &[&str]) -> Result<()> {
        let mut rows = self.rows.lock();
        if rows.is_empty() {
            rows.push(header.iter().map(|h| (*h).to_owned()).collect());
        }
        Ok(())
    }

    fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        Ok(self.rows())
    }

    fn write_range(&self, range: &str, values: Vec<Vec<Value>>) -> Result<()> {
        let start = range.split(':').next().unwrap();
        let (column, row) = parse_cell(start);
        let mut rows = self.rows.lock();
        for (offset, cells) in values.into_iter().enumerate() {
            let index = row - 1 + offset;
            if rows.len() <= index {
                rows.resize(index + 1, Vec::new());
            }
            let target = &mut rows[index];
            for (i, cell) in cells.into_iter().enumerate() {
                if target.len() <= column + i {
                    target.resize(column + i + 1, String::new());
                }
                target[column + i] = match cell {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
            }
        }
        Ok(())
    }
}

/// Emulates the stored procedures of the RPC store.
#[derive(Debug, Default)]
pub struct MemoryRpc {
    values: Mutex<BTreeMap<String, u64>>,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl MemoryRpc {
    /// The next `count` calls fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RpcClient for MemoryRpc {
    fn call(&self, procedure: &str, args: Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::transient(BackendKind::RemoteRpc, "connection reset"));
        }

        let name = args["seq_name"].as_str().map(str::to_owned);
        let mut values = self.values.lock();
        match (procedure, name) {
            ("get_next_seq", Some(name)) => {
                let next = values.get(&name).copied().unwrap_or(DEFAULT_FLOOR) + 1;
                values.insert(name, next);
                Ok(json!([next]))
            }
            ("get_current_seq", Some(name)) => {
                Ok(values.get(&name).map_or(Value::Null, |v| json!(v)))
            }
            ("set_seq", Some(name)) => {
                let value = args["seq_value"].as_u64().unwrap();
                values.insert(name, value);
                Ok(Value::Null)
            }
            ("list_seqs", _) => Ok(Value::Array(
                values
                    .iter()
                    .map(|(k, v)| json!({ "seq_name": k, "current_value": v }))
                    .collect(),
            )),
            (other, _) => Err(Error::configuration(
                BackendKind::RemoteRpc,
                format!("unknown procedure {other}"),
            )),
        }
    }
}

/// A versioned file held in memory.
///
/// [`Self::interleave_increment`] simulates another writer committing
/// between a read and the next write.
#[derive(Debug, Default)]
pub struct MemoryContent {
    state: Mutex<Option<(String, u64)>>,
    interleaved: Mutex<Vec<SequenceKey>>,
    messages: Mutex<Vec<String>>,
    rejected: AtomicU32,
}

impl MemoryContent {
    pub fn with_content(content: &str) -> Self {
        Self {
            state: Mutex::new(Some((content.to_owned(), 1))),
            ..Self::default()
        }
    }

    /// Before the next write is checked, another writer increments `key`.
    pub fn interleave_increment(&self, key: &SequenceKey) {
        self.interleaved.lock().push(key.clone());
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn rejected_writes(&self) -> u32 {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl ContentStore for MemoryContent {
    fn fetch(&self) -> Result<Option<VersionedContent>> {
        Ok(self.state.lock().as_ref().map(|(content, version)| VersionedContent {
            content: content.clone(),
            version: version.to_string(),
        }))
    }

    fn store(&self, content: &str, expected: Option<&str>, message: &str) -> Result<String> {
        let mut state = self.state.lock();

        if let Some(key) = self.interleaved.lock().pop() {
            if let Some((current, version)) = state.as_mut() {
                let mut document = SequenceDocument::parse(current)?;
                let value = document.value(&key).unwrap_or(DEFAULT_FLOOR) + 1;
                document.sequences.insert(key, value);
                *current = document.to_json()?;
                *version += 1;
            }
        }

        let current = state.as_ref().map(|(_, version)| version.to_string());
        if current.as_deref() != expected {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Conflict {
                backend: BackendKind::VersionedFile,
                key: "sequence_data.json".to_owned(),
            });
        }

        let version = state.as_ref().map_or(1, |(_, v)| v + 1);
        *state = Some((content.to_owned(), version));
        self.messages.lock().push(message.to_owned());
        Ok(version.to_string())
    }
}

/// A backend whose every call fails with the given error.
pub struct UnreachableBackend {
    kind: BackendKind,
    error: fn(BackendKind) -> Error,
}

impl UnreachableBackend {
    pub fn transient(kind: BackendKind) -> Self {
        Self {
            kind,
            error: |kind| Error::transient(kind, "connection refused"),
        }
    }

    pub fn unconfigured(kind: BackendKind) -> Self {
        Self {
            kind,
            error: |kind| Error::configuration(kind, "credentials rejected"),
        }
    }
}

impl SequenceBackend for UnreachableBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn next_value_until(&self, _key: &SequenceKey, _deadline: Deadline) -> Result<u64> {
        Err((self.error)(self.kind))
    }

    fn current_value(&self, _key: &SequenceKey) -> Result<u64> {
        Err((self.error)(self.kind))
    }

    fn list_all(&self) -> Result<BTreeMap<SequenceKey, u64>> {
        Err((self.error)(self.kind))
    }

    fn set_value(&self, _key: &SequenceKey, _value: u64) -> Result<()> {
        Err((self.error)(self.kind))
    }
}
