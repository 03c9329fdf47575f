use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::merge_spellings;
use crate::{
    BackendKind, DEFAULT_FLOOR, Deadline, Error, HistoryEntry, Result, RetryPolicy,
    SequenceBackend, SequenceKey, SequenceRecord, Sleeper, ThreadSleep,
};

const B: BackendKind = BackendKind::VersionedFile;

/// Value of the `version` field in newly written documents.
pub const DOCUMENT_FORMAT_VERSION: &str = "1.0";

/// Appended to a key to name its history field.
pub const HISTORY_SUFFIX: &str = "_history";

/// Stored file contents together with the version token they were read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedContent {
    pub content: String,
    pub version: String,
}

/// A single file in a store with compare-and-swap writes.
pub trait ContentStore: Send + Sync {
    /// The current contents, or `None` when the file does not exist.
    fn fetch(&self) -> Result<Option<VersionedContent>>;

    /// Writes `content` if the file is still at `expected` (`None`: must not
    /// exist yet) and returns the new version token. A stale `expected`
    /// yields [`Error::Conflict`].
    fn store(&self, content: &str, expected: Option<&str>, message: &str) -> Result<String>;
}

impl<C> ContentStore for Arc<C>
where
    C: ContentStore + ?Sized,
{
    fn fetch(&self) -> Result<Option<VersionedContent>> {
        (**self).fetch()
    }

    fn store(&self, content: &str, expected: Option<&str>, message: &str) -> Result<String> {
        (**self).store(content, expected, message)
    }
}

/// The JSON document holding every counter.
///
/// ```json
/// {
///   "sequences": { "akdcah_seq": 305 },
///   "last_updated": "2024-05-01T10:00:00+00:00",
///   "version": "1.0",
///   "akdcah_seq_history": [{ "value": 305, "timestamp": "..." }]
/// }
/// ```
///
/// Unrecognised top-level fields are carried through rewrites unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceDocument {
    #[serde(default, deserialize_with = "sequences_by_key")]
    pub sequences: BTreeMap<SequenceKey, u64>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default = "default_format_version")]
    pub version: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn sequences_by_key<'de, D>(
    deserializer: D,
) -> core::result::Result<BTreeMap<SequenceKey, u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    BTreeMap::<String, u64>::deserialize(deserializer).map(merge_spellings)
}

fn default_format_version() -> String {
    DOCUMENT_FORMAT_VERSION.to_owned()
}

impl SequenceDocument {
    /// A fresh document with every seed key at `floor`.
    pub fn seeded<'a>(
        seeds: impl IntoIterator<Item = &'a SequenceKey>,
        floor: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sequences: seeds.into_iter().map(|k| (k.clone(), floor)).collect(),
            last_updated: Some(now.to_rfc3339()),
            version: default_format_version(),
            extra: BTreeMap::new(),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::corrupt(B, format!("sequence document is not valid: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::corrupt(B, format!("cannot encode sequence document: {e}")))
    }

    pub fn value(&self, key: &SequenceKey) -> Option<u64> {
        self.sequences.get(key).copied()
    }

    /// The stored record for `key`, or a fresh one at `floor`.
    pub fn record(&self, key: &SequenceKey, floor: u64) -> Result<SequenceRecord> {
        let Some(value) = self.value(key) else {
            return Ok(SequenceRecord::new(key.clone(), floor));
        };
        let history = match self.extra.get(&history_field(key)) {
            None | Some(Value::Null) => Vec::new(),
            Some(raw) => Vec::<HistoryEntry>::deserialize(raw)
                .map_err(|e| Error::corrupt(B, format!("history of `{key}` is not valid: {e}")))?,
        };
        Ok(SequenceRecord::from_parts(key.clone(), value, None, history))
    }

    /// Writes `record` back, replacing the key's value and history.
    pub fn apply(&mut self, record: SequenceRecord, now: DateTime<Utc>) -> Result<()> {
        let key = record.key().clone();
        self.sequences.insert(key.clone(), record.value());
        self.last_updated = Some(now.to_rfc3339());
        let history = record.into_history();
        if !history.is_empty() {
            let encoded = serde_json::to_value(history)
                .map_err(|e| Error::corrupt(B, format!("cannot encode history: {e}")))?;
            self.extra.insert(history_field(&key), encoded);
        }
        Ok(())
    }
}

fn history_field(key: &SequenceKey) -> String {
    format!("{key}{HISTORY_SUFFIX}")
}

/// One counter a merge moved forward.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MergedValue {
    pub key: SequenceKey,
    pub previous: Option<u64>,
    pub value: u64,
}

/// A [`SequenceBackend`] over one JSON file with optimistic concurrency.
///
/// Every write names the version it was computed from. When another writer
/// got there first the store rejects the write and the whole
/// read-modify-write is repeated against the fresh contents.
pub struct VersionedFileStore<C> {
    client: C,
    floor: u64,
    seeds: Vec<SequenceKey>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<C> VersionedFileStore<C>
where
    C: ContentStore,
{
    pub fn new(client: C) -> Self {
        Self {
            client,
            floor: DEFAULT_FLOOR,
            seeds: Vec::new(),
            policy: RetryPolicy::versioned(),
            sleeper: Arc::new(ThreadSleep),
        }
    }

    #[must_use]
    pub fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
        self
    }

    /// Keys created at the floor when the file is first written.
    #[must_use]
    pub fn with_seeds(mut self, seeds: impl IntoIterator<Item = SequenceKey>) -> Self {
        self.seeds = seeds.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Creates the file with the seed keys if it does not exist. Returns
    /// whether this call created it.
    pub fn initialize(&self) -> Result<bool> {
        if self.client.fetch()?.is_some() {
            return Ok(false);
        }
        let document = SequenceDocument::seeded(&self.seeds, self.floor, Utc::now());
        match self
            .client
            .store(&document.to_json()?, None, "Initialize DC sequence file")
        {
            Ok(_) => {
                #[cfg(feature = "tracing")]
                tracing::info!(seeds = self.seeds.len(), "initialized sequence file");
                Ok(true)
            }
            // Someone else created it in the meantime.
            Err(Error::Conflict { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn load(&self) -> Result<(SequenceDocument, Option<String>)> {
        match self.client.fetch()? {
            Some(stored) => Ok((SequenceDocument::parse(&stored.content)?, Some(stored.version))),
            None => Ok((
                SequenceDocument::seeded(&self.seeds, self.floor, Utc::now()),
                None,
            )),
        }
    }

    /// Repeats load-modify-store until the store accepts the write.
    /// `modify` returns `None` when there is nothing to write.
    fn update<T, F>(&self, operation: &str, deadline: Deadline, mut modify: F) -> Result<T>
    where
        F: FnMut(&mut SequenceDocument) -> Result<(T, Option<String>)>,
    {
        self.policy
            .run_with(&*self.sleeper, B, operation, deadline, |_attempt| {
                let (mut document, version) = self.load()?;
                let (result, message) = modify(&mut document)?;
                if let Some(message) = message {
                    self.client
                        .store(&document.to_json()?, version.as_deref(), &message)?;
                }
                Ok(result)
            })
    }

    /// Raises stored counters to the given values. Counters already at or
    /// above their given value are left alone, as are keys that only exist
    /// in the store. Nothing is written when nothing changes.
    pub fn merge_max(&self, values: &BTreeMap<SequenceKey, u64>) -> Result<Vec<MergedValue>> {
        self.update("merge", Deadline::never(), |document| {
            let changed: Vec<_> = values
                .iter()
                .filter_map(|(key, &value)| {
                    let previous = document.value(key);
                    previous
                        .is_none_or(|p| p < value)
                        .then(|| MergedValue {
                            key: key.clone(),
                            previous,
                            value,
                        })
                })
                .collect();
            if changed.is_empty() {
                return Ok((changed, None));
            }

            let now = Utc::now();
            for change in &changed {
                let mut record = document.record(&change.key, self.floor)?;
                record.set(change.value, now);
                document.apply(record, now)?;
            }
            let summary = changed
                .iter()
                .map(|c| format!("{}:{}", c.key, c.value))
                .collect::<Vec<_>>()
                .join(", ");
            Ok((changed, Some(format!("Auto-sync: Update DC sequences [{summary}]"))))
        })
    }
}

impl<C> SequenceBackend for VersionedFileStore<C>
where
    C: ContentStore,
{
    fn kind(&self) -> BackendKind {
        B
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(%key)))]
    fn next_value_until(&self, key: &SequenceKey, deadline: Deadline) -> Result<u64> {
        self.update("next_value", deadline, |document| {
            let mut record = document.record(key, self.floor)?;
            let previous = record.value();
            let next = record.advance(Utc::now());
            document.apply(record, Utc::now())?;
            Ok((next, Some(format!("Increment {key}: {previous} -> {next}"))))
        })
    }

    fn current_value(&self, key: &SequenceKey) -> Result<u64> {
        let (document, _) = self.load()?;
        Ok(document.value(key).unwrap_or(self.floor))
    }

    fn list_all(&self) -> Result<BTreeMap<SequenceKey, u64>> {
        Ok(self.load()?.0.sequences)
    }

    fn set_value(&self, key: &SequenceKey, value: u64) -> Result<()> {
        self.update("set_value", Deadline::never(), |document| {
            let mut record = document.record(key, self.floor)?;
            let now = Utc::now();
            record.set(value, now);
            document.apply(record, now)?;
            Ok(((), Some(format!("Set {key} = {value} (manual update)"))))
        })
    }
}
