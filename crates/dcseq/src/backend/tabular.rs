use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::{
    BackendKind, DEFAULT_FLOOR, Deadline, Error, Result, RetryPolicy, SequenceBackend, SequenceKey,
    Sleeper, ThreadSleep,
};

/// Column headers of the sequences worksheet.
pub const TABULAR_HEADER: [&str; 4] = [
    "Sequence Name",
    "Current Value",
    "Last Updated",
    "Total Increments",
];

/// Written to the increments column by [`SequenceBackend::set_value`].
pub const MANUAL_SET_MARKER: &str = "(manually set)";

/// Row-level access to a single worksheet.
///
/// Rows are returned as text, header included, with trailing empty cells
/// possibly missing. Ranges use A1 notation without the sheet name.
pub trait SheetClient: Send + Sync {
    /// Creates the worksheet and its header row if they do not exist yet.
    fn ensure_worksheet(&self, header: &[&str]) -> Result<()>;

    fn read_rows(&self) -> Result<Vec<Vec<String>>>;

    fn write_range(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<()>;
}

impl<C> SheetClient for Arc<C>
where
    C: SheetClient + ?Sized,
{
    fn ensure_worksheet(&self, header: &[&str]) -> Result<()> {
        (**self).ensure_worksheet(header)
    }

    fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        (**self).read_rows()
    }

    fn write_range(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<()> {
        (**self).write_range(range, rows)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Row {
    /// 1-based sheet row number.
    number: usize,
    value: u64,
    increments: u64,
}

/// A [`SequenceBackend`] over one worksheet with a row per key.
///
/// Increments read the whole sheet, locate the key's row and rewrite it. Two
/// writers interleaving between the read and the write can both observe the
/// same value; the store cannot detect this.
pub struct RemoteTabularStore<C> {
    client: C,
    floor: u64,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl<C> RemoteTabularStore<C>
where
    C: SheetClient,
{
    /// Wraps `client`, creating the worksheet and header when missing.
    pub fn new(client: C) -> Result<Self> {
        client.ensure_worksheet(&TABULAR_HEADER)?;
        Ok(Self {
            client,
            floor: DEFAULT_FLOOR,
            policy: RetryPolicy::tabular(),
            sleeper: Arc::new(ThreadSleep),
        })
    }

    #[must_use]
    pub fn with_floor(mut self, floor: u64) -> Self {
        self.floor = floor;
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

    fn find(&self, rows: &[Vec<String>], key: &SequenceKey) -> Result<Option<Row>> {
        for (index, row) in rows.iter().enumerate().skip(1) {
            let Some(name) = row.first() else { continue };
            if SequenceKey::new(name) != *key {
                continue;
            }
            let value = self.parse_value(key, row.get(1))?;
            let increments = row.get(3).and_then(|cell| parse_number(cell)).unwrap_or(0);
            return Ok(Some(Row {
                number: index + 1,
                value,
                increments,
            }));
        }
        Ok(None)
    }

    fn parse_value(&self, key: &SequenceKey, cell: Option<&String>) -> Result<u64> {
        match cell.map(|c| c.trim()) {
            None | Some("") => Ok(self.floor),
            Some(text) => parse_number(text).ok_or_else(|| {
                Error::corrupt(
                    BackendKind::RemoteTabular,
                    format!("value `{text}` for `{key}` is not a counter"),
                )
            }),
        }
    }

    fn increment_once(&self, key: &SequenceKey) -> Result<u64> {
        let rows = self.client.read_rows()?;
        let now = timestamp();
        match self.find(&rows, key)? {
            Some(row) => {
                let next = row.value + 1;
                self.client.write_range(
                    &format!("B{0}:D{0}", row.number),
                    vec![vec![json!(next), json!(now), json!(row.increments + 1)]],
                )?;
                Ok(next)
            }
            None => {
                let next = self.floor + 1;
                let number = append_row(&rows);
                self.client.write_range(
                    &format!("A{0}:D{0}", number),
                    vec![vec![json!(key.as_str()), json!(next), json!(now), json!(1)]],
                )?;
                Ok(next)
            }
        }
    }
}

impl<C> SequenceBackend for RemoteTabularStore<C>
where
    C: SheetClient,
{
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteTabular
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(%key)))]
    fn next_value_until(&self, key: &SequenceKey, deadline: Deadline) -> Result<u64> {
        self.policy.run_with(
            &*self.sleeper,
            BackendKind::RemoteTabular,
            "next_value",
            deadline,
            |_| self.increment_once(key),
        )
    }

    fn current_value(&self, key: &SequenceKey) -> Result<u64> {
        let rows = self.client.read_rows()?;
        Ok(self.find(&rows, key)?.map_or(self.floor, |row| row.value))
    }

    fn list_all(&self) -> Result<BTreeMap<SequenceKey, u64>> {
        let rows = self.client.read_rows()?;
        let mut all = BTreeMap::new();
        for row in rows.iter().skip(1) {
            let Some(name) = row.first().filter(|n| !n.trim().is_empty()) else {
                continue;
            };
            let key = SequenceKey::new(name);
            let value = self.parse_value(&key, row.get(1))?;
            all.insert(key, value);
        }
        Ok(all)
    }

    fn set_value(&self, key: &SequenceKey, value: u64) -> Result<()> {
        self.policy.run_with(
            &*self.sleeper,
            BackendKind::RemoteTabular,
            "set_value",
            Deadline::never(),
            |_| {
                let rows = self.client.read_rows()?;
                let now = timestamp();
                match self.find(&rows, key)? {
                    Some(row) => self.client.write_range(
                        &format!("B{0}:D{0}", row.number),
                        vec![vec![json!(value), json!(now), json!(MANUAL_SET_MARKER)]],
                    ),
                    None => self.client.write_range(
                        &format!("A{0}:D{0}", append_row(&rows)),
                        vec![vec![
                            json!(key.as_str()),
                            json!(value),
                            json!(now),
                            json!(MANUAL_SET_MARKER),
                        ]],
                    ),
                }
            },
        )
    }
}

/// First free row number; row 1 is always the header.
fn append_row(rows: &[Vec<String>]) -> usize {
    rows.len().max(1) + 1
}

/// Spreadsheets render large numbers with grouping separators.
fn parse_number(cell: &str) -> Option<u64> {
    let cleaned: String = cell.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse().ok()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySheet;

    fn store() -> RemoteTabularStore<Arc<MemorySheet>> {
        RemoteTabularStore::new(Arc::new(MemorySheet::default())).unwrap()
    }

    #[test]
    fn creates_header_and_appends_rows() {
        let store = store();
        let key = SequenceKey::new("bddcsg_seq");

        assert_eq!(store.next_value(&key).unwrap(), 301);
        assert_eq!(store.next_value(&key).unwrap(), 302);

        let rows = store.client().rows();
        assert_eq!(rows[0], TABULAR_HEADER.map(String::from).to_vec());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0], "bddcsg_seq");
        assert_eq!(rows[1][1], "302");
        assert_eq!(rows[1][3], "2");
    }

    #[test]
    fn set_value_marks_the_row_as_manual() {
        let store = store();
        let key = SequenceKey::new("akdcah_seq");
        store.next_value(&key).unwrap();
        store.set_value(&key, 500).unwrap();

        let rows = store.client().rows();
        assert_eq!(rows[1][1], "500");
        assert_eq!(rows[1][3], MANUAL_SET_MARKER);
        assert_eq!(store.next_value(&key).unwrap(), 501);
        assert_eq!(store.client().rows()[1][3], "1");
    }

    #[test]
    fn empty_value_cells_read_as_floor() {
        let sheet = Arc::new(MemorySheet::with_rows(vec![
            TABULAR_HEADER.map(String::from).to_vec(),
            vec!["sbdcxx_seq".to_owned()],
            vec!["".to_owned(), "99".to_owned()],
        ]));
        let store = RemoteTabularStore::new(sheet).unwrap();
        let key = SequenceKey::new("sbdcxx_seq");

        assert_eq!(store.current_value(&key).unwrap(), DEFAULT_FLOOR);
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&key], DEFAULT_FLOOR);
    }

    #[test]
    fn unreadable_values_are_not_reset() {
        let sheet = Arc::new(MemorySheet::with_rows(vec![
            TABULAR_HEADER.map(String::from).to_vec(),
            vec!["akdcsg_seq".to_owned(), "three hundred".to_owned()],
        ]));
        let store = RemoteTabularStore::new(sheet).unwrap();
        let err = store.next_value(&SequenceKey::new("akdcsg_seq")).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }

    #[test]
    fn grouped_numbers_parse() {
        assert_eq!(parse_number("1,234"), Some(1234));
        assert_eq!(parse_number(" 301 "), Some(301));
        assert_eq!(parse_number(MANUAL_SET_MARKER), None);
    }
}
