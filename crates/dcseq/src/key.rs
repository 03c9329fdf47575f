use core::{fmt, str::FromStr};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Marker placed between the entity and facility codes.
pub const DOCUMENT_MARKER: &str = "DC";

/// Width of the zero-padded counter at the end of a document number.
pub const SEQUENCE_DIGITS: usize = 6;

/// Largest counter value that fits in [`SEQUENCE_DIGITS`].
pub const MAX_SEQUENCE_VALUE: u64 = 999_999;

/// Upper bound on the length of a formatted document number.
pub const MAX_DOCUMENT_NUMBER_LEN: usize = 16;

/// Code used for entity or facility names missing from the tables.
pub const UNKNOWN_CODE: &str = "XX";

/// Suffix appended to every sequence key.
pub const KEY_SUFFIX: &str = "_seq";

/// Separator inside compound hub identifiers such as `HYD_NCH`.
pub const HUB_SEPARATOR: char = '_';

/// Identifier of one persisted counter, e.g. `akdchydnch_seq`.
///
/// Keys are stored lower-case so they compare equal regardless of how the
/// caller spelled them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct SequenceKey(String);

impl SequenceKey {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SequenceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SequenceKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for SequenceKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl FromStr for SequenceKey {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

/// Collects stored `(name, value)` pairs by normalised key. Spellings that
/// differ only in case name the same counter; the largest value wins.
pub(crate) fn merge_spellings(
    raw: impl IntoIterator<Item = (String, u64)>,
) -> BTreeMap<SequenceKey, u64> {
    let mut values = BTreeMap::new();
    for (name, value) in raw {
        let entry = values.entry(SequenceKey::new(name)).or_insert(value);
        *entry = (*entry).max(value);
    }
    values
}

/// The fixed part of a document number: `{entity}DC{facility}[{hub}]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPrefix {
    entity: String,
    facility: String,
    hub: Option<String>,
}

impl DocumentPrefix {
    pub fn new(
        entity: impl Into<String>,
        facility: impl Into<String>,
        hub: Option<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            facility: facility.into(),
            hub: hub.filter(|h| !h.is_empty()),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn facility(&self) -> &str {
        &self.facility
    }

    pub fn hub(&self) -> Option<&str> {
        self.hub.as_deref()
    }

    /// The sequence key backing this prefix, e.g. `bddcsg_seq`.
    pub fn key(&self) -> SequenceKey {
        SequenceKey::new(format!("{self}{KEY_SUFFIX}"))
    }

    /// Formats `value` as a document number under this prefix.
    ///
    /// The value is zero-padded to [`SEQUENCE_DIGITS`]. Values wider than that
    /// are not truncated; callers reject them before formatting.
    pub fn format(&self, value: u64) -> DocumentNumber {
        DocumentNumber {
            text: format!("{self}{value:0width$}", width = SEQUENCE_DIGITS),
            value,
        }
    }

    /// Length of the longest number this prefix can produce.
    pub fn max_number_len(&self) -> usize {
        self.to_string().len() + SEQUENCE_DIGITS
    }
}

impl fmt::Display for DocumentPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DOCUMENT_MARKER}{}{}",
            self.entity,
            self.facility,
            self.hub.as_deref().unwrap_or_default()
        )
    }
}

/// A formatted document number such as `BDDCSG000301`.
///
/// Produced by the [`SequenceManager`] and owned by the caller afterwards.
///
/// [`SequenceManager`]: crate::SequenceManager
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocumentNumber {
    text: String,
    #[serde(skip)]
    value: u64,
}

impl DocumentNumber {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The counter value embedded in the number.
    pub const fn value(&self) -> u64 {
        self.value
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Number used when one trip needs several documents: the second and later
    /// documents get a two-digit `_{nn}` suffix.
    pub fn with_trip_suffix(&self, trip: u32) -> String {
        if trip > 1 {
            format!("{}_{trip:02}", self.text)
        } else {
            self.text.clone()
        }
    }
}

impl fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for DocumentNumber {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl PartialEq<&str> for DocumentNumber {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

/// Returns the hub code inside a compound hub identifier: the upper-cased text
/// after the last [`HUB_SEPARATOR`] (`HYD_NCH` -> `NCH`).
pub fn extract_hub_code(hub_value: &str) -> Option<String> {
    let (_, tail) = hub_value.trim().rsplit_once(HUB_SEPARATOR)?;
    let code = tail.trim().to_uppercase();
    (!code.is_empty()).then_some(code)
}

/// Lookup tables mapping business names to the short codes used in keys and
/// document numbers.
///
/// Unknown names map to [`UNKNOWN_CODE`] instead of failing. Hub codes apply
/// only to the regional facility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodeTables {
    /// Entity name -> 2-letter code. Names match case-insensitively.
    pub entities: BTreeMap<String, String>,
    /// Facility name -> facility code.
    pub facilities: BTreeMap<String, String>,
    /// Facility code whose documents carry a hub code.
    pub regional_facility: String,
    /// Hub codes in use under the regional facility.
    pub hubs: BTreeSet<String>,
}

impl Default for CodeTables {
    fn default() -> Self {
        let entities = [("AMOLAKCHAND", "AK"), ("BODEGA", "BD"), ("SOURCINGBEE", "SB")];
        let facilities = [
            ("Sutlej/Gomati", "SG"),
            ("Arihant", "AH"),
            ("Vikrant", "AH"),
            ("FC-Hyderabad", "HYD"),
            ("Hyderabad", "HYD"),
        ];
        let hubs = ["BVG", "SGR", "BAL", "KMP", "NCH", "SAN"];

        Self {
            entities: entities
                .into_iter()
                .map(|(name, code)| (name.to_owned(), code.to_owned()))
                .collect(),
            facilities: facilities
                .into_iter()
                .map(|(name, code)| (name.to_owned(), code.to_owned()))
                .collect(),
            regional_facility: "HYD".to_owned(),
            hubs: hubs.into_iter().map(str::to_owned).collect(),
        }
    }
}

impl CodeTables {
    /// Parses tables from TOML. Missing sections fall back to the defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| Error::CodeTables {
            reason: err.to_string(),
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| Error::CodeTables {
            reason: format!("{}: {err}", path.display()),
        })?;
        Self::from_toml(&content)
    }

    pub fn entity_code(&self, entity_name: &str) -> &str {
        let name = entity_name.trim();
        self.entities
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map_or(UNKNOWN_CODE, |(_, code)| code.as_str())
    }

    pub fn facility_code(&self, facility_name: &str) -> &str {
        let name = facility_name.trim();
        self.facilities
            .get(name)
            .or_else(|| {
                self.facilities
                    .iter()
                    .find(|(known, _)| known.eq_ignore_ascii_case(name))
                    .map(|(_, code)| code)
            })
            .map_or(UNKNOWN_CODE, String::as_str)
    }

    /// Hub code for `hub_value`, only when `facility_code` is the regional one.
    pub fn hub_code(&self, facility_code: &str, hub_value: Option<&str>) -> Option<String> {
        if facility_code != self.regional_facility {
            return None;
        }
        hub_value.and_then(extract_hub_code)
    }

    pub fn is_known_hub(&self, hub_code: &str) -> bool {
        self.hubs.contains(hub_code)
    }

    pub fn prefix(
        &self,
        entity_name: &str,
        facility_name: &str,
        hub_value: Option<&str>,
    ) -> DocumentPrefix {
        let entity = self.entity_code(entity_name);
        let facility = self.facility_code(facility_name);
        let hub = self.hub_code(facility, hub_value);
        DocumentPrefix::new(entity, facility, hub)
    }

    /// `lowercase(entity + "DC" + facility + [hub]) + "_seq"`.
    pub fn build_key(
        &self,
        entity_name: &str,
        facility_name: &str,
        hub_value: Option<&str>,
    ) -> SequenceKey {
        self.prefix(entity_name, facility_name, hub_value).key()
    }

    /// Every prefix the tables can produce, including the [`UNKNOWN_CODE`]
    /// sentinel on either side.
    pub fn combinations(&self) -> Vec<DocumentPrefix> {
        let entities = Self::distinct_codes(self.entities.values());
        let facilities = Self::distinct_codes(self.facilities.values());

        let mut prefixes = Vec::new();
        for entity in &entities {
            for facility in &facilities {
                prefixes.push(DocumentPrefix::new(entity.clone(), facility.clone(), None));
                if *facility == self.regional_facility {
                    for hub in &self.hubs {
                        prefixes.push(DocumentPrefix::new(
                            entity.clone(),
                            facility.clone(),
                            Some(hub.clone()),
                        ));
                    }
                }
            }
        }
        prefixes
    }

    /// Checks that every combination fits [`MAX_DOCUMENT_NUMBER_LEN`] at the
    /// largest counter value.
    pub fn validate(&self) -> Result<()> {
        for prefix in self.combinations() {
            let number = prefix.format(MAX_SEQUENCE_VALUE);
            if number.len() > MAX_DOCUMENT_NUMBER_LEN {
                return Err(Error::Validation {
                    len: number.len(),
                    number: number.into_string(),
                    max: MAX_DOCUMENT_NUMBER_LEN,
                });
            }
        }
        Ok(())
    }

    /// Keys for all combinations of known codes, without the sentinel.
    pub fn known_keys(&self) -> Vec<SequenceKey> {
        self.combinations()
            .into_iter()
            .filter(|p| p.entity() != UNKNOWN_CODE && p.facility() != UNKNOWN_CODE)
            .map(|p| p.key())
            .collect()
    }

    fn distinct_codes<'a>(codes: impl Iterator<Item = &'a String>) -> BTreeSet<String> {
        codes
            .cloned()
            .chain(core::iter::once(UNKNOWN_CODE.to_owned()))
            .collect()
    }
}
