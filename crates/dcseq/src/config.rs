use core::time::Duration;
use std::path::PathBuf;

use crate::{DEFAULT_FLOOR, DEFAULT_LOCAL_PATH, FallbackPolicy, RpcProcedures, SequenceKey};

/// Key read by the prober to check that a backend answers.
pub const DEFAULT_PROBE_KEY: &str = "akdcah_seq";
pub const DEFAULT_WORKSHEET: &str = "Sequences";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_SEQUENCE_FILE: &str = "sequence_data.json";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Keys written at the floor when the versioned file is first created.
pub const DEFAULT_SEED_KEYS: [&str; 9] = [
    "akdcah_seq",
    "akdcsg_seq",
    "akdchydnch_seq",
    "akdchydbal_seq",
    "akdchydbvg_seq",
    "bddcah_seq",
    "bddcsg_seq",
    "sbdcah_seq",
    "sbdcsg_seq",
];

/// The spreadsheet the tabular store works on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabularConfig {
    /// Falls back to the `GOOGLE_SHEETS_SPREADSHEET_ID` credential when unset.
    pub spreadsheet_id: Option<String>,
    pub worksheet: String,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            worksheet: DEFAULT_WORKSHEET.to_owned(),
        }
    }
}

/// The repository file the versioned store works on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedConfig {
    /// `owner/name`. Falls back to the `GITHUB_REPO` credential when unset.
    pub repo: Option<String>,
    pub branch: String,
    pub path: String,
    pub seeds: Vec<SequenceKey>,
}

impl Default for VersionedConfig {
    fn default() -> Self {
        Self {
            repo: None,
            branch: DEFAULT_BRANCH.to_owned(),
            path: DEFAULT_SEQUENCE_FILE.to_owned(),
            seeds: DEFAULT_SEED_KEYS.iter().map(SequenceKey::new).collect(),
        }
    }
}

/// Everything needed to build the backends and the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub floor: u64,
    pub probe_key: SequenceKey,
    pub local_path: PathBuf,
    pub http_timeout: Duration,
    /// Upper bound on a single `next_value` call, retries included.
    pub call_timeout: Option<Duration>,
    pub fallback: FallbackPolicy,
    pub tabular: TabularConfig,
    pub rpc: RpcProcedures,
    pub versioned: VersionedConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            floor: DEFAULT_FLOOR,
            probe_key: SequenceKey::new(DEFAULT_PROBE_KEY),
            local_path: PathBuf::from(DEFAULT_LOCAL_PATH),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            call_timeout: None,
            fallback: FallbackPolicy::default(),
            tabular: TabularConfig::default(),
            rpc: RpcProcedures::default(),
            versioned: VersionedConfig::default(),
        }
    }
}
