use core::time::Duration;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use dcseq::{
    CodeTables, CredentialResolver, DEFAULT_BRANCH, DEFAULT_FLOOR, DEFAULT_LOCAL_PATH,
    DEFAULT_PROBE_KEY, DEFAULT_SECRETS_FILE, DEFAULT_SEQUENCE_FILE, DEFAULT_WORKSHEET,
    MAX_SEQUENCE_VALUE, SequenceKey, StoreConfig, TabularConfig, VersionedConfig,
};

/// Command-line options for the `dcseq` binary.
///
/// Every option can also be given through the environment variable named in
/// its help text, and a `.env` file in the working directory is loaded first.
/// Backend credentials are not options: they are resolved from the
/// environment, the credentials directory or the secrets file.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dcseq",
    version,
    about = "Issue and inspect delivery challan document numbers"
)]
pub struct CliArgs {
    /// Lowest value a fresh counter starts from. The first number issued for
    /// a new key is one above this.
    ///
    /// Environment variable: `DCSEQ_FLOOR`
    #[arg(long, env = "DCSEQ_FLOOR", default_value_t = DEFAULT_FLOOR, global = true)]
    pub floor: u64,

    /// Local state file used when no remote backend answers.
    ///
    /// Environment variable: `DCSEQ_STATE_FILE`
    #[arg(long, env = "DCSEQ_STATE_FILE", default_value = DEFAULT_LOCAL_PATH, global = true)]
    pub state_file: PathBuf,

    /// Key read from each candidate backend to check that it answers.
    ///
    /// Environment variable: `DCSEQ_PROBE_KEY`
    #[arg(long, env = "DCSEQ_PROBE_KEY", default_value = DEFAULT_PROBE_KEY, global = true)]
    pub probe_key: String,

    /// Per-request HTTP timeout in milliseconds.
    ///
    /// Environment variable: `DCSEQ_HTTP_TIMEOUT_MS`
    #[arg(long, env = "DCSEQ_HTTP_TIMEOUT_MS", default_value_t = 10_000, global = true)]
    pub http_timeout_ms: u64,

    /// Upper bound in milliseconds on a single increment, retries included.
    /// Unbounded when unset.
    ///
    /// Environment variable: `DCSEQ_CALL_TIMEOUT_MS`
    #[arg(long, env = "DCSEQ_CALL_TIMEOUT_MS", global = true)]
    pub call_timeout_ms: Option<u64>,

    /// Directory searched for credential files such as
    /// `google_sheets_credentials.json`.
    ///
    /// Environment variable: `DCSEQ_CREDENTIALS_DIR`
    #[arg(long, env = "DCSEQ_CREDENTIALS_DIR", global = true)]
    pub credentials_dir: Option<PathBuf>,

    /// TOML secrets file consulted after the environment and credential files.
    ///
    /// Environment variable: `DCSEQ_SECRETS_FILE`
    #[arg(long, env = "DCSEQ_SECRETS_FILE", default_value = DEFAULT_SECRETS_FILE, global = true)]
    pub secrets_file: PathBuf,

    /// TOML file overriding the built-in entity, facility and hub codes.
    ///
    /// Environment variable: `DCSEQ_CODES`
    #[arg(long, env = "DCSEQ_CODES", global = true)]
    pub codes: Option<PathBuf>,

    /// Spreadsheet holding the tabular counters. Resolved like a credential
    /// when unset.
    ///
    /// Environment variable: `DCSEQ_SPREADSHEET_ID`
    #[arg(long, env = "DCSEQ_SPREADSHEET_ID", global = true)]
    pub spreadsheet_id: Option<String>,

    /// Worksheet holding the tabular counters.
    ///
    /// Environment variable: `DCSEQ_WORKSHEET`
    #[arg(long, env = "DCSEQ_WORKSHEET", default_value = DEFAULT_WORKSHEET, global = true)]
    pub worksheet: String,

    /// `owner/name` of the repository holding the versioned sequence file.
    /// Resolved like a credential when unset.
    ///
    /// Environment variable: `DCSEQ_GITHUB_REPO`
    #[arg(long, env = "DCSEQ_GITHUB_REPO", global = true)]
    pub github_repo: Option<String>,

    /// Branch the versioned sequence file is committed to.
    ///
    /// Environment variable: `DCSEQ_GITHUB_BRANCH`
    #[arg(long, env = "DCSEQ_GITHUB_BRANCH", default_value = DEFAULT_BRANCH, global = true)]
    pub github_branch: String,

    /// Path of the versioned sequence file inside the repository.
    ///
    /// Environment variable: `DCSEQ_GITHUB_PATH`
    #[arg(long, env = "DCSEQ_GITHUB_PATH", default_value = DEFAULT_SEQUENCE_FILE, global = true)]
    pub github_path: String,

    /// Log output format. Logs always go to stderr.
    ///
    /// Environment variable: `DCSEQ_LOG_FORMAT`
    #[arg(
        long,
        env = "DCSEQ_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Pretty,
        global = true
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Probe the configured backends and report which one would be used.
    Probe,
    /// Issue document numbers.
    Generate {
        /// Entity name, e.g. `BODEGA`.
        #[arg(long)]
        entity: String,
        /// Facility name, e.g. `Sutlej/Gomati`.
        #[arg(long)]
        facility: String,
        /// Hub value for the regional facility, e.g. `HYD_NCH`.
        #[arg(long)]
        hub: Option<String>,
        /// How many numbers to issue.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
        /// Issue an unpersisted `current + 1` when the backend cannot
        /// increment. Such numbers may be issued again later.
        #[arg(long)]
        allow_unpersisted: bool,
    },
    /// Print the last issued value of a counter.
    Current { key: String },
    /// Print every counter as JSON.
    List,
    /// Set a counter. Lowering one requires `--force`.
    Set {
        key: String,
        value: u64,
        /// Allow moving the counter backwards.
        #[arg(long)]
        force: bool,
    },
    /// Print a JSON health report.
    Health,
    /// Merge the local state file into the versioned sequence file.
    Sync,
    /// Check that every code combination fits the document number length.
    CheckCodes,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Validated settings derived from [`CliArgs`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub store: StoreConfig,
    pub resolver: CredentialResolver,
    pub tables: CodeTables,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for Settings {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.http_timeout_ms == 0 {
            bail!("DCSEQ_HTTP_TIMEOUT_MS must be greater than 0");
        }

        if args.floor >= MAX_SEQUENCE_VALUE {
            bail!(
                "DCSEQ_FLOOR ({}) leaves no room below the largest sequence value ({})",
                args.floor,
                MAX_SEQUENCE_VALUE
            );
        }

        let probe_key = args.probe_key.trim();
        if probe_key.is_empty() {
            bail!("DCSEQ_PROBE_KEY must not be empty");
        }

        let tables = match &args.codes {
            Some(path) => CodeTables::load(path)
                .with_context(|| format!("loading code tables from {}", path.display()))?,
            None => CodeTables::default(),
        };
        tables.validate().context("code tables produce oversized numbers")?;

        let mut resolver = CredentialResolver::new().with_secrets_file(args.secrets_file);
        if let Some(dir) = args.credentials_dir {
            resolver = resolver.with_credentials_dir(dir);
        }

        let store = StoreConfig {
            floor: args.floor,
            probe_key: SequenceKey::new(probe_key),
            local_path: args.state_file,
            http_timeout: Duration::from_millis(args.http_timeout_ms),
            call_timeout: args.call_timeout_ms.map(Duration::from_millis),
            tabular: TabularConfig {
                spreadsheet_id: args.spreadsheet_id,
                worksheet: args.worksheet,
            },
            versioned: VersionedConfig {
                repo: args.github_repo,
                branch: args.github_branch,
                path: args.github_path,
                ..VersionedConfig::default()
            },
            ..StoreConfig::default()
        };

        Ok(Self {
            store,
            resolver,
            tables,
            log_format: args.log_format,
        })
    }
}
