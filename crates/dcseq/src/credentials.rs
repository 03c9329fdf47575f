//! Secret lookup for the remote backends.
//!
//! A secret is looked for, in order, in the process environment, in a file
//! inside the credentials directory, and in a TOML secrets file. Blank
//! values count as missing. A secret stored as a TOML table (such as a
//! service-account key) is returned as its JSON encoding.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{BackendKind, Error, Result};

/// Default secrets file, relative to the working directory.
pub const DEFAULT_SECRETS_FILE: &str = ".streamlit/secrets.toml";

/// Where one secret may be found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CredentialSpec {
    /// Environment variable.
    pub env: &'static str,
    /// File name inside the credentials directory.
    pub file: Option<&'static str>,
    /// Keys tried in the secrets file, in order.
    pub secret_keys: &'static [&'static str],
}

pub const GOOGLE_SHEETS_CREDENTIALS: CredentialSpec = CredentialSpec {
    env: "GOOGLE_SHEETS_CREDENTIALS",
    file: Some("google_sheets_credentials.json"),
    secret_keys: &["GOOGLE_SHEETS_CREDENTIALS", "gcp_service_account"],
};

pub const GOOGLE_SHEETS_SPREADSHEET_ID: CredentialSpec = CredentialSpec {
    env: "GOOGLE_SHEETS_SPREADSHEET_ID",
    file: None,
    secret_keys: &["GOOGLE_SHEETS_SPREADSHEET_ID"],
};

pub const SUPABASE_URL: CredentialSpec = CredentialSpec {
    env: "SUPABASE_URL",
    file: None,
    secret_keys: &["SUPABASE_URL"],
};

pub const SUPABASE_KEY: CredentialSpec = CredentialSpec {
    env: "SUPABASE_KEY",
    file: None,
    secret_keys: &["SUPABASE_KEY"],
};

pub const GITHUB_TOKEN: CredentialSpec = CredentialSpec {
    env: "GITHUB_TOKEN",
    file: None,
    secret_keys: &["GITHUB_TOKEN"],
};

pub const GITHUB_REPO: CredentialSpec = CredentialSpec {
    env: "GITHUB_REPO",
    file: None,
    secret_keys: &["GITHUB_REPO"],
};

/// Where a resolved secret came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialOrigin {
    Environment,
    File(PathBuf),
    SecretsFile(PathBuf),
}

/// A resolved secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    value: String,
    origin: CredentialOrigin,
}

impl Credential {
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn into_value(self) -> String {
        self.value
    }

    pub fn origin(&self) -> &CredentialOrigin {
        &self.origin
    }
}

impl core::fmt::Debug for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("origin", &self.origin)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
enum Environment {
    #[default]
    Process,
    Fixed(HashMap<String, String>),
}

impl Environment {
    fn get(&self, name: &str) -> Option<String> {
        match self {
            Self::Process => std::env::var(name).ok(),
            Self::Fixed(vars) => vars.get(name).cloned(),
        }
    }
}

/// Resolves [`CredentialSpec`]s against the configured sources.
#[derive(Clone, Debug, Default)]
pub struct CredentialResolver {
    env: Environment,
    credentials_dir: Option<PathBuf>,
    secrets_file: Option<PathBuf>,
}

impl CredentialResolver {
    /// Reads the process environment only.
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_credentials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credentials_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_secrets_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.secrets_file = Some(path.into());
        self
    }

    /// Replaces the process environment with a fixed set of variables.
    #[must_use]
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Environment::Fixed(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn resolve(&self, spec: &CredentialSpec) -> Option<Credential> {
        if let Some(value) = self.env.get(spec.env).filter(|v| !v.trim().is_empty()) {
            return Some(Credential {
                value,
                origin: CredentialOrigin::Environment,
            });
        }

        if let (Some(dir), Some(file)) = (&self.credentials_dir, spec.file) {
            let path = dir.join(file);
            if let Ok(value) = fs::read_to_string(&path) {
                if !value.trim().is_empty() {
                    return Some(Credential {
                        value,
                        origin: CredentialOrigin::File(path),
                    });
                }
            }
        }

        let path = self.secrets_file.as_deref()?;
        let secrets = read_secrets(path)?;
        spec.secret_keys
            .iter()
            .find_map(|key| secrets.get(*key).and_then(secret_text))
            .map(|value| Credential {
                value,
                origin: CredentialOrigin::SecretsFile(path.to_path_buf()),
            })
    }

    /// [`Self::resolve`], failing with a configuration error for `backend`.
    pub fn require(&self, backend: BackendKind, spec: &CredentialSpec) -> Result<Credential> {
        self.resolve(spec).ok_or_else(|| {
            Error::configuration(
                backend,
                format!(
                    "{} is not set (checked the environment{}{})",
                    spec.env,
                    if spec.file.is_some() && self.credentials_dir.is_some() {
                        ", the credentials directory"
                    } else {
                        ""
                    },
                    if self.secrets_file.is_some() {
                        " and the secrets file"
                    } else {
                        ""
                    },
                ),
            )
        })
    }
}

fn read_secrets(path: &Path) -> Option<toml::Table> {
    let content = fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(table) => Some(table),
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(path = %path.display(), error = %_e, "ignoring unreadable secrets file");
            None
        }
    }
}

fn secret_text(value: &toml::Value) -> Option<String> {
    let text = match value {
        toml::Value::String(s) => s.clone(),
        other => serde_json::to_string(other).ok()?,
    };
    (!text.trim().is_empty()).then_some(text)
}
