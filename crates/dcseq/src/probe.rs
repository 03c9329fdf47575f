//! Startup backend selection.
//!
//! The [`Prober`] builds each candidate backend in priority order and asks it
//! for the current value of a well-known key. The first one that answers is
//! used for the rest of the process; the local file store is used when none
//! do. Selection happens once, and the result is handed to the
//! [`SequenceManager`] as a shared handle.
//!
//! [`SequenceManager`]: crate::SequenceManager

use std::sync::Arc;

use crate::backend::http;
use crate::{
    BackendKind, CredentialResolver, Error, GITHUB_REPO, GITHUB_TOKEN, GOOGLE_SHEETS_CREDENTIALS,
    GOOGLE_SHEETS_SPREADSHEET_ID, GitHubContentsClient, GoogleSheetsClient, LocalFileStore,
    PostgrestClient, RemoteRpcStore, RemoteTabularStore, Result, SUPABASE_KEY, SUPABASE_URL,
    SequenceBackend, SequenceKey, ServiceAccountKey, StoreConfig, VersionedFileStore,
};

/// Builds one candidate backend. Errors mean the backend is not configured.
pub type BackendFactory = Box<dyn FnOnce() -> Result<Arc<dyn SequenceBackend>> + Send>;

/// Why a candidate was skipped.
#[derive(Debug)]
pub struct ProbeFailure {
    pub kind: BackendKind,
    pub error: Error,
}

/// The outcome of probing.
pub struct Selection {
    backend: Arc<dyn SequenceBackend>,
    failures: Vec<ProbeFailure>,
    fallback: bool,
}

impl Selection {
    pub fn backend(&self) -> &Arc<dyn SequenceBackend> {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Candidates that were tried and skipped, in order.
    pub fn failures(&self) -> &[ProbeFailure] {
        &self.failures
    }

    /// Whether no candidate answered and the local store was used.
    pub const fn used_fallback(&self) -> bool {
        self.fallback
    }

    pub fn into_parts(self) -> (Arc<dyn SequenceBackend>, Vec<ProbeFailure>) {
        (self.backend, self.failures)
    }
}

/// Ordered candidate list with an unconditional local fallback.
pub struct Prober {
    candidates: Vec<(BackendKind, BackendFactory)>,
    probe_key: SequenceKey,
    fallback: LocalFileStore,
}

impl Prober {
    pub fn new(probe_key: SequenceKey, fallback: LocalFileStore) -> Self {
        Self {
            candidates: Vec::new(),
            probe_key,
            fallback,
        }
    }

    /// Appends a candidate. Candidates are tried in the order added.
    #[must_use]
    pub fn candidate<F>(mut self, kind: BackendKind, factory: F) -> Self
    where
        F: FnOnce() -> Result<Arc<dyn SequenceBackend>> + Send + 'static,
    {
        self.candidates.push((kind, Box::new(factory)));
        self
    }

    pub fn candidate_kinds(&self) -> impl Iterator<Item = BackendKind> + '_ {
        self.candidates.iter().map(|(kind, _)| *kind)
    }

    /// Tabular, then RPC, then the local file, as configured by `config`.
    pub fn default_chain(config: &StoreConfig, resolver: &CredentialResolver) -> Self {
        let tabular = (config.clone(), resolver.clone());
        let rpc = (config.clone(), resolver.clone());
        Self::new(
            config.probe_key.clone(),
            LocalFileStore::new(config.local_path.clone()).with_floor(config.floor),
        )
        .candidate(BackendKind::RemoteTabular, move || {
            let (config, resolver) = tabular;
            Ok(Arc::new(tabular_store(&config, &resolver)?) as Arc<dyn SequenceBackend>)
        })
        .candidate(BackendKind::RemoteRpc, move || {
            let (config, resolver) = rpc;
            Ok(Arc::new(rpc_store(&config, &resolver)?) as Arc<dyn SequenceBackend>)
        })
    }

    /// Runs the candidates in order and returns the first that answers.
    pub fn select(self) -> Selection {
        let mut failures = Vec::new();

        for (kind, factory) in self.candidates {
            let outcome = factory().and_then(|backend| {
                backend.current_value(&self.probe_key)?;
                Ok(backend)
            });
            match outcome {
                Ok(backend) => {
                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        backend = %kind,
                        skipped = failures.len(),
                        "selected sequence backend"
                    );
                    return Selection {
                        backend,
                        failures,
                        fallback: false,
                    };
                }
                Err(error) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(backend = %kind, %error, "sequence backend unavailable");
                    failures.push(ProbeFailure { kind, error });
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(
            path = %self.fallback.path().display(),
            "no remote sequence backend available, using local file"
        );
        Selection {
            backend: Arc::new(self.fallback),
            failures,
            fallback: true,
        }
    }
}

/// The spreadsheet store, from `config` and the resolved service-account key.
pub fn tabular_store(
    config: &StoreConfig,
    resolver: &CredentialResolver,
) -> Result<RemoteTabularStore<GoogleSheetsClient>> {
    const B: BackendKind = BackendKind::RemoteTabular;
    let key = resolver.require(B, &GOOGLE_SHEETS_CREDENTIALS)?;
    let key = ServiceAccountKey::from_json(key.value())?;
    let spreadsheet_id = match &config.tabular.spreadsheet_id {
        Some(id) => id.clone(),
        None => resolver
            .require(B, &GOOGLE_SHEETS_SPREADSHEET_ID)?
            .into_value()
            .trim()
            .to_owned(),
    };
    let client = GoogleSheetsClient::new(
        http::client(B, config.http_timeout)?,
        key,
        spreadsheet_id,
        config.tabular.worksheet.clone(),
    )?;
    Ok(RemoteTabularStore::new(client)?.with_floor(config.floor))
}

/// The RPC store, from the resolved endpoint URL and API key.
pub fn rpc_store(
    config: &StoreConfig,
    resolver: &CredentialResolver,
) -> Result<RemoteRpcStore<PostgrestClient>> {
    const B: BackendKind = BackendKind::RemoteRpc;
    let url = resolver.require(B, &SUPABASE_URL)?;
    let api_key = resolver.require(B, &SUPABASE_KEY)?;
    let client = PostgrestClient::new(
        http::client(B, config.http_timeout)?,
        url.value().trim(),
        api_key.value().trim(),
    );
    Ok(RemoteRpcStore::new(client)
        .with_procedures(config.rpc.clone())
        .with_floor(config.floor))
}

/// The versioned file store used by the sync path.
pub fn versioned_store(
    config: &StoreConfig,
    resolver: &CredentialResolver,
) -> Result<VersionedFileStore<GitHubContentsClient>> {
    const B: BackendKind = BackendKind::VersionedFile;
    let token = resolver.require(B, &GITHUB_TOKEN)?;
    let repo = match &config.versioned.repo {
        Some(repo) => repo.clone(),
        None => resolver.require(B, &GITHUB_REPO)?.into_value().trim().to_owned(),
    };
    let client = GitHubContentsClient::new(
        http::client(B, config.http_timeout)?,
        token.value().trim(),
        repo,
        config.versioned.branch.clone(),
        config.versioned.path.clone(),
    )?;
    Ok(VersionedFileStore::new(client)
        .with_floor(config.floor)
        .with_seeds(config.versioned.seeds.iter().cloned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryRpc, UnreachableBackend};
    use crate::{CodeTables, SequenceManager};

    fn local(dir: &tempfile::TempDir) -> LocalFileStore {
        LocalFileStore::new(dir.path().join("state.json"))
    }

    #[test]
    fn first_answering_candidate_is_selected() {
        let dir = tempfile::tempdir().unwrap();
        let selection = Prober::new(SequenceKey::new("akdcah_seq"), local(&dir))
            .candidate(BackendKind::RemoteTabular, || {
                Err(Error::configuration(BackendKind::RemoteTabular, "no key"))
            })
            .candidate(BackendKind::VersionedFile, || {
                Ok(Arc::new(UnreachableBackend::transient(BackendKind::VersionedFile)))
            })
            .candidate(BackendKind::RemoteRpc, || {
                Ok(Arc::new(RemoteRpcStore::new(MemoryRpc::default())))
            })
            .select();

        assert_eq!(selection.kind(), BackendKind::RemoteRpc);
        assert!(!selection.used_fallback());
        let skipped: Vec<_> = selection.failures().iter().map(|f| f.kind).collect();
        assert_eq!(skipped, vec![BackendKind::RemoteTabular, BackendKind::VersionedFile]);
        assert!(matches!(
            selection.failures()[0].error,
            Error::Configuration { .. }
        ));
    }

    #[test]
    fn local_store_is_the_unconditional_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let selection = Prober::new(SequenceKey::new("akdcah_seq"), local(&dir))
            .candidate(BackendKind::RemoteTabular, || {
                Ok(Arc::new(UnreachableBackend::unconfigured(BackendKind::RemoteTabular)))
            })
            .candidate(BackendKind::RemoteRpc, || {
                Ok(Arc::new(UnreachableBackend::transient(BackendKind::RemoteRpc)))
            })
            .select();

        assert_eq!(selection.kind(), BackendKind::LocalFile);
        assert!(selection.used_fallback());
        assert_eq!(selection.failures().len(), 2);
    }

    #[test]
    fn generate_goes_to_the_selected_backend() {
        let dir = tempfile::tempdir().unwrap();
        let rpc = Arc::new(MemoryRpc::default());
        let chosen = rpc.clone();
        let selection = Prober::new(SequenceKey::new("akdcah_seq"), local(&dir))
            .candidate(BackendKind::RemoteTabular, || {
                Err(Error::configuration(BackendKind::RemoteTabular, "no key"))
            })
            .candidate(BackendKind::RemoteRpc, move || {
                Ok(Arc::new(RemoteRpcStore::new(chosen)))
            })
            .select();

        let manager = SequenceManager::from_selection(selection, CodeTables::default());
        let number = manager.generate("BODEGA", "Sutlej/Gomati", None).unwrap();
        assert_eq!(number, "BDDCSG000301");
        // Probe read plus the increment.
        assert_eq!(rpc.calls(), 2);
        assert!(!dir.path().join("state.json").exists());
    }

    #[test]
    fn default_chain_without_credentials_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            local_path: dir.path().join("state.json"),
            ..StoreConfig::default()
        };
        let resolver = CredentialResolver::new().with_env(Vec::<(String, String)>::new());

        let prober = Prober::default_chain(&config, &resolver);
        assert_eq!(
            prober.candidate_kinds().collect::<Vec<_>>(),
            vec![BackendKind::RemoteTabular, BackendKind::RemoteRpc]
        );

        let selection = prober.select();
        assert!(selection.used_fallback());
        assert!(
            selection
                .failures()
                .iter()
                .all(|f| matches!(f.error, Error::Configuration { .. }))
        );
    }

    #[test]
    fn versioned_store_needs_a_token() {
        let resolver = CredentialResolver::new().with_env([("GITHUB_REPO", "acme/ledger")]);
        let err = versioned_store(&StoreConfig::default(), &resolver).err().unwrap();
        assert!(matches!(
            err,
            Error::Configuration {
                backend: BackendKind::VersionedFile,
                ..
            }
        ));
    }
}
