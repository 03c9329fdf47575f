use core::time::Duration;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    BackendKind, CodeTables, CredentialResolver, Deadline, DocumentNumber, DocumentPrefix, Error,
    HealthReport, MAX_DOCUMENT_NUMBER_LEN, MAX_SEQUENCE_VALUE, Prober, Result, Selection,
    SequenceBackend, SequenceKey, StoreConfig,
};

/// Bookkeeping entries kept for unconfirmed [`SequenceManager::reserve`]
/// calls. The oldest entry is dropped once the limit is reached.
pub const MAX_PENDING_RESERVATIONS: usize = 1024;

/// What [`SequenceManager::allocate`] does when the backend cannot increment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Return the error.
    #[default]
    Fail,
    /// Issue `current + 1` without persisting it, flagged in the
    /// [`Allocation`]. The same number can be issued again later.
    Unpersisted,
}

/// A document number together with how it was obtained.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub number: DocumentNumber,
    pub key: SequenceKey,
    /// `false` for emergency numbers the backend never recorded.
    pub persisted: bool,
}

/// Issues document numbers from one shared backend.
///
/// The backend is chosen before the manager is built (normally by a
/// [`Prober`]) and never changes afterwards. Calls are not serialised here:
/// concurrent callers rely on the backend's own guarantees, see
/// [`BackendKind::is_atomic`].
pub struct SequenceManager {
    backend: Arc<dyn SequenceBackend>,
    tables: CodeTables,
    fallback: FallbackPolicy,
    call_timeout: Option<Duration>,
    probe_failures: Vec<String>,
    reservations: Mutex<VecDeque<(String, SequenceKey)>>,
}

impl SequenceManager {
    pub fn new(backend: Arc<dyn SequenceBackend>, tables: CodeTables) -> Self {
        Self {
            backend,
            tables,
            fallback: FallbackPolicy::Fail,
            call_timeout: None,
            probe_failures: Vec::new(),
            reservations: Mutex::new(VecDeque::new()),
        }
    }

    /// Uses the selected backend and keeps the probe failures for
    /// [`Self::health_report`].
    pub fn from_selection(selection: Selection, tables: CodeTables) -> Self {
        let (backend, failures) = selection.into_parts();
        let mut manager = Self::new(backend, tables);
        manager.probe_failures = failures
            .into_iter()
            .map(|f| format!("{} backend skipped: {}", f.kind, f.error))
            .collect();
        manager
    }

    /// Probes the default chain described by `config` and builds a manager
    /// on the result.
    pub fn from_config(
        config: &StoreConfig,
        resolver: &CredentialResolver,
        tables: CodeTables,
    ) -> Self {
        let selection = Prober::default_chain(config, resolver).select();
        Self::from_selection(selection, tables)
            .with_fallback(config.fallback)
            .with_call_timeout(config.call_timeout)
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Bounds each increment, retries included.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn backend(&self) -> &Arc<dyn SequenceBackend> {
        &self.backend
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn tables(&self) -> &CodeTables {
        &self.tables
    }

    pub fn build_key(
        &self,
        entity_name: &str,
        facility_name: &str,
        hub_value: Option<&str>,
    ) -> SequenceKey {
        self.tables.build_key(entity_name, facility_name, hub_value)
    }

    fn deadline(&self) -> Deadline {
        self.call_timeout.map_or(Deadline::never(), Deadline::after)
    }

    /// Prefix for the given names. Hub codes outside the tables are accepted,
    /// so the length bound is checked here as well as in
    /// [`CodeTables::validate`], before any counter moves.
    fn prefix(
        &self,
        entity_name: &str,
        facility_name: &str,
        hub_value: Option<&str>,
    ) -> Result<DocumentPrefix> {
        let prefix = self.tables.prefix(entity_name, facility_name, hub_value);
        if prefix.max_number_len() > MAX_DOCUMENT_NUMBER_LEN {
            let widest = prefix.format(MAX_SEQUENCE_VALUE);
            return Err(Error::Validation {
                len: widest.len(),
                number: widest.into_string(),
                max: MAX_DOCUMENT_NUMBER_LEN,
            });
        }
        Ok(prefix)
    }

    fn format(prefix: &DocumentPrefix, key: &SequenceKey, value: u64) -> Result<DocumentNumber> {
        if value > MAX_SEQUENCE_VALUE {
            return Err(Error::SequenceExhausted {
                key: key.to_string(),
                value,
            });
        }
        Ok(prefix.format(value))
    }

    /// Increments the counter for the given codes and returns the next
    /// document number. Never invents a number: any backend failure is
    /// returned.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub fn generate(
        &self,
        entity_name: &str,
        facility_name: &str,
        hub_value: Option<&str>,
    ) -> Result<DocumentNumber> {
        let prefix = self.prefix(entity_name, facility_name, hub_value)?;
        let key = prefix.key();
        let value = self.backend.next_value_until(&key, self.deadline())?;
        let number = Self::format(&prefix, &key, value)?;

        #[cfg(feature = "tracing")]
        tracing::info!(%number, %key, backend = %self.backend.kind(), "issued document number");
        Ok(number)
    }

    /// [`Self::generate`], applying the configured [`FallbackPolicy`] when
    /// the backend cannot increment.
    pub fn allocate(
        &self,
        entity_name: &str,
        facility_name: &str,
        hub_value: Option<&str>,
    ) -> Result<Allocation> {
        let prefix = self.prefix(entity_name, facility_name, hub_value)?;
        let key = prefix.key();

        let err = match self.backend.next_value_until(&key, self.deadline()) {
            Ok(value) => {
                return Ok(Allocation {
                    number: Self::format(&prefix, &key, value)?,
                    key,
                    persisted: true,
                });
            }
            Err(err) => err,
        };
        if self.fallback == FallbackPolicy::Fail {
            return Err(err);
        }

        // The read can fail for the same reason the increment did; report
        // the original failure then.
        let current = self.backend.current_value(&key).map_err(|_| err)?;
        let number = Self::format(&prefix, &key, current + 1)?;

        #[cfg(feature = "tracing")]
        tracing::warn!(
            %number,
            %key,
            backend = %self.backend.kind(),
            "issued unpersisted emergency document number"
        );
        Ok(Allocation {
            number,
            key,
            persisted: false,
        })
    }

    /// Same as [`Self::generate`]; the number is already persisted when this
    /// returns. A bookkeeping entry is kept until [`Self::confirm`], or until
    /// [`MAX_PENDING_RESERVATIONS`] newer ones push it out.
    pub fn reserve(
        &self,
        entity_name: &str,
        facility_name: &str,
        hub_value: Option<&str>,
    ) -> Result<DocumentNumber> {
        let number = self.generate(entity_name, facility_name, hub_value)?;
        let key = self.build_key(entity_name, facility_name, hub_value);
        let mut pending = self.reservations.lock();
        if pending.len() >= MAX_PENDING_RESERVATIONS {
            pending.pop_front();
        }
        pending.push_back((number.as_str().to_owned(), key));
        Ok(number)
    }

    /// Drops the bookkeeping entry for `number`, if any. The return value
    /// says nothing about persistence: the number was persisted by
    /// [`Self::reserve`].
    pub fn confirm(&self, number: &str) -> bool {
        let mut pending = self.reservations.lock();
        match pending.iter().position(|(reserved, _)| reserved == number) {
            Some(index) => pending.remove(index).is_some(),
            None => false,
        }
    }

    pub fn pending_reservations(&self) -> usize {
        self.reservations.lock().len()
    }

    pub fn current_value(&self, key: &SequenceKey) -> Result<u64> {
        self.backend.current_value(key)
    }

    pub fn list(&self) -> Result<BTreeMap<SequenceKey, u64>> {
        self.backend.list_all()
    }

    /// Administrative override. Refuses to move a counter backwards, which
    /// would re-issue numbers.
    pub fn set_value(&self, key: &SequenceKey, value: u64) -> Result<()> {
        let current = self.backend.current_value(key)?;
        if value < current {
            return Err(Error::Rewind {
                key: key.to_string(),
                current,
                requested: value,
            });
        }
        self.force_set_value(key, value)
    }

    /// Administrative override without the backwards check.
    pub fn force_set_value(&self, key: &SequenceKey, value: u64) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::warn!(%key, value, backend = %self.backend.kind(), "sequence set manually");
        self.backend.set_value(key, value)
    }

    /// Never fails: backend errors degrade the report instead.
    pub fn health_report(&self) -> HealthReport {
        let kind = self.backend.kind();
        let mut report = HealthReport::new(kind);

        if !kind.is_remote() {
            report.degrade("using the local fallback store; no remote backend answered");
        } else if !kind.is_atomic() {
            report.warn(format!(
                "{kind} backend increments are not atomic; concurrent writers can collide"
            ));
        }
        for failure in &self.probe_failures {
            report.warn(failure.clone());
        }

        match self.backend.list_all() {
            Ok(sequences) => {
                if sequences.is_empty() {
                    report.warn("no sequences found");
                }
                report.set_sequences(sequences);
            }
            Err(err) => report.degrade(format!("cannot list sequences: {err}")),
        }

        #[cfg(feature = "tracing")]
        if !report.is_healthy() {
            tracing::warn!(
                backend = %kind,
                warnings = ?report.warnings,
                "sequence allocator degraded"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryRpc, UnreachableBackend};
    use crate::{HealthStatus, LocalFileStore, RemoteRpcStore};

    fn rpc_manager() -> SequenceManager {
        SequenceManager::new(
            Arc::new(RemoteRpcStore::new(MemoryRpc::default())),
            CodeTables::default(),
        )
    }

    #[test]
    fn bodega_sutlej_scenario() {
        let manager = rpc_manager();
        let key = SequenceKey::new("bddcsg_seq");
        assert_eq!(manager.current_value(&key).unwrap(), 300);

        assert_eq!(
            manager.generate("BODEGA", "Sutlej/Gomati", None).unwrap(),
            "BDDCSG000301"
        );
        assert_eq!(
            manager.generate("BODEGA", "Sutlej/Gomati", None).unwrap(),
            "BDDCSG000302"
        );
    }

    #[test]
    fn hub_numbers_use_their_own_counter() {
        let manager = rpc_manager();
        let hub = manager
            .generate("AMOLAKCHAND", "FC-Hyderabad", Some("HYD_NCH"))
            .unwrap();
        let plain = manager.generate("AMOLAKCHAND", "FC-Hyderabad", None).unwrap();
        assert_eq!(hub, "AKDCHYDNCH000301");
        assert_eq!(plain, "AKDCHYD000301");
    }

    #[test]
    fn generate_surfaces_backend_failures() {
        let manager = SequenceManager::new(
            Arc::new(UnreachableBackend::transient(BackendKind::RemoteRpc)),
            CodeTables::default(),
        )
        .with_fallback(FallbackPolicy::Unpersisted);

        let err = manager.generate("BODEGA", "Arihant", None).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn unpersisted_fallback_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalFileStore::new(dir.path().join("state.json"));
        local.set_value(&SequenceKey::new("akdcah_seq"), 410).unwrap();

        // Increments fail, reads succeed.
        struct ReadOnly(LocalFileStore);
        impl SequenceBackend for ReadOnly {
            fn kind(&self) -> BackendKind {
                BackendKind::RemoteTabular
            }
            fn next_value_until(&self, _: &SequenceKey, _: Deadline) -> Result<u64> {
                Err(Error::transient(BackendKind::RemoteTabular, "quota exceeded"))
            }
            fn current_value(&self, key: &SequenceKey) -> Result<u64> {
                self.0.current_value(key)
            }
            fn list_all(&self) -> Result<BTreeMap<SequenceKey, u64>> {
                self.0.list_all()
            }
            fn set_value(&self, key: &SequenceKey, value: u64) -> Result<()> {
                self.0.set_value(key, value)
            }
        }

        let backend = Arc::new(ReadOnly(local));
        let strict = SequenceManager::new(backend.clone(), CodeTables::default());
        assert!(strict.allocate("AMOLAKCHAND", "Arihant", None).is_err());

        let lenient = strict.with_fallback(FallbackPolicy::Unpersisted);
        let allocation = lenient.allocate("AMOLAKCHAND", "Arihant", None).unwrap();
        assert!(!allocation.persisted);
        assert_eq!(allocation.number, "AKDCAH000411");
        assert_eq!(backend.current_value(&allocation.key).unwrap(), 410);
    }

    #[test]
    fn persisted_allocation() {
        let allocation = rpc_manager().allocate("SOURCINGBEE", "Vikrant", None).unwrap();
        assert!(allocation.persisted);
        assert_eq!(allocation.number, "SBDCAH000301");
        assert_eq!(allocation.key, SequenceKey::new("sbdcah_seq"));
    }

    #[test]
    fn reserve_increments_immediately_and_confirm_is_bookkeeping() {
        let manager = rpc_manager();
        let number = manager.reserve("BODEGA", "Arihant", None).unwrap();
        assert_eq!(number, "BDDCAH000301");
        assert_eq!(manager.current_value(&SequenceKey::new("bddcah_seq")).unwrap(), 301);
        assert_eq!(manager.pending_reservations(), 1);

        assert!(manager.confirm(number.as_str()));
        assert!(!manager.confirm(number.as_str()));
        assert!(!manager.confirm("BDDCAH999999"));
        assert_eq!(manager.pending_reservations(), 0);

        assert_eq!(manager.generate("BODEGA", "Arihant", None).unwrap(), "BDDCAH000302");
    }

    #[test]
    fn unconfirmed_reservations_are_bounded() {
        let manager = rpc_manager();
        let first = manager.reserve("BODEGA", "Arihant", None).unwrap();
        let last = (0..MAX_PENDING_RESERVATIONS)
            .map(|_| manager.reserve("BODEGA", "Arihant", None).unwrap())
            .last()
            .unwrap();
        assert_eq!(manager.pending_reservations(), MAX_PENDING_RESERVATIONS);
        assert!(!manager.confirm(first.as_str()));
        assert!(manager.confirm(last.as_str()));
        assert_eq!(manager.pending_reservations(), MAX_PENDING_RESERVATIONS - 1);
    }

    #[test]
    fn unlisted_hub_that_overflows_is_rejected_before_incrementing() {
        let rpc = Arc::new(MemoryRpc::default());
        let manager = SequenceManager::new(
            Arc::new(RemoteRpcStore::new(rpc.clone())),
            CodeTables::default(),
        )
        .with_fallback(FallbackPolicy::Unpersisted);
        assert!(manager.tables().validate().is_ok());

        for err in [
            manager
                .generate("AMOLAKCHAND", "FC-Hyderabad", Some("HYD_ABCD"))
                .unwrap_err(),
            manager
                .allocate("AMOLAKCHAND", "FC-Hyderabad", Some("HYD_ABCD"))
                .unwrap_err(),
        ] {
            match err {
                Error::Validation { number, len, max } => {
                    assert_eq!(number, "AKDCHYDABCD999999");
                    assert_eq!(len, 17);
                    assert_eq!(max, MAX_DOCUMENT_NUMBER_LEN);
                }
                other => panic!("expected validation error, got {other:?}"),
            }
        }
        assert_eq!(rpc.calls(), 0);

        // Unlisted hubs that fit are still issued.
        assert_eq!(
            manager
                .generate("AMOLAKCHAND", "FC-Hyderabad", Some("HYD_ABC"))
                .unwrap(),
            "AKDCHYDABC000301"
        );
    }

    #[test]
    fn set_value_refuses_to_rewind() {
        let manager = rpc_manager();
        let key = SequenceKey::new("akdcsg_seq");
        manager.set_value(&key, 500).unwrap();

        let err = manager.set_value(&key, 450).unwrap_err();
        assert!(matches!(
            err,
            Error::Rewind {
                current: 500,
                requested: 450,
                ..
            }
        ));

        manager.force_set_value(&key, 450).unwrap();
        assert_eq!(manager.current_value(&key).unwrap(), 450);
    }

    #[test]
    fn exhausted_counter_is_an_error() {
        let manager = rpc_manager();
        let key = SequenceKey::new("sbdcsg_seq");
        manager.set_value(&key, MAX_SEQUENCE_VALUE).unwrap();
        let err = manager.generate("SOURCINGBEE", "Sutlej/Gomati", None).unwrap_err();
        assert!(matches!(err, Error::SequenceExhausted { value: 1_000_000, .. }));
    }

    #[test]
    fn health_report_never_fails() {
        let manager = SequenceManager::new(
            Arc::new(UnreachableBackend::transient(BackendKind::VersionedFile)),
            CodeTables::default(),
        );
        let report = manager.health_report();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(!report.atomic);
        assert!(report.sequences.is_empty());
        assert!(report.warnings.iter().any(|w| w.contains("not atomic")));
        assert!(report.warnings.iter().any(|w| w.contains("cannot list")));
    }

    #[test]
    fn health_report_on_rpc_backend() {
        let manager = rpc_manager();
        manager.generate("BODEGA", "Sutlej/Gomati", None).unwrap();
        let report = manager.health_report();
        assert!(report.is_healthy());
        assert!(report.atomic);
        assert_eq!(report.max_sequence, Some(301));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn local_fallback_is_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SequenceManager::new(
            Arc::new(LocalFileStore::new(dir.path().join("state.json"))),
            CodeTables::default(),
        );
        let report = manager.health_report();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.warnings.iter().any(|w| w == "no sequences found"));
    }

    #[test]
    fn expired_call_timeout_stops_before_calling() {
        let rpc = Arc::new(MemoryRpc::default());
        let manager = SequenceManager::new(
            Arc::new(RemoteRpcStore::new(rpc.clone())),
            CodeTables::default(),
        )
        .with_call_timeout(Some(Duration::ZERO));

        let err = manager.generate("BODEGA", "Arihant", None).unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
        assert_eq!(rpc.calls(), 0);
    }
}
