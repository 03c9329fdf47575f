use std::sync::Arc;

use serde::Serialize;

use crate::{BackendKind, ContentStore, MergedValue, Result, SequenceBackend, VersionedFileStore};

/// Outcome of one [`SequenceSync::run`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub source: BackendKind,
    /// Counters read from the source.
    pub scanned: usize,
    /// Counters the versioned store was behind on.
    pub changed: Vec<MergedValue>,
}

impl SyncReport {
    /// Whether a commit was made.
    pub fn committed(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// Pushes counters from a source backend, normally the local file, into the
/// versioned store.
///
/// Counters are merged by maximum so the versioned copy never moves
/// backwards; all changes go into a single commit.
pub struct SequenceSync<C> {
    source: Arc<dyn SequenceBackend>,
    target: VersionedFileStore<C>,
}

impl<C> SequenceSync<C>
where
    C: ContentStore,
{
    pub fn new(source: Arc<dyn SequenceBackend>, target: VersionedFileStore<C>) -> Self {
        Self { source, target }
    }

    pub fn target(&self) -> &VersionedFileStore<C> {
        &self.target
    }

    pub fn run(&self) -> Result<SyncReport> {
        let values = self.source.list_all()?;
        self.target.initialize()?;
        let changed = self.target.merge_max(&values)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            source = %self.source.kind(),
            scanned = values.len(),
            changed = changed.len(),
            "synchronised sequences"
        );
        Ok(SyncReport {
            source: self.source.kind(),
            scanned: values.len(),
            changed,
        })
    }
}
