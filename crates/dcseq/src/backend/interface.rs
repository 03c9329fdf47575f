use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{BackendKind, Deadline, Result, SequenceKey};

/// A minimal interface over a store that persists named counters.
///
/// Implementations must be shareable across threads. They are not required to
/// serialise concurrent [`Self::next_value`] calls; see
/// [`BackendKind::is_atomic`] for which stores do.
pub trait SequenceBackend: Send + Sync {
    /// Which store this is.
    fn kind(&self) -> BackendKind;

    /// Increments and persists the counter for `key`, creating it at the floor
    /// if absent, and returns the new value.
    ///
    /// Retryable failures are retried according to the backend's policy, but
    /// no attempt or backoff is started past `deadline`.
    fn next_value_until(&self, key: &SequenceKey, deadline: Deadline) -> Result<u64>;

    /// [`Self::next_value_until`] without a deadline.
    fn next_value(&self, key: &SequenceKey) -> Result<u64> {
        self.next_value_until(key, Deadline::never())
    }

    /// Reads the counter without changing it. Unknown keys report the floor.
    fn current_value(&self, key: &SequenceKey) -> Result<u64>;

    /// Every counter the store knows about.
    fn list_all(&self) -> Result<BTreeMap<SequenceKey, u64>>;

    /// Administrative override that bypasses the normal increment.
    fn set_value(&self, key: &SequenceKey, value: u64) -> Result<()>;
}

impl<B> SequenceBackend for Arc<B>
where
    B: SequenceBackend + ?Sized,
{
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn next_value_until(&self, key: &SequenceKey, deadline: Deadline) -> Result<u64> {
        (**self).next_value_until(key, deadline)
    }

    fn current_value(&self, key: &SequenceKey) -> Result<u64> {
        (**self).current_value(key)
    }

    fn list_all(&self) -> Result<BTreeMap<SequenceKey, u64>> {
        (**self).list_all()
    }

    fn set_value(&self, key: &SequenceKey, value: u64) -> Result<()> {
        (**self).set_value(key, value)
    }
}
