//! Error types for sequence allocation.
//!
//! This module defines the central [`Error`] enum shared by every backend
//! adapter, the prober and the [`SequenceManager`].
//!
//! ## Error Cases
//! - `Configuration`: a backend is missing credentials or settings. The prober
//!   falls through to the next candidate.
//! - `Transient`: a network or store failure during a call. Retried locally.
//! - `Conflict`: an optimistic-concurrency rejection. Retried with a refetch.
//! - `Corrupt`: stored data exists but cannot be decoded. Never retried.
//! - `CodeTables`: the code tables file is unreadable or malformed.
//! - `Validation`: a code combination produces an over-long document number.
//! - `SequenceExhausted`: a counter no longer fits the fixed digit width.
//! - `Rewind`: an administrative set would lower a counter.
//! - `RetriesExhausted`: the retry budget was spent; wraps the last failure.
//! - `DeadlineExceeded`: the caller's deadline elapsed before a result.
//!
//! [`SequenceManager`]: crate::SequenceManager

use crate::BackendKind;

/// A result type defaulting to [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `dcseq` can produce.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or invalid credentials/configuration for a backend.
    #[error("{backend} backend is not configured: {reason}")]
    Configuration { backend: BackendKind, reason: String },

    /// A call to the store failed in a way that may succeed on retry.
    #[error("{backend} backend request failed: {reason}")]
    Transient { backend: BackendKind, reason: String },

    /// The store rejected a write because the data changed since it was read.
    #[error("{backend} backend rejected a stale write for `{key}`")]
    Conflict { backend: BackendKind, key: String },

    /// The store returned data that could not be decoded.
    #[error("{backend} backend returned unreadable data: {reason}")]
    Corrupt { backend: BackendKind, reason: String },

    /// The entity/facility/hub code tables could not be loaded.
    #[error("invalid code tables: {reason}")]
    CodeTables { reason: String },

    /// A formatted document number would exceed the length limit.
    #[error("document number `{number}` is {len} characters long (limit {max})")]
    Validation {
        number: String,
        len: usize,
        max: usize,
    },

    /// The counter outgrew the fixed-width numeric part of the number.
    #[error("sequence `{key}` reached {value}, which does not fit the document number")]
    SequenceExhausted { key: String, value: u64 },

    /// An administrative set would move a counter backwards.
    #[error("refusing to lower `{key}` from {current} to {requested}")]
    Rewind {
        key: String,
        current: u64,
        requested: u64,
    },

    /// Every retry attempt failed; `last` is the final failure.
    #[error("{backend} backend gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        backend: BackendKind,
        attempts: u32,
        last: Box<Error>,
    },

    /// The caller's deadline elapsed before the operation could finish.
    #[error("{backend} backend ran out of time after {attempts} attempts")]
    DeadlineExceeded { backend: BackendKind, attempts: u32 },
}

impl Error {
    pub(crate) fn configuration(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::Configuration {
            backend,
            reason: reason.into(),
        }
    }

    pub(crate) fn transient(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::Transient {
            backend,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            backend,
            reason: reason.into(),
        }
    }

    /// Whether another attempt of the same call may succeed.
    ///
    /// Only transient store failures and optimistic-concurrency conflicts are
    /// retryable. Everything else reflects configuration or data problems that
    /// a retry cannot fix.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Conflict { .. })
    }

    /// The backend the error originated from, when there is one.
    pub const fn backend(&self) -> Option<BackendKind> {
        match self {
            Self::Configuration { backend, .. }
            | Self::Transient { backend, .. }
            | Self::Conflict { backend, .. }
            | Self::Corrupt { backend, .. }
            | Self::RetriesExhausted { backend, .. }
            | Self::DeadlineExceeded { backend, .. } => Some(*backend),
            Self::CodeTables { .. }
            | Self::Validation { .. }
            | Self::SequenceExhausted { .. }
            | Self::Rewind { .. } => None,
        }
    }
}
