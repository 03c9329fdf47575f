use core::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// The stores a [`SequenceBackend`] can be built on.
///
/// [`SequenceBackend`]: crate::SequenceBackend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendKind {
    /// Spreadsheet-style row store.
    #[serde(rename = "tabular")]
    RemoteTabular,
    /// Relational store with server-side increment procedures.
    #[serde(rename = "rpc")]
    RemoteRpc,
    /// A single JSON file in a version-controlled repository.
    #[serde(rename = "versioned")]
    VersionedFile,
    /// A JSON file on local disk.
    #[serde(rename = "local")]
    LocalFile,
}

impl BackendKind {
    pub const ALL: [Self; 4] = [
        Self::RemoteTabular,
        Self::RemoteRpc,
        Self::VersionedFile,
        Self::LocalFile,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::RemoteTabular => "tabular",
            Self::RemoteRpc => "rpc",
            Self::VersionedFile => "versioned",
            Self::LocalFile => "local",
        }
    }

    /// Whether the store itself serialises increments.
    ///
    /// Only the RPC store runs read-increment-write inside the store. The
    /// tabular and versioned stores can lose an increment to a concurrent
    /// writer, and the local file has no cross-process protection.
    pub const fn is_atomic(self) -> bool {
        matches!(self, Self::RemoteRpc)
    }

    pub const fn is_remote(self) -> bool {
        !matches!(self, Self::LocalFile)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown backend `{s}` (expected tabular, rpc, versioned or local)")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("sheets".parse::<BackendKind>().is_err());
    }

    #[test]
    fn only_rpc_is_atomic() {
        let atomic: Vec<_> = BackendKind::ALL.into_iter().filter(|k| k.is_atomic()).collect();
        assert_eq!(atomic, vec![BackendKind::RemoteRpc]);
        assert!(!BackendKind::LocalFile.is_remote());
    }
}
