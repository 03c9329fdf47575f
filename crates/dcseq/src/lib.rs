//! Document-number sequences for delivery challans.
//!
//! Every challan gets a number of the form `{entity}DC{facility}[{hub}]{nnnnnn}`,
//! for example `BDDCSG000301`. The numeric part comes from a persisted counter
//! per prefix that only ever moves forward.
//!
//! Counters live in one of several interchangeable stores behind the
//! [`SequenceBackend`] trait: a spreadsheet ([`RemoteTabularStore`]), a
//! relational database with increment procedures ([`RemoteRpcStore`]), a JSON
//! file in a git repository ([`VersionedFileStore`]) or a local JSON file
//! ([`LocalFileStore`]). A [`Prober`] picks the first store that answers at
//! startup and the [`SequenceManager`] issues numbers from it.
//!
//! ```no_run
//! use dcseq::{CodeTables, CredentialResolver, SequenceManager, StoreConfig};
//!
//! let config = StoreConfig::default();
//! let resolver = CredentialResolver::new().with_secrets_file(dcseq::DEFAULT_SECRETS_FILE);
//! let manager = SequenceManager::from_config(&config, &resolver, CodeTables::default());
//!
//! let number = manager.generate("BODEGA", "Sutlej/Gomati", None)?;
//! println!("{number}");
//! # Ok::<(), dcseq::Error>(())
//! ```
//!
//! ## Features
//!
//! - `tracing`: emit `tracing` events for backend selection, retries and
//!   issued numbers.

mod backend;
mod config;
mod credentials;
mod error;
mod health;
mod key;
mod manager;
mod probe;
mod record;
mod retry;
mod sync;

#[cfg(test)]
mod testing;

pub use crate::backend::*;
pub use crate::config::*;
pub use crate::credentials::*;
pub use crate::error::*;
pub use crate::health::*;
pub use crate::key::*;
pub use crate::manager::*;
pub use crate::probe::*;
pub use crate::record::*;
pub use crate::retry::*;
pub use crate::sync::*;
