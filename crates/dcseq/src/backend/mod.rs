mod github;
pub(crate) mod http;
mod interface;
mod kind;
mod local;
mod rpc;
mod sheets;
mod tabular;
mod versioned;

#[cfg(test)]
mod tests;

pub use github::*;
pub use interface::*;
pub use kind::*;
pub use local::*;
pub use rpc::*;
pub use sheets::*;
pub use tabular::*;
pub use versioned::*;
