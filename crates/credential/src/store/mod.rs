//! Credential store - high-level API composing storage, providers, cache,
//! and template resolution

pub mod cache;
mod refresh;
#[allow(clippy::module_inception)]
mod store;

pub use cache::{CacheConfig, CacheStats};
pub use store::{CredentialStore, CredentialStoreBuilder};
