//! Core types for credential management

mod error;
mod id;
mod key;
mod object;
mod usage;

pub use error::{CredentialError, Result};
pub use id::CredentialId;
pub use key::CredentialKey;
pub use object::{CredentialKind, CredentialObject, STATIC_PROVIDER_ID};
pub use usage::CredentialUsageSpec;

// Re-exports from utils
pub use crate::utils::SecretString;
