//! Redacting container for secret values
//!
//! Secret material lives behind [`SecretString`] so it cannot leak through
//! `Debug` output or accidental string conversion. The raw value is revealed
//! only through the explicit [`SecretString::expose_secret`] accessor.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed marker rendered in place of the secret value
const REDACTED: &str = "***REDACTED***";

/// A secret value that is zeroized on drop and redacted in `Debug` output
///
/// There is deliberately no `Display` implementation: the only way to read
/// the value is through [`SecretString::expose_secret`], which keeps every
/// exposure site visible in review.
///
/// Serde implementations exist because storage backends must persist the raw
/// value; serializing a `SecretString` is an exposure site by design.
///
/// # Examples
///
/// ```
/// use hive_credential::SecretString;
///
/// let secret = SecretString::new("ghp_123");
/// assert_eq!(format!("{secret:?}"), "SecretString(***REDACTED***)");
/// assert_eq!(secret.expose_secret(|s| s.len()), 7);
/// ```
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Wraps a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Reveals the secret to the given closure
    ///
    /// The closure-based accessor keeps the borrow scoped: the `&str` cannot
    /// outlive the call, and every call site is greppable.
    pub fn expose_secret<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        f(&self.0)
    }

    /// Length of the secret in bytes (safe to report)
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the secret is the empty string
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({REDACTED})")
    }
}

/// Constant-time comparison; timing does not reveal the matching prefix
impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SecretString {}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}
