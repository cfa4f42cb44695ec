//! Tool-side declaration of how a credential is used
//!
//! A usage spec holds *references* (`{{id.key}}` templates), never values:
//! the store holds the values, tools hold the placement. Neither side sees
//! the other's internals.

use crate::core::{CredentialError, CredentialId, CredentialObject};
use crate::template;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declares which credential a tool needs and where its keys are placed in
/// outbound requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialUsageSpec {
    /// Target credential identifier
    pub credential_id: CredentialId,

    /// Key names the tool requires to be present in the credential
    #[serde(default)]
    pub required_keys: Vec<String>,

    /// Header name → template string
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Query parameter name → template string
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_params: HashMap<String, String>,

    /// Body field name → template string
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub body_fields: HashMap<String, String>,

    /// Whether the tool refuses to run without this credential
    #[serde(default)]
    pub required: bool,

    /// Human-readable description of why the tool needs the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Where a human can obtain the credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_url: Option<String>,
}

impl CredentialUsageSpec {
    /// Creates an empty spec targeting the given credential
    pub fn new(credential_id: CredentialId) -> Self {
        Self {
            credential_id,
            required_keys: Vec::new(),
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body_fields: HashMap::new(),
            required: false,
            description: None,
            help_url: None,
        }
    }

    /// Declares a required key (builder pattern)
    pub fn with_required_key(mut self, name: impl Into<String>) -> Self {
        self.required_keys.push(name.into());
        self
    }

    /// Declares a header template (builder pattern)
    pub fn with_header(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.headers.insert(name.into(), template.into());
        self
    }

    /// Declares a query-parameter template (builder pattern)
    pub fn with_query_param(
        mut self,
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.query_params.insert(name.into(), template.into());
        self
    }

    /// Declares a body-field template (builder pattern)
    pub fn with_body_field(
        mut self,
        name: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        self.body_fields.insert(name.into(), template.into());
        self
    }

    /// Marks the credential as mandatory for the tool (builder pattern)
    pub fn mandatory(mut self) -> Self {
        self.required = true;
        self
    }

    /// Required key names missing from the given credential
    pub fn missing_keys(&self, credential: &CredentialObject) -> Vec<String> {
        self.required_keys
            .iter()
            .filter(|name| !credential.has_key(name))
            .cloned()
            .collect()
    }

    /// Checks every template map for malformed reference syntax
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Validation`] naming the offending template.
    pub fn validate_templates(&self) -> Result<(), CredentialError> {
        let maps = [
            ("header", &self.headers),
            ("query parameter", &self.query_params),
            ("body field", &self.body_fields),
        ];
        for (kind, map) in maps {
            for (name, value) in map {
                template::validate_syntax(value).map_err(|reason| {
                    CredentialError::validation(format!(
                        "{kind} `{name}` of usage spec for `{}`: {reason}",
                        self.credential_id
                    ))
                })?;
            }
        }
        Ok(())
    }
}
