//! Credential reference templates
//!
//! A template embeds references of the form `{{id}}` or `{{id.key}}`, where
//! `id` and `key` are runs of `[A-Za-z0-9_]`. This module owns the grammar:
//! extraction, syntax validation, and pure substitution against a snapshot
//! the caller already fetched. Resolution against live credentials lives on
//! [`CredentialStore`](crate::store::CredentialStore), which snapshots each
//! referenced credential once per call so repeated references observe one
//! consistent value.

use regex::Regex;
use std::sync::LazyLock;

static TEMPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z0-9_]+)(?:\.([A-Za-z0-9_]+))?\}\}")
        .expect("template reference pattern compiles")
});

/// One parsed `{{id[.key]}}` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateRef {
    /// Referenced credential identifier
    pub id: String,

    /// Referenced key; `None` selects the credential's default key
    pub key: Option<String>,
}

/// True iff the text contains at least one credential reference
pub fn has_templates(text: &str) -> bool {
    TEMPLATE_RE.is_match(text)
}

/// Extracts references in order of appearance (duplicates preserved)
///
/// Used for static validation of usage specs and by the store to decide
/// which credentials to snapshot before substituting.
pub fn extract_references(text: &str) -> Vec<TemplateRef> {
    TEMPLATE_RE
        .captures_iter(text)
        .map(|caps| TemplateRef {
            id: caps[1].to_string(),
            key: caps.get(2).map(|m| m.as_str().to_string()),
        })
        .collect()
}

/// Rejects text where a `{{` opener does not start a well-formed reference
///
/// # Errors
///
/// Returns a human-readable reason (the offending text is a template, not a
/// secret, so quoting it is safe).
pub fn validate_syntax(text: &str) -> Result<(), String> {
    let starts: Vec<usize> = TEMPLATE_RE.find_iter(text).map(|m| m.start()).collect();
    for (pos, _) in text.match_indices("{{") {
        if !starts.contains(&pos) {
            let snippet: String = text[pos..].chars().take(24).collect();
            return Err(format!("malformed credential reference at `{snippet}`"));
        }
    }
    Ok(())
}

/// Substitutes each reference using the caller's lookup
///
/// The lookup returns `Ok(Some(value))` to substitute, `Ok(None)` to leave
/// the reference text verbatim (the missing-credential-tolerated case), or
/// `Err` to abort the whole substitution.
pub fn substitute<E>(
    text: &str,
    mut lookup: impl FnMut(&TemplateRef) -> Result<Option<String>, E>,
) -> Result<String, E> {
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;

    for caps in TEMPLATE_RE.captures_iter(text) {
        let matched = caps.get(0).expect("capture 0 is the whole match");
        let reference = TemplateRef {
            id: caps[1].to_string(),
            key: caps.get(2).map(|m| m.as_str().to_string()),
        };

        output.push_str(&text[cursor..matched.start()]);
        match lookup(&reference)? {
            Some(value) => output.push_str(&value),
            None => output.push_str(matched.as_str()),
        }
        cursor = matched.end();
    }

    output.push_str(&text[cursor..]);
    Ok(output)
}
