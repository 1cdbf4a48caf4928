//! Equality-based label selectors
//!
//! Supports the subset of the Kubernetes selector grammar the controller
//! emits: `key=value`, `key==value`, `key!=value`, `key` and `!key`,
//! joined with commas.

use std::collections::BTreeMap;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

/// Parsed label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Parse a selector string. An empty string selects everything.
    pub fn parse(selector: &str) -> Result<Self, StoreError> {
        let mut requirements = Vec::new();
        for term in selector.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let requirement = if let Some((key, value)) = term.split_once("!=") {
                Requirement::NotEquals(valid_key(key, term)?, value.trim().to_string())
            } else if let Some((key, value)) = term.split_once("==") {
                Requirement::Equals(valid_key(key, term)?, value.trim().to_string())
            } else if let Some((key, value)) = term.split_once('=') {
                Requirement::Equals(valid_key(key, term)?, value.trim().to_string())
            } else if let Some(key) = term.strip_prefix('!') {
                Requirement::DoesNotExist(valid_key(key, term)?)
            } else {
                Requirement::Exists(valid_key(term, term)?)
            };
            requirements.push(requirement);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|requirement| match requirement {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        })
    }
}

fn valid_key(key: &str, term: &str) -> Result<String, StoreError> {
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(StoreError::InvalidObject(format!(
            "invalid label selector term '{term}'"
        )));
    }
    Ok(key.to_string())
}

/// Render a label map as an equality selector (`k1=v1,k2=v2`), keys sorted.
pub fn format_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
