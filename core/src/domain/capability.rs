// Copyright (c) 2026 Guidepost AI
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A named category of request a worker can serve.
///
/// Capability names are validated once at the boundary (DNS label format:
/// lowercase alphanumeric with hyphens) and shared as cheap `Arc<str>`
/// handles afterwards, so routing never re-parses strings per request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Capability(Arc<str>);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("capability name cannot be empty")]
    Empty,

    #[error("invalid capability name '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidName(String),
}

impl Capability {
    pub fn parse(name: &str) -> Result<Self, CapabilityError> {
        if name.is_empty() {
            return Err(CapabilityError::Empty);
        }
        for ch in name.chars() {
            if !ch.is_ascii_lowercase() && !ch.is_ascii_digit() && ch != '-' {
                return Err(CapabilityError::InvalidName(name.to_string()));
            }
        }
        if name.starts_with('-') || name.ends_with('-') {
            return Err(CapabilityError::InvalidName(name.to_string()));
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Placeholder for requests that arrive without any declared
    /// capability; no worker can ever register it meaningfully.
    pub fn unknown() -> Self {
        Self(Arc::from("unknown"))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Capability::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_names() {
        assert!(Capability::parse("entity-guidance").is_ok());
        assert!(Capability::parse("security-guidance").is_ok());
        assert!(Capability::parse("a1").is_ok());
    }

    #[test]
    fn test_parse_rejects_invalid_names() {
        assert_eq!(Capability::parse(""), Err(CapabilityError::Empty));
        assert!(Capability::parse("Entity").is_err());
        assert!(Capability::parse("has space").is_err());
        assert!(Capability::parse("-leading").is_err());
        assert!(Capability::parse("trailing-").is_err());
    }

    #[test]
    fn test_serializes_as_bare_string() {
        let capability = Capability::parse("entity-guidance").unwrap();
        assert_eq!(
            serde_json::to_value(&capability).unwrap(),
            serde_json::json!("entity-guidance")
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<Capability, _> = serde_json::from_str("\"deployment-guidance\"");
        assert!(ok.is_ok());

        let bad: Result<Capability, _> = serde_json::from_str("\"Not Valid\"");
        assert!(bad.is_err());
    }
}
