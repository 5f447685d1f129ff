// ABOUTME: Release version tags assigned at build time.
// ABOUTME: Timestamp-based tags, optionally suffixed with a short commit hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionTagError {
    #[error("version tag cannot be empty")]
    Empty,

    #[error("version tag exceeds maximum length of 128 characters")]
    TooLong,

    #[error("version tag cannot start with '{0}'")]
    InvalidStart(char),

    #[error("invalid character in version tag: '{0}'")]
    InvalidChar(char),
}

/// An immutable release identifier, valid as a container image tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn new(value: &str) -> Result<Self, VersionTagError> {
        let first = value.chars().next().ok_or(VersionTagError::Empty)?;
        if value.len() > 128 {
            return Err(VersionTagError::TooLong);
        }
        if first == '.' || first == '-' {
            return Err(VersionTagError::InvalidStart(first));
        }
        if let Some(c) = value
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
        {
            return Err(VersionTagError::InvalidChar(c));
        }
        Ok(Self(value.to_string()))
    }

    /// Derive a tag from the build time and, when known, the source commit.
    pub fn generate(now: DateTime<Utc>, commit: Option<&str>) -> Self {
        let stamp = now.format("%Y%m%d-%H%M%S").to_string();
        let commit: Option<String> = commit.map(|c| {
            c.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .take(12)
                .collect()
        });
        match commit {
            Some(c) if !c.is_empty() => Self(format!("{}-{}", stamp, c)),
            _ => Self(stamp),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for VersionTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VersionTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        VersionTag::new(&s).map_err(serde::de::Error::custom)
    }
}
