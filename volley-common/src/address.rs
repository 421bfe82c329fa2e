//! Email address parsing and syntactic validation
//!
//! Dispatch only ever deals with bare mailboxes (`local@domain`), so
//! this is deliberately far short of full RFC 5322: no display names,
//! no comments, no quoted locals. An address that fails here is not
//! routable by any relay we talk to.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing an email address
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The address has no `@` separator, or more than the local part
    /// allows.
    #[error("Missing or misplaced '@' in address: {0}")]
    MissingSeparator(String),

    /// The local part is empty or too long (64 octets per RFC 5321).
    #[error("Invalid local part in address: {0}")]
    InvalidLocalPart(String),

    /// The domain is empty, too long, or contains forbidden characters.
    #[error("Invalid domain in address: {0}")]
    InvalidDomain(String),

    /// The address contains whitespace or control characters.
    #[error("Address contains illegal characters: {0}")]
    IllegalCharacters(String),
}

/// A syntactically valid bare email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EmailAddress {
    local: String,
    domain: String,
}

impl EmailAddress {
    /// Parse and validate a bare `local@domain` address
    ///
    /// # Errors
    /// Returns an [`AddressError`] describing the first validation
    /// failure encountered.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();

        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(AddressError::IllegalCharacters(raw.to_string()));
        }

        let (local, domain) = trimmed
            .rsplit_once('@')
            .ok_or_else(|| AddressError::MissingSeparator(raw.to_string()))?;

        if local.is_empty() || local.len() > 64 || local.contains('@') {
            return Err(AddressError::InvalidLocalPart(raw.to_string()));
        }

        if domain.is_empty()
            || domain.len() > 255
            || domain.starts_with('.')
            || domain.ends_with('.')
            || !domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(AddressError::InvalidDomain(raw.to_string()));
        }

        Ok(Self {
            local: local.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    /// The part before the `@`
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.local
    }

    /// The part after the `@`, lowercased
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for EmailAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EmailAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
