//! SQL identifier validation
//!
//! DDL cannot take bind parameters, so every name that ends up inside a
//! statement passes through one of these types first.

use std::fmt;
use thiserror::Error;

/// PostgreSQL truncates identifiers longer than NAMEDATALEN - 1.
pub const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} {value:?}: {reason}")]
pub struct IdentifierError {
    pub kind: &'static str,
    pub value: String,
    pub reason: &'static str,
}

impl IdentifierError {
    fn new(kind: &'static str, value: &str, reason: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            reason,
        }
    }
}

fn check_length(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
    if value.is_empty() {
        return Err(IdentifierError::new(kind, value, "must not be empty"));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::new(
            kind,
            value,
            "must be at most 63 bytes",
        ));
    }
    Ok(())
}

/// A role, database or publication name.
///
/// ASCII letters, digits and underscores, not starting with a digit.
/// Rendered double-quoted so reserved words and mixed case survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(kind: &'static str, value: &str) -> Result<Self, IdentifierError> {
        check_length(kind, value)?;

        if value.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(IdentifierError::new(
                kind,
                value,
                "must not start with a digit",
            ));
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IdentifierError::new(
                kind,
                value,
                "may only contain ASCII letters, digits and underscores",
            ));
        }

        Ok(Self(value.to_string()))
    }

    /// The identifier as it appears in SQL text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A replication slot name.
///
/// PostgreSQL only accepts lower case letters, digits and underscores here,
/// and takes the name as a string argument rather than an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotName(String);

impl SlotName {
    pub fn parse(value: &str) -> Result<Self, IdentifierError> {
        const KIND: &str = "replication slot name";
        check_length(KIND, value)?;

        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(IdentifierError::new(
                KIND,
                value,
                "may only contain lower case letters, digits and underscores",
            ));
        }

        Ok(Self(value.to_string()))
    }

    /// The slot name as a SQL string literal.
    pub fn literal(&self) -> String {
        format!("'{}'", self.0)
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
