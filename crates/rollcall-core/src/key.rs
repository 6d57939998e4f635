//! Identity keys: `<identifier>_<display name>`.
//!
//! The identifier (student number, employee id, ...) is the unit of
//! uniqueness; the display name is carried along for humans. Keys double as
//! file stems in the identity store, so both parts are restricted to
//! characters that are safe inside a single path component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Separator between identifier and display name.
pub const KEY_SEPARATOR: char = '_';

/// Longest key, in bytes, that still fits a 255-byte file name once the
/// store appends its `.npy` / `.jpg` extension.
pub const MAX_KEY_BYTES: usize = 251;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("identifier is empty")]
    EmptyIdentifier,
    #[error("identifier {0:?} must not contain '{KEY_SEPARATOR}'")]
    SeparatorInIdentifier(String),
    #[error("{field} {value:?} contains a path separator or NUL")]
    InvalidCharacter { field: &'static str, value: String },
    #[error("identifier and name together are {len} bytes, at most {max} allowed")]
    TooLong { len: usize, max: usize },
}

/// Composite identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityKey {
    identifier: String,
    name: String,
}

impl IdentityKey {
    /// Build a key from user input. Both parts are trimmed.
    pub fn new(identifier: &str, name: &str) -> Result<Self, KeyError> {
        let identifier = identifier.trim();
        let name = name.trim();

        validate_identifier(identifier)?;
        check_path_safe("name", name)?;

        let len = identifier.len() + KEY_SEPARATOR.len_utf8() + name.len();
        if len > MAX_KEY_BYTES {
            return Err(KeyError::TooLong {
                len,
                max: MAX_KEY_BYTES,
            });
        }

        Ok(Self {
            identifier: identifier.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse a stored key (a file stem). Splits on the first separator; a
    /// stem without one is an identifier with an empty name.
    pub fn parse(stem: &str) -> Result<Self, KeyError> {
        let (identifier, name) = stem.split_once(KEY_SEPARATOR).unwrap_or((stem, ""));
        if identifier.is_empty() {
            return Err(KeyError::EmptyIdentifier);
        }
        check_path_safe("identifier", identifier)?;
        check_path_safe("name", name)?;
        Ok(Self {
            identifier: identifier.to_string(),
            name: name.to_string(),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Validate a bare identifier as submitted by a caller (after trimming).
pub fn validate_identifier(identifier: &str) -> Result<(), KeyError> {
    if identifier.is_empty() {
        return Err(KeyError::EmptyIdentifier);
    }
    if identifier.contains(KEY_SEPARATOR) {
        return Err(KeyError::SeparatorInIdentifier(identifier.to_string()));
    }
    check_path_safe("identifier", identifier)
}

fn check_path_safe(field: &'static str, value: &str) -> Result<(), KeyError> {
    if value.contains(['/', '\\', '\0']) {
        return Err(KeyError::InvalidCharacter {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.identifier, self.name)
    }
}

impl FromStr for IdentityKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for IdentityKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IdentityKey> for String {
    fn from(key: IdentityKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_and_joins() {
        let key = IdentityKey::new("  123 ", " Alice ").unwrap();
        assert_eq!(key.identifier(), "123");
        assert_eq!(key.name(), "Alice");
        assert_eq!(key.to_string(), "123_Alice");
    }

    #[test]
    fn test_name_may_contain_separator() {
        let key = IdentityKey::new("123", "Mary_Jane").unwrap();
        assert_eq!(key.to_string(), "123_Mary_Jane");

        let parsed = IdentityKey::parse("123_Mary_Jane").unwrap();
        assert_eq!(parsed.identifier(), "123");
        assert_eq!(parsed.name(), "Mary_Jane");
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_identifier_rejects_separator() {
        assert_eq!(
            IdentityKey::new("12_3", "Alice"),
            Err(KeyError::SeparatorInIdentifier("12_3".into()))
        );
    }

    #[test]
    fn test_empty_identifier_rejected() {
        assert_eq!(IdentityKey::new("   ", "Alice"), Err(KeyError::EmptyIdentifier));
        assert_eq!(IdentityKey::parse("_Alice"), Err(KeyError::EmptyIdentifier));
    }

    #[test]
    fn test_path_separators_rejected() {
        assert!(matches!(
            IdentityKey::new("123", "../etc/passwd"),
            Err(KeyError::InvalidCharacter { field: "name", .. })
        ));
        assert!(matches!(
            IdentityKey::new("a\\b", "Alice"),
            Err(KeyError::InvalidCharacter { field: "identifier", .. })
        ));
    }

    #[test]
    fn test_overlong_key_rejected() {
        let name = "A".repeat(250);
        assert_eq!(
            IdentityKey::new("123", &name),
            Err(KeyError::TooLong { len: 254, max: MAX_KEY_BYTES })
        );

        // Exactly at the limit is fine.
        let name = "B".repeat(MAX_KEY_BYTES - 4);
        let key = IdentityKey::new("123", &name).unwrap();
        assert_eq!(key.to_string().len(), MAX_KEY_BYTES);
    }

    #[test]
    fn test_parse_without_separator() {
        let key = IdentityKey::parse("123").unwrap();
        assert_eq!(key.identifier(), "123");
        assert_eq!(key.name(), "");
    }

    #[test]
    fn test_serde_as_string() {
        let key = IdentityKey::new("123", "Alice").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"123_Alice\"");
        let back: IdentityKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
