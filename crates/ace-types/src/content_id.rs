use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An AceStream content id (BitTorrent infohash), 40 lowercase hex characters.
///
/// Treated as an opaque bag of bytes everywhere except at construction, where
/// the shape is validated once so the rest of the system can assume it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    pub fn parse(raw: &str) -> Result<Self> {
        let lower = raw.to_ascii_lowercase();
        if lower.len() != 40 || !lower.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CommonError::InvalidContentId(raw.to_owned()));
        }
        Ok(Self(lower))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentId {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_infohash() {
        let raw = "a".repeat(40);
        assert!(ContentId::parse(&raw).is_ok());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(ContentId::parse("abcd").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        let raw = "z".repeat(40);
        assert!(ContentId::parse(&raw).is_err());
    }

    #[test]
    fn lowercases_input() {
        let raw = "A".repeat(40);
        let id = ContentId::parse(&raw).unwrap();
        assert_eq!(id.as_str(), "a".repeat(40));
    }
}
