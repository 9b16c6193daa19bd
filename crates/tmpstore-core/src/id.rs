//! Storage keys.
//!
//! A key is generated once by the handler on `create()` and never changes.
//! Downstream crates should pass `StorageKey` around rather than raw strings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(transparent)]
pub struct StorageKey(Uuid);

impl StorageKey {
    /// Fresh random (v4) key.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hyphenated form; this is also what ends up in spill file names.
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for StorageKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_distinct() {
        let a = StorageKey::generate();
        let b = StorageKey::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn display_parses_back() {
        let key = StorageKey::generate();
        let parsed: StorageKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
        assert!("not-a-key".parse::<StorageKey>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let key = StorageKey::generate();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
    }
}
