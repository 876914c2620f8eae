use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Ordered key → value metadata attached to a passage.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Metadata key set on every stored passage.
pub const VECTOR_ID_KEY: &str = "vector_id";
/// Metadata key recording when the passage was added.
pub const ADDED_AT_KEY: &str = "added_at";
/// Metadata key a bare filter value is matched against.
pub const DEFAULT_FILTER_KEY: &str = "category";

/// One retrievable passage of the corpus.
///
/// `vector_id` is the passage's position in the corpus: assigned at
/// insertion, never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub vector_id: u64,
    pub text: String,
    pub metadata: Metadata,
}

/// Exact-match metadata predicate applied to ranked results.
///
/// Parsed from `key=value`; a bare `value` filters on the `category` key.
/// The literal `all` means no filtering and parses to `None` through
/// [`DocumentFilter::parse_optional`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub key: String,
    pub value: String,
}

impl DocumentFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse a filter expression, mapping `""` and `"all"` to no filter.
    pub fn parse_optional(s: &str) -> Result<Option<Self>, Error> {
        let s = s.trim();
        if s.is_empty() || s == "all" {
            return Ok(None);
        }
        s.parse().map(Some)
    }

    /// Whether `metadata` carries exactly this key/value pair.
    ///
    /// String values compare directly; other JSON values compare through
    /// their JSON rendering (`page=3` matches the number `3`).
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match metadata.get(&self.key) {
            Some(serde_json::Value::String(s)) => *s == self.value,
            Some(other) => other.to_string() == self.value,
            None => false,
        }
    }
}

impl FromStr for DocumentFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (key, value) = match s.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (DEFAULT_FILTER_KEY, s),
        };
        if key.is_empty() || value.is_empty() {
            return Err(Error::Config(format!(
                "invalid document filter '{s}' (expected key=value)"
            )));
        }
        Ok(Self::new(key, value))
    }
}

impl fmt::Display for DocumentFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}
