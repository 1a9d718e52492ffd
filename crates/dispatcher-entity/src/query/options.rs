//! Query options: sorting, pagination, and result shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{QueryError, Result};

/// Options accepted by `query`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Return only the first match (or nothing).
    pub single: bool,
    /// Return the number of matches instead of the matches.
    pub count: bool,
    /// Skip this many matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Return at most this many matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Sort keys; a leading `-` sorts descending.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<String>,
}

impl QueryOptions {
    /// Parse an options object. `null` means defaults; unknown keys are
    /// ignored.
    pub fn from_value(raw: &Value) -> Result<Self> {
        if raw.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(raw.clone()).map_err(|e| QueryError::InvalidOptions(e.to_string()))
    }

    /// JSON form, as sent with a remote query.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parsed sort keys.
    pub fn sort_keys(&self) -> Vec<SortKey> {
        self.sort.iter().map(|s| SortKey::parse(s)).collect()
    }

    /// Set `single`.
    #[must_use]
    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Set `count`.
    #[must_use]
    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Set `offset`.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Set `limit`.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn sort_by(mut self, key: &str) -> Self {
        self.sort.push(key.to_owned());
        self
    }
}

/// One sort key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    /// Field name.
    pub field: String,
    /// Sort descending.
    pub descending: bool,
}

impl SortKey {
    /// Parse `field` or `-field`.
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_owned(),
                descending: true,
            },
            None => Self {
                field: key.to_owned(),
                descending: false,
            },
        }
    }
}
