use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Partition Key - Aggregate Addressing
// ============================================================================
//
// (root partition, group, aggregate id) names exactly one event stream.
// The canonical string form `root:group:aggregate_id` doubles as the
// storage partition and as the routing key that selects the single
// coordinator allowed to write the stream.
//
// `:` and `%` inside root/group are percent-escaped so that the encoding
// stays reversible for any field contents.
//
// ============================================================================

pub const DEFAULT_ROOT_PARTITION_KEY: &str = "default";
pub const DEFAULT_GROUP: &str = "default";

const SEPARATOR: char = ':';

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("partition key must have 3 ':'-separated segments, found {found}")]
    WrongSegmentCount { found: usize },

    #[error("partition key segment '{0}' is empty")]
    EmptySegment(&'static str),

    #[error("invalid escape sequence in partition key segment: {0}")]
    InvalidEscape(String),

    #[error("invalid aggregate id '{value}': {source}")]
    InvalidAggregateId {
        value: String,
        #[source]
        source: uuid::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey {
    root_partition_key: String,
    group: String,
    aggregate_id: Uuid,
}

impl PartitionKey {
    /// Build a key; `None` or empty strings fall back to the defaults.
    pub fn create(aggregate_id: Uuid, group: Option<&str>, root: Option<&str>) -> Self {
        Self {
            root_partition_key: non_empty_or(root, DEFAULT_ROOT_PARTITION_KEY),
            group: non_empty_or(group, DEFAULT_GROUP),
            aggregate_id,
        }
    }

    /// Key in the default root partition.
    pub fn for_group(group: &str, aggregate_id: Uuid) -> Self {
        Self::create(aggregate_id, Some(group), None)
    }

    /// Fresh key with a time-ordered aggregate id.
    pub fn generate(group: &str) -> Self {
        Self::create(Uuid::now_v7(), Some(group), None)
    }

    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let segments: Vec<&str> = value.split(SEPARATOR).collect();
        let [root, group, id] = segments.as_slice() else {
            return Err(ParseError::WrongSegmentCount {
                found: segments.len(),
            });
        };

        if root.is_empty() {
            return Err(ParseError::EmptySegment("root_partition_key"));
        }
        if group.is_empty() {
            return Err(ParseError::EmptySegment("group"));
        }
        if id.is_empty() {
            return Err(ParseError::EmptySegment("aggregate_id"));
        }

        let aggregate_id = Uuid::parse_str(id).map_err(|source| ParseError::InvalidAggregateId {
            value: id.to_string(),
            source,
        })?;

        Ok(Self {
            root_partition_key: unescape(root)?,
            group: unescape(group)?,
            aggregate_id,
        })
    }

    pub fn root_partition_key(&self) -> &str {
        &self.root_partition_key
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn aggregate_id(&self) -> Uuid {
        self.aggregate_id
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            escape(&self.root_partition_key),
            escape(&self.group),
            self.aggregate_id,
            sep = SEPARATOR
        )
    }
}

impl FromStr for PartitionKey {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.to_string()
    }
}

fn non_empty_or(value: Option<&str>, default: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default.to_string(),
    }
}

fn escape(segment: &str) -> String {
    segment.replace('%', "%25").replace(SEPARATOR, "%3A")
}

fn unescape(segment: &str) -> Result<String, ParseError> {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "3A" | "3a" => out.push(SEPARATOR),
            _ => return Err(ParseError::InvalidEscape(segment.to_string())),
        }
    }

    Ok(out)
}

// ============================================================================
// Unit Tests
// ============================================================================
