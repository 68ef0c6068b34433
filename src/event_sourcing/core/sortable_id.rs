use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Sortable Id - Monotonic, Lexicographically Ordered Event Identifiers
// ============================================================================
//
// Layout (30 decimal digits):
//
//   TTTTTTTTTTTTTTTTTTT RRRRRRRRRRR
//   |                   |
//   |                   +-- 11 digits tie-breaker (random)
//   +---------------------- 19 digits ticks (100ns since 0001-01-01 UTC)
//
// Because both components are fixed-width decimal, plain string comparison
// equals chronological comparison. The generator never hands out the same
// tick twice, so two ids from one process are never equal.
//
// Used as: event primary key, delta-read cursor, concurrency token.
//
// ============================================================================

const TICKS_DIGITS: usize = 19;
const SUFFIX_DIGITS: usize = 11;
const SUFFIX_MODULUS: u128 = 100_000_000_000;

/// Ticks between 0001-01-01T00:00:00Z and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

static GLOBAL_GENERATOR: SortableIdGenerator = SortableIdGenerator::new();

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SortableIdError {
    #[error("sortable id must be {expected} characters, got {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("sortable id must contain only ASCII digits: {0}")]
    NonDigit(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SortableId(String);

impl SortableId {
    pub const LENGTH: usize = TICKS_DIGITS + SUFFIX_DIGITS;

    /// Generate a new id from the process-wide generator.
    pub fn generate() -> Self {
        GLOBAL_GENERATOR.next_id()
    }

    /// Compare two ids; identical to comparing their string forms.
    pub fn compare(a: &SortableId, b: &SortableId) -> Ordering {
        a.0.cmp(&b.0)
    }

    /// Validate an externally supplied id string.
    pub fn parse(value: &str) -> Result<Self, SortableIdError> {
        if value.len() != Self::LENGTH {
            return Err(SortableIdError::InvalidLength {
                expected: Self::LENGTH,
                found: value.len(),
            });
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SortableIdError::NonDigit(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// Smallest id that could have been generated at `timestamp`.
    ///
    /// Useful as an exclusive lower bound for time-based cursors.
    pub fn min_for(timestamp: DateTime<Utc>) -> Self {
        Self::from_parts(ticks_of(timestamp), 0)
    }

    /// Largest id that could have been generated at `timestamp`.
    pub fn max_for(timestamp: DateTime<Utc>) -> Self {
        Self::from_parts(ticks_of(timestamp), SUFFIX_MODULUS - 1)
    }

    /// Creation instant encoded in the tick component.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let ticks: i64 = self.0[..TICKS_DIGITS].parse().ok()?;
        let unix_ticks = ticks - UNIX_EPOCH_TICKS;
        let secs = unix_ticks.div_euclid(TICKS_PER_SECOND);
        let nanos = (unix_ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        DateTime::from_timestamp(secs, nanos)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_parts(ticks: i64, suffix: u128) -> Self {
        Self(format!(
            "{:0tw$}{:0sw$}",
            ticks,
            suffix % SUFFIX_MODULUS,
            tw = TICKS_DIGITS,
            sw = SUFFIX_DIGITS
        ))
    }
}

impl fmt::Display for SortableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SortableId {
    type Err = SortableIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SortableId {
    type Error = SortableIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SortableId> for String {
    fn from(id: SortableId) -> Self {
        id.0
    }
}

// ============================================================================
// Generator
// ============================================================================

/// Hands out strictly increasing ids.
///
/// When the wall clock has not advanced (or went backwards) since the last
/// id, the previous tick plus one is used instead.
#[derive(Debug)]
pub struct SortableIdGenerator {
    last_ticks: AtomicI64,
}

impl SortableIdGenerator {
    pub const fn new() -> Self {
        Self {
            last_ticks: AtomicI64::new(0),
        }
    }

    pub fn next_id(&self) -> SortableId {
        let now = ticks_of(Utc::now());
        let mut last = self.last_ticks.load(AtomicOrdering::Relaxed);

        loop {
            let candidate = if now > last { now } else { last + 1 };
            match self.last_ticks.compare_exchange_weak(
                last,
                candidate,
                AtomicOrdering::AcqRel,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => return SortableId::from_parts(candidate, random_suffix()),
                Err(actual) => last = actual,
            }
        }
    }
}

impl Default for SortableIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn ticks_of(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp() * TICKS_PER_SECOND
        + i64::from(timestamp.timestamp_subsec_nanos() / 100)
        + UNIX_EPOCH_TICKS
}

fn random_suffix() -> u128 {
    Uuid::new_v4().as_u128() % SUFFIX_MODULUS
}

// ============================================================================
// Unit Tests
// ============================================================================
