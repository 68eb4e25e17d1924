//! Core type definitions for recserve
//!
//! Cache-side shapes (scalar values, ranked score lists, time-series points),
//! pagination windows and cluster node records.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

// ---- Scalars ----

/// A scalar cache value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Integer(i64),
    Time(DateTime<Utc>),
}

impl Value {
    /// Read the value as a string. Integers and timestamps are rendered.
    #[must_use]
    pub fn to_string_value(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Time(t) => t.to_rfc3339(),
        }
    }

    /// Read the value as an integer, parsing strings.
    pub fn as_integer(&self) -> Result<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::String(s) => s
                .parse()
                .map_err(|_| Error::invalid_argument(format!("value {s:?} is not an integer"))),
            Self::Time(_) => Err(Error::invalid_argument("timestamp value is not an integer")),
        }
    }

    /// Read the value as a timestamp, parsing RFC 3339 strings.
    pub fn as_time(&self) -> Result<DateTime<Utc>> {
        match self {
            Self::Time(t) => Ok(*t),
            Self::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| Error::invalid_argument(format!("value {s:?} is not a timestamp"))),
            Self::Integer(_) => Err(Error::invalid_argument("integer value is not a timestamp")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Time(t)
    }
}

// ---- Ranked lists ----

/// Identifies one ranked list: a (collection, subset) pair.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{collection}/{subset}")]
pub struct Bucket {
    pub collection: String,
    pub subset: String,
}

impl Bucket {
    pub fn new(collection: impl Into<String>, subset: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            subset: subset.into(),
        }
    }

    /// Reject buckets that cannot be addressed.
    pub fn validate(&self) -> Result<()> {
        if self.collection.is_empty() {
            return Err(Error::invalid_argument("bucket collection must not be empty"));
        }
        if self.collection.contains('\0') || self.subset.contains('\0') {
            return Err(Error::invalid_argument(format!(
                "bucket {self} contains a NUL byte"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bucket({:?}, {:?})", self.collection, self.subset)
    }
}

/// One scored entry of a ranked list.
///
/// Categories are opaque labels matched exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub id: String,
    pub score: f64,
    pub categories: Vec<String>,
}

impl ScoredItem {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
            categories: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// True if any requested category is carried by this entry.
    /// An empty request matches everything.
    #[must_use]
    pub fn matches(&self, categories: &[String]) -> bool {
        categories.is_empty() || categories.iter().any(|c| self.categories.contains(c))
    }
}

/// Partial update applied by `update_scores`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScorePatch {
    pub score: Option<f64>,
    pub categories: Option<Vec<String>>,
}

impl ScorePatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.score.is_none() && self.categories.is_none()
    }

    /// Apply the patch in place.
    pub fn apply(&self, item: &mut ScoredItem) {
        if let Some(score) = self.score {
            item.score = score;
        }
        if let Some(categories) = &self.categories {
            item.categories.clone_from(categories);
        }
    }
}

/// Offset/limit window over an ordered result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: usize,
    /// `None` means unbounded
    pub limit: Option<usize>,
}

impl Pagination {
    #[must_use]
    pub const fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Everything from the first entry on.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    /// Map a signed window as sent by clients: `limit == -1` is unbounded,
    /// any other negative number is rejected.
    pub fn from_signed(offset: i64, limit: i64) -> Result<Self> {
        let offset = usize::try_from(offset)
            .map_err(|_| Error::invalid_argument(format!("negative offset {offset}")))?;
        let limit = match limit {
            -1 => None,
            n => Some(
                usize::try_from(n)
                    .map_err(|_| Error::invalid_argument(format!("negative limit {n}")))?,
            ),
        };
        Ok(Self { offset, limit })
    }

    /// Index range this window selects from a sequence of `len` entries.
    #[must_use]
    pub fn window(&self, len: usize) -> Range<usize> {
        let start = self.offset.min(len);
        let end = match self.limit {
            Some(limit) => start.saturating_add(limit).min(len),
            None => len,
        };
        start..end
    }
}

// ---- Time series ----

/// One measurement. Identity is `(name, timestamp)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            value,
        }
    }
}

// ---- Cluster ----

/// Role a cluster member plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum NodeRole {
    #[display("server")]
    Server,
    #[display("worker")]
    Worker,
}

impl FromStr for NodeRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "worker" => Ok(Self::Worker),
            other => Err(Error::invalid_argument(format!("unknown node role {other:?}"))),
        }
    }
}

/// A cluster member as last reported by its heartbeat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub hostname: String,
    pub role: NodeRole,
    pub version: String,
    pub last_seen: DateTime<Utc>,
}

impl NodeRecord {
    /// Merge a newer heartbeat into this record. `last_seen` never moves
    /// backwards.
    pub fn merge(&mut self, update: Self) {
        let last_seen = self.last_seen.max(update.last_seen);
        *self = update;
        self.last_seen = last_seen;
    }
}
