//! Ranked-list and time-series value types shared by the cache backends.
//!
//! Both backends hold one of these per bucket / series name; the memory
//! backend keeps them live, the redb backend stores them bincode-encoded.

use chrono::{DateTime, Utc};
use recserve_common::{Error, Pagination, Result, ScorePatch, ScoredItem, TimeSeriesPoint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Entries of one bucket in insertion order.
///
/// Score order is applied at read time with a stable sort, so equal scores
/// keep the order in which their ids were first inserted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    entries: Vec<ScoredItem>,
}

impl RankedList {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reject batches that name the same id twice.
    pub fn check_batch(items: &[ScoredItem]) -> Result<()> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in items {
            if !seen.insert(item.id.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "duplicate id {:?} in one score batch",
                    item.id
                )));
            }
        }
        Ok(())
    }

    /// Insert new ids at the end; overwrite existing ones in place.
    pub fn upsert(&mut self, items: &[ScoredItem]) {
        for item in items {
            match self.entries.iter_mut().find(|e| e.id == item.id) {
                Some(existing) => *existing = item.clone(),
                None => self.entries.push(item.clone()),
            }
        }
    }

    /// Filtered, score-descending window.
    #[must_use]
    pub fn search(&self, categories: &[String], page: Pagination) -> Vec<ScoredItem> {
        let mut matched: Vec<&ScoredItem> =
            self.entries.iter().filter(|e| e.matches(categories)).collect();
        matched.sort_by(|a, b| b.score.total_cmp(&a.score));
        matched[page.window(matched.len())]
            .iter()
            .map(|e| (*e).clone())
            .collect()
    }

    /// Returns true if `id` was present.
    pub fn patch(&mut self, id: &str, patch: &ScorePatch) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                patch.apply(entry);
                true
            }
            None => false,
        }
    }

    /// Returns the number of entries removed.
    pub fn remove(&mut self, ids: &[String]) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !ids.contains(&e.id));
        before - self.entries.len()
    }
}

/// Points of one series keyed by timestamp.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    points: BTreeMap<DateTime<Utc>, f64>,
}

impl Series {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn upsert(&mut self, timestamp: DateTime<Utc>, value: f64) {
        self.points.insert(timestamp, value);
    }

    /// Points at or after `since`, ascending.
    #[must_use]
    pub fn since(&self, name: &str, since: DateTime<Utc>) -> Vec<TimeSeriesPoint> {
        self.points
            .range(since..)
            .map(|(ts, value)| TimeSeriesPoint::new(name, *ts, *value))
            .collect()
    }

    /// Drop points strictly before `before`.
    pub fn prune(&mut self, before: DateTime<Utc>) {
        self.points = self.points.split_off(&before);
    }
}
