//! Operational overview: counters, feedback rates, categories, cluster
//! membership and per-user activity, all read from the stores.

use chrono::{DateTime, Duration, Utc};
use recserve_common::config::Config;
use recserve_common::keys::{
    GLOBAL_META, ITEM_CATEGORIES, LAST_MODIFY_USER_TIME, LAST_UPDATE_USER_RECOMMEND_TIME,
    MATCHING_MODEL_SCORE, NUM_FEEDBACK, NUM_ITEMS, NUM_USERS, NUM_VALID_NEG_FEEDBACKS,
    NUM_VALID_POS_FEEDBACKS, POSITIVE_FEEDBACK_RATE, RANKING_MODEL_SCORE, key,
};
use recserve_common::{Error, Result, TimeSeriesPoint, User};
use recserve_storage::data::Page;
use recserve_storage::meta::ClusterView;
use recserve_storage::{CacheStore, DataStore, NodeRegistry, Stores};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Global counters maintained by the training pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Stats {
    pub num_users: i64,
    pub num_items: i64,
    pub num_feedback: i64,
    pub num_valid_pos_feedback: i64,
    pub num_valid_neg_feedback: i64,
    pub matching_model_score: ModelScore,
    pub ranking_model_score: ModelScore,
    pub binary_version: String,
}

/// Offline evaluation of a trained model. Metrics the model does not
/// report stay at zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelScore {
    pub precision: f64,
    pub recall: f64,
    pub ndcg: f64,
    pub auc: f64,
}

/// A user with its activity timestamps.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub last_active_time: Option<DateTime<Utc>>,
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Read-only observability view over all three stores
#[derive(Clone)]
pub struct Overview {
    meta: Arc<dyn NodeRegistry>,
    data: Arc<dyn DataStore>,
    cache: Arc<dyn CacheStore>,
    positive_feedback_types: Vec<String>,
    heartbeat_timeout: Duration,
}

impl Overview {
    pub fn new(stores: &Stores, config: &Config) -> Self {
        let timeout_secs = i64::try_from(config.cluster.heartbeat_timeout_secs).unwrap_or(i64::MAX);
        Self {
            meta: stores.meta.clone(),
            data: stores.data.clone(),
            cache: stores.cache.clone(),
            positive_feedback_types: config.recommend.positive_feedback_types.clone(),
            heartbeat_timeout: Duration::try_seconds(timeout_secs).unwrap_or(Duration::MAX),
        }
    }

    /// Counters under `global_meta/`. Counters not written yet read as zero.
    pub async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            num_users: self.counter(NUM_USERS).await?,
            num_items: self.counter(NUM_ITEMS).await?,
            num_feedback: self.counter(NUM_FEEDBACK).await?,
            num_valid_pos_feedback: self.counter(NUM_VALID_POS_FEEDBACKS).await?,
            num_valid_neg_feedback: self.counter(NUM_VALID_NEG_FEEDBACKS).await?,
            matching_model_score: self.model_score(MATCHING_MODEL_SCORE).await?,
            ranking_model_score: self.model_score(RANKING_MODEL_SCORE).await?,
            binary_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn counter(&self, name: &str) -> Result<i64> {
        match self.cache.get(&key(&[GLOBAL_META, name])).await {
            Ok(value) => value.as_integer(),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// A model score stored as JSON; absent until the first training run.
    async fn model_score(&self, name: &str) -> Result<ModelScore> {
        match self.cache.get(&key(&[GLOBAL_META, name])).await {
            Ok(value) => serde_json::from_str(&value.to_string_value())
                .map_err(|e| Error::Deserialization(format!("{name}: {e}"))),
            Err(e) if e.is_not_found() => Ok(ModelScore::default()),
            Err(e) => Err(e),
        }
    }

    /// Positive feedback rate series per configured feedback type, points
    /// at or after `since`.
    pub async fn rates(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<TimeSeriesPoint>>> {
        let mut rates = BTreeMap::new();
        for feedback_type in &self.positive_feedback_types {
            let name = key(&[POSITIVE_FEEDBACK_RATE, feedback_type]);
            let points = self.cache.query_time_series(&name, since).await?;
            rates.insert(feedback_type.clone(), points);
        }
        Ok(rates)
    }

    /// Every item category seen so far, sorted.
    pub async fn categories(&self) -> Result<Vec<String>> {
        self.cache.get_set(ITEM_CATEGORIES).await
    }

    /// Cluster members split by heartbeat freshness relative to `now`.
    pub async fn cluster(&self, now: DateTime<Utc>) -> Result<ClusterView> {
        let nodes = self.meta.list_nodes().await?;
        Ok(ClusterView::new(nodes, now, self.heartbeat_timeout))
    }

    pub async fn user_detail(&self, user_id: &str) -> Result<UserDetail> {
        let user = self.data.get_user(user_id).await?;
        self.detail(user).await
    }

    /// A page of users with their activity timestamps.
    pub async fn users(&self, cursor: &str, limit: usize) -> Result<Page<UserDetail>> {
        let (next, users) = self.data.get_users(cursor, limit).await?;
        let mut details = Vec::with_capacity(users.len());
        for user in users {
            details.push(self.detail(user).await?);
        }
        Ok((next, details))
    }

    async fn detail(&self, user: User) -> Result<UserDetail> {
        let last_active_time = self
            .timestamp(&key(&[LAST_MODIFY_USER_TIME, &user.user_id]))
            .await?;
        let last_update_time = self
            .timestamp(&key(&[LAST_UPDATE_USER_RECOMMEND_TIME, &user.user_id]))
            .await?;
        Ok(UserDetail {
            user,
            last_active_time,
            last_update_time,
        })
    }

    async fn timestamp(&self, cache_key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.cache.get(cache_key).await {
            Ok(value) => value.as_time().map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
