//! Retrieval engine
//!
//! Answers ranked-candidate and per-user recommendation queries by reading
//! ranked lists from the cache store and filtering them against dataset
//! state. Holds no state of its own; every call reads both stores.
//!
//! Ranked lists know nothing about hidden items, so both query shapes read
//! lists in chunks and keep reading until enough visible entries are found
//! or the list runs out.

use crate::source::{RecommendSource, Scenario, parse_chain};
use recserve_common::config::RecommendConfig;
use recserve_common::keys::{ITEM_TO_ITEM, NEIGHBORS, USER_TO_USER, key};
use recserve_common::{Bucket, Error, Item, Pagination, Result, ScoredItem, User};
use recserve_storage::{CacheStore, DataStore, Stores};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// What the entries of a ranked list refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateKind {
    /// Entries are item ids and hidden items are dropped
    Item,
    /// Entries are user ids; users have no hidden flag
    User,
}

/// A recommendation query.
#[derive(Clone, Debug)]
pub struct RecommendRequest {
    pub user_id: String,
    pub scenario: Scenario,
    pub count: usize,
    /// Only candidates carrying one of these categories (empty = any)
    pub categories: Vec<String>,
}

impl RecommendRequest {
    pub fn new(user_id: impl Into<String>, scenario: Scenario, count: usize) -> Self {
        Self {
            user_id: user_id.into(),
            scenario,
            count,
            categories: Vec::new(),
        }
    }
}

/// One recommended item and the source it came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Recommendation {
    #[serde(flatten)]
    pub item: ScoredItem,
    pub source: RecommendSource,
}

/// A dataset record with the score it was ranked by.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Scored<T> {
    #[serde(flatten)]
    pub record: T,
    pub score: f64,
}

/// A recommended item record, its score and the source it came from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecommendedItem {
    #[serde(flatten)]
    pub item: Item,
    pub score: f64,
    pub source: RecommendSource,
}

/// Collects recommendations across sources.
///
/// First occurrence of an id wins; ids the user already interacted with are
/// seeded into the exclusion set up front.
struct Accumulator {
    want: usize,
    excluded: HashSet<String>,
    picked: Vec<Recommendation>,
}

impl Accumulator {
    fn new(want: usize, excluded: HashSet<String>) -> Self {
        Self {
            want,
            excluded,
            picked: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.picked.len() >= self.want
    }

    /// Offer a candidate; returns whether it was taken.
    fn offer(&mut self, item: ScoredItem, source: RecommendSource) -> bool {
        if self.is_full() || !self.excluded.insert(item.id.clone()) {
            return false;
        }
        self.picked.push(Recommendation { item, source });
        true
    }
}

/// Retrieval engine over a cache store and a dataset store
#[derive(Clone)]
pub struct Retriever {
    cache: Arc<dyn CacheStore>,
    data: Arc<dyn DataStore>,
    fallback: Vec<RecommendSource>,
    fetch_chunk: usize,
}

impl Retriever {
    /// Build an engine. Unknown source names in the fallback chain are
    /// rejected here rather than at query time.
    pub fn new(
        cache: Arc<dyn CacheStore>,
        data: Arc<dyn DataStore>,
        config: &RecommendConfig,
    ) -> Result<Self> {
        Ok(Self {
            cache,
            data,
            fallback: parse_chain(&config.fallback)?,
            fetch_chunk: config.fetch_chunk.max(1),
        })
    }

    pub fn from_stores(stores: &Stores, config: &RecommendConfig) -> Result<Self> {
        Self::new(stores.cache.clone(), stores.data.clone(), config)
    }

    /// The configured fallback chain, in priority order.
    #[must_use]
    pub fn fallback_chain(&self) -> &[RecommendSource] {
        &self.fallback
    }

    /// Ranked candidates of one bucket.
    ///
    /// For item buckets the window applies to visible entries: a hidden
    /// entry never shrinks a page while more candidates exist.
    pub async fn search_candidates(
        &self,
        kind: CandidateKind,
        bucket: &Bucket,
        categories: &[String],
        page: Pagination,
    ) -> Result<Vec<ScoredItem>> {
        if kind == CandidateKind::User {
            return self.cache.search_scores(bucket, categories, page).await;
        }
        if page.limit == Some(0) {
            bucket.validate()?;
            return Ok(Vec::new());
        }

        let needed = page.limit.map(|limit| page.offset.saturating_add(limit));
        let mut visible = Vec::new();
        let mut raw_offset = 0;
        loop {
            let window = Pagination::new(raw_offset, self.fetch_chunk);
            let chunk = self.cache.search_scores(bucket, categories, window).await?;
            let fetched = chunk.len();
            visible.extend(self.drop_hidden(chunk).await?);
            let satisfied = needed.is_some_and(|needed| visible.len() >= needed);
            if satisfied || fetched < self.fetch_chunk {
                break;
            }
            raw_offset += fetched;
        }

        let window = page.window(visible.len());
        Ok(visible.drain(window).collect())
    }

    /// Neighbors of an item (`item-to-item/neighbors/<id>`), hidden ones
    /// removed.
    pub async fn item_neighbors(
        &self,
        item_id: &str,
        categories: &[String],
        page: Pagination,
    ) -> Result<Vec<ScoredItem>> {
        let bucket = Bucket::new(ITEM_TO_ITEM, key(&[NEIGHBORS, item_id]));
        self.search_candidates(CandidateKind::Item, &bucket, categories, page)
            .await
    }

    /// Neighbors of a user (`user-to-user/neighbors/<id>`).
    pub async fn user_neighbors(&self, user_id: &str, page: Pagination) -> Result<Vec<ScoredItem>> {
        let bucket = Bucket::new(USER_TO_USER, key(&[NEIGHBORS, user_id]));
        self.search_candidates(CandidateKind::User, &bucket, &[], page)
            .await
    }

    /// Recommendations for one user.
    ///
    /// Sources are consumed in priority order and concatenated; each keeps
    /// its own score order. Candidates that are hidden, already picked, or
    /// that the user left feedback of any type on are skipped. Running out
    /// of sources yields a short list, not an error.
    pub async fn recommend(&self, request: &RecommendRequest) -> Result<Vec<Recommendation>> {
        if request.user_id.is_empty() {
            return Err(Error::invalid_argument("user id must not be empty"));
        }
        if request.count == 0 {
            return Ok(Vec::new());
        }

        let sources: &[RecommendSource] = match &request.scenario {
            Scenario::Single(source) => std::slice::from_ref(source),
            Scenario::Fallback => &self.fallback,
        };

        let seen: HashSet<String> = self
            .data
            .get_user_feedback(&request.user_id, &[])
            .await?
            .into_iter()
            .map(|f| f.key.item_id)
            .collect();
        let mut acc = Accumulator::new(request.count, seen);

        for &source in sources {
            self.drain_source(source, request, &mut acc).await?;
            if acc.is_full() {
                break;
            }
        }
        Ok(acc.picked)
    }

    /// Feed one source into the accumulator until it is full or the source
    /// is exhausted.
    async fn drain_source(
        &self,
        source: RecommendSource,
        request: &RecommendRequest,
        acc: &mut Accumulator,
    ) -> Result<()> {
        let bucket = source.bucket(&request.user_id);
        let mut offset = 0;
        loop {
            let chunk = self
                .cache
                .search_scores(
                    &bucket,
                    &request.categories,
                    Pagination::new(offset, self.fetch_chunk),
                )
                .await?;
            let fetched = chunk.len();
            for item in self.drop_hidden(chunk).await? {
                acc.offer(item, source);
                if acc.is_full() {
                    return Ok(());
                }
            }
            if fetched < self.fetch_chunk {
                debug!(
                    "Source {} exhausted for user {} with {}/{} picked",
                    source,
                    request.user_id,
                    acc.picked.len(),
                    acc.want
                );
                return Ok(());
            }
            offset += fetched;
        }
    }

    /// Item records of an item bucket's candidates. Ids without a dataset
    /// record are skipped.
    pub async fn search_items(
        &self,
        bucket: &Bucket,
        categories: &[String],
        page: Pagination,
    ) -> Result<Vec<Scored<Item>>> {
        let candidates = self
            .search_candidates(CandidateKind::Item, bucket, categories, page)
            .await?;
        let mut records = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(item) = self.item_record(&candidate.id).await? {
                records.push(Scored {
                    record: item,
                    score: candidate.score,
                });
            }
        }
        Ok(records)
    }

    /// User records of a user bucket's candidates. Ids without a dataset
    /// record are skipped.
    pub async fn search_users(
        &self,
        bucket: &Bucket,
        page: Pagination,
    ) -> Result<Vec<Scored<User>>> {
        let candidates = self
            .search_candidates(CandidateKind::User, bucket, &[], page)
            .await?;
        let mut records = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.data.get_user(&candidate.id).await {
                Ok(user) => records.push(Scored {
                    record: user,
                    score: candidate.score,
                }),
                Err(e) if e.is_not_found() => {
                    debug!("Skipping unknown user {} in {}", candidate.id, bucket);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// [`Retriever::recommend`] joined with item records. Recommended ids
    /// without a dataset record are skipped, so the list may come back
    /// shorter than requested.
    pub async fn recommend_items(
        &self,
        request: &RecommendRequest,
    ) -> Result<Vec<RecommendedItem>> {
        let picked = self.recommend(request).await?;
        let mut records = Vec::with_capacity(picked.len());
        for rec in picked {
            if let Some(item) = self.item_record(&rec.item.id).await? {
                records.push(RecommendedItem {
                    item,
                    score: rec.item.score,
                    source: rec.source,
                });
            }
        }
        Ok(records)
    }

    async fn item_record(&self, item_id: &str) -> Result<Option<Item>> {
        match self.data.get_item(item_id).await {
            Ok(item) => Ok(Some(item)),
            Err(e) if e.is_not_found() => {
                debug!("Skipping unknown item {}", item_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn drop_hidden(&self, chunk: Vec<ScoredItem>) -> Result<Vec<ScoredItem>> {
        if chunk.is_empty() {
            return Ok(chunk);
        }
        let ids: Vec<String> = chunk.iter().map(|item| item.id.clone()).collect();
        let hidden = self.data.hidden_items(&ids).await?;
        Ok(chunk
            .into_iter()
            .filter(|item| !hidden.contains(&item.id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recserve_common::keys::{LATEST, NON_PERSONALIZED, POPULAR};
    use recserve_common::{Feedback, FeedbackInsertOptions, FeedbackKey, ItemPatch};

    fn retriever(stores: &Stores, fallback: &[&str], fetch_chunk: usize) -> Retriever {
        let config = RecommendConfig {
            fallback: fallback.iter().map(ToString::to_string).collect(),
            fetch_chunk,
            ..RecommendConfig::default()
        };
        Retriever::from_stores(stores, &config).unwrap()
    }

    fn scored(pairs: &[(&str, f64)]) -> Vec<ScoredItem> {
        pairs
            .iter()
            .map(|(id, score)| ScoredItem::new(*id, *score))
            .collect()
    }

    fn ids<T>(items: &[T], id: impl Fn(&T) -> &str) -> Vec<String> {
        items.iter().map(|i| id(i).to_string()).collect()
    }

    async fn insert_items(stores: &Stores, ids: &[&str]) {
        let items: Vec<Item> = ids.iter().map(|id| Item::new(*id)).collect();
        stores.data.batch_insert_items(&items).await.unwrap();
    }

    #[tokio::test]
    async fn test_hidden_item_does_not_shrink_page() {
        let stores = Stores::in_memory();
        let bucket = Bucket::new(ITEM_TO_ITEM, "neighbors/0");
        stores
            .cache
            .add_scores(
                &bucket,
                &scored(&[("1", 100.0), ("2", 99.0), ("3", 98.0), ("4", 97.0), ("5", 96.0)]),
            )
            .await
            .unwrap();
        insert_items(&stores, &["1", "2", "3", "4", "5"]).await;
        stores
            .data
            .modify_item("4", ItemPatch::hidden(true))
            .await
            .unwrap();

        // chunk smaller than the page forces a second read
        let engine = retriever(&stores, &[], 2);
        let page = engine
            .search_candidates(CandidateKind::Item, &bucket, &[], Pagination::new(0, 4))
            .await
            .unwrap();
        let scores: Vec<f64> = page.iter().map(|i| i.score).collect();
        assert_eq!(scores, vec![100.0, 99.0, 98.0, 96.0]);

        // offset counts visible entries
        let page = engine
            .item_neighbors("0", &[], Pagination::new(3, 10))
            .await
            .unwrap();
        assert_eq!(ids(&page, |i| i.id.as_str()), vec!["5"]);
    }

    #[tokio::test]
    async fn test_user_buckets_skip_hidden_lookup() {
        let stores = Stores::in_memory();
        let bucket = Bucket::new(USER_TO_USER, "neighbors/u0");
        stores
            .cache
            .add_scores(&bucket, &scored(&[("u1", 2.0), ("u2", 1.0)]))
            .await
            .unwrap();
        // an item sharing a user's id is hidden; user results are unaffected
        insert_items(&stores, &["u1"]).await;
        stores
            .data
            .modify_item("u1", ItemPatch::hidden(true))
            .await
            .unwrap();

        let engine = retriever(&stores, &[], 10);
        let page = engine.user_neighbors("u0", Pagination::all()).await.unwrap();
        assert_eq!(ids(&page, |i| i.id.as_str()), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_recommend_excludes_any_feedback_type() {
        let stores = Stores::in_memory();
        stores
            .cache
            .add_scores(
                &RecommendSource::Offline.bucket("u"),
                &scored(&[("a", 5.0), ("b", 4.0), ("c", 3.0), ("d", 2.0)]),
            )
            .await
            .unwrap();
        stores
            .data
            .batch_insert_feedback(
                &[
                    Feedback::new(FeedbackKey::new("read", "u", "a")),
                    Feedback::new(FeedbackKey::new("", "u", "c")),
                ],
                FeedbackInsertOptions::default(),
            )
            .await
            .unwrap();

        let engine = retriever(&stores, &[], 100);
        let request = RecommendRequest::new("u", Scenario::Single(RecommendSource::Offline), 10);
        let recs = engine.recommend(&request).await.unwrap();
        assert_eq!(ids(&recs, |r| r.item.id.as_str()), vec!["b", "d"]);
    }

    #[tokio::test]
    async fn test_fallback_chain_concatenates_by_priority() {
        let stores = Stores::in_memory();
        let cache = &stores.cache;
        cache
            .add_scores(
                &RecommendSource::Collaborative.bucket("u"),
                &scored(&[("c1", 0.1), ("shared", 0.05)]),
            )
            .await
            .unwrap();
        cache
            .add_scores(
                &Bucket::new(NON_PERSONALIZED, LATEST),
                &scored(&[("shared", 900.0), ("l1", 800.0), ("hidden", 700.0), ("l2", 600.0)]),
            )
            .await
            .unwrap();
        cache
            .add_scores(&Bucket::new(NON_PERSONALIZED, POPULAR), &scored(&[("p1", 1.0)]))
            .await
            .unwrap();
        insert_items(&stores, &["hidden"]).await;
        stores
            .data
            .modify_item("hidden", ItemPatch::hidden(true))
            .await
            .unwrap();

        let engine = retriever(
            &stores,
            &["collaborative", "item_based", "user_based", "latest", "popular"],
            2,
        );
        let recs = engine
            .recommend(&RecommendRequest::new("u", Scenario::Fallback, 5))
            .await
            .unwrap();
        assert_eq!(
            ids(&recs, |r| r.item.id.as_str()),
            vec!["c1", "shared", "l1", "l2", "p1"]
        );
        let sources: Vec<RecommendSource> = recs.iter().map(|r| r.source).collect();
        assert_eq!(sources[1], RecommendSource::Collaborative);
        assert_eq!(sources[4], RecommendSource::Popular);

        // count reached inside the first non-empty global source
        let recs = engine
            .recommend(&RecommendRequest::new("u", Scenario::Fallback, 3))
            .await
            .unwrap();
        assert_eq!(ids(&recs, |r| r.item.id.as_str()), vec!["c1", "shared", "l1"]);
    }

    #[tokio::test]
    async fn test_exhausted_single_source_returns_short_list() {
        let stores = Stores::in_memory();
        stores
            .cache
            .add_scores(
                &RecommendSource::ItemBased.bucket("u"),
                &scored(&[("x", 1.0), ("y", 0.5)]),
            )
            .await
            .unwrap();

        let engine = retriever(&stores, &[], 100);
        let request = RecommendRequest::new("u", Scenario::Single(RecommendSource::ItemBased), 10);
        let recs = engine.recommend(&request).await.unwrap();
        assert_eq!(recs.len(), 2);

        let nothing = RecommendRequest::new("u", Scenario::Fallback, 10);
        assert!(engine.recommend(&nothing).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recommend_category_filter() {
        let stores = Stores::in_memory();
        stores
            .cache
            .add_scores(
                &Bucket::new(NON_PERSONALIZED, POPULAR),
                &[
                    ScoredItem::new("a", 3.0).with_categories(["x"]),
                    ScoredItem::new("b", 2.0).with_categories(["y"]),
                    ScoredItem::new("c", 1.0).with_categories(["x", "y"]),
                ],
            )
            .await
            .unwrap();

        let engine = retriever(&stores, &["popular"], 100);
        let mut request = RecommendRequest::new("u", Scenario::Fallback, 10);
        request.categories = vec!["y".to_string()];
        let recs = engine.recommend(&request).await.unwrap();
        assert_eq!(ids(&recs, |r| r.item.id.as_str()), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_huge_count_is_not_preallocated() {
        let stores = Stores::in_memory();
        stores
            .cache
            .add_scores(&RecommendSource::ItemBased.bucket("u"), &scored(&[("only", 1.0)]))
            .await
            .unwrap();

        let engine = retriever(&stores, &[], 10);
        let request = RecommendRequest::new(
            "u",
            Scenario::Single(RecommendSource::ItemBased),
            usize::MAX / 2,
        );
        let recs = engine.recommend(&request).await.unwrap();
        assert_eq!(ids(&recs, |r| r.item.id.as_str()), vec!["only"]);
    }

    #[tokio::test]
    async fn test_search_items_joins_records() {
        let stores = Stores::in_memory();
        let bucket = Bucket::new(ITEM_TO_ITEM, "neighbors/0");
        stores
            .cache
            .add_scores(&bucket, &scored(&[("1", 3.0), ("ghost", 2.0), ("2", 1.0)]))
            .await
            .unwrap();
        stores
            .data
            .batch_insert_items(&[
                Item {
                    comment: "first".to_string(),
                    ..Item::new("1")
                },
                Item::new("2"),
            ])
            .await
            .unwrap();

        let engine = retriever(&stores, &[], 10);
        let records = engine
            .search_items(&bucket, &[], Pagination::all())
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record.comment, "first");
        assert_eq!(records[0].score, 3.0);
        assert_eq!(records[1].record.item_id, "2");
    }

    #[tokio::test]
    async fn test_search_users_joins_records() {
        let stores = Stores::in_memory();
        let bucket = Bucket::new(USER_TO_USER, "neighbors/u0");
        stores
            .cache
            .add_scores(&bucket, &scored(&[("ghost", 2.0), ("u1", 1.0)]))
            .await
            .unwrap();
        stores
            .data
            .batch_insert_users(&[User::new("u1")])
            .await
            .unwrap();

        let engine = retriever(&stores, &[], 10);
        let records = engine.search_users(&bucket, Pagination::all()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record.user_id, "u1");
        assert_eq!(records[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_recommend_items_joins_records() {
        let stores = Stores::in_memory();
        stores
            .cache
            .add_scores(
                &Bucket::new(NON_PERSONALIZED, POPULAR),
                &scored(&[("a", 3.0), ("ghost", 2.0), ("b", 1.0)]),
            )
            .await
            .unwrap();
        insert_items(&stores, &["a", "b"]).await;

        let engine = retriever(&stores, &["popular"], 10);
        let recs = engine
            .recommend_items(&RecommendRequest::new("u", Scenario::Fallback, 10))
            .await
            .unwrap();
        let item_ids: Vec<&str> = recs.iter().map(|r| r.item.item_id.as_str()).collect();
        assert_eq!(item_ids, vec!["a", "b"]);
        assert_eq!(recs[1].score, 1.0);
        assert_eq!(recs[1].source, RecommendSource::Popular);

        let json = serde_json::to_value(&recs[0]).unwrap();
        assert_eq!(json["item_id"], "a");
        assert_eq!(json["source"], "popular");
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let stores = Stores::in_memory();
        let config = RecommendConfig {
            fallback: vec!["nonsense".to_string()],
            ..RecommendConfig::default()
        };
        assert!(matches!(
            Retriever::from_stores(&stores, &config),
            Err(Error::InvalidArgument(_))
        ));

        let engine = retriever(&stores, &[], 10);
        let request = RecommendRequest::new("", Scenario::Fallback, 10);
        assert!(engine.recommend(&request).await.is_err());
        let zero = RecommendRequest::new("u", Scenario::Fallback, 0);
        assert!(engine.recommend(&zero).await.unwrap().is_empty());
    }
}
