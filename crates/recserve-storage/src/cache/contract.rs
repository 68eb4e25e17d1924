//! Behavior every cache backend must show; run by each backend's tests.

use super::{CacheShape, CacheStore};
use chrono::{DateTime, Duration, TimeZone, Utc};
use recserve_common::{Bucket, Error, Pagination, ScorePatch, ScoredItem, TimeSeriesPoint, Value};

pub async fn run_all(cache: &dyn CacheStore) {
    scalars(cache).await;
    sets(cache).await;
    ranked_lists(cache).await;
    ranked_list_updates(cache).await;
    time_series(cache).await;
    purge(cache).await;
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

fn ids(items: &[ScoredItem]) -> Vec<&str> {
    items.iter().map(|i| i.id.as_str()).collect()
}

async fn scalars(cache: &dyn CacheStore) {
    assert!(cache.get("missing").await.unwrap_err().is_not_found());

    cache.set("name", Value::from("v1")).await.unwrap();
    cache.set("name", Value::from("v2")).await.unwrap();
    assert_eq!(cache.get("name").await.unwrap(), Value::from("v2"));

    let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    cache.set("when", Value::from(t)).await.unwrap();
    assert_eq!(cache.get("when").await.unwrap().as_time().unwrap(), t);

    cache.delete("name").await.unwrap();
    cache.delete("name").await.unwrap();
    assert!(cache.get("name").await.unwrap_err().is_not_found());

    assert!(matches!(
        cache.set("", Value::from(1)).await,
        Err(Error::InvalidArgument(_))
    ));
}

async fn sets(cache: &dyn CacheStore) {
    assert!(cache.get_set("empty").await.unwrap().is_empty());

    cache.add_to_set("s", &strings(&["b", "a"])).await.unwrap();
    cache.add_to_set("s", &strings(&["a", "c"])).await.unwrap();
    assert_eq!(cache.get_set("s").await.unwrap(), strings(&["a", "b", "c"]));

    cache.remove_from_set("s", &strings(&["b", "zz"])).await.unwrap();
    assert_eq!(cache.get_set("s").await.unwrap(), strings(&["a", "c"]));

    cache.set_set("s", &strings(&["x"])).await.unwrap();
    assert_eq!(cache.get_set("s").await.unwrap(), strings(&["x"]));

    cache.add_to_set("other", &strings(&["y"])).await.unwrap();
    cache.clear_set("s").await.unwrap();
    assert!(cache.get_set("s").await.unwrap().is_empty());
    assert_eq!(cache.get_set("other").await.unwrap(), strings(&["y"]));
}

async fn ranked_lists(cache: &dyn CacheStore) {
    let bucket = Bucket::new("item-to-item", "neighbors/0");
    let other = Bucket::new("item-to-item", "neighbors/1");

    assert!(
        cache
            .search_scores(&bucket, &[], Pagination::all())
            .await
            .unwrap()
            .is_empty()
    );

    cache
        .add_scores(
            &bucket,
            &[
                ScoredItem::new("1", 1.0).with_categories(["", "a"]),
                ScoredItem::new("2", 5.0).with_categories(["", "b"]),
                ScoredItem::new("3", 3.0).with_categories(["", "a"]),
                ScoredItem::new("4", 3.0).with_categories([""]),
            ],
        )
        .await
        .unwrap();
    cache
        .add_scores(&other, &[ScoredItem::new("9", 100.0)])
        .await
        .unwrap();

    let all = cache
        .search_scores(&bucket, &[], Pagination::all())
        .await
        .unwrap();
    assert_eq!(ids(&all), vec!["2", "3", "4", "1"]);

    let cat_a = cache
        .search_scores(&bucket, &strings(&["a"]), Pagination::all())
        .await
        .unwrap();
    assert_eq!(ids(&cat_a), vec!["3", "1"]);

    let window = cache
        .search_scores(&bucket, &strings(&[""]), Pagination::new(1, 2))
        .await
        .unwrap();
    assert_eq!(ids(&window), vec!["3", "4"]);

    // overwrite moves by score but keeps its tie position
    cache
        .add_scores(&bucket, &[ScoredItem::new("1", 3.0)])
        .await
        .unwrap();
    let all = cache
        .search_scores(&bucket, &[], Pagination::all())
        .await
        .unwrap();
    assert_eq!(ids(&all), vec!["2", "1", "3", "4"]);

    let dup = cache
        .add_scores(&bucket, &[ScoredItem::new("x", 1.0), ScoredItem::new("x", 2.0)])
        .await;
    assert!(matches!(dup, Err(Error::InvalidArgument(_))));

    let bad = cache
        .search_scores(&Bucket::new("", "s"), &[], Pagination::all())
        .await;
    assert!(matches!(bad, Err(Error::InvalidArgument(_))));
}

async fn ranked_list_updates(cache: &dyn CacheStore) {
    let a = Bucket::new("collab", "u1");
    let b = Bucket::new("collab", "u2");
    let untouched = Bucket::new("collaborative", "u1");
    for bucket in [&a, &b, &untouched] {
        cache
            .add_scores(
                bucket,
                &[ScoredItem::new("i1", 1.0), ScoredItem::new("i2", 2.0)],
            )
            .await
            .unwrap();
    }

    let patch = ScorePatch {
        score: Some(10.0),
        categories: Some(strings(&["hot"])),
    };
    cache
        .update_scores(&strings(&["collab"]), "i1", &patch)
        .await
        .unwrap();

    for bucket in [&a, &b] {
        let hot = cache
            .search_scores(bucket, &strings(&["hot"]), Pagination::all())
            .await
            .unwrap();
        assert_eq!(ids(&hot), vec!["i1"]);
        assert_eq!(hot[0].score, 10.0);
    }
    let top = cache
        .search_scores(&untouched, &[], Pagination::new(0, 1))
        .await
        .unwrap();
    assert_eq!(ids(&top), vec!["i2"]);

    cache
        .delete_scores(&a, &strings(&["i1", "nope"]))
        .await
        .unwrap();
    let left = cache
        .search_scores(&a, &[], Pagination::all())
        .await
        .unwrap();
    assert_eq!(ids(&left), vec!["i2"]);
}

async fn time_series(cache: &dyn CacheStore) {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    cache
        .add_time_series_points(&[
            TimeSeriesPoint::new("rate", t0, 1.0),
            TimeSeriesPoint::new("rate", t0 + Duration::days(1), 2.0),
            TimeSeriesPoint::new("rate", t0 + Duration::days(1), 3.0),
            TimeSeriesPoint::new("other", t0, 9.0),
        ])
        .await
        .unwrap();
    cache
        .add_time_series_points(&[TimeSeriesPoint::new("rate", t0 + Duration::days(2), 4.0)])
        .await
        .unwrap();

    let points = cache
        .query_time_series("rate", t0 + Duration::hours(1))
        .await
        .unwrap();
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![3.0, 4.0]);
    assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    cache
        .prune_time_series("rate", t0 + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(cache.query_time_series("rate", t0).await.unwrap().len(), 1);
    assert_eq!(cache.query_time_series("other", t0).await.unwrap().len(), 1);
    assert!(cache.query_time_series("nope", t0).await.unwrap().is_empty());
}

async fn purge(cache: &dyn CacheStore) {
    cache.set("p", Value::from(1)).await.unwrap();
    cache.add_to_set("p", &strings(&["m"])).await.unwrap();
    let bucket = Bucket::new("p", "q");
    cache
        .add_scores(&bucket, &[ScoredItem::new("i", 1.0)])
        .await
        .unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    cache
        .add_time_series_points(&[TimeSeriesPoint::new("p", t0, 0.5)])
        .await
        .unwrap();

    cache.purge(&[CacheShape::Scores]).await.unwrap();
    assert!(
        cache
            .search_scores(&bucket, &[], Pagination::all())
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(cache.get("p").await.unwrap(), Value::from(1));
    assert_eq!(cache.query_time_series("p", t0).await.unwrap().len(), 1);

    cache.purge(&CacheShape::ALL).await.unwrap();
    assert!(cache.get("p").await.unwrap_err().is_not_found());
    assert!(cache.get_set("p").await.unwrap().is_empty());
    assert!(
        cache
            .query_time_series("p", DateTime::<Utc>::MIN_UTC)
            .await
            .unwrap()
            .is_empty()
    );

    // the store keeps working after a purge
    cache.set("p", Value::from(2)).await.unwrap();
    assert_eq!(cache.get("p").await.unwrap(), Value::from(2));
}
