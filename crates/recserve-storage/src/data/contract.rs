//! Behavior every dataset backend must show; run by each backend's tests.

use super::DataStore;
use chrono::{Duration, TimeZone, Utc};
use recserve_common::{Error, Feedback, FeedbackInsertOptions, FeedbackKey, Item, ItemPatch, User};

pub async fn run_all(store: &dyn DataStore) {
    users(store).await;
    items(store).await;
    feedback(store).await;
    cascading_deletes(store).await;
    purge(store).await;
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

async fn users(store: &dyn DataStore) {
    assert!(store.get_user("nobody").await.unwrap_err().is_not_found());

    let users: Vec<User> = (0..5)
        .map(|i| User {
            labels: serde_json::json!({ "n": i }),
            ..User::new(format!("u{i}"))
        })
        .collect();
    store.batch_insert_users(&users).await.unwrap();
    assert_eq!(store.get_user("u3").await.unwrap(), users[3]);

    // cursor walk with a page size that does not divide the total
    let mut cursor = String::new();
    let mut seen = Vec::new();
    loop {
        let (next, page) = store.get_users(&cursor, 2).await.unwrap();
        seen.extend(page.into_iter().map(|u| u.user_id));
        if next.is_empty() {
            break;
        }
        cursor = next;
    }
    assert_eq!(seen, strings(&["u0", "u1", "u2", "u3", "u4"]));

    assert!(matches!(
        store.get_users("", 0).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        store.batch_insert_users(&[User::new("")]).await,
        Err(Error::InvalidArgument(_))
    ));
    store.purge_users().await.unwrap();
}

async fn items(store: &dyn DataStore) {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let items: Vec<Item> = (0..4)
        .map(|i| Item {
            categories: vec![format!("c{}", i % 2)],
            timestamp: t0 + Duration::days(i),
            ..Item::new(format!("i{i}"))
        })
        .collect();
    store.batch_insert_items(&items).await.unwrap();

    store
        .modify_item("i1", ItemPatch::hidden(true))
        .await
        .unwrap();
    assert!(store.get_item("i1").await.unwrap().is_hidden);
    assert_eq!(store.get_item("i1").await.unwrap().categories, vec!["c1"]);
    assert!(
        store
            .modify_item("missing", ItemPatch::hidden(true))
            .await
            .unwrap_err()
            .is_not_found()
    );

    let hidden = store
        .hidden_items(&strings(&["i0", "i1", "unknown"]))
        .await
        .unwrap();
    assert_eq!(hidden.len(), 1);
    assert!(hidden.contains("i1"));

    let (next, page) = store
        .get_items("", 10, Some(t0 + Duration::days(2)))
        .await
        .unwrap();
    assert!(next.is_empty());
    let ids: Vec<&str> = page.iter().map(|i| i.item_id.as_str()).collect();
    assert_eq!(ids, vec!["i2", "i3"]);
    store.purge_items().await.unwrap();
}

async fn feedback(store: &dyn DataStore) {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut batch = Vec::new();
    for i in 0..6 {
        let kind = if i % 2 == 0 { "click" } else { "like" };
        batch.push(Feedback {
            timestamp: t0 + Duration::hours(i),
            ..Feedback::new(FeedbackKey::new(kind, format!("u{}", i % 3), format!("i{i}")))
        });
    }
    store
        .batch_insert_feedback(&batch, FeedbackInsertOptions::default())
        .await
        .unwrap();

    // referenced users and items were created
    assert!(store.get_user("u2").await.is_ok());
    assert!(store.get_item("i5").await.is_ok());

    let (_, likes) = store
        .get_feedback("", 100, &strings(&["like"]), None)
        .await
        .unwrap();
    assert_eq!(likes.len(), 3);

    let (_, early) = store
        .get_feedback("", 100, &[], Some(t0 + Duration::hours(2)))
        .await
        .unwrap();
    assert_eq!(early.len(), 3);

    let user_feedback = store.get_user_feedback("u0", &[]).await.unwrap();
    let mut items: Vec<&str> = user_feedback
        .iter()
        .map(|f| f.key.item_id.as_str())
        .collect();
    items.sort_unstable();
    assert_eq!(items, vec!["i0", "i3"]);
    assert_eq!(
        store
            .get_user_feedback("u0", &strings(&["like"]))
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        store.get_user_item_feedback("u1", "i4").await.unwrap().len(),
        1
    );
    assert!(
        store
            .get_user_item_feedback("u1", "i0")
            .await
            .unwrap()
            .is_empty()
    );

    // without overwrite the stored comment survives
    let replay = Feedback {
        comment: "replayed".into(),
        ..batch[0].clone()
    };
    let keep = FeedbackInsertOptions {
        overwrite: false,
        ..FeedbackInsertOptions::default()
    };
    store
        .batch_insert_feedback(std::slice::from_ref(&replay), keep)
        .await
        .unwrap();
    let stored = store.get_user_item_feedback("u0", "i0").await.unwrap();
    assert_eq!(stored[0].comment, "");
    store
        .batch_insert_feedback(&[replay], FeedbackInsertOptions::default())
        .await
        .unwrap();
    let stored = store.get_user_item_feedback("u0", "i0").await.unwrap();
    assert_eq!(stored[0].comment, "replayed");

    // orphaned feedback is accepted when auto-creation is off
    let orphan = Feedback::new(FeedbackKey::new("click", "ghost", "nowhere"));
    let bare = FeedbackInsertOptions {
        insert_user: false,
        insert_item: false,
        overwrite: true,
    };
    store.batch_insert_feedback(&[orphan], bare).await.unwrap();
    assert!(store.get_user("ghost").await.unwrap_err().is_not_found());
    assert_eq!(store.get_user_feedback("ghost", &[]).await.unwrap().len(), 1);

    store.purge().await.unwrap();
}

async fn cascading_deletes(store: &dyn DataStore) {
    let batch = [
        Feedback::new(FeedbackKey::new("like", "a", "x")),
        Feedback::new(FeedbackKey::new("like", "a", "y")),
        Feedback::new(FeedbackKey::new("like", "b", "x")),
    ];
    store
        .batch_insert_feedback(&batch, FeedbackInsertOptions::default())
        .await
        .unwrap();

    store.delete_user("a").await.unwrap();
    assert!(store.get_user("a").await.unwrap_err().is_not_found());
    let (_, rest) = store.get_feedback("", 10, &[], None).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].key.user_id, "b");

    store.delete_item("x").await.unwrap();
    let (_, rest) = store.get_feedback("", 10, &[], None).await.unwrap();
    assert!(rest.is_empty());
    assert!(store.get_user_feedback("b", &[]).await.unwrap().is_empty());
    store.purge().await.unwrap();
}

async fn purge(store: &dyn DataStore) {
    store
        .batch_insert_feedback(
            &[Feedback::new(FeedbackKey::new("like", "p", "q"))],
            FeedbackInsertOptions::default(),
        )
        .await
        .unwrap();

    store.purge_feedback().await.unwrap();
    assert!(store.get_user("p").await.is_ok());
    assert!(store.get_user_feedback("p", &[]).await.unwrap().is_empty());

    store.purge().await.unwrap();
    assert!(store.get_users("", 10).await.unwrap().1.is_empty());
    assert!(store.get_items("", 10, None).await.unwrap().1.is_empty());
}
