//! Postgres backend tests. They need a live database:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/mailtrack cargo test --test postgres_store -- --ignored
//! ```

use chrono::Utc;
use futures::future::join_all;

use mailtrack::{
    ConditionalUpdate, EmailStatus, NewEmailLog, PostgresStore, RecordStore, StoreError,
    TrackingId,
};

async fn connect() -> Option<PostgresStore> {
    let url = std::env::var("DATABASE_URL").ok()?;
    Some(PostgresStore::connect(&url, 8).await.unwrap())
}

fn unique_id(prefix: &str) -> TrackingId {
    let micros = Utc::now().timestamp_micros();
    TrackingId::parse(&format!("{}-{}", prefix, micros)).unwrap()
}

async fn seed(store: &PostgresStore, tracking_id: &TrackingId) {
    store
        .create(
            NewEmailLog {
                tracking_id: tracking_id.clone(),
                recipient_address: "a@x.com".into(),
                group_label: "sales".into(),
                sender_origin_ip: Some("1.2.3.4".into()),
            },
            Utc::now(),
        )
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_opens_have_one_winner() {
    let Some(store) = connect().await else { return };
    let tracking_id = unique_id("race");
    seed(&store, &tracking_id).await;

    let attempts = (0..16).map(|n| {
        let store = store.clone();
        let tracking_id = tracking_id.clone();
        let ip = format!("9.9.9.{}", n);
        tokio::spawn(async move {
            store
                .conditional_update(&tracking_id, Some(&ip), Utc::now())
                .await
                .unwrap()
        })
    });
    let outcomes: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, ConditionalUpdate::Applied(_)))
        .count();
    assert_eq!(applied, 1);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        ConditionalUpdate::Applied(_) | ConditionalUpdate::Rejected(_)
    )));

    let stored = store.find(&tracking_id).await.unwrap().unwrap();
    assert_eq!(stored.status, EmailStatus::Opened);
    assert!(stored.opened_at.is_some());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_guard_rejects_sender_and_repeat_opens() {
    let Some(store) = connect().await else { return };
    let tracking_id = unique_id("guard");
    seed(&store, &tracking_id).await;

    let same_origin = store
        .conditional_update(&tracking_id, Some("1.2.3.4"), Utc::now())
        .await
        .unwrap();
    match same_origin {
        ConditionalUpdate::Rejected(log) => assert_eq!(log.status, EmailStatus::Sent),
        other => panic!("expected Rejected, got {:?}", other),
    }

    let first = store
        .conditional_update(&tracking_id, Some("9.9.9.9"), Utc::now())
        .await
        .unwrap();
    assert!(matches!(first, ConditionalUpdate::Applied(_)));

    let repeat = store
        .conditional_update(&tracking_id, Some("8.8.8.8"), Utc::now())
        .await
        .unwrap();
    match repeat {
        ConditionalUpdate::Rejected(log) => assert_eq!(log.status, EmailStatus::Opened),
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_unknown_id_and_duplicate_create() {
    let Some(store) = connect().await else { return };

    let unknown = store
        .conditional_update(&unique_id("missing"), None, Utc::now())
        .await
        .unwrap();
    assert_eq!(unknown, ConditionalUpdate::Missing);

    let tracking_id = unique_id("dup");
    seed(&store, &tracking_id).await;
    let again = store
        .create(
            NewEmailLog {
                tracking_id: tracking_id.clone(),
                recipient_address: "b@x.com".into(),
                group_label: "ops".into(),
                sender_origin_ip: None,
            },
            Utc::now(),
        )
        .await;
    assert!(matches!(again, Err(StoreError::Duplicate(_))));
}
