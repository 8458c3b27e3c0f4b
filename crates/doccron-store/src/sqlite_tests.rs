
    use super::*;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    use crate::document::timestamp_value;
    use crate::path::FieldPath;
    use crate::query::Filter;

    fn sleep_until() -> FieldPath {
        FieldPath::parse("sleepUntil").unwrap()
    }

    fn claim_query() -> Query {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Query::new()
            .exists(sleep_until())
            .not_after(sleep_until(), now)
    }

    fn lock_update() -> Update {
        let until = Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap();
        Update::new().set(sleep_until(), timestamp_value(until))
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .insert_one(json!({"name": "report", "sleepUntil": null}))
            .await
            .unwrap();

        let found = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(found.body["name"], "report");

        let missing = store.find_by_id(&DocumentId::from("nope")).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        let doc = Document::with_id("job-1", json!({})).unwrap();
        store.insert(doc.clone()).await.unwrap();

        let result = store.insert(doc).await;
        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_all_in_insertion_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        for name in ["first", "second", "third"] {
            store.insert_one(json!({ "name": name })).await.unwrap();
        }

        let names: Vec<String> = store
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.body["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_claim_returns_original_and_locks() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.insert_one(json!({"name": "plain"})).await.unwrap();
        let id = store.insert_one(json!({"sleepUntil": null})).await.unwrap();

        let claimed = store
            .find_one_and_update(&claim_query(), &lock_update())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.body["sleepUntil"], json!(null));

        let stored = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(stored.body["sleepUntil"], json!("2025-01-01T00:10:00.000Z"));

        // Locked until 00:10, so a second claim at 00:00 finds nothing.
        let again = store
            .find_one_and_update(&claim_query(), &lock_update())
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_claim_honours_filter_on_nested_path() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_one(json!({"sleepUntil": null, "meta": {"queue": "sms"}}))
            .await
            .unwrap();
        let mail = store
            .insert_one(json!({"sleepUntil": null, "meta": {"queue": "mail"}}))
            .await
            .unwrap();

        let filter = Filter::new().with("meta.queue", json!("mail"));
        let query = claim_query().and_filter(&filter).unwrap();
        let claimed = store
            .find_one_and_update(&query, &lock_update())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, mail);
    }

    #[tokio::test]
    async fn test_claim_compares_wake_times_in_every_format() {
        let store = SqliteStore::in_memory().await.unwrap();
        // Locked until 00:10, as text and as epoch millis.
        store
            .insert_one(json!({"sleepUntil": "2025-01-01T00:10:00.000Z"}))
            .await
            .unwrap();
        store
            .insert_one(json!({"sleepUntil": 1_735_690_200_000i64}))
            .await
            .unwrap();
        // 23:30 UTC the previous day, although it sorts after "now" as text.
        let offset = store
            .insert_one(json!({"sleepUntil": "2025-01-01T00:30:00+01:00"}))
            .await
            .unwrap();
        let exact = store
            .insert_one(json!({"sleepUntil": "2025-01-01T00:00:00.000Z"}))
            .await
            .unwrap();

        let mut claimed = Vec::new();
        while let Some(document) = store
            .find_one_and_update(&claim_query(), &lock_update())
            .await
            .unwrap()
        {
            claimed.push(document.id);
        }
        assert_eq!(claimed, vec![offset, exact]);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.insert_one(json!({"sleepUntil": null})).await.unwrap();

        let update = Update::new().unset(sleep_until());
        assert!(store.update_one(&id, &update).await.unwrap());
        assert_eq!(store.find_by_id(&id).await.unwrap().unwrap().body, json!({}));

        assert!(store.delete_one(&id).await.unwrap());
        assert!(!store.delete_one(&id).await.unwrap());
        assert!(!store.update_one(&id, &update).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_claims_across_connections() {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir.path().join("jobs.db");

        let seed = SqliteStore::open(&db).await.unwrap();
        seed.insert_one(json!({"sleepUntil": null})).await.unwrap();

        let mut stores = Vec::new();
        for _ in 0..4 {
            stores.push(Arc::new(SqliteStore::open(&db).await.unwrap()));
        }

        let attempts = stores.iter().flat_map(|store| {
            (0..4).map(move |_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .find_one_and_update(&claim_query(), &lock_update())
                        .await
                        .unwrap()
                })
            })
        });

        let results = futures::future::join_all(attempts).await;
        let winners = results
            .into_iter()
            .filter(|r| r.as_ref().unwrap().is_some())
            .count();
        assert_eq!(winners, 1);
    }
