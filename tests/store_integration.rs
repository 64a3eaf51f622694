//! Store query layer and work queue against real Postgres and Redis,
//! exercising the constraints the pure tests cannot: the dedup unique
//! index, upsert conflict targets, versioned semantics, leases, and
//! queue delivery.

mod common;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::test_fixture::TestFixture;
use serde_json::json;
use serial_test::serial;
use uuid::Uuid;

use meridian::scheduler::tasks::Task;
use meridian::store::models::{
    ActivityStatus, Direction, EventType, NewEvent, NewSignalRecord, NewTransition,
    TransitionType,
};
use meridian::store::semantics::{SemanticOutcome, SemanticUpsert};
use meridian::store::{activities, events, semantics, signals, sources, streams, transitions};

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

fn record(key: &str, value: &str, confidence: f64) -> NewSignalRecord {
    NewSignalRecord {
        signal_name: "ios_heart_rate".into(),
        source_name: "ios".into(),
        timestamp: ts("2025-05-03T09:00:00Z"),
        signal_value: value.into(),
        confidence,
        idempotency_key: key.into(),
        latitude: None,
        longitude: None,
        source_metadata: json!({}),
    }
}

#[tokio::test]
#[serial]
async fn store_query_layer_roundtrip() {
    let fixture = TestFixture::new().await.expect("fixture");
    fixture.verify_connection().await.expect("connection");

    // --- signals: conflict-update, never duplicate ---
    let first = vec![
        record("2025-05-03T09:00:00+00:00", "62", 0.9),
        record("2025-05-03T09:00:01+00:00", "63", 0.9),
    ];
    let written = signals::upsert_signals(&fixture.db, &first).await.unwrap();
    assert_eq!(written["ios_heart_rate"], 2);

    // Same keys again with a new value: rows update in place
    let again = vec![record("2025-05-03T09:00:00+00:00", "70", 0.95)];
    signals::upsert_signals(&fixture.db, &again).await.unwrap();

    let rows = signals::fetch_window(
        &fixture.db,
        "ios_heart_rate",
        ts("2025-05-03T08:00:00Z"),
        ts("2025-05-03T10:00:00Z"),
    )
    .await
    .unwrap();
    assert_eq!(rows.len(), 2, "re-insert must not duplicate");
    let updated = rows
        .iter()
        .find(|r| r.idempotency_key == "2025-05-03T09:00:00+00:00")
        .unwrap();
    assert_eq!(updated.signal_value, "70");
    assert!((updated.confidence - 0.95).abs() < 1e-9);

    // --- transitions: window replace + upsert on the five-column key ---
    let gap = NewTransition {
        source_name: "ios".into(),
        signal_name: "ios_heart_rate".into(),
        transition_time: ts("2025-05-03T09:30:00Z"),
        transition_type: TransitionType::DataGap,
        direction: None,
        before_mean: None,
        before_std: None,
        after_mean: None,
        after_std: None,
        magnitude: None,
        confidence: 1.0,
        detection_method: "gap_detection".into(),
        transition_metadata: json!({}),
    };
    let step = NewTransition {
        transition_time: ts("2025-05-03T09:10:00Z"),
        transition_type: TransitionType::Changepoint,
        direction: Some(Direction::Increase),
        before_mean: Some(62.0),
        after_mean: Some(90.0),
        magnitude: Some(28.0),
        confidence: 0.85,
        detection_method: "pelt_changepoint".into(),
        ..gap.clone()
    };

    let window = (ts("2025-05-03T09:00:00Z"), ts("2025-05-03T10:00:00Z"));
    let stored = transitions::replace_window(
        &fixture.db,
        "ios_heart_rate",
        window.0,
        window.1,
        &[gap.clone(), step.clone()],
    )
    .await
    .unwrap();
    assert_eq!(stored, 2);

    // Re-detecting the window drops the stale rows first
    let stored = transitions::replace_window(
        &fixture.db,
        "ios_heart_rate",
        window.0,
        window.1,
        &[step.clone()],
    )
    .await
    .unwrap();
    assert_eq!(stored, 1);
    let found = transitions::fetch_window(&fixture.db, window.0, window.1)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].transition_type, TransitionType::Changepoint);
    assert_eq!(found[0].direction, Some(Direction::Increase));

    // NULL-direction rows hit the conflict target too (no duplicates)
    for _ in 0..2 {
        transitions::replace_window(
            &fixture.db,
            "ios_heart_rate",
            ts("2025-05-03T10:30:00Z"),
            ts("2025-05-03T10:40:00Z"),
            &[NewTransition {
                transition_time: ts("2025-05-03T10:35:00Z"),
                ..gap.clone()
            }],
        )
        .await
        .unwrap();
    }
    let gaps = transitions::fetch_window(
        &fixture.db,
        ts("2025-05-03T10:30:00Z"),
        ts("2025-05-03T10:40:00Z"),
    )
    .await
    .unwrap();
    assert_eq!(gaps.len(), 1);

    // --- semantics: content-hash versioning ---
    let mut doc = SemanticUpsert {
        source_name: "notion".into(),
        semantic_name: "notion_pages".into(),
        semantic_id: "p1".into(),
        title: Some("Draft".into()),
        summary: None,
        content_hash: "hash-a".into(),
        body_path: "semantics/notion/p1/hash-a.json".into(),
        updated_at: ts("2025-05-03T12:00:00Z"),
    };
    assert_eq!(
        semantics::upsert_semantic(&fixture.db, &doc).await.unwrap(),
        SemanticOutcome::Inserted
    );
    assert_eq!(
        semantics::upsert_semantic(&fixture.db, &doc).await.unwrap(),
        SemanticOutcome::Unchanged
    );
    doc.title = Some("Final".into());
    doc.content_hash = "hash-b".into();
    doc.body_path = "semantics/notion/p1/hash-b.json".into();
    assert_eq!(
        semantics::upsert_semantic(&fixture.db, &doc).await.unwrap(),
        SemanticOutcome::Versioned
    );
    let latest = semantics::fetch_latest(&fixture.db, "notion", "p1")
        .await
        .unwrap()
        .expect("latest row");
    assert_eq!(latest.version, 2);
    assert!(latest.is_latest);
    assert_eq!(latest.title.as_deref(), Some("Final"));

    // --- events: transactional day replace ---
    let date = NaiveDate::from_ymd_opt(2025, 5, 3).unwrap();
    let segment = |start: &str, end: &str, cluster_id: i32| NewEvent {
        date,
        cluster_id,
        start_time: ts(start),
        end_time: ts(end),
        event_type: if cluster_id < 0 {
            EventType::Unknown
        } else {
            EventType::Activity
        },
        core_density: 0.8,
        transition_ids: vec![Uuid::new_v4()],
        signal_contributions: json!({"ios_heart_rate": 1}),
        event_metadata: json!({}),
    };
    events::replace_day(
        &fixture.db,
        date,
        &[
            segment("2025-05-03T08:00:00Z", "2025-05-03T12:00:00Z", 0),
            segment("2025-05-03T12:00:00Z", "2025-05-03T18:00:00Z", 1),
        ],
    )
    .await
    .unwrap();
    events::replace_day(
        &fixture.db,
        date,
        &[segment("2025-05-03T08:00:00Z", "2025-05-03T20:00:00Z", 0)],
    )
    .await
    .unwrap();
    let day = events::fetch_day(&fixture.db, date).await.unwrap();
    assert_eq!(day.len(), 1, "rewrite replaces the whole day");
    assert_eq!(day[0].event_type, EventType::Activity);

    // --- sources: device lookup, token update, expiring scan ---
    fixture.seed_device_source("ios", "device-token-1").await.unwrap();
    let by_token = sources::fetch_by_device_token(&fixture.db, "device-token-1")
        .await
        .unwrap()
        .expect("device source");
    assert_eq!(by_token.source_name, "ios");
    assert!(sources::fetch_by_device_token(&fixture.db, "wrong")
        .await
        .unwrap()
        .is_none());

    let google_id = fixture
        .seed_oauth_source("google", Utc::now() + Duration::minutes(20))
        .await
        .unwrap();
    let expiring = sources::fetch_expiring(&fixture.db, Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].id, google_id);

    let new_expiry = Utc::now() + Duration::hours(2);
    sources::update_tokens(&fixture.db, google_id, "at-new", Some("rt-new"), Some(new_expiry))
        .await
        .unwrap();
    let refreshed = sources::fetch_active(&fixture.db, "google")
        .await
        .unwrap()
        .expect("google source");
    assert_eq!(refreshed.oauth_access_token.as_deref(), Some("at-new"));
    assert_eq!(refreshed.oauth_refresh_token.as_deref(), Some("rt-new"));
    assert!(sources::fetch_expiring(&fixture.db, Duration::hours(1))
        .await
        .unwrap()
        .is_empty());

    // --- streams: lease mutex and sync bookkeeping ---
    let stream_id = fixture.seed_stream("google_calendar", "google").await.unwrap();
    assert!(streams::acquire_lease(&fixture.db, stream_id, Duration::minutes(15))
        .await
        .unwrap());
    assert!(
        !streams::acquire_lease(&fixture.db, stream_id, Duration::minutes(15))
            .await
            .unwrap(),
        "second acquire must lose"
    );
    streams::release_lease(&fixture.db, stream_id).await.unwrap();
    assert!(streams::acquire_lease(&fixture.db, stream_id, Duration::minutes(15))
        .await
        .unwrap());
    streams::release_lease(&fixture.db, stream_id).await.unwrap();

    let synced_at = ts("2025-05-03T15:00:00Z");
    streams::record_sync_success(&fixture.db, stream_id, Some("cursor-1"), synced_at)
        .await
        .unwrap();
    let state = streams::fetch_by_name(&fixture.db, "google_calendar")
        .await
        .unwrap()
        .expect("stream state");
    assert_eq!(state.cursor.as_deref(), Some("cursor-1"));
    assert_eq!(state.last_successful_sync_at, Some(synced_at));
    streams::clear_cursor(&fixture.db, stream_id).await.unwrap();
    let state = streams::fetch_by_name(&fixture.db, "google_calendar")
        .await
        .unwrap()
        .unwrap();
    assert!(state.cursor.is_none());

    // --- pipeline activities: lifecycle and retention ---
    let ok_id = activities::open(&fixture.db, "ingestion", "google_stream_ingestion", "google", Some("google_calendar"))
        .await
        .unwrap();
    activities::complete(&fixture.db, ok_id, 42, Some("google/a.json"), json!({"batches": 1}))
        .await
        .unwrap();
    let bad_id = activities::open(&fixture.db, "ingestion", "google_stream_ingestion", "google", None)
        .await
        .unwrap();
    activities::fail(&fixture.db, bad_id, "Upstream error: 503").await.unwrap();

    let statuses: Vec<(Uuid, ActivityStatus, i64)> = sqlx::query_as(
        "SELECT id, status, records_processed FROM pipeline_activities ORDER BY started_at",
    )
    .fetch_all(&fixture.db)
    .await
    .unwrap();
    assert_eq!(statuses.len(), 2);
    assert_eq!(statuses[0].1, ActivityStatus::Completed);
    assert_eq!(statuses[0].2, 42);
    assert_eq!(statuses[1].1, ActivityStatus::Failed);

    // Nothing is old enough to prune yet
    assert_eq!(activities::cleanup(&fixture.db, 30).await.unwrap(), 0);
    assert_eq!(activities::cleanup(&fixture.db, 0).await.unwrap(), 2);
}

#[tokio::test]
#[serial]
async fn queue_delivers_and_retries() {
    let fixture = TestFixture::new().await.expect("fixture");

    // Empty queue: a short pop times out cleanly
    let nothing = fixture
        .queue
        .pop(std::time::Duration::from_secs(1))
        .await
        .unwrap();
    assert!(nothing.is_none());

    // FIFO delivery of a typed task
    let task = Task::ProcessStreamBatch {
        stream_name: "ios_healthkit".into(),
        object_key: "ios/2025/05/03/dev/abc.json".into(),
    };
    fixture.queue.enqueue(&task).await.unwrap();
    let envelope = fixture
        .queue
        .pop(std::time::Duration::from_secs(5))
        .await
        .unwrap()
        .expect("queued task");
    assert_eq!(envelope.retries, 0);
    assert_eq!(envelope.decode().unwrap(), task);

    // A delayed task is invisible until its eta passes
    fixture
        .queue
        .enqueue_in(&Task::CheckScheduledSyncs, std::time::Duration::from_secs(120))
        .await
        .unwrap();
    assert!(fixture
        .queue
        .pop(std::time::Duration::from_secs(1))
        .await
        .unwrap()
        .is_none());
    assert_eq!(fixture.queue.depth().await.unwrap(), 0);

    // Requeue bumps the retry count; a zero delay makes it due at once
    fixture.queue.enqueue(&task).await.unwrap();
    let envelope = fixture
        .queue
        .pop(std::time::Duration::from_secs(5))
        .await
        .unwrap()
        .expect("queued task");
    fixture
        .queue
        .requeue(envelope, std::time::Duration::ZERO)
        .await
        .unwrap();
    let retried = fixture
        .queue
        .pop(std::time::Duration::from_secs(5))
        .await
        .unwrap()
        .expect("requeued task");
    assert_eq!(retried.retries, 1);
    assert_eq!(retried.decode().unwrap(), task);
}
