//! The shipped sources/ tree must load, validate against the real
//! factory maps, and describe the catalog the pipeline expects.

use std::path::Path;

use meridian::registry::{
    load_registry, AuthType, DedupStrategy, DetectorBinding, IngestionType, Platform,
    StreamOutput, ValueType,
};

fn load() -> meridian::registry::Registry {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("sources");
    load_registry(&root).expect("shipped registry must load")
}

#[test]
fn shipped_tree_validates_against_factories() {
    let registry = load();
    registry
        .validate(
            &|key| meridian::sources::processor_for(key).is_some(),
            &|key| meridian::sources::syncer_for(key).is_some(),
        )
        .expect("shipped registry must validate");
}

#[test]
fn catalog_shape() {
    let registry = load();

    let google = registry.source("google").unwrap();
    assert_eq!(google.platform, Platform::Cloud);
    assert_eq!(google.auth_type, AuthType::OAuth2);
    assert!(google.oauth.as_ref().unwrap().token_url.contains("google"));

    let ios = registry.source("ios").unwrap();
    assert_eq!(ios.platform, Platform::Device);
    assert_eq!(ios.auth_type, AuthType::DeviceToken);

    let calendar = registry.stream("google_calendar").unwrap();
    assert_eq!(calendar.ingestion_type, IngestionType::Pull);
    assert_eq!(calendar.cron_schedule.as_deref(), Some("0 */3 * * *"));
    assert_eq!(calendar.sync_window.full_sync_lookback_days, 730);
    assert_eq!(calendar.sync_window.full_sync_lookahead_days, 365);

    let location = registry.stream("ios_location").unwrap();
    assert_eq!(location.ingestion_type, IngestionType::Push);
    assert!(location.syncer.is_none());
    assert!(location.cron_schedule.is_none());

    let pages = registry.stream("notion_pages").unwrap();
    assert_eq!(pages.output, StreamOutput::Semantics);
    assert_eq!(pages.rate_limit_per_sec, Some(3.0));
    assert!(registry.semantic("notion_pages").is_some());
}

#[test]
fn signal_bindings() {
    let registry = load();

    let speed = registry.signal("ios_speed").unwrap();
    assert_eq!(speed.value_type, ValueType::Continuous);
    assert_eq!(speed.unit, "m/s");
    assert_eq!(speed.dedup_strategy, DedupStrategy::Single);
    assert!(matches!(speed.detector, DetectorBinding::ChangePoint(_)));

    let sleep = registry.signal("ios_sleep").unwrap();
    assert_eq!(sleep.value_type, ValueType::Categorical);
    assert!(matches!(
        sleep.detector,
        DetectorBinding::CategoricalChange(_)
    ));

    let events = registry.signal("google_calendar_events").unwrap();
    assert_eq!(events.dedup_strategy, DedupStrategy::Multiple);
    assert!(matches!(events.detector, DetectorBinding::EventBoundary(_)));

    // Every signal is prefixed by its source and reachable from its stream
    for signal in registry.signals() {
        assert!(signal.name.starts_with(&signal.source_name));
        let stream_signals = registry.stream_signals(&signal.stream_name);
        assert!(stream_signals.iter().any(|s| s.name == signal.name));
    }
}

#[test]
fn scheduled_streams_are_cloud_pull_only() {
    let registry = load();
    let scheduled = registry.scheduled_streams();
    assert_eq!(scheduled.len(), 3);
    for stream in scheduled {
        let source = registry.source(&stream.source_name).unwrap();
        assert_eq!(source.platform, Platform::Cloud);
        assert_eq!(stream.ingestion_type, IngestionType::Pull);
    }
}
