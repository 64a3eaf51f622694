//! Source, stream, and signal registry
//!
//! The registry is the catalog every other component reads: which sources
//! exist, which streams they provide, which signals those streams produce,
//! and how each signal is detected. It is compiled from a declarative YAML
//! tree (`sources/<source>/_source.yaml`,
//! `sources/<source>/<stream>/_stream.yaml`,
//! `sources/<source>/<stream>/<signal>/_signal.yaml`) at startup and is
//! read-only afterwards.
//!
//! Syncer and processor implementations are resolved from compile-time
//! factory maps keyed by the strings the YAML references; detector
//! algorithms are tagged enum variants carrying typed configuration.

mod loader;

pub use loader::load_registry;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Where a source runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Provider API we pull from on a schedule
    Cloud,
    /// Trusted device that pushes batches
    Device,
}

/// Authentication kind required by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    OAuth2,
    DeviceToken,
    None,
}

/// How data for a stream arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionType {
    Pull,
    Push,
}

/// What a stream produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOutput {
    Signals,
    Semantics,
}

/// Value type of a signal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Continuous,
    Categorical,
    Event,
    Count,
    Spatial,
    Binary,
}

/// Deduplication strategy for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// One value per timestamp; the timestamp is the idempotency key
    Single,
    /// Overlapping observations allowed; key carries a content suffix
    Multiple,
}

/// Segment cost model for change-point detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostModel {
    /// Absolute deviation from the segment median
    L1,
    /// Squared deviation from the segment mean
    L2,
}

/// Typed configuration for the change-point detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePointConfig {
    /// Gap between consecutive samples that ends a collection period
    #[serde(default = "default_gap_threshold_secs")]
    pub gap_threshold_secs: i64,
    /// Minimum points per segment
    #[serde(default = "default_min_segment_size")]
    pub min_segment_size: usize,
    /// Multiplier on the BIC penalty ln(n)
    #[serde(default = "default_penalty_multiplier")]
    pub penalty_multiplier: f64,
    #[serde(default = "default_cost_model")]
    pub cost: CostModel,
    /// Transitions closer than this are merged
    #[serde(default = "default_min_transition_gap_secs")]
    pub min_transition_gap_secs: i64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for ChangePointConfig {
    fn default() -> Self {
        Self {
            gap_threshold_secs: default_gap_threshold_secs(),
            min_segment_size: default_min_segment_size(),
            penalty_multiplier: default_penalty_multiplier(),
            cost: default_cost_model(),
            min_transition_gap_secs: default_min_transition_gap_secs(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_gap_threshold_secs() -> i64 {
    900
}
fn default_min_segment_size() -> usize {
    5
}
fn default_penalty_multiplier() -> f64 {
    1.0
}
fn default_cost_model() -> CostModel {
    CostModel::L2
}
fn default_min_transition_gap_secs() -> i64 {
    300
}
fn default_min_confidence() -> f64 {
    0.3
}

/// Typed configuration for the event-boundary detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBoundaryConfig {
    #[serde(default = "default_event_min_confidence")]
    pub min_confidence: f64,
}

impl Default for EventBoundaryConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_event_min_confidence(),
        }
    }
}

fn default_event_min_confidence() -> f64 {
    0.5
}

/// Typed configuration for the categorical-change detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalConfig {
    /// Minimum minutes a value must persist before a change counts
    #[serde(default = "default_min_value_duration_minutes")]
    pub min_value_duration_minutes: i64,
    /// Gap in minutes that ends a session and injects a data_gap
    #[serde(default = "default_categorical_gap_minutes")]
    pub gap_threshold_minutes: i64,
    #[serde(default = "default_categorical_min_confidence")]
    pub min_confidence: f64,
}

impl Default for CategoricalConfig {
    fn default() -> Self {
        Self {
            min_value_duration_minutes: default_min_value_duration_minutes(),
            gap_threshold_minutes: default_categorical_gap_minutes(),
            min_confidence: default_categorical_min_confidence(),
        }
    }
}

fn default_min_value_duration_minutes() -> i64 {
    5
}
fn default_categorical_gap_minutes() -> i64 {
    30
}
fn default_categorical_min_confidence() -> f64 {
    0.3
}

/// Detector binding for a signal: one of the three algorithm families, or
/// explicitly none for collect-only signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorBinding {
    ChangePoint(ChangePointConfig),
    EventBoundary(EventBoundaryConfig),
    CategoricalChange(CategoricalConfig),
    None,
}

impl DetectorBinding {
    pub fn is_none(&self) -> bool {
        matches!(self, DetectorBinding::None)
    }
}

/// OAuth provider details for a cloud source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Token endpoint used for refresh
    pub token_url: String,
}

/// Declarative description of a data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub platform: Platform,
    pub auth_type: AuthType,
    #[serde(default)]
    pub oauth: Option<OAuthProviderConfig>,
}

/// Time-window policy for pull syncs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncWindowConfig {
    /// First-sync range reaches this far back
    #[serde(default = "default_lookback_days")]
    pub full_sync_lookback_days: i64,
    /// First-sync range reaches this far forward (calendars have futures)
    #[serde(default)]
    pub full_sync_lookahead_days: i64,
    /// Incremental syncs re-read this much before the last success
    #[serde(default = "default_overlap_minutes")]
    pub overlap_minutes: i64,
    /// Incremental syncs read this far past now
    #[serde(default)]
    pub lookahead_minutes: i64,
}

impl Default for SyncWindowConfig {
    fn default() -> Self {
        Self {
            full_sync_lookback_days: default_lookback_days(),
            full_sync_lookahead_days: 0,
            overlap_minutes: default_overlap_minutes(),
            lookahead_minutes: 0,
        }
    }
}

fn default_lookback_days() -> i64 {
    30
}
fn default_overlap_minutes() -> i64 {
    60
}

/// Declarative description of a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub description: String,
    pub ingestion_type: IngestionType,
    #[serde(default = "default_stream_output")]
    pub output: StreamOutput,
    /// 5-field cron, UTC; pull streams only
    #[serde(default)]
    pub cron_schedule: Option<String>,
    /// Factory key of the syncer implementation; absent means push-only
    #[serde(default)]
    pub syncer: Option<String>,
    /// Factory key of the processor implementation
    pub processor: String,
    /// Signal names this stream produces, filled from the signal tree
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub sync_window: SyncWindowConfig,
    /// In-process upstream throttle, requests per second
    #[serde(default)]
    pub rate_limit_per_sec: Option<f64>,
}

fn default_stream_output() -> StreamOutput {
    StreamOutput::Signals
}

/// Declarative description of a signal channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDescriptor {
    pub name: String,
    #[serde(default)]
    pub stream_name: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub description: String,
    pub value_type: ValueType,
    pub unit: String,
    #[serde(default = "default_dedup")]
    pub dedup_strategy: DedupStrategy,
    pub detector: DetectorBinding,
    /// Weight in event clustering
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Baseline confidence multiplier
    #[serde(default = "default_fidelity")]
    pub fidelity: f64,
}

fn default_dedup() -> DedupStrategy {
    DedupStrategy::Single
}
fn default_weight() -> f64 {
    1.0
}
fn default_fidelity() -> f64 {
    1.0
}

/// Description of a semantic (versioned-document) stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticDescriptor {
    pub name: String,
    pub stream_name: String,
    pub source_name: String,
    #[serde(default)]
    pub description: String,
}

/// The compiled catalog.
#[derive(Debug, Default)]
pub struct Registry {
    sources: HashMap<String, SourceDescriptor>,
    streams: HashMap<String, StreamDescriptor>,
    signals: HashMap<String, SignalDescriptor>,
    semantics: HashMap<String, SemanticDescriptor>,
}

impl Registry {
    pub(crate) fn new(
        sources: HashMap<String, SourceDescriptor>,
        streams: HashMap<String, StreamDescriptor>,
        signals: HashMap<String, SignalDescriptor>,
        semantics: HashMap<String, SemanticDescriptor>,
    ) -> Self {
        Self {
            sources,
            streams,
            signals,
            semantics,
        }
    }

    pub fn source(&self, name: &str) -> Option<&SourceDescriptor> {
        self.sources.get(name)
    }

    pub fn stream(&self, name: &str) -> Option<&StreamDescriptor> {
        self.streams.get(name)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDescriptor> {
        self.signals.get(name)
    }

    pub fn semantic(&self, name: &str) -> Option<&SemanticDescriptor> {
        self.semantics.get(name)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.values()
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.streams.values()
    }

    pub fn signals(&self) -> impl Iterator<Item = &SignalDescriptor> {
        self.signals.values()
    }

    /// Signals produced by one stream, sorted by name.
    pub fn stream_signals(&self, stream_name: &str) -> Vec<&SignalDescriptor> {
        self.streams
            .get(stream_name)
            .map(|s| {
                s.signals
                    .iter()
                    .filter_map(|name| self.signals.get(name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pull streams that carry a cron schedule.
    pub fn scheduled_streams(&self) -> Vec<&StreamDescriptor> {
        let mut streams: Vec<_> = self
            .streams
            .values()
            .filter(|s| s.ingestion_type == IngestionType::Pull && s.cron_schedule.is_some())
            .collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));
        streams
    }

    /// Check catalog consistency. Any failure here aborts startup.
    ///
    /// `processor_exists` / `syncer_exists` let the loader verify factory
    /// keys against the compile-time registries without a circular
    /// dependency on the source modules.
    pub fn validate(
        &self,
        processor_exists: &dyn Fn(&str) -> bool,
        syncer_exists: &dyn Fn(&str) -> bool,
    ) -> Result<()> {
        for source in self.sources.values() {
            if source.auth_type == AuthType::OAuth2 && source.oauth.is_none() {
                return Err(Error::Configuration(format!(
                    "oauth2 source '{}' has no oauth block",
                    source.name
                )));
            }
        }

        for stream in self.streams.values() {
            if !self.sources.contains_key(&stream.source_name) {
                return Err(Error::Configuration(format!(
                    "stream '{}' references unknown source '{}'",
                    stream.name, stream.source_name
                )));
            }
            if stream.output == StreamOutput::Signals && stream.signals.is_empty() {
                return Err(Error::Configuration(format!(
                    "stream '{}' produces signals but declares none",
                    stream.name
                )));
            }
            if !processor_exists(&stream.processor) {
                return Err(Error::Configuration(format!(
                    "stream '{}' references unknown processor '{}'",
                    stream.name, stream.processor
                )));
            }
            if let Some(key) = &stream.syncer {
                if !syncer_exists(key) {
                    return Err(Error::Configuration(format!(
                        "stream '{}' references unknown syncer '{}'",
                        stream.name, key
                    )));
                }
            }
            if stream.ingestion_type == IngestionType::Push && stream.cron_schedule.is_some() {
                return Err(Error::Configuration(format!(
                    "push stream '{}' must not carry a cron schedule",
                    stream.name
                )));
            }
        }

        for signal in self.signals.values() {
            if !signal.name.starts_with(&signal.source_name) {
                return Err(Error::Configuration(format!(
                    "signal '{}' is not prefixed by its source '{}'",
                    signal.name, signal.source_name
                )));
            }
            if signal.unit.is_empty() {
                return Err(Error::Configuration(format!(
                    "signal '{}' has no unit",
                    signal.name
                )));
            }
        }

        for semantic in self.semantics.values() {
            if !self.streams.contains_key(&semantic.stream_name) {
                return Err(Error::Configuration(format!(
                    "semantic '{}' references unknown stream '{}'",
                    semantic.name, semantic.stream_name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_registry() -> Registry {
        let mut sources = HashMap::new();
        sources.insert(
            "ios".to_string(),
            SourceDescriptor {
                name: "ios".into(),
                display_name: "iOS".into(),
                description: String::new(),
                platform: Platform::Device,
                auth_type: AuthType::DeviceToken,
                oauth: None,
            },
        );
        let mut streams = HashMap::new();
        streams.insert(
            "ios_location".to_string(),
            StreamDescriptor {
                name: "ios_location".into(),
                source_name: "ios".into(),
                description: String::new(),
                ingestion_type: IngestionType::Push,
                output: StreamOutput::Signals,
                cron_schedule: None,
                syncer: None,
                processor: "ios_location".into(),
                signals: vec!["ios_speed".into()],
                sync_window: SyncWindowConfig::default(),
                rate_limit_per_sec: None,
            },
        );
        let mut signals = HashMap::new();
        signals.insert(
            "ios_speed".to_string(),
            SignalDescriptor {
                name: "ios_speed".into(),
                stream_name: "ios_location".into(),
                source_name: "ios".into(),
                description: String::new(),
                value_type: ValueType::Continuous,
                unit: "m/s".into(),
                dedup_strategy: DedupStrategy::Single,
                detector: DetectorBinding::ChangePoint(ChangePointConfig::default()),
                weight: 1.0,
                fidelity: 1.0,
            },
        );
        Registry::new(sources, streams, signals, HashMap::new())
    }

    #[test]
    fn test_valid_catalog_passes() {
        let registry = minimal_registry();
        registry
            .validate(&|p| p == "ios_location", &|_| true)
            .expect("catalog should validate");
    }

    #[test]
    fn test_unknown_processor_rejected() {
        let registry = minimal_registry();
        let err = registry.validate(&|_| false, &|_| true).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_signal_prefix_enforced() {
        let mut registry = minimal_registry();
        let mut bad = registry.signals.get("ios_speed").unwrap().clone();
        bad.name = "speed".into();
        registry.signals.insert("speed".into(), bad);
        assert!(registry
            .validate(&|p| p == "ios_location", &|_| true)
            .is_err());
    }

    #[test]
    fn test_detector_binding_yaml_roundtrip() {
        let yaml = "kind: change_point\ngap_threshold_secs: 1800\ncost: l1\n";
        let binding: DetectorBinding = serde_yaml::from_str(yaml).unwrap();
        match binding {
            DetectorBinding::ChangePoint(cfg) => {
                assert_eq!(cfg.gap_threshold_secs, 1800);
                assert_eq!(cfg.cost, CostModel::L1);
                assert_eq!(cfg.min_segment_size, 5);
            }
            other => panic!("unexpected binding: {other:?}"),
        }
    }
}
