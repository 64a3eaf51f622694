//! Day segmenter
//!
//! Consolidates a day's noisy transitions into a bounded set of
//! boundaries and emits contiguous, non-overlapping segments covering
//! the observed part of the local day. Unknown filler segments mark
//! interior coverage holes.
//!
//! The segmenter is pure: the task handler reads transitions, calls
//! [`segment_day`], and persists the result through the events store.

pub mod dbscan;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::store::models::{EventType, NewEvent, TransitionRow};

/// Segmenter tuning. Values are registry configuration, not code: the
/// partial-day contract (edge attach and tail-gap limits) is explicit
/// here rather than inferred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// DBSCAN radius over the feature matrix
    pub eps: f64,
    /// DBSCAN minimum cluster size
    pub min_samples: usize,
    /// Full-day target band for non-unknown segments
    pub target_min_events: usize,
    pub target_max_events: usize,
    /// A day edge further than this from the nearest real boundary gets a
    /// synthetic midnight boundary
    pub edge_attach_secs: i64,
    /// Beyond this gap the day is treated as partial: no synthetic edge,
    /// segments stop at the data
    pub max_tail_gap_secs: i64,
    /// Edge segments shorter than this are dropped
    pub min_edge_segment_minutes: f64,
    /// Interior gaps longer than this get unknown filler
    pub unknown_gap_secs: i64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            eps: 0.3,
            min_samples: 2,
            target_min_events: 8,
            target_max_events: 24,
            edge_attach_secs: 900,
            max_tail_gap_secs: 14400,
            min_edge_segment_minutes: 5.0,
            unknown_gap_secs: 60,
        }
    }
}

/// UTC window of one local day: [local midnight, next local midnight).
pub fn local_day_window(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_local = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_local_timezone(tz)
        .earliest()
        .unwrap_or_else(|| {
            // Spring-forward days without a local midnight start an hour in
            date.and_hms_opt(1, 0, 0)
                .expect("1am is always valid")
                .and_local_timezone(tz)
                .earliest()
                .expect("no representable local start of day")
        });
    let end_local = (date + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_local_timezone(tz)
        .earliest()
        .unwrap_or_else(|| start_local + Duration::days(1));

    (
        start_local.with_timezone(&Utc),
        end_local.with_timezone(&Utc),
    )
}

/// A consolidated boundary between two day segments.
#[derive(Debug, Clone)]
struct Boundary {
    timestamp: DateTime<Utc>,
    confidence: f64,
    transition_count: usize,
    source_transitions: Vec<Uuid>,
    synthetic: bool,
}

/// Build the segments of one local day from its transitions.
///
/// `signal_weights` scales each transition's clustering influence by its
/// signal's registry weight; unknown signals weigh 1.0. Fewer than two
/// transitions yield no segments.
pub fn segment_day(
    transitions: &[TransitionRow],
    date: NaiveDate,
    tz: Tz,
    signal_weights: &HashMap<String, f64>,
    config: &SegmenterConfig,
) -> Vec<NewEvent> {
    if transitions.len() < 2 {
        return Vec::new();
    }

    let (utc_start, utc_end) = local_day_window(date, tz);

    let mut sorted: Vec<&TransitionRow> = transitions.iter().collect();
    sorted.sort_by_key(|t| t.transition_time);

    // Phase 1+2: feature matrix and density clustering
    let features = feature_matrix(&sorted);
    let labels = dbscan::dbscan(&features, config.eps, config.min_samples);

    // Phase 3: consolidate clusters into boundaries
    let mut boundaries = consolidate(&sorted, &labels, signal_weights);
    if boundaries.is_empty() {
        return Vec::new();
    }
    boundaries.sort_by_key(|b| b.timestamp);

    // Phase 4: scale the target band to the observed span
    let span_hours = (boundaries.last().expect("non-empty").timestamp
        - boundaries[0].timestamp)
        .num_seconds() as f64
        / 3600.0;
    let (_, scaled_max) = scaled_band(span_hours, config);

    // Phase 5: synthetic edges where the data reaches near the day edge
    let first = boundaries[0].timestamp;
    let last = boundaries.last().expect("non-empty").timestamp;
    let gap_from_start = (first - utc_start).num_seconds();
    if gap_from_start > config.edge_attach_secs && gap_from_start < config.max_tail_gap_secs {
        boundaries.insert(0, synthetic_boundary(utc_start));
    }
    let gap_to_end = (utc_end - last).num_seconds();
    if gap_to_end > config.edge_attach_secs && gap_to_end < config.max_tail_gap_secs {
        boundaries.push(synthetic_boundary(utc_end));
    }

    reduce_boundaries(&mut boundaries, scaled_max);

    // Phase 6: segments between consecutive boundaries
    build_segments(&boundaries, &sorted, date, tz, config)
}

fn synthetic_boundary(timestamp: DateTime<Utc>) -> Boundary {
    Boundary {
        timestamp,
        confidence: 0.0,
        transition_count: 0,
        source_transitions: Vec::new(),
        synthetic: true,
    }
}

/// Feature row per transition:
/// (hour_of_day, signal_hash, magnitude, confidence, density, diversity).
fn feature_matrix(sorted: &[&TransitionRow]) -> Vec<Vec<f64>> {
    let window = Duration::minutes(2);
    sorted
        .iter()
        .map(|t| {
            let seconds_of_day = t.transition_time.timestamp().rem_euclid(86_400) as f64;
            let hour_of_day = seconds_of_day / 3600.0;

            let nearby: Vec<&&TransitionRow> = sorted
                .iter()
                .filter(|other| {
                    (other.transition_time - t.transition_time).abs() <= window
                })
                .collect();
            let density = nearby.len() as f64 / 10.0;
            let diversity = nearby
                .iter()
                .map(|other| other.source_name.as_str())
                .collect::<std::collections::HashSet<_>>()
                .len() as f64
                / 4.0;

            vec![
                hour_of_day,
                signal_hash(&t.signal_name),
                t.magnitude.unwrap_or(0.5),
                t.confidence,
                density,
                diversity,
            ]
        })
        .collect()
}

/// Stable hash of a signal name into [0, 1).
fn signal_hash(name: &str) -> f64 {
    let digest = Sha256::digest(name.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("8 bytes")) as f64
        / (u64::MAX as f64 + 1.0)
}

/// One boundary per cluster at the weighted mean timestamp; noise points
/// stay singleton boundaries.
fn consolidate(
    sorted: &[&TransitionRow],
    labels: &[i32],
    signal_weights: &HashMap<String, f64>,
) -> Vec<Boundary> {
    let mut clusters: HashMap<i32, Vec<usize>> = HashMap::new();
    for (index, &label) in labels.iter().enumerate() {
        clusters.entry(label).or_default().push(index);
    }

    let mut boundaries = Vec::new();
    for (label, members) in clusters {
        if label == dbscan::NOISE {
            for &index in &members {
                let t = sorted[index];
                boundaries.push(Boundary {
                    timestamp: t.transition_time,
                    confidence: t.confidence,
                    transition_count: 1,
                    source_transitions: vec![t.id],
                    synthetic: false,
                });
            }
            continue;
        }

        let mut weight_sum = 0.0;
        let mut weighted_seconds = 0.0;
        let mut confidence_sum = 0.0;
        let mut ids = Vec::with_capacity(members.len());
        for &index in &members {
            let t = sorted[index];
            let weight = t.confidence
                * signal_weights.get(&t.signal_name).copied().unwrap_or(1.0);
            weight_sum += weight;
            weighted_seconds += weight * t.transition_time.timestamp() as f64;
            confidence_sum += t.confidence;
            ids.push(t.id);
        }
        if weight_sum <= 0.0 {
            continue;
        }

        let mean_secs = (weighted_seconds / weight_sum).round() as i64;
        boundaries.push(Boundary {
            timestamp: DateTime::from_timestamp(mean_secs, 0).expect("in-range timestamp"),
            confidence: confidence_sum / members.len() as f64,
            transition_count: members.len(),
            source_transitions: ids,
            synthetic: false,
        });
    }
    boundaries
}

/// Scale the configured full-day band to the observed data span.
fn scaled_band(span_hours: f64, config: &SegmenterConfig) -> (usize, usize) {
    if span_hours < 1.0 {
        (1, 2)
    } else if span_hours < 6.0 {
        let min = ((span_hours * 0.5) as usize).max(2);
        let max = ((span_hours * 1.2) as usize).max(min + 1).min(6);
        (min, max)
    } else {
        let ratio = span_hours / 24.0;
        let min = ((config.target_min_events as f64 * ratio) as usize).max(4);
        let max = ((config.target_max_events as f64 * ratio) as usize).max(min + 2);
        (min, max)
    }
}

/// Merge the least important adjacent boundary pairs until the segment
/// count (boundaries − 1) fits under `scaled_max`. Importance is
/// `conf_i * conf_{i+1} * ln(gap + 60)`; the lower-confidence real
/// boundary of the chosen pair is dropped. Synthetic edges stay.
fn reduce_boundaries(boundaries: &mut Vec<Boundary>, scaled_max: usize) {
    while boundaries.len().saturating_sub(1) > scaled_max {
        let mut min_importance = f64::INFINITY;
        let mut merge_at: Option<usize> = None;

        for i in 0..boundaries.len() - 1 {
            if boundaries[i].synthetic && boundaries[i + 1].synthetic {
                continue;
            }
            let gap = (boundaries[i + 1].timestamp - boundaries[i].timestamp).num_seconds() as f64;
            let importance =
                boundaries[i].confidence * boundaries[i + 1].confidence * (gap + 60.0).ln();
            if importance < min_importance {
                min_importance = importance;
                merge_at = Some(i);
            }
        }

        let Some(i) = merge_at else { break };
        let drop = if boundaries[i].synthetic {
            i + 1
        } else if boundaries[i + 1].synthetic {
            i
        } else if boundaries[i].confidence < boundaries[i + 1].confidence {
            i
        } else {
            i + 1
        };
        boundaries.remove(drop);
    }
}

fn build_segments(
    boundaries: &[Boundary],
    sorted: &[&TransitionRow],
    date: NaiveDate,
    tz: Tz,
    config: &SegmenterConfig,
) -> Vec<NewEvent> {
    let mut events = Vec::new();
    let last_pair = boundaries.len().saturating_sub(2);

    for (index, pair) in boundaries.windows(2).enumerate() {
        let (entry, exit) = (&pair[0], &pair[1]);
        if exit.timestamp <= entry.timestamp {
            continue;
        }
        let duration_minutes =
            (exit.timestamp - entry.timestamp).num_seconds() as f64 / 60.0;
        let is_edge = index == 0 || index == last_pair;
        if is_edge && duration_minutes < config.min_edge_segment_minutes {
            continue;
        }

        let members: Vec<&&TransitionRow> = sorted
            .iter()
            .filter(|t| {
                t.transition_time >= entry.timestamp && t.transition_time < exit.timestamp
            })
            .collect();

        let mut signal_counts: HashMap<&str, u64> = HashMap::new();
        let mut source_counts: HashMap<&str, u64> = HashMap::new();
        for t in &members {
            *signal_counts.entry(t.signal_name.as_str()).or_default() += 1;
            *source_counts.entry(t.source_name.as_str()).or_default() += 1;
        }
        let avg_confidence = if members.is_empty() {
            0.0
        } else {
            members.iter().map(|t| t.confidence).sum::<f64>() / members.len() as f64
        };
        let activity_intensity = if duration_minutes > 0.0 {
            members.len() as f64 / duration_minutes
        } else {
            0.0
        };
        let dominant_source = source_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(source, _)| source.to_string());
        let unique_sources: Vec<&str> = {
            let mut sources: Vec<&str> = source_counts.keys().copied().collect();
            sources.sort();
            sources
        };

        events.push(NewEvent {
            date,
            cluster_id: events.len() as i32,
            start_time: entry.timestamp,
            end_time: exit.timestamp,
            event_type: EventType::Activity,
            core_density: entry.confidence,
            transition_ids: members.iter().map(|t| t.id).collect(),
            signal_contributions: json!(signal_counts),
            event_metadata: json!({
                "duration_minutes": duration_minutes,
                "is_edge_segment": is_edge,
                "entry_confidence": entry.confidence,
                "exit_confidence": exit.confidence,
                "entry_transition_count": entry.transition_count,
                "exit_transition_count": exit.transition_count,
                "entry_synthetic": entry.synthetic,
                "exit_synthetic": exit.synthetic,
                "entry_source_transitions": entry.source_transitions,
                "activity_intensity": activity_intensity,
                "avg_confidence": avg_confidence,
                "unique_sources": unique_sources,
                "dominant_source": dominant_source,
                "timezone": tz.name(),
                "local_date": date.to_string(),
            }),
        });
    }

    fill_gaps(events, date, tz, config)
}

/// Insert unknown filler for interior gaps above the threshold.
fn fill_gaps(
    events: Vec<NewEvent>,
    date: NaiveDate,
    tz: Tz,
    config: &SegmenterConfig,
) -> Vec<NewEvent> {
    let mut filled: Vec<NewEvent> = Vec::with_capacity(events.len());

    for event in events {
        let previous_end = filled.last().map(|previous| previous.end_time);
        if let Some(previous_end) = previous_end {
            let gap = (event.start_time - previous_end).num_seconds();
            if gap > config.unknown_gap_secs {
                filled.push(NewEvent {
                    date,
                    cluster_id: -1,
                    start_time: previous_end,
                    end_time: event.start_time,
                    event_type: EventType::Unknown,
                    core_density: 0.0,
                    transition_ids: Vec::new(),
                    signal_contributions: json!({}),
                    event_metadata: json!({
                        "duration_minutes": gap as f64 / 60.0,
                        "timezone": tz.name(),
                        "local_date": date.to_string(),
                    }),
                });
            }
        }
        filled.push(event);
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{Direction, TransitionType};
    use chrono::Timelike;

    fn transition(
        time: DateTime<Utc>,
        signal: &str,
        source: &str,
        confidence: f64,
        magnitude: Option<f64>,
    ) -> TransitionRow {
        TransitionRow {
            id: Uuid::new_v4(),
            source_name: source.to_string(),
            signal_name: signal.to_string(),
            transition_time: time,
            transition_type: TransitionType::Changepoint,
            direction: Some(Direction::Increase),
            before_mean: None,
            before_std: None,
            after_mean: None,
            after_std: None,
            magnitude,
            confidence,
            detection_method: "pelt_changepoint".into(),
            transition_metadata: json!({}),
        }
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn utc() -> Tz {
        chrono_tz::UTC
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 3).unwrap()
    }

    /// Three dense clusters plus scatter across 24 hours.
    fn full_day_transitions() -> Vec<TransitionRow> {
        let mut rows = Vec::new();
        // Dense clusters around 08:00, 12:30, 18:45
        for (hour, minute) in [(8u32, 0u32), (12, 30), (18, 45)] {
            for i in 0..4i64 {
                let time = ts("2025-05-03T00:00:00Z")
                    .with_hour(hour)
                    .unwrap()
                    .with_minute(minute)
                    .unwrap()
                    + Duration::seconds(20 * i);
                rows.push(transition(time, "ios_speed", "ios", 0.9, Some(2.0)));
            }
        }
        // Scattered noise through the day
        for i in 0..18i64 {
            let time = ts("2025-05-03T00:20:00Z") + Duration::minutes(78 * i);
            let signal = if i % 2 == 0 {
                "ios_heart_rate"
            } else {
                "google_calendar_events"
            };
            let source = if i % 2 == 0 { "ios" } else { "google" };
            rows.push(transition(time, signal, source, 0.7 + (i % 3) as f64 * 0.1, None));
        }
        rows
    }

    #[test]
    fn test_full_day_segments_cover_and_fit_band() {
        let rows = full_day_transitions();
        let events = segment_day(&rows, date(), utc(), &HashMap::new(), &SegmenterConfig::default());

        assert!(!events.is_empty());

        let activity: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::Activity)
            .collect();
        assert!(
            (8..=24).contains(&activity.len()),
            "expected 8..=24 activity segments, got {}",
            activity.len()
        );

        // Sorted, pairwise non-overlapping, contiguous modulo unknown fill
        let (utc_start, utc_end) = local_day_window(date(), utc());
        for pair in events.windows(2) {
            assert!(pair[0].end_time <= pair[1].start_time);
            let gap = (pair[1].start_time - pair[0].end_time).num_seconds();
            assert!(gap <= 60, "uncovered interior gap of {gap}s");
        }
        for event in &events {
            assert!(event.start_time < event.end_time);
            assert!(event.start_time >= utc_start);
            assert!(event.end_time <= utc_end);
        }
    }

    #[test]
    fn test_too_few_transitions_yield_nothing() {
        let rows = vec![transition(
            ts("2025-05-03T09:00:00Z"),
            "ios_speed",
            "ios",
            0.9,
            None,
        )];
        assert!(segment_day(&rows, date(), utc(), &HashMap::new(), &SegmenterConfig::default())
            .is_empty());
    }

    #[test]
    fn test_partial_day_stops_at_data() {
        // Data only 09:00-11:00; the 13h tail gap exceeds the limit, so no
        // synthetic end boundary is added
        let mut rows = Vec::new();
        for i in 0..6i64 {
            rows.push(transition(
                ts("2025-05-03T09:00:00Z") + Duration::minutes(20 * i),
                "ios_speed",
                "ios",
                0.8,
                Some(1.0),
            ));
        }
        let events = segment_day(&rows, date(), utc(), &HashMap::new(), &SegmenterConfig::default());
        assert!(!events.is_empty());
        let last_end = events.last().unwrap().end_time;
        assert!(last_end <= ts("2025-05-03T11:00:01Z"));
    }

    #[test]
    fn test_scaled_band_tiers() {
        let config = SegmenterConfig::default();
        assert_eq!(scaled_band(0.5, &config), (1, 2));
        assert_eq!(scaled_band(4.0, &config), (2, 4));
        let (min, max) = scaled_band(24.0, &config);
        assert_eq!((min, max), (8, 24));
    }

    #[test]
    fn test_unknown_fill_inserted() {
        let make = |start: &str, end: &str| NewEvent {
            date: date(),
            cluster_id: 0,
            start_time: ts(start),
            end_time: ts(end),
            event_type: EventType::Activity,
            core_density: 0.5,
            transition_ids: Vec::new(),
            signal_contributions: json!({}),
            event_metadata: json!({}),
        };
        let events = vec![
            make("2025-05-03T09:00:00Z", "2025-05-03T10:00:00Z"),
            make("2025-05-03T10:30:00Z", "2025-05-03T11:00:00Z"),
        ];
        let filled = fill_gaps(events, date(), utc(), &SegmenterConfig::default());
        assert_eq!(filled.len(), 3);
        assert_eq!(filled[1].event_type, EventType::Unknown);
        assert_eq!(filled[1].cluster_id, -1);
        assert_eq!(filled[1].start_time, ts("2025-05-03T10:00:00Z"));
        assert_eq!(filled[1].end_time, ts("2025-05-03T10:30:00Z"));
    }

    #[test]
    fn test_local_day_window_chicago() {
        let tz: Tz = "America/Chicago".parse().unwrap();
        let (start, end) = local_day_window(date(), tz);
        // CDT is UTC-5 in May
        assert_eq!(start, ts("2025-05-03T05:00:00Z"));
        assert_eq!(end, ts("2025-05-04T05:00:00Z"));
    }
}
