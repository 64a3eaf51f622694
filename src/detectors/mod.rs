//! Transition detectors
//!
//! Three algorithm families, selected per signal by the registry's
//! detector binding:
//!
//! - change-point: penalized exact segmentation over numeric series
//! - event-boundary: explicit start/end pairs from discrete events
//! - categorical-change: value changes over labeled states
//!
//! Detectors are pure: they take a signal's records for a window and
//! return transitions. They never touch the database and never do
//! timezone math; the task handler owns storage and cancellation.

pub mod categorical;
pub mod changepoint;
pub mod event_boundary;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::registry::{DetectorBinding, SignalDescriptor};
use crate::store::models::{NewTransition, SignalRecordRow};

/// Run the detector bound to `signal` over one window of records.
///
/// Records must belong to the signal; they are sorted here. A
/// `DetectorBinding::None` signal is collect-only and yields nothing.
pub fn run_detector(
    signal: &SignalDescriptor,
    records: &[SignalRecordRow],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<NewTransition>> {
    let mut sorted: Vec<&SignalRecordRow> = records.iter().collect();
    sorted.sort_by_key(|r| r.timestamp);

    let (mut transitions, min_confidence) = match &signal.detector {
        DetectorBinding::ChangePoint(config) => (
            changepoint::detect(signal, config, &sorted, end)?,
            config.min_confidence,
        ),
        DetectorBinding::EventBoundary(config) => (
            event_boundary::detect(signal, config, &sorted)?,
            config.min_confidence,
        ),
        DetectorBinding::CategoricalChange(config) => (
            categorical::detect(signal, config, &sorted)?,
            config.min_confidence,
        ),
        DetectorBinding::None => return Ok(Vec::new()),
    };

    // Common invariants: in-window, above threshold, sorted by time
    transitions.retain(|t| {
        t.transition_time >= start && t.transition_time <= end && t.confidence >= min_confidence
    });
    transitions.sort_by_key(|t| t.transition_time);
    Ok(transitions)
}

/// A maximal run of records whose consecutive gaps stay within the
/// threshold.
pub(crate) struct CollectionPeriod<'a> {
    pub records: Vec<&'a SignalRecordRow>,
}

impl CollectionPeriod<'_> {
    pub fn start(&self) -> DateTime<Utc> {
        self.records[0].timestamp
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.records[self.records.len() - 1].timestamp
    }
}

/// Split sorted records into collection periods on gaps larger than
/// `gap_threshold_secs`.
pub(crate) fn collection_periods<'a>(
    sorted: &[&'a SignalRecordRow],
    gap_threshold_secs: i64,
) -> Vec<CollectionPeriod<'a>> {
    let mut periods = Vec::new();
    if sorted.is_empty() {
        return periods;
    }

    let mut current: Vec<&SignalRecordRow> = vec![sorted[0]];
    for pair in sorted.windows(2) {
        let gap = (pair[1].timestamp - pair[0].timestamp).num_seconds();
        if gap > gap_threshold_secs {
            periods.push(CollectionPeriod { records: current });
            current = Vec::new();
        }
        current.push(pair[1]);
    }
    periods.push(CollectionPeriod { records: current });
    periods
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}
