//! Change-point detection over continuous signals
//!
//! Two layers: collection periods handle gaps in recording (a phone in a
//! drawer is not a state change), then an exact penalized segmentation
//! runs within each period. The segmentation minimizes
//! `sum of segment costs + penalty * number of segments` with the PELT
//! pruning rule, so it is optimal for the chosen cost model.

use chrono::{DateTime, Utc};
use serde_json::json;

use super::{collection_periods, mean, std_dev, CollectionPeriod};
use crate::error::Result;
use crate::registry::{ChangePointConfig, CostModel, SignalDescriptor};
use crate::store::models::{Direction, NewTransition, SignalRecordRow, TransitionType};

pub(crate) fn detect(
    signal: &SignalDescriptor,
    config: &ChangePointConfig,
    sorted: &[&SignalRecordRow],
    window_end: DateTime<Utc>,
) -> Result<Vec<NewTransition>> {
    if sorted.is_empty() {
        return Ok(Vec::new());
    }

    let mut transitions = Vec::new();
    let periods = collection_periods(sorted, config.gap_threshold_secs);
    let total_periods = periods.len();

    for (index, period) in periods.iter().enumerate() {
        if period.records.len() >= config.min_segment_size * 2 {
            transitions.extend(segment_period(signal, config, period));
        }

        // One data_gap at the end of every run that is actually followed
        // by silence: interior runs always, the final run only when the
        // window extends past it by more than the gap threshold.
        let followed_by_silence = index < total_periods - 1
            || (window_end - period.end()).num_seconds() > config.gap_threshold_secs;
        if followed_by_silence {
            transitions.push(gap_transition(signal, period, index));
        }
    }

    Ok(merge_close(transitions, config.min_transition_gap_secs))
}

fn gap_transition(
    signal: &SignalDescriptor,
    period: &CollectionPeriod<'_>,
    index: usize,
) -> NewTransition {
    let duration_minutes = (period.end() - period.start()).num_seconds() as f64 / 60.0;
    NewTransition {
        source_name: signal.source_name.clone(),
        signal_name: signal.name.clone(),
        transition_time: period.end(),
        transition_type: TransitionType::DataGap,
        direction: None,
        before_mean: None,
        before_std: None,
        after_mean: None,
        after_std: None,
        magnitude: None,
        confidence: 1.0,
        detection_method: "gap_detection".to_string(),
        transition_metadata: json!({
            "period_duration_minutes": duration_minutes,
            "signal_count": period.records.len(),
            "period_index": index,
        }),
    }
}

fn segment_period(
    signal: &SignalDescriptor,
    config: &ChangePointConfig,
    period: &CollectionPeriod<'_>,
) -> Vec<NewTransition> {
    let values: Vec<f64> = period
        .records
        .iter()
        .filter_map(|r| r.signal_value.parse::<f64>().ok())
        .collect();
    if values.len() < config.min_segment_size * 2 {
        return Vec::new();
    }

    // BIC penalty scaled by the per-signal multiplier
    let penalty = (values.len() as f64).ln() * config.penalty_multiplier;
    let changepoints = pelt(&values, config.min_segment_size, penalty, config.cost);
    if changepoints.is_empty() {
        return Vec::new();
    }

    let mut boundaries = Vec::with_capacity(changepoints.len() + 2);
    boundaries.push(0);
    boundaries.extend(&changepoints);
    boundaries.push(values.len());

    let mut transitions = Vec::new();
    for i in 1..boundaries.len() - 1 {
        let cp = boundaries[i];
        let before = &values[boundaries[i - 1]..cp];
        let after = &values[cp..boundaries[i + 1]];

        let before_mean = mean(before);
        let after_mean = mean(after);
        let direction = if after_mean > before_mean {
            Direction::Increase
        } else {
            Direction::Decrease
        };

        transitions.push(NewTransition {
            source_name: signal.source_name.clone(),
            signal_name: signal.name.clone(),
            transition_time: period.records[cp].timestamp,
            transition_type: TransitionType::Changepoint,
            direction: Some(direction),
            before_mean: Some(before_mean),
            before_std: Some(std_dev(before)),
            after_mean: Some(after_mean),
            after_std: Some(std_dev(after)),
            magnitude: Some((after_mean - before_mean).abs()),
            confidence: changepoint_confidence(before, after, config.min_confidence),
            detection_method: "pelt_changepoint".to_string(),
            transition_metadata: json!({
                "before_segment_size": before.len(),
                "after_segment_size": after.len(),
                "changepoint_index": i,
            }),
        });
    }
    transitions
}

/// Confidence from segment stability (coefficient of variation) and size.
fn changepoint_confidence(before: &[f64], after: &[f64], min_confidence: f64) -> f64 {
    if before.is_empty() || after.is_empty() {
        return 0.5;
    }

    let cv = |values: &[f64]| {
        let m = mean(values);
        if m != 0.0 {
            std_dev(values) / m
        } else {
            1.0
        }
    };
    let avg_cv = (cv(before) + cv(after)) / 2.0;

    let stability: f64 = if avg_cv < 0.1 {
        0.95
    } else if avg_cv < 0.2 {
        0.85
    } else if avg_cv < 0.3 {
        0.75
    } else {
        0.65
    };

    let min_len = before.len().min(after.len());
    let size_penalty: f64 = if min_len < 10 {
        0.10
    } else if min_len < 20 {
        0.05
    } else {
        0.0
    };

    (stability - size_penalty).clamp(min_confidence, 1.0)
}

/// Merge transitions closer together than `min_gap_secs`, keeping the
/// highest-confidence member of each group and boosting it 10% for the
/// agreement, capped at 1.0.
fn merge_close(mut transitions: Vec<NewTransition>, min_gap_secs: i64) -> Vec<NewTransition> {
    if transitions.len() <= 1 {
        return transitions;
    }
    transitions.sort_by_key(|t| t.transition_time);

    let mut merged = Vec::new();
    let mut group: Vec<NewTransition> = Vec::new();

    for transition in transitions {
        match group.last() {
            Some(last)
                if (transition.transition_time - last.transition_time).num_seconds()
                    < min_gap_secs =>
            {
                group.push(transition);
            }
            Some(_) => {
                merged.push(collapse_group(std::mem::take(&mut group)));
                group.push(transition);
            }
            None => group.push(transition),
        }
    }
    if !group.is_empty() {
        merged.push(collapse_group(group));
    }
    merged
}

fn collapse_group(group: Vec<NewTransition>) -> NewTransition {
    if group.len() == 1 {
        return group.into_iter().next().expect("non-empty group");
    }

    let summary: Vec<_> = group
        .iter()
        .map(|t| {
            json!({
                "time": t.transition_time.to_rfc3339(),
                "type": t.transition_type.to_string(),
                "magnitude": t.magnitude,
                "direction": t.direction.map(|d| d.to_string()),
                "confidence": t.confidence,
            })
        })
        .collect();
    let count = group.len();

    let mut representative = group
        .into_iter()
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .expect("non-empty group");

    if let Some(map) = representative.transition_metadata.as_object_mut() {
        map.insert("merged_count".to_string(), json!(count));
        map.insert("merged_transitions".to_string(), json!(summary));
    }
    representative.confidence = (representative.confidence * 1.1).min(1.0);
    representative
}

/// Exact penalized segmentation with PELT pruning.
///
/// Returns interior change-point indices: each is the first index of a new
/// segment. Minimizes `sum of C(segment) + penalty * segments` where C is
/// the configured cost; candidates whose partial objective already exceeds
/// the best are pruned, which keeps the search near-linear in practice.
fn pelt(values: &[f64], min_size: usize, penalty: f64, cost_model: CostModel) -> Vec<usize> {
    let n = values.len();
    if n < min_size * 2 {
        return Vec::new();
    }

    let cost = SegmentCost::new(values, cost_model);

    let mut best = vec![f64::INFINITY; n + 1];
    let mut prev = vec![0usize; n + 1];
    best[0] = -penalty;

    let mut candidates: Vec<usize> = vec![0];

    for t in min_size..=n {
        let mut best_score = f64::INFINITY;
        let mut best_s = 0usize;
        for &s in &candidates {
            if t - s < min_size {
                continue;
            }
            let score = best[s] + cost.cost(s, t) + penalty;
            if score < best_score {
                best_score = score;
                best_s = s;
            }
        }
        best[t] = best_score;
        prev[t] = best_s;

        // PELT pruning: a candidate that cannot beat the current optimum
        // can never become one later.
        candidates.retain(|&s| {
            t - s < min_size || best[s] + cost.cost(s, t) <= best[t]
        });
        candidates.push(t);
    }

    let mut changepoints = Vec::new();
    let mut t = n;
    while t > 0 {
        let s = prev[t];
        if s > 0 {
            changepoints.push(s);
        }
        t = s;
    }
    changepoints.reverse();
    changepoints
}

/// Segment cost evaluation over [s, t).
struct SegmentCost<'a> {
    values: &'a [f64],
    model: CostModel,
    prefix_sum: Vec<f64>,
    prefix_sumsq: Vec<f64>,
}

impl<'a> SegmentCost<'a> {
    fn new(values: &'a [f64], model: CostModel) -> Self {
        let mut prefix_sum = Vec::with_capacity(values.len() + 1);
        let mut prefix_sumsq = Vec::with_capacity(values.len() + 1);
        prefix_sum.push(0.0);
        prefix_sumsq.push(0.0);
        for &v in values {
            prefix_sum.push(prefix_sum.last().unwrap() + v);
            prefix_sumsq.push(prefix_sumsq.last().unwrap() + v * v);
        }
        Self {
            values,
            model,
            prefix_sum,
            prefix_sumsq,
        }
    }

    fn cost(&self, s: usize, t: usize) -> f64 {
        match self.model {
            CostModel::L2 => {
                let n = (t - s) as f64;
                let sum = self.prefix_sum[t] - self.prefix_sum[s];
                let sumsq = self.prefix_sumsq[t] - self.prefix_sumsq[s];
                (sumsq - sum * sum / n).max(0.0)
            }
            CostModel::L1 => {
                let mut segment: Vec<f64> = self.values[s..t].to_vec();
                segment.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let median = segment[segment.len() / 2];
                segment.iter().map(|v| (v - median).abs()).sum()
            }
        }
    }
}
