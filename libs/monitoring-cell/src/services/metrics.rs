// =====================================================================================
// METRICS RECORDER
// =====================================================================================

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::models::{HistogramSummary, MetricsSnapshot};

/// Counter / histogram / gauge sink handed to every scheduling service.
///
/// Calls are synchronous and infallible so they can run inside a slot lock
/// without adding a failure mode to the booking path.
pub trait MetricsRecorder: Send + Sync {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

#[derive(Debug, Default)]
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

const MAX_SAMPLES: usize = 1000;

#[derive(Debug, Default)]
struct RecorderState {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    histograms: HashMap<String, HistogramState>,
}

#[derive(Debug, Default)]
struct HistogramState {
    count: u64,
    sum: f64,
    samples: Vec<f64>,
}

/// Process-local recorder keyed by `name{label=value,...}`.
#[derive(Debug, Default)]
pub struct InMemoryMetricsRecorder {
    state: Mutex<RecorderState>,
}

impl InMemoryMetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the storage key for a metric. Labels are sorted so call sites
    /// may pass them in any order.
    pub fn key(name: &str, labels: &[(&str, &str)]) -> String {
        if labels.is_empty() {
            return name.to_string();
        }

        let mut sorted: Vec<&(&str, &str)> = labels.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let rendered: Vec<String> = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        format!("{}{{{}}}", name, rendered.join(","))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock_state();

        let histograms = state
            .histograms
            .iter()
            .map(|(key, hist)| {
                let p95 = if hist.samples.is_empty() {
                    0.0
                } else {
                    let mut sorted = hist.samples.clone();
                    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    let index = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);
                    sorted[index]
                };

                (
                    key.clone(),
                    HistogramSummary {
                        count: hist.count,
                        sum: hist.sum,
                        p95,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            counters: state.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            gauges: state.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            histograms,
        }
    }

    pub fn reset(&self) {
        *self.lock_state() = RecorderState::default();
    }

    fn lock_state(&self) -> MutexGuard<'_, RecorderState> {
        // A panic while recording must not take metrics down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MetricsRecorder for InMemoryMetricsRecorder {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = Self::key(name, labels);
        let mut state = self.lock_state();
        *state.counters.entry(key).or_insert(0) += 1;
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::key(name, labels);
        let mut state = self.lock_state();
        let hist = state.histograms.entry(key).or_default();
        hist.count += 1;
        hist.sum += value;
        hist.samples.push(value);

        // Keep only recent samples for the percentile calculation
        if hist.samples.len() > MAX_SAMPLES {
            hist.samples.drain(0..MAX_SAMPLES / 2);
        }
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::key(name, labels);
        debug!("gauge {} = {}", key, value);
        self.lock_state().gauges.insert(key, value);
    }
}
