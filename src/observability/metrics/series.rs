//! Series identity and values shared by the registry, segments and exposition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metric name plus its label set, labels sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl SeriesKey {
    pub fn new<K, V, I>(name: &str, labels: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut labels: Vec<(String, String)> = labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    /// Build from a `metrics` facade key.
    pub fn from_metric_key(key: &metrics::Key) -> Self {
        Self::new(
            key.name(),
            key.labels().map(|l| (l.key().to_string(), l.value().to_string())),
        )
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Latest state of one series within one process.
///
/// Histogram bucket counts are per bucket (not cumulative); observations
/// above the last bound only show up in `count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SeriesValue {
    Counter {
        value: u64,
    },
    Histogram {
        buckets: Vec<(f64, u64)>,
        sum: f64,
        count: u64,
    },
    Summary {
        sum: f64,
        count: u64,
    },
}

impl SeriesValue {
    pub fn counter() -> Self {
        SeriesValue::Counter { value: 0 }
    }

    pub fn histogram(bounds: &[f64]) -> Self {
        SeriesValue::Histogram {
            buckets: bounds.iter().map(|b| (*b, 0)).collect(),
            sum: 0.0,
            count: 0,
        }
    }

    pub fn summary() -> Self {
        SeriesValue::Summary { sum: 0.0, count: 0 }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SeriesValue::Counter { .. } => "counter",
            SeriesValue::Histogram { .. } => "histogram",
            SeriesValue::Summary { .. } => "summary",
        }
    }

    /// Apply an observation. Returns false for counters.
    pub fn observe(&mut self, value: f64) -> bool {
        match self {
            SeriesValue::Counter { .. } => false,
            SeriesValue::Histogram {
                buckets,
                sum,
                count,
            } => {
                if let Some(bucket) = buckets.iter_mut().find(|(bound, _)| value <= *bound) {
                    bucket.1 += 1;
                }
                *sum += value;
                *count += 1;
                true
            }
            SeriesValue::Summary { sum, count } => {
                *sum += value;
                *count += 1;
                true
            }
        }
    }

    /// Add to a counter. Returns false for anything else.
    pub fn increment(&mut self, by: u64) -> bool {
        match self {
            SeriesValue::Counter { value } => {
                *value = value.saturating_add(by);
                true
            }
            _ => false,
        }
    }

    /// Set a counter to an absolute value. Returns false for anything else.
    pub fn set_absolute(&mut self, to: u64) -> bool {
        match self {
            SeriesValue::Counter { value } => {
                *value = to;
                true
            }
            _ => false,
        }
    }

    /// Fold another process's state for the same series into this one.
    ///
    /// Counters, counts and sums add. Histogram buckets are matched by bound;
    /// bounds only one side knows are inserted in order. Returns false when
    /// the kinds differ, leaving `self` untouched.
    pub fn merge(&mut self, other: &SeriesValue) -> bool {
        match (self, other) {
            (SeriesValue::Counter { value }, SeriesValue::Counter { value: other }) => {
                *value = value.saturating_add(*other);
                true
            }
            (
                SeriesValue::Histogram {
                    buckets,
                    sum,
                    count,
                },
                SeriesValue::Histogram {
                    buckets: other_buckets,
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                for (bound, n) in other_buckets {
                    match buckets.iter().position(|(b, _)| *b >= *bound) {
                        Some(i) if buckets[i].0 == *bound => buckets[i].1 += n,
                        Some(i) => buckets.insert(i, (*bound, *n)),
                        None => buckets.push((*bound, *n)),
                    }
                }
                *sum += other_sum;
                *count += other_count;
                true
            }
            (
                SeriesValue::Summary { sum, count },
                SeriesValue::Summary {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count += other_count;
                true
            }
            _ => false,
        }
    }
}

/// Merged view of every series across all segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub series: BTreeMap<SeriesKey, SeriesValue>,
}

impl MetricsSnapshot {
    /// Merge one series in. Kind conflicts keep the value seen first.
    pub fn merge_series(&mut self, key: SeriesKey, value: SeriesValue) {
        match self.series.get_mut(&key) {
            Some(existing) => {
                if !existing.merge(&value) {
                    tracing::warn!(
                        metric = %key.name,
                        existing = existing.type_name(),
                        incoming = value.type_name(),
                        "Metric kind conflict between segments, keeping first"
                    );
                }
            }
            None => {
                self.series.insert(key, value);
            }
        }
    }

    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> Option<&SeriesValue> {
        self.series.get(&SeriesKey::new(name, labels.iter().copied()))
    }

    /// Counter value, 0 when the series does not exist.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        match self.get(name, labels) {
            Some(SeriesValue::Counter { value }) => *value,
            _ => 0,
        }
    }

    /// Observation count of a histogram or summary, 0 when absent.
    pub fn observation_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        match self.get(name, labels) {
            Some(SeriesValue::Histogram { count, .. }) | Some(SeriesValue::Summary { count, .. }) => {
                *count
            }
            _ => 0,
        }
    }

    /// Sum of a counter across every label set.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.series
            .iter()
            .filter(|(k, _)| k.name == name)
            .map(|(_, v)| match v {
                SeriesValue::Counter { value } => *value,
                _ => 0,
            })
            .sum()
    }
}
