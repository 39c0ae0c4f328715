//! Prometheus text exposition of a merged snapshot.
//!
//! The snapshot is handed to a [`Collector`] registered on a scrape-local
//! [`Registry`], so encoding, escaping and family ordering are the
//! `prometheus` crate's.

use std::collections::HashMap;

use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, Registry, TextEncoder};

use super::series::{MetricsSnapshot, SeriesKey, SeriesValue};
use super::{descriptor, MetricKind, DESCRIPTORS};

pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Serves every series of a snapshot as metric families.
pub struct SnapshotCollector {
    descs: Vec<Desc>,
    snapshot: MetricsSnapshot,
}

impl SnapshotCollector {
    pub fn new(snapshot: MetricsSnapshot) -> prometheus::Result<Self> {
        let descs = DESCRIPTORS
            .iter()
            .map(|d| {
                Desc::new(
                    d.name.to_string(),
                    d.help.to_string(),
                    d.labels.iter().map(|l| l.to_string()).collect(),
                    HashMap::new(),
                )
            })
            .collect::<prometheus::Result<Vec<_>>>()?;
        Ok(Self { descs, snapshot })
    }
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families: Vec<MetricFamily> = Vec::new();

        // BTreeMap order keeps all series of one name together.
        for (key, value) in &self.snapshot.series {
            let kind = metric_type(value);
            let same_family = families
                .last()
                .is_some_and(|f| f.get_name() == key.name);
            if !same_family {
                families.push(family(&key.name, kind));
            }
            let Some(current) = families.last_mut() else {
                continue;
            };
            if current.get_field_type() != kind {
                tracing::debug!(metric = %key.name, "Series kind differs from its family, skipped");
                continue;
            }
            current.mut_metric().push(metric(key, value));
        }
        families
    }
}

/// Encode a snapshot in the Prometheus text format.
pub fn render(snapshot: MetricsSnapshot) -> prometheus::Result<Vec<u8>> {
    let registry = Registry::new();
    registry.register(Box::new(SnapshotCollector::new(snapshot)?))?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

fn metric_type(value: &SeriesValue) -> MetricType {
    match value {
        SeriesValue::Counter { .. } => MetricType::COUNTER,
        SeriesValue::Histogram { .. } => MetricType::HISTOGRAM,
        SeriesValue::Summary { .. } => MetricType::SUMMARY,
    }
}

fn family(name: &str, kind: MetricType) -> MetricFamily {
    let declared = descriptor(name);
    let help = declared.map(|d| d.help).unwrap_or(name);
    if let Some(d) = declared {
        let expected = match d.kind {
            MetricKind::Counter => MetricType::COUNTER,
            MetricKind::Histogram(_) => MetricType::HISTOGRAM,
            MetricKind::Summary => MetricType::SUMMARY,
        };
        if expected != kind {
            tracing::warn!(metric = name, "Stored series kind differs from its declaration");
        }
    }

    let mut family = MetricFamily::default();
    family.set_name(name.to_string());
    family.set_help(help.to_string());
    family.set_field_type(kind);
    family
}

fn metric(key: &SeriesKey, value: &SeriesValue) -> Metric {
    let mut metric = Metric::default();
    for (name, label_value) in &key.labels {
        let mut pair = LabelPair::default();
        pair.set_name(name.clone());
        pair.set_value(label_value.clone());
        metric.mut_label().push(pair);
    }

    match value {
        SeriesValue::Counter { value } => {
            let mut counter = proto::Counter::default();
            counter.set_value(*value as f64);
            metric.set_counter(counter);
        }
        SeriesValue::Histogram {
            buckets,
            sum,
            count,
        } => {
            // Stored counts are per bucket; exposition wants them cumulative.
            let mut histogram = proto::Histogram::default();
            let mut cumulative = 0;
            for (bound, n) in buckets {
                cumulative += n;
                let mut bucket = proto::Bucket::default();
                bucket.set_upper_bound(*bound);
                bucket.set_cumulative_count(cumulative);
                histogram.mut_bucket().push(bucket);
            }
            histogram.set_sample_sum(*sum);
            histogram.set_sample_count(*count);
            metric.set_histogram(histogram);
        }
        SeriesValue::Summary { sum, count } => {
            // No quantiles: they cannot be merged across processes.
            let mut summary = proto::Summary::default();
            summary.set_sample_sum(*sum);
            summary.set_sample_count(*count);
            metric.set_summary(summary);
        }
    }
    metric
}
