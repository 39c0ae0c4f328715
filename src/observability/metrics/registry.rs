//! Process-wide metrics registry backed by a segment file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{
    Counter, CounterFn, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use parking_lot::Mutex;
use thiserror::Error;

use super::exposition;
use super::segment::{self, SegmentWriter};
use super::series::{MetricsSnapshot, SeriesKey, SeriesValue};
use super::{
    descriptor, MetricKind, CALCULATOR_CALLS_TOTAL, CALCULATOR_CALL_DURATION_SECONDS,
    CALCULATOR_CALL_ERRORS_TOTAL, DEFAULT_BUCKETS, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION_SECONDS,
};
use crate::config::ObservabilityConfig;

/// Errors surfaced by exposition and setup. Recording never returns one.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics collection is disabled")]
    Disabled,

    #[error("metrics storage unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read metrics segments: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),

    #[error("a global metrics recorder is already installed")]
    RecorderInstalled,
}

enum Backend {
    /// Administratively switched off.
    Disabled,
    /// Storage could not be prepared at startup; recording is a no-op.
    Unavailable(String),
    Segment { dir: PathBuf, id: u32 },
}

struct LocalState {
    series: HashMap<SeriesKey, SeriesValue>,
    writer: Option<SegmentWriter>,
}

struct Inner {
    backend: Backend,
    state: Mutex<LocalState>,
    write_failed: AtomicBool,
}

enum Update {
    Add(u64),
    Absolute(u64),
    Observe(f64),
}

/// Counters and timings for this process, merged with every other worker's
/// segment at scrape time.
///
/// Cheap to clone; all clones share one segment.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.inner.backend {
            Backend::Disabled => "disabled".to_string(),
            Backend::Unavailable(reason) => format!("unavailable ({})", reason),
            Backend::Segment { dir, id } => format!("segment {} in {}", id, dir.display()),
        };
        f.debug_struct("MetricsRegistry")
            .field("backend", &backend)
            .finish()
    }
}

impl MetricsRegistry {
    fn with_backend(backend: Backend, writer: Option<SegmentWriter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                state: Mutex::new(LocalState {
                    series: HashMap::new(),
                    writer,
                }),
                write_failed: AtomicBool::new(false),
            }),
        }
    }

    /// A registry that records nothing and refuses to export.
    pub fn disabled() -> Self {
        Self::with_backend(Backend::Disabled, None)
    }

    /// Startup entry point for a worker process.
    ///
    /// Creates the directory, purges segments of dead processes and opens
    /// this process's segment. Any storage failure is logged once and the
    /// registry degrades to no-ops.
    pub fn init(dir: &Path) -> Self {
        let id = std::process::id();
        let prepared = std::fs::create_dir_all(dir)
            .and_then(|_| segment::purge_stale_segments(dir, id, segment::process_alive))
            .and_then(|purged| SegmentWriter::create(dir, id).map(|w| (purged, w)));

        match prepared {
            Ok((purged, writer)) => {
                tracing::info!(
                    dir = %dir.display(),
                    segment = id,
                    purged,
                    "Metrics registry initialized"
                );
                Self::with_backend(
                    Backend::Segment {
                        dir: dir.to_path_buf(),
                        id,
                    },
                    Some(writer),
                )
            }
            Err(e) => {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "Metrics directory unusable, metrics recording disabled"
                );
                Self::with_backend(Backend::Unavailable(e.to_string()), None)
            }
        }
    }

    /// Open a segment with an explicit id without purging anything.
    pub fn open(dir: &Path, id: u32) -> Result<Self, MetricsError> {
        let writer = SegmentWriter::create(dir, id)?;
        Ok(Self::with_backend(
            Backend::Segment {
                dir: dir.to_path_buf(),
                id,
            },
            Some(writer),
        ))
    }

    /// Build from the observability toggles.
    pub fn from_config(config: &ObservabilityConfig) -> Self {
        if config.metrics_enabled {
            Self::init(&config.metrics_dir)
        } else {
            tracing::info!("Prometheus metrics disabled");
            Self::disabled()
        }
    }

    /// Whether recording currently has any effect.
    pub fn is_active(&self) -> bool {
        matches!(self.inner.backend, Backend::Segment { .. })
    }

    /// Install this registry as the `metrics` facade's global recorder.
    pub fn install(&self) -> Result<(), MetricsError> {
        metrics::set_global_recorder(self.clone()).map_err(|_| MetricsError::RecorderInstalled)
    }

    /// Count one finished HTTP request and observe its latency.
    pub fn record_http_request(&self, method: &str, endpoint: &str, status: u16, elapsed: Duration) {
        let status = status.to_string();
        self.increment_counter(
            HTTP_REQUESTS_TOTAL,
            &[("method", method), ("endpoint", endpoint), ("status", &status)],
            1,
        );
        self.observe(
            HTTP_REQUEST_DURATION_SECONDS,
            &[("method", method), ("endpoint", endpoint)],
            elapsed.as_secs_f64(),
        );
    }

    /// Count one calculator invocation, observe its latency and, on
    /// failure, count the error under its type tag.
    pub fn record_calculator_call(&self, function: &str, elapsed: Duration, error_type: Option<&str>) {
        self.increment_counter(CALCULATOR_CALLS_TOTAL, &[("function", function)], 1);
        self.observe(
            CALCULATOR_CALL_DURATION_SECONDS,
            &[("function", function)],
            elapsed.as_secs_f64(),
        );
        if let Some(error_type) = error_type {
            self.increment_counter(
                CALCULATOR_CALL_ERRORS_TOTAL,
                &[("function", function), ("error_type", error_type)],
                1,
            );
        }
    }

    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)], by: u64) {
        self.apply(SeriesKey::new(name, labels.iter().copied()), Update::Add(by));
    }

    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        self.apply(SeriesKey::new(name, labels.iter().copied()), Update::Observe(value));
    }

    fn apply(&self, key: SeriesKey, update: Update) {
        if !self.is_active() {
            return;
        }
        if let Update::Observe(value) = update {
            if !value.is_finite() {
                tracing::debug!(metric = %key.name, value, "Ignoring non-finite observation");
                return;
            }
        }

        let mut guard = self.inner.state.lock();
        let LocalState { series, writer } = &mut *guard;

        let value = series
            .entry(key.clone())
            .or_insert_with(|| initial_value(&key.name, &update));
        let applied = match update {
            Update::Add(by) => value.increment(by),
            Update::Absolute(to) => value.set_absolute(to),
            Update::Observe(v) => value.observe(v),
        };
        if !applied {
            tracing::debug!(
                metric = %key.name,
                kind = value.type_name(),
                "Update does not match metric kind, ignored"
            );
            return;
        }

        let Some(writer) = writer.as_mut() else {
            return;
        };
        let mut result = writer.append(&key, value);
        if result.is_ok() && writer.needs_compaction(series.len()) {
            result = writer.compact(series.iter());
        }
        if let Err(e) = result {
            if !self.inner.write_failed.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    path = %writer.path().display(),
                    error = %e,
                    "Failed to write metrics segment; other workers will not see this process's latest values"
                );
            }
        }
    }

    /// Merge every segment in the directory with this process's state.
    ///
    /// This process's own values come from memory, so they are exact even
    /// when the segment write failed. Segments that vanish or cannot be
    /// read mid-scrape are skipped.
    pub fn snapshot(&self) -> Result<MetricsSnapshot, MetricsError> {
        let (dir, own_id) = match &self.inner.backend {
            Backend::Disabled => return Err(MetricsError::Disabled),
            Backend::Unavailable(reason) => return Err(MetricsError::Unavailable(reason.clone())),
            Backend::Segment { dir, id } => (dir, *id),
        };

        let mut snapshot = MetricsSnapshot::default();
        for (id, path) in segment::list_segments(dir)? {
            if id == own_id {
                continue;
            }
            match segment::read_segment(&path) {
                Ok(series) => {
                    for (key, value) in series {
                        snapshot.merge_series(key, value);
                    }
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable segment");
                }
            }
        }

        let state = self.inner.state.lock();
        for (key, value) in &state.series {
            snapshot.merge_series(key.clone(), value.clone());
        }

        Ok(snapshot)
    }

    /// Render the merged snapshot in the Prometheus text format.
    pub fn export(&self) -> Result<Vec<u8>, MetricsError> {
        Ok(exposition::render(self.snapshot()?)?)
    }

    /// Sync the segment to disk. Called on shutdown.
    pub fn flush(&self) {
        let state = self.inner.state.lock();
        if let Some(writer) = &state.writer {
            if let Err(e) = writer.sync() {
                tracing::warn!(error = %e, "Failed to flush metrics segment");
            }
        }
    }
}

fn initial_value(name: &str, update: &Update) -> SeriesValue {
    match (descriptor(name).map(|d| d.kind), update) {
        (Some(MetricKind::Counter), _) => SeriesValue::counter(),
        (Some(MetricKind::Histogram(bounds)), _) => SeriesValue::histogram(bounds),
        (Some(MetricKind::Summary), _) => SeriesValue::summary(),
        (None, Update::Observe(_)) => SeriesValue::histogram(DEFAULT_BUCKETS),
        (None, _) => SeriesValue::counter(),
    }
}

/// Handle given to `metrics` facade callers.
struct FacadeHandle {
    registry: MetricsRegistry,
    key: SeriesKey,
}

impl CounterFn for FacadeHandle {
    fn increment(&self, value: u64) {
        self.registry.apply(self.key.clone(), Update::Add(value));
    }

    fn absolute(&self, value: u64) {
        self.registry.apply(self.key.clone(), Update::Absolute(value));
    }
}

impl HistogramFn for FacadeHandle {
    fn record(&self, value: f64) {
        self.registry.apply(self.key.clone(), Update::Observe(value));
    }
}

/// `metrics` macros from code without a registry handle land in the same
/// segment. The service's own metrics go through the typed recorders above.
impl Recorder for MetricsRegistry {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(FacadeHandle {
            registry: self.clone(),
            key: SeriesKey::from_metric_key(key),
        }))
    }

    // Gauges have no meaningful cross-process merge.
    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(FacadeHandle {
            registry: self.clone(),
            key: SeriesKey::from_metric_key(key),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::Level;

    const ADD: &[(&str, &str)] = &[("function", "add")];

    #[test]
    fn test_two_segments_merge() {
        let dir = tempfile::tempdir().unwrap();
        let first = MetricsRegistry::open(dir.path(), 101).unwrap();
        let second = MetricsRegistry::open(dir.path(), 102).unwrap();

        for _ in 0..3 {
            first.increment_counter(CALCULATOR_CALLS_TOTAL, ADD, 1);
        }
        for _ in 0..4 {
            second.increment_counter(CALCULATOR_CALLS_TOTAL, ADD, 1);
        }

        assert_eq!(first.snapshot().unwrap().counter(CALCULATOR_CALLS_TOTAL, ADD), 7);
        assert_eq!(second.snapshot().unwrap().counter(CALCULATOR_CALLS_TOTAL, ADD), 7);
    }

    #[test]
    fn test_http_request_recording() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetricsRegistry::open(dir.path(), 1).unwrap();

        registry.record_http_request("GET", "/add", 200, Duration::from_millis(20));
        registry.record_http_request("GET", "/add", 500, Duration::from_millis(3));

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(
            snapshot.counter(
                HTTP_REQUESTS_TOTAL,
                &[("method", "GET"), ("endpoint", "/add"), ("status", "200")]
            ),
            1
        );
        assert_eq!(snapshot.counter_total(HTTP_REQUESTS_TOTAL), 2);
        assert_eq!(
            snapshot.observation_count(
                HTTP_REQUEST_DURATION_SECONDS,
                &[("method", "GET"), ("endpoint", "/add")]
            ),
            2
        );
    }

    #[test]
    fn test_calculator_failure_counts_call_and_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetricsRegistry::open(dir.path(), 1).unwrap();

        registry.record_calculator_call("div", Duration::from_millis(5), Some("exit_status"));

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.counter(CALCULATOR_CALLS_TOTAL, &[("function", "div")]), 1);
        assert_eq!(
            snapshot.counter(
                CALCULATOR_CALL_ERRORS_TOTAL,
                &[("function", "div"), ("error_type", "exit_status")]
            ),
            1
        );
        assert!(matches!(
            snapshot.get(CALCULATOR_CALL_DURATION_SECONDS, &[("function", "div")]),
            Some(SeriesValue::Summary { count: 1, .. })
        ));
    }

    #[test]
    fn test_disabled_registry() {
        let registry = MetricsRegistry::disabled();
        registry.increment_counter(CALCULATOR_CALLS_TOTAL, ADD, 1);
        assert!(matches!(registry.export(), Err(MetricsError::Disabled)));
    }

    #[test]
    fn test_unusable_directory_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let registry = MetricsRegistry::init(&blocker.join("metrics"));
        assert!(!registry.is_active());
        registry.record_http_request("GET", "/add", 200, Duration::from_millis(1));
        assert!(matches!(registry.snapshot(), Err(MetricsError::Unavailable(_))));
    }

    #[test]
    fn test_init_purges_dead_segments() {
        let dir = tempfile::tempdir().unwrap();
        // Far above any default pid_max.
        let dead = MetricsRegistry::open(dir.path(), 4_000_000_000).unwrap();
        dead.increment_counter(CALCULATOR_CALLS_TOTAL, ADD, 9);
        drop(dead);

        let registry = MetricsRegistry::init(dir.path());
        registry.increment_counter(CALCULATOR_CALLS_TOTAL, ADD, 1);

        let snapshot = registry.snapshot().unwrap();
        if cfg!(target_os = "linux") {
            assert_eq!(snapshot.counter(CALCULATOR_CALLS_TOTAL, ADD), 1);
        }
    }

    #[test]
    fn test_segment_reflects_latest_values() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MetricsRegistry::open(dir.path(), 5).unwrap();
        let reader = MetricsRegistry::open(dir.path(), 6).unwrap();

        writer.observe(HTTP_REQUEST_DURATION_SECONDS, &[("method", "GET"), ("endpoint", "/")], 0.2);
        writer.observe(HTTP_REQUEST_DURATION_SECONDS, &[("method", "GET"), ("endpoint", "/")], 20.0);

        match reader
            .snapshot()
            .unwrap()
            .get(HTTP_REQUEST_DURATION_SECONDS, &[("method", "GET"), ("endpoint", "/")])
        {
            Some(SeriesValue::Histogram { count, sum, .. }) => {
                assert_eq!(*count, 2);
                assert!((sum - 20.2).abs() < 1e-9);
            }
            other => panic!("unexpected series {:?}", other),
        }
    }

    #[test]
    fn test_facade_handles_record_into_registry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetricsRegistry::open(dir.path(), 1).unwrap();
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

        let key = Key::from_parts("jobs_total", vec![metrics::Label::new("queue", "default")]);
        let counter = registry.register_counter(&key, &metadata);
        counter.increment(2);
        counter.increment(3);

        let histogram = registry.register_histogram(&Key::from_name("job_seconds"), &metadata);
        histogram.record(0.3);

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.counter("jobs_total", &[("queue", "default")]), 5);
        assert_eq!(snapshot.observation_count("job_seconds", &[]), 1);
    }

    #[test]
    fn test_facade_macros_land_in_segment() {
        let dir = tempfile::tempdir().unwrap();
        let registry = MetricsRegistry::open(dir.path(), 1).unwrap();

        metrics::with_local_recorder(&registry, || {
            metrics::counter!("jobs_total", "queue" => "default").increment(2);
            metrics::histogram!("job_seconds").record(0.3);
            metrics::gauge!("queue_depth").set(4.0);
        });

        // Another worker sees the facade's values through the segment.
        let reader = MetricsRegistry::open(dir.path(), 2).unwrap();
        let snapshot = reader.snapshot().unwrap();
        assert_eq!(snapshot.counter("jobs_total", &[("queue", "default")]), 2);
        assert_eq!(snapshot.observation_count("job_seconds", &[]), 1);
        assert!(snapshot.get("queue_depth", &[]).is_none());
    }
}
