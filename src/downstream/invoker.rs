//! Calculator process invocation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use super::error::DownstreamError;
use crate::config::CalculatorConfig;
use crate::observability::logging::ExceptionDetail;
use crate::observability::{MetricsRegistry, TraceContext};

/// Runs the external calculator binary once per call.
///
/// Each call is measured on its own: total calls and duration are recorded
/// whether the call succeeds, fails or is cancelled.
#[derive(Debug, Clone)]
pub struct DownstreamInvoker {
    binary: PathBuf,
    timeout: Duration,
    metrics: MetricsRegistry,
}

impl DownstreamInvoker {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration, metrics: MetricsRegistry) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            metrics,
        }
    }

    pub fn from_config(config: &CalculatorConfig, metrics: MetricsRegistry) -> Self {
        Self::new(
            config.binary_path.clone(),
            Duration::from_secs(config.timeout_secs),
            metrics,
        )
    }

    /// Run `<binary> <a> <b> <function>` with the trace identity in the
    /// environment and parse the single number it prints.
    ///
    /// Errors are returned unchanged after being counted.
    pub async fn invoke(
        &self,
        function: &str,
        a: f64,
        b: f64,
        ctx: &TraceContext,
    ) -> Result<f64, DownstreamError> {
        let mut call = CallRecord::start(&self.metrics, function);

        let result = self.run(function, a, b, ctx).await;
        call.finish(result.as_ref().err().map(DownstreamError::error_type));
        if let Err(e) = &result {
            let detail = ExceptionDetail::capture(e);
            tracing::error!(
                function,
                error_type = e.error_type(),
                retryable = e.is_retryable(),
                exception.class = detail.class.as_deref().unwrap_or_default(),
                exception.message = %detail.message,
                exception.stacktrace = %detail.stacktrace,
                "Calculator invocation failed"
            );
        }
        result
    }

    async fn run(
        &self,
        function: &str,
        a: f64,
        b: f64,
        ctx: &TraceContext,
    ) -> Result<f64, DownstreamError> {
        let mut command = Command::new(&self.binary);
        command
            .arg(decimal_text(a))
            .arg(decimal_text(b))
            .arg(function)
            .envs(ctx.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(binary = %self.binary.display(), function, a, b, "Invoking calculator");

        let child = command.spawn().map_err(DownstreamError::Spawn)?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DownstreamError::Timeout(self.timeout))?
            .map_err(DownstreamError::Spawn)?;

        if !output.status.success() {
            return Err(DownstreamError::NonZeroExit {
                code: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout.trim();
        match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(DownstreamError::UnparsableOutput {
                output: text.to_string(),
            }),
        }
    }
}

/// Integral operands keep a trailing `.0` so the calculator always sees
/// a decimal.
fn decimal_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Records one call when dropped.
struct CallRecord<'a> {
    metrics: &'a MetricsRegistry,
    function: String,
    started: Instant,
    finished: bool,
    error_type: Option<&'static str>,
}

impl<'a> CallRecord<'a> {
    fn start(metrics: &'a MetricsRegistry, function: &str) -> Self {
        Self {
            metrics,
            function: function.to_string(),
            started: Instant::now(),
            finished: false,
            error_type: None,
        }
    }

    fn finish(&mut self, error_type: Option<&'static str>) {
        self.finished = true;
        self.error_type = error_type;
    }
}

impl Drop for CallRecord<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        // Dropped mid-call: the request was cancelled.
        let error_type = if self.finished {
            self.error_type
        } else {
            Some("cancelled")
        };
        self.metrics
            .record_calculator_call(&self.function, elapsed, error_type);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::observability::metrics::{
        CALCULATOR_CALLS_TOTAL, CALCULATOR_CALL_DURATION_SECONDS, CALCULATOR_CALL_ERRORS_TOTAL,
    };
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn setup(body: &str, timeout: Duration) -> (tempfile::TempDir, MetricsRegistry, DownstreamInvoker) {
        let dir = tempfile::tempdir().unwrap();
        let metrics = MetricsRegistry::open(&dir.path().join("metrics"), 1).unwrap();
        let binary = script(dir.path(), "calculator", body);
        let invoker = DownstreamInvoker::new(binary, timeout, metrics.clone());
        (dir, metrics, invoker)
    }

    const DIV: &[(&str, &str)] = &[("function", "div")];

    #[tokio::test]
    async fn test_success_parses_output() {
        let (_dir, metrics, invoker) = setup("echo 5.0", Duration::from_secs(5));
        let ctx = TraceContext::new_root();

        let result = invoker.invoke("add", 2.0, 3.0, &ctx).await.unwrap();
        assert_eq!(result, 5.0);

        let snapshot = metrics.snapshot().unwrap();
        assert_eq!(snapshot.counter(CALCULATOR_CALLS_TOTAL, &[("function", "add")]), 1);
        assert_eq!(snapshot.counter_total(CALCULATOR_CALL_ERRORS_TOTAL), 0);
        assert_eq!(
            snapshot.observation_count(CALCULATOR_CALL_DURATION_SECONDS, &[("function", "add")]),
            1
        );
    }

    #[tokio::test]
    async fn test_arguments_and_environment() {
        let (_dir, _metrics, invoker) = setup(
            r#"[ "$1" = "2.0" ] && [ "$2" = "0.5" ] && [ "$3" = "mul" ] || exit 3
echo "$TRACE_ID:$SPAN_ID:$PARENT_SPAN_ID" >&2
[ "$TRACE_ID" = "abc" ] && [ "$PARENT_SPAN_ID" = "unset" ] || exit 4
echo 1"#,
            Duration::from_secs(5),
        );
        let ctx = TraceContext::child_of("abc", None);

        assert_eq!(invoker.invoke("mul", 2.0, 0.5, &ctx).await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_counts_error_and_call() {
        let (_dir, metrics, invoker) = setup(
            "echo 'division by zero' >&2\nexit 1",
            Duration::from_secs(5),
        );

        let err = invoker
            .invoke("div", 1.0, 0.0, &TraceContext::new_root())
            .await
            .unwrap_err();
        match &err {
            DownstreamError::NonZeroExit { stderr, .. } => assert_eq!(stderr, "division by zero"),
            other => panic!("unexpected error {:?}", other),
        }

        let snapshot = metrics.snapshot().unwrap();
        assert_eq!(snapshot.counter(CALCULATOR_CALLS_TOTAL, DIV), 1);
        assert_eq!(
            snapshot.counter(
                CALCULATOR_CALL_ERRORS_TOTAL,
                &[("function", "div"), ("error_type", "exit_status")]
            ),
            1
        );
    }

    #[tokio::test]
    async fn test_timeout_counts_error_and_call() {
        let (_dir, metrics, invoker) = setup("sleep 5\necho 1", Duration::from_millis(100));

        let err = invoker
            .invoke("div", 1.0, 2.0, &TraceContext::new_root())
            .await
            .unwrap_err();
        assert!(matches!(err, DownstreamError::Timeout(_)));
        assert!(err.is_retryable());

        let snapshot = metrics.snapshot().unwrap();
        assert_eq!(snapshot.counter(CALCULATOR_CALLS_TOTAL, DIV), 1);
        assert_eq!(
            snapshot.counter(
                CALCULATOR_CALL_ERRORS_TOTAL,
                &[("function", "div"), ("error_type", "timeout")]
            ),
            1
        );
    }

    #[tokio::test]
    async fn test_unparsable_output() {
        let (_dir, metrics, invoker) = setup("echo not-a-number", Duration::from_secs(5));

        let err = invoker
            .invoke("add", 1.0, 2.0, &TraceContext::new_root())
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "parse");
        assert!(!err.is_retryable());
        assert_eq!(
            metrics
                .snapshot()
                .unwrap()
                .counter(
                    CALCULATOR_CALL_ERRORS_TOTAL,
                    &[("function", "add"), ("error_type", "parse")]
                ),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = MetricsRegistry::open(dir.path(), 1).unwrap();
        let invoker = DownstreamInvoker::new(
            dir.path().join("missing"),
            Duration::from_secs(1),
            metrics.clone(),
        );

        let err = invoker
            .invoke("sub", 1.0, 2.0, &TraceContext::new_root())
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "spawn");
        assert_eq!(
            metrics.snapshot().unwrap().counter(CALCULATOR_CALLS_TOTAL, &[("function", "sub")]),
            1
        );
    }

    #[test]
    fn test_decimal_text() {
        assert_eq!(decimal_text(2.0), "2.0");
        assert_eq!(decimal_text(-3.0), "-3.0");
        assert_eq!(decimal_text(0.25), "0.25");
    }
}
