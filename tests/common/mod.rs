//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use calculator_service::config::ServiceConfig;
use calculator_service::lifecycle::{Service, Shutdown};
use calculator_service::observability::MetricsRegistry;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Fake calculator: arithmetic through awk, exit 1 on division by zero,
/// and one line per call appended to `calls.log` next to the script.
const CALCULATOR_SCRIPT: &str = r#"#!/bin/sh
echo "$3 $TRACE_ID $SPAN_ID $PARENT_SPAN_ID" >> "$(dirname "$0")/calls.log"
case "$3" in
  add) awk -v a="$1" -v b="$2" 'BEGIN { printf "%.6f\n", a + b }' ;;
  sub) awk -v a="$1" -v b="$2" 'BEGIN { printf "%.6f\n", a - b }' ;;
  mul) awk -v a="$1" -v b="$2" 'BEGIN { printf "%.6f\n", a * b }' ;;
  div)
    if awk -v b="$2" 'BEGIN { exit !(b == 0) }'; then
      echo "division by zero" >&2
      exit 1
    fi
    awk -v a="$1" -v b="$2" 'BEGIN { printf "%.6f\n", a / b }'
    ;;
  *) echo "unknown operation $3" >&2; exit 2 ;;
esac
"#;

/// Write the fake calculator into `dir` and return its path.
pub fn write_calculator(dir: &Path) -> PathBuf {
    let path = dir.join("calculator");
    std::fs::write(&path, CALCULATOR_SCRIPT).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Lines the fake calculator logged: `<op> <trace> <span> <parent>`.
pub fn calculator_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join("calls.log"))
        .map(|s| s.lines().map(ToString::to_string).collect())
        .unwrap_or_default()
}

/// Defaults pointed at a temp directory and an ephemeral port.
pub fn test_config(dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.calculator.binary_path = write_calculator(dir);
    config.calculator.timeout_secs = 5;
    config.observability.metrics_dir = dir.join("metrics");
    config
}

pub struct TestService {
    pub addr: SocketAddr,
    pub metrics: MetricsRegistry,
    pub dir: TempDir,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<()>,
}

impl TestService {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn calculator_calls(&self) -> Vec<String> {
        calculator_calls(self.dir.path())
    }
}

/// Start a service with metrics in its own segment.
pub async fn start_service() -> TestService {
    start_service_with(|_| {}, true).await
}

/// Start a service after adjusting the config. With `metrics` false the
/// registry is disabled, otherwise it owns a segment in the test's own
/// metrics directory.
pub async fn start_service_with<F>(adjust: F, metrics: bool) -> TestService
where
    F: FnOnce(&mut ServiceConfig),
{
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    adjust(&mut config);

    config.observability.metrics_enabled = metrics;

    let service = Service::prepare(config).await.unwrap();
    let registry = service.metrics().clone();
    let addr = service.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let run = service.run(&shutdown);
    let handle = tokio::spawn(async move {
        run.await.unwrap();
    });

    TestService {
        addr,
        metrics: registry,
        dir,
        shutdown,
        handle,
    }
}
