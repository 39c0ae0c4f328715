//! Request instrumentation middleware.
//!
//! # Responsibilities
//! - Resolve the trace context before the handler runs
//! - Run the handler inside a span carrying that identity
//! - Record exactly one request count and one duration per request
//! - Convert panics into a generic 500 with trace identity
//! - Decorate every response with trace headers
//!
//! # Request States
//! ```text
//! Started → Handling → Completed ─┐
//!                    → Failed ────┼→ Recorded
//!          (dropped) ─────────────┘
//! ```
//! `Recorded` runs through [`InFlight`]: either `finish` on a normal
//! return, or its `Drop` impl when the request future is cancelled.

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use tracing::Instrument;

use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::observability::logging::panic_message;
use crate::observability::{trace_context, MetricsRegistry};

/// Endpoint label for requests that matched no route.
pub const UNKNOWN_ENDPOINT: &str = "unknown";

/// Wrap one request. Installed with `axum::middleware::from_fn_with_state`.
pub async fn instrument(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let ctx = trace_context::resolve(request.headers());
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_ENDPOINT.to_string());

    let span = tracing::error_span!(
        "http_request",
        trace_id = %ctx.trace_id(),
        span_id = %ctx.span_id(),
        parent_span_id = %ctx.parent_span_id(),
        method = %method,
        path = %path,
    );

    request.extensions_mut().insert(ctx.clone());
    let tracing_enabled = state.config.observability.tracing_enabled;
    let in_flight = InFlight::start(&state.metrics, &method, &endpoint);

    async move {
        tracing::debug!("Request started");

        let mut response = match AssertUnwindSafe(next.run(request)).catch_unwind().await {
            Ok(response) => response,
            Err(payload) => {
                tracing::error!(
                    exception.class = "panic",
                    exception.message = %panic_message(payload.as_ref()),
                    "Unhandled failure while handling request"
                );
                ApiError::internal("Internal server error", &ctx).into_response()
            }
        };

        ctx.apply_to(response.headers_mut());

        let status = response.status().as_u16();
        let elapsed = in_flight.finish(status);
        let duration_ms = elapsed.as_secs_f64() * 1000.0;

        tracing::info!(status, duration_ms, endpoint = %endpoint, "Request completed");
        if tracing_enabled {
            tracing::info!(
                span.name = "http_request",
                status,
                duration_ms,
                "Span finished"
            );
        }

        response
    }
    .instrument(span)
    .await
}

/// A request that has started but not yet been recorded.
struct InFlight {
    metrics: MetricsRegistry,
    method: String,
    endpoint: String,
    started: Instant,
    recorded: bool,
}

impl InFlight {
    fn start(metrics: &MetricsRegistry, method: &str, endpoint: &str) -> Self {
        Self {
            metrics: metrics.clone(),
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Record the final status and return the elapsed time.
    fn finish(mut self, status: u16) -> Duration {
        let elapsed = self.started.elapsed();
        self.record(status, elapsed);
        elapsed
    }

    fn record(&mut self, status: u16, elapsed: Duration) {
        self.recorded = true;
        self.metrics
            .record_http_request(&self.method, &self.endpoint, status, elapsed);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.recorded {
            let elapsed = self.started.elapsed();
            tracing::warn!(
                method = %self.method,
                endpoint = %self.endpoint,
                "Request cancelled before completion"
            );
            self.record(500, elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

    #[test]
    fn test_finish_records_once() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = MetricsRegistry::open(dir.path(), 1).unwrap();

        let in_flight = InFlight::start(&metrics, "GET", "/add");
        in_flight.finish(200);

        let snapshot = metrics.snapshot().unwrap();
        assert_eq!(snapshot.counter_total(HTTP_REQUESTS_TOTAL), 1);
        assert_eq!(
            snapshot.observation_count(
                HTTP_REQUEST_DURATION_SECONDS,
                &[("method", "GET"), ("endpoint", "/add")]
            ),
            1
        );
    }

    #[test]
    fn test_drop_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = MetricsRegistry::open(dir.path(), 1).unwrap();

        drop(InFlight::start(&metrics, "GET", "/div"));

        let snapshot = metrics.snapshot().unwrap();
        assert_eq!(
            snapshot.counter(
                HTTP_REQUESTS_TOTAL,
                &[("method", "GET"), ("endpoint", "/div"), ("status", "500")]
            ),
            1
        );
    }
}
