//! Operational endpoints under `/actuator`.

use axum::extract::State;
use axum::http::{header, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::http::{ApiError, AppState, Traced};
use crate::observability::logging::host_name;
use crate::observability::metrics::exposition;
use crate::observability::{MetricsError, TraceContext};

/// `GET /actuator`
pub async fn index() -> Json<Value> {
    Json(json!({
        "message": "Welcome to the Calculator API",
        "endpoints": {
            "/actuator/health": "Kubernetes health check",
            "/actuator/prometheus": "Prometheus metrics (when enabled)",
            "/actuator/debug": "Debug information about this instance",
        }
    }))
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
}

/// `GET /actuator/health`
pub async fn health(Extension(ctx): Extension<TraceContext>) -> Traced<Health> {
    tracing::info!("Health check performed");
    Traced::new(Health { status: "healthy" }, &ctx)
}

/// `GET /actuator/prometheus`
pub async fn prometheus(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
) -> Result<Response, ApiError> {
    match state.metrics.export() {
        Ok(body) => Ok(([(header::CONTENT_TYPE, exposition::CONTENT_TYPE)], body).into_response()),
        Err(MetricsError::Disabled) => Err(ApiError::Unavailable {
            message: "Prometheus metrics are disabled".to_string(),
            trace: ctx,
        }),
        Err(e) => {
            tracing::error!(error = %e, "Failed to collect metrics");
            Err(ApiError::internal(format!("Failed to collect metrics: {}", e), &ctx))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub service: ServiceInfo,
    pub hostname: String,
    pub pid: u32,
    pub features: Features,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Features {
    pub metrics_enabled: bool,
    pub metrics_active: bool,
    pub tracing_enabled: bool,
}

/// `GET /actuator/debug`
pub async fn debug(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
) -> Traced<DebugInfo> {
    tracing::info!("Debug information requested");
    let observability = &state.config.observability;
    Traced::new(
        DebugInfo {
            service: ServiceInfo {
                name: observability.service_name.clone(),
                version: env!("CARGO_PKG_VERSION"),
            },
            hostname: host_name(),
            pid: std::process::id(),
            features: Features {
                metrics_enabled: observability.metrics_enabled,
                metrics_active: state.metrics.is_active(),
                tracing_enabled: observability.tracing_enabled,
            },
        },
        &ctx,
    )
}

/// Fallback for unmatched routes.
pub async fn not_found(Extension(ctx): Extension<TraceContext>, uri: Uri) -> ApiError {
    tracing::debug!(path = %uri.path(), "No route matched");
    ApiError::NotFound {
        path: uri.path().to_string(),
        trace: ctx,
    }
}
