//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (instrumentation outermost, then request timeout)
//! - Bind server to listener
//! - Drain in-flight requests on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use crate::api::{actuator, calculator};
use crate::config::ServiceConfig;
use crate::downstream::DownstreamInvoker;
use crate::http::middleware::instrument;
use crate::observability::MetricsRegistry;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub metrics: MetricsRegistry,
    pub invoker: Arc<DownstreamInvoker>,
}

impl AppState {
    pub fn new(config: ServiceConfig, metrics: MetricsRegistry) -> Self {
        let invoker = DownstreamInvoker::from_config(&config.calculator, metrics.clone());
        Self {
            config: Arc::new(config),
            metrics,
            invoker: Arc::new(invoker),
        }
    }
}

/// HTTP server for the calculator service.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServiceConfig, metrics: MetricsRegistry) -> Self {
        let state = AppState::new(config, metrics);
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(state: AppState) -> Router {
        let request_timeout = Duration::from_secs(state.config.timeouts.request_secs);

        Router::new()
            .route("/", get(calculator::index))
            .route("/add", get(calculator::add))
            .route("/sub", get(calculator::sub))
            .route("/mul", get(calculator::mul))
            .route("/div", get(calculator::div))
            .route("/actuator", get(actuator::index))
            .route("/actuator/health", get(actuator::health))
            .route("/actuator/prometheus", get(actuator::prometheus))
            .route("/actuator/debug", get(actuator::debug))
            .fallback(actuator::not_found)
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(state.clone(), instrument))
                    .layer(TimeoutLayer::new(request_timeout)),
            )
            .with_state(state)
    }

    /// The assembled router, for driving requests without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            calculator = %self.state.config.calculator.binary_path.display(),
            metrics_active = self.state.metrics.is_active(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Draining in-flight requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
