//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize the metrics registry from the validated configuration
//! - Bind the listener and assemble the HTTP server
//! - Run until shutdown, then flush metrics
//!
//! # Design Decisions
//! - Fail fast: a listener that cannot bind is fatal
//! - Metrics trouble is not fatal; the registry degrades to no-ops
//! - Listeners start last (traffic only when ready)

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;

use super::Shutdown;
use crate::config::ServiceConfig;
use crate::http::HttpServer;
use crate::observability::MetricsRegistry;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// A bound, ready-to-run service.
pub struct Service {
    server: HttpServer,
    listener: TcpListener,
    metrics: MetricsRegistry,
}

impl Service {
    /// Prepare subsystems in order: metrics, server, listener.
    pub async fn prepare(config: ServiceConfig) -> Result<Self, StartupError> {
        let metrics = MetricsRegistry::from_config(&config.observability);
        let address = config.listener.bind_address.clone();
        let server = HttpServer::new(config, metrics.clone());

        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;

        Ok(Self {
            server,
            listener,
            metrics,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, StartupError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Serve until `shutdown` triggers, then flush the metrics segment.
    ///
    /// Subscribes before returning, so a trigger fired right after this
    /// call is never missed.
    pub fn run(
        self,
        shutdown: &Shutdown,
    ) -> impl Future<Output = Result<(), StartupError>> + Send + 'static {
        let signal = shutdown.subscribe();
        async move {
            let result = self.server.run(self.listener, signal).await;
            self.metrics.flush();
            result.map_err(StartupError::from)
        }
    }
}
