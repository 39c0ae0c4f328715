//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request headers
//!     → trace_context.rs (resolve trace/span/parent identity)
//!     → logging.rs (JSON records stamped with that identity)
//!     → metrics/ (per-process segments, merged at scrape time)
//!
//! Consumers:
//!     → Log collector reading stdout
//!     → Prometheus scrape of /actuator/prometheus
//!     → Downstream processes (trace identity via environment)
//! ```
//!
//! # Design Decisions
//! - Observability never fails a request; every error is absorbed locally
//! - Logger and registry are initialized once at startup and passed explicitly
//! - Trace identity rides on the request span so every log line inherits it

pub mod logging;
pub mod metrics;
pub mod trace_context;

pub use logging::{init_logging, LogError};
pub use metrics::{MetricsError, MetricsRegistry};
pub use trace_context::TraceContext;
