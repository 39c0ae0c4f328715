//! Calculator service library.
//!
//! An HTTP façade over an external calculator binary with trace
//! propagation, structured logging and multiprocess Prometheus metrics.

pub mod api;
pub mod config;
pub mod downstream;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::{Service, Shutdown};
