//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, route table, timeout)
//!     → middleware/instrumentation.rs (trace context, span, metrics)
//!     → api handlers (calculator, actuator)
//!     → response.rs (trace-stamped bodies and errors)
//!     → Send to client with trace headers
//! ```

pub mod middleware;
pub mod response;
pub mod server;

pub use response::{ApiError, Traced};
pub use server::{AppState, HttpServer};
