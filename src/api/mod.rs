//! Route handlers.
//!
//! # Data Flow
//! ```text
//! Instrumented request (TraceContext in extensions)
//!     → calculator.rs (/, /add, /sub, /mul, /div)
//!     → actuator.rs (/actuator, health, prometheus, debug, fallback)
//!     → Traced body or ApiError
//! ```

pub mod actuator;
pub mod calculator;

pub use calculator::Operation;
