//! Downstream calculator subsystem.
//!
//! # Data Flow
//! ```text
//! Handler (validated operands)
//!     → invoker.rs (spawn binary, trace identity in environment, timeout)
//!     → stdout parsed as one decimal number
//!     → calculator_* metrics recorded on every exit path
//!     → Result handed back to the handler unchanged
//! ```
//!
//! # Design Decisions
//! - One process per call; no pooling, no retries
//! - The invoker measures failures but never masks them
//! - Timeouts kill the child process

pub mod error;
pub mod invoker;

pub use error::DownstreamError;
pub use invoker::DownstreamInvoker;
