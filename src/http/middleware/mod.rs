//! HTTP middleware.

pub mod instrumentation;

pub use instrumentation::{instrument, UNKNOWN_ENDPOINT};
