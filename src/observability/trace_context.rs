//! Trace context resolution and propagation.
//!
//! # Responsibilities
//! - Extract trace identity from incoming requests
//! - Generate a fresh span for every request handled here
//! - Decorate responses so callers can correlate whatever scheme they sent
//!
//! # Resolution Order
//! First scheme whose header is present *and* well formed wins:
//! 1. W3C `traceparent`
//! 2. Jaeger `uber-trace-id`
//! 3. B3 `X-B3-TraceId` / `X-B3-SpanId`
//! 4. `X-Trace-Id` / `X-Span-Id`
//! 5. Fresh trace id, parent `unset`
//!
//! A malformed header falls through to the next scheme instead of forcing a
//! fresh trace. `http::HeaderMap` normalizes names, so every lookup is
//! case-insensitive.

use std::fmt;
use std::sync::LazyLock;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use rand::Rng;
use regex::Regex;
use serde::Serialize;

/// Sentinel for a missing parent span.
pub const UNSET: &str = "unset";

pub const TRACEPARENT: &str = "traceparent";
pub const UBER_TRACE_ID: &str = "uber-trace-id";
pub const X_B3_TRACE_ID: &str = "x-b3-traceid";
pub const X_B3_SPAN_ID: &str = "x-b3-spanid";
pub const X_TRACE_ID: &str = "x-trace-id";
pub const X_SPAN_ID: &str = "x-span-id";
pub const X_PARENT_SPAN_ID: &str = "x-parent-span-id";

static TRACEPARENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^00-([0-9a-f]{32})-([0-9a-f]{16})-[0-9a-f]{2}").expect("static pattern")
});

/// The header convention a trace identity was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceScheme {
    W3c,
    Jaeger,
    B3,
    Vendor,
    Generated,
}

impl TraceScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceScheme::W3c => "w3c",
            TraceScheme::Jaeger => "jaeger",
            TraceScheme::B3 => "b3",
            TraceScheme::Vendor => "vendor",
            TraceScheme::Generated => "generated",
        }
    }
}

impl fmt::Display for TraceScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request's position in a distributed trace.
///
/// Immutable once resolved. `span_id` always identifies work done by this
/// service and is never taken from an inbound header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceContext {
    trace_id: String,
    span_id: String,
    parent_span_id: String,
}

impl TraceContext {
    /// Start a new trace with no parent.
    pub fn new_root() -> Self {
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            parent_span_id: UNSET.to_string(),
        }
    }

    /// Continue an existing trace as a new span.
    ///
    /// An empty parent becomes [`UNSET`].
    pub fn child_of(trace_id: impl Into<String>, parent_span_id: Option<&str>) -> Self {
        let parent_span_id = match parent_span_id.map(str::trim) {
            Some(parent) if !parent.is_empty() => parent.to_string(),
            _ => UNSET.to_string(),
        };

        Self {
            trace_id: trace_id.into(),
            span_id: generate_span_id(),
            parent_span_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> &str {
        &self.parent_span_id
    }

    /// Whether the caller supplied a parent span.
    pub fn has_parent(&self) -> bool {
        self.parent_span_id != UNSET
    }

    /// Render as a W3C `traceparent` value (`00-<trace>-<span>-01`).
    ///
    /// Hex trace ids shorter than 32 characters (64-bit Jaeger and B3 ids)
    /// are left-padded with zeros.
    pub fn to_traceparent(&self) -> String {
        let trace_id = if self.trace_id.len() < 32 && is_lower_hex(&self.trace_id) {
            format!("{:0>32}", self.trace_id)
        } else {
            self.trace_id.clone()
        };
        format!("00-{}-{}-01", trace_id, self.span_id)
    }

    /// Attach `traceparent`, `X-Trace-Id`, `X-Span-Id` and, when a parent
    /// exists, `X-Parent-Span-Id`.
    ///
    /// Values that cannot be encoded as header values are skipped.
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        set_header(headers, TRACEPARENT, &self.to_traceparent());
        set_header(headers, X_TRACE_ID, &self.trace_id);
        set_header(headers, X_SPAN_ID, &self.span_id);
        if self.has_parent() {
            set_header(headers, X_PARENT_SPAN_ID, &self.parent_span_id);
        } else {
            headers.remove(X_PARENT_SPAN_ID);
        }
    }

    /// Environment variables handed to downstream processes.
    pub fn env_vars(&self) -> [(&'static str, &str); 3] {
        [
            ("TRACE_ID", self.trace_id.as_str()),
            ("SPAN_ID", self.span_id.as_str()),
            ("PARENT_SPAN_ID", self.parent_span_id.as_str()),
        ]
    }
}

/// Resolve the trace context of an inbound request.
pub fn resolve(headers: &HeaderMap) -> TraceContext {
    resolve_with_scheme(headers).0
}

/// Like [`resolve`], also reporting which scheme matched.
pub fn resolve_with_scheme(headers: &HeaderMap) -> (TraceContext, TraceScheme) {
    let (context, scheme) = from_traceparent(headers)
        .map(|c| (c, TraceScheme::W3c))
        .or_else(|| from_jaeger(headers).map(|c| (c, TraceScheme::Jaeger)))
        .or_else(|| from_pair(headers, X_B3_TRACE_ID, X_B3_SPAN_ID).map(|c| (c, TraceScheme::B3)))
        .or_else(|| from_pair(headers, X_TRACE_ID, X_SPAN_ID).map(|c| (c, TraceScheme::Vendor)))
        .unwrap_or_else(|| (TraceContext::new_root(), TraceScheme::Generated));

    tracing::debug!(
        scheme = %scheme,
        trace_id = %context.trace_id,
        span_id = %context.span_id,
        parent_span_id = %context.parent_span_id,
        "Trace context resolved"
    );

    (context, scheme)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn from_traceparent(headers: &HeaderMap) -> Option<TraceContext> {
    let value = header(headers, TRACEPARENT)?;
    let captures = TRACEPARENT_PATTERN.captures(value)?;
    let trace_id = captures.get(1)?.as_str();
    let parent = captures.get(2).map(|m| m.as_str());
    Some(TraceContext::child_of(trace_id, parent))
}

fn from_jaeger(headers: &HeaderMap) -> Option<TraceContext> {
    let value = header(headers, UBER_TRACE_ID)?;
    let mut parts = value.split(':');
    let trace_id = parts.next().filter(|t| !t.is_empty())?;
    let parent = parts.next()?;
    Some(TraceContext::child_of(trace_id, Some(parent)))
}

fn from_pair(headers: &HeaderMap, trace_header: &str, span_header: &str) -> Option<TraceContext> {
    let trace_id = header(headers, trace_header)?;
    Some(TraceContext::child_of(trace_id, header(headers, span_header)))
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn is_lower_hex(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// 128 random bits as 32 lowercase hex characters, never all zero.
fn generate_trace_id() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let id: u128 = rng.gen();
        if id != 0 {
            return format!("{:032x}", id);
        }
    }
}

/// 64 random bits as 16 lowercase hex characters, never all zero.
fn generate_span_id() -> String {
    let mut rng = rand::thread_rng();
    loop {
        let id: u64 = rng.gen();
        if id != 0 {
            return format!("{:016x}", id);
        }
    }
}
