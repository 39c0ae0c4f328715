//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the logging subsystem exactly once per process
//! - Render one JSON record per event, stamped with host, process and service
//! - Carry the request's trace identity into every record emitted inside it
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - Trace identity travels as span fields; [`SpanFieldLayer`] keeps them
//!   where the formatter can reach them
//! - Panics are logged as error records with exception detail

use std::any::Any;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{span, Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

const TRACE_ID: &str = "trace_id";
const SPAN_ID: &str = "span_id";
const PARENT_SPAN_ID: &str = "parent_span_id";
const EXCEPTION_CLASS: &str = "exception.class";
const EXCEPTION_MESSAGE: &str = "exception.message";
const EXCEPTION_STACKTRACE: &str = "exception.stacktrace";

/// Top-level keys owned by the record itself.
const RESERVED_KEYS: &[&str] = &[
    "@timestamp",
    "level",
    "thread_name",
    "logger_name",
    "message",
    "process",
    "host",
    "service",
    "traceId",
    "spanId",
    "parentSpanId",
    "exception",
];

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("Subscriber already initialized")]
    AlreadyInitialized,
}

/// Initialize the global subscriber and the panic hook.
///
/// `RUST_LOG` takes precedence over the configured level. Call once at
/// startup; later calls fail with [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), LogError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| LogError::InvalidFilter(e.to_string()))?,
    };

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(SpanFieldLayer)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(JsonFormat::new(&config.service_name))
                    .with_writer(std::io::stdout),
            )
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?,
    }

    install_panic_hook();
    Ok(())
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let message = panic_message(info.payload());
        let location = info
            .location()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        let backtrace = Backtrace::force_capture();

        tracing::error!(
            exception.class = "panic",
            exception.message = %message,
            exception.stacktrace = %backtrace,
            location = %location,
            "Panic"
        );
    }));
}

/// Name of this host, `unknown` if it cannot be read.
pub fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Structured exception detail attached to a log record.
///
/// `class` is only known when the concrete error type is, i.e. through
/// [`ExceptionDetail::capture`] or explicit `exception.class` fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    pub message: String,
    pub stacktrace: String,
}

impl ExceptionDetail {
    /// Capture an error, its type name and its source chain.
    pub fn capture<E>(err: &E) -> Self
    where
        E: StdError + 'static,
    {
        let class = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error")
            .to_string();
        Self {
            class: Some(class),
            message: err.to_string(),
            stacktrace: source_chain(err),
        }
    }
}

fn source_chain(err: &(dyn StdError + 'static)) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str("\ncaused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Collects event and span fields as JSON values.
#[derive(Default)]
struct JsonVisitor {
    fields: Map<String, Value>,
    error: Option<ExceptionDetail>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn StdError + 'static)) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
        self.error = Some(ExceptionDetail {
            class: None,
            message: value.to_string(),
            stacktrace: source_chain(value),
        });
    }
}

/// Span fields captured when the span was created or recorded.
struct SpanFields(Map<String, Value>);

/// Keeps every span's fields in its extensions for [`JsonFormat`].
pub struct SpanFieldLayer;

impl<S> Layer<S> for SpanFieldLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(visitor.fields));
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        let mut visitor = JsonVisitor {
            fields: extensions
                .remove::<SpanFields>()
                .map(|f| f.0)
                .unwrap_or_default(),
            error: None,
        };
        values.record(&mut visitor);
        extensions.insert(SpanFields(visitor.fields));
    }
}

#[derive(Serialize)]
struct ProcessInfo {
    pid: u32,
    thread_id: String,
}

#[derive(Serialize)]
struct NameInfo<'a> {
    name: &'a str,
}

/// One rendered log line.
#[derive(Serialize)]
struct LogRecord<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    level: &'a str,
    thread_name: String,
    logger_name: &'a str,
    message: String,
    process: ProcessInfo,
    host: NameInfo<'a>,
    service: NameInfo<'a>,
    #[serde(rename = "traceId", skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(rename = "spanId", skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
    #[serde(rename = "parentSpanId", skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<ExceptionDetail>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

/// Single-line JSON event format.
pub struct JsonFormat {
    service_name: String,
    host_name: String,
}

impl JsonFormat {
    pub fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            host_name: host_name(),
        }
    }

    /// Assemble the record from merged span + event fields.
    fn render(
        &self,
        level: &str,
        target: &str,
        mut fields: Map<String, Value>,
        error: Option<ExceptionDetail>,
    ) -> Result<String, serde_json::Error> {
        let thread = std::thread::current();
        // Same rendering as the fmt layer's `with_thread_ids`.
        let thread_id = format!("{:?}", thread.id());
        let thread_name = thread
            .name()
            .map(ToString::to_string)
            .unwrap_or_else(|| thread_id.clone());

        let message = take_string(&mut fields, "message").unwrap_or_default();
        let explicit_exception = take_string(&mut fields, EXCEPTION_CLASS).map(|class| {
            ExceptionDetail {
                class: Some(class),
                message: take_string(&mut fields, EXCEPTION_MESSAGE).unwrap_or_default(),
                stacktrace: take_string(&mut fields, EXCEPTION_STACKTRACE).unwrap_or_default(),
            }
        });

        let trace_id = take_string(&mut fields, TRACE_ID);
        let span_id = take_string(&mut fields, SPAN_ID);
        let parent_span_id = take_string(&mut fields, PARENT_SPAN_ID);
        let fields = without_reserved_keys(fields);

        let record = LogRecord {
            timestamp: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            level,
            thread_name,
            logger_name: target,
            message,
            process: ProcessInfo {
                pid: std::process::id(),
                thread_id,
            },
            host: NameInfo {
                name: &self.host_name,
            },
            service: NameInfo {
                name: &self.service_name,
            },
            trace_id,
            span_id,
            parent_span_id,
            exception: explicit_exception.or(error),
            fields,
        };

        serde_json::to_string(&record)
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = Map::new();
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                if let Some(span_fields) = span.extensions().get::<SpanFields>() {
                    for (k, v) in &span_fields.0 {
                        fields.insert(k.clone(), v.clone());
                    }
                }
            }
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        fields.extend(visitor.fields);

        let metadata = event.metadata();
        let line = self
            .render(metadata.level().as_str(), metadata.target(), fields, visitor.error)
            .map_err(|_| fmt::Error)?;
        writeln!(writer, "{}", line)
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    fields.remove(key).map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Move fields that would shadow record keys under a `field.` prefix.
fn without_reserved_keys(fields: Map<String, Value>) -> Map<String, Value> {
    fields
        .into_iter()
        .map(|(k, v)| {
            if RESERVED_KEYS.contains(&k.as_str()) {
                (format!("field.{}", k), v)
            } else {
                (k, v)
            }
        })
        .collect()
}
