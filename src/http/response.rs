//! Response bodies and the HTTP-facing error type.
//!
//! # Responsibilities
//! - Attach trace identity to every JSON body
//! - Map handler and downstream failures to status codes
//! - Decorate error responses with trace headers
//!
//! # Design Decisions
//! - Errors are values returned by handlers, converted once at the edge
//! - Error payloads always carry the request's trace identity
//! - Internal details of unexpected failures never reach the client

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::downstream::DownstreamError;
use crate::observability::TraceContext;

/// A JSON body with the request's trace identity flattened into it.
#[derive(Debug, Serialize)]
pub struct Traced<T> {
    #[serde(flatten)]
    pub body: T,
    #[serde(flatten)]
    pub trace: TraceContext,
}

impl<T: Serialize> Traced<T> {
    pub fn new(body: T, trace: &TraceContext) -> Self {
        Self {
            body,
            trace: trace.clone(),
        }
    }
}

impl<T: Serialize> IntoResponse for Traced<T> {
    fn into_response(self) -> Response {
        let mut response = Json(&self).into_response();
        self.trace.apply_to(response.headers_mut());
        response
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { message: String, trace: TraceContext },

    #[error("Calculation failed: {source}")]
    Downstream {
        #[source]
        source: DownstreamError,
        trace: TraceContext,
    },

    #[error("No route for {path}")]
    NotFound { path: String, trace: TraceContext },

    #[error("{message}")]
    Unavailable { message: String, trace: TraceContext },

    #[error("{message}")]
    Internal { message: String, trace: TraceContext },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>, trace: &TraceContext) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            trace: trace.clone(),
        }
    }

    pub fn downstream(source: DownstreamError, trace: &TraceContext) -> Self {
        ApiError::Downstream {
            source,
            trace: trace.clone(),
        }
    }

    pub fn internal(message: impl Into<String>, trace: &TraceContext) -> Self {
        ApiError::Internal {
            message: message.into(),
            trace: trace.clone(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Downstream { .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn trace(&self) -> &TraceContext {
        match self {
            ApiError::BadRequest { trace, .. }
            | ApiError::Downstream { trace, .. }
            | ApiError::NotFound { trace, .. }
            | ApiError::Unavailable { trace, .. }
            | ApiError::Internal { trace, .. } => trace,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Traced::new(
            ErrorBody {
                error: self.to_string(),
            },
            self.trace(),
        );
        (status, body).into_response()
    }
}
