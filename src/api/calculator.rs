//! Arithmetic endpoints.
//!
//! Each operation validates its operands locally and hands them to the
//! calculator binary. Bad input never reaches the downstream process.

use std::collections::HashMap;
use std::fmt;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::Serialize;
use serde_json::{json, Value};

use crate::http::{ApiError, AppState, Traced};
use crate::observability::TraceContext;

/// The four supported operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operation {
    pub const ALL: [Operation; 4] = [Operation::Add, Operation::Sub, Operation::Mul, Operation::Div];

    /// Name passed to the calculator and used as the `function` label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Sub => "sub",
            Operation::Mul => "mul",
            Operation::Div => "div",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Operation::Add => "Addition of two numbers (GET, parameters: a, b)",
            Operation::Sub => "Subtraction of two numbers (GET, parameters: a, b)",
            Operation::Mul => "Multiplication of two numbers (GET, parameters: a, b)",
            Operation::Div => "Division of two numbers (GET, parameters: a, b)",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize)]
pub struct Calculation {
    pub result: f64,
}

pub type CalculationResponse = Result<Traced<Calculation>, ApiError>;

/// `GET /`
pub async fn index() -> Json<Value> {
    let endpoints: serde_json::Map<String, Value> = Operation::ALL
        .iter()
        .map(|op| (format!("/{}", op), Value::from(op.description())))
        .collect();
    Json(json!({
        "message": "Welcome to the Calculator API",
        "endpoints": endpoints,
    }))
}

pub async fn add(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Query(params): Query<HashMap<String, String>>,
) -> CalculationResponse {
    calculate(&state, &ctx, Operation::Add, &params).await
}

pub async fn sub(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Query(params): Query<HashMap<String, String>>,
) -> CalculationResponse {
    calculate(&state, &ctx, Operation::Sub, &params).await
}

pub async fn mul(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Query(params): Query<HashMap<String, String>>,
) -> CalculationResponse {
    calculate(&state, &ctx, Operation::Mul, &params).await
}

pub async fn div(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Query(params): Query<HashMap<String, String>>,
) -> CalculationResponse {
    calculate(&state, &ctx, Operation::Div, &params).await
}

async fn calculate(
    state: &AppState,
    ctx: &TraceContext,
    op: Operation,
    params: &HashMap<String, String>,
) -> CalculationResponse {
    let (Some(a), Some(b)) = (operand(params, "a"), operand(params, "b")) else {
        tracing::warn!(operation = %op, "Missing or invalid parameters");
        return Err(ApiError::bad_request(
            "Parameters 'a' and 'b' must be given as numbers",
            ctx,
        ));
    };

    tracing::info!(operation = %op, a, b, "Calculation started");

    let result = state
        .invoker
        .invoke(op.as_str(), a, b, ctx)
        .await
        .map_err(|e| ApiError::downstream(e, ctx))?;

    tracing::info!(operation = %op, a, b, result, "Calculation succeeded");
    Ok(Traced::new(Calculation { result }, ctx))
}

/// A finite number, or nothing.
fn operand(params: &HashMap<String, String>, name: &str) -> Option<f64> {
    params
        .get(name)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
