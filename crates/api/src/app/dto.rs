use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};

use ledgerflow_core::{AggregateId, EventId};
use ledgerflow_infra::command_dispatcher::CommandOutcome;
use ledgerflow_infra::read_model::{AccountRow, TimelineEntry};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub owner: String,
    pub expected_version: u64,
}

/// Deposit/withdraw body. `amount` is a whole number of currency units.
#[derive(Debug, Deserialize)]
pub struct MoneyRequest {
    pub amount: i64,
    pub expected_version: u64,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub ok: bool,
    pub event_id: EventId,
    pub new_version: u64,
}

impl From<CommandOutcome> for CommandResponse {
    fn from(outcome: CommandOutcome) -> Self {
        Self {
            ok: true,
            event_id: outcome.event_id,
            new_version: outcome.new_version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub found: bool,
    pub account: AccountRow,
}

#[derive(Debug, Serialize)]
pub struct AccountNotFoundResponse {
    pub found: bool,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub items: Vec<TimelineEntry>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub cursor_position: u64,
    pub accounts_indexed: u64,
    pub head_position: u64,
    /// Events appended but not yet projected.
    pub lag: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

// -------------------------
// Mapping helpers
// -------------------------

/// Unwrap a JSON body, turning axum's plain-text rejection into the usual
/// `{error, message}` 400.
pub fn parse_body<T>(
    body: Result<axum::Json<T>, JsonRejection>,
) -> Result<T, axum::response::Response> {
    body.map(|axum::Json(value)| value).map_err(|rejection| {
        errors::json_error(
            axum::http::StatusCode::BAD_REQUEST,
            "validation_error",
            rejection.body_text(),
        )
    })
}

pub fn parse_account_id(raw: &str) -> Result<AggregateId, axum::response::Response> {
    raw.parse().map_err(|e: ledgerflow_core::DomainError| {
        errors::json_error(axum::http::StatusCode::BAD_REQUEST, "invalid_id", e.to_string())
    })
}
