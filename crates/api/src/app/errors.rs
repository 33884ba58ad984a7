use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use ledgerflow_infra::command_dispatcher::DispatchError;
use ledgerflow_infra::event_store::EventStoreError;
use ledgerflow_infra::read_model::ReadModelError;

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency { .. } => {
            json_error(StatusCode::CONFLICT, "concurrency_conflict", err.to_string())
        }
        DispatchError::AlreadyOpen => {
            json_error(StatusCode::BAD_REQUEST, "account_already_open", err.to_string())
        }
        DispatchError::AccountNotOpen => {
            json_error(StatusCode::BAD_REQUEST, "account_not_open", err.to_string())
        }
        DispatchError::InsufficientFunds { .. } => {
            json_error(StatusCode::BAD_REQUEST, "insufficient_funds", err.to_string())
        }
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::Deserialize(msg) => {
            tracing::error!(error = %msg, "stored event could not be decoded");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => store_error_to_response(e),
    }
}

pub fn store_error_to_response(err: EventStoreError) -> axum::response::Response {
    tracing::error!(error = %err, "event store failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
}

pub fn read_model_error_to_response(err: ReadModelError) -> axum::response::Response {
    tracing::error!(error = %err, "read model failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "read_model_error", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
