use axum::{http::HeaderMap, middleware::Next, response::Response};
use tracing::Instrument;

use crate::context::CorrelationContext;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Longest correlation id accepted; longer values are ignored.
const MAX_CORRELATION_LEN: usize = 128;

/// Attach a `CorrelationContext` to every request and run it inside a span
/// tagged with the method, path and correlation id.
pub async fn correlation_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let correlation_id = extract_correlation_id(req.headers());

    let span = tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        correlation_id = correlation_id.as_deref().unwrap_or(""),
    );

    req.extensions_mut()
        .insert(CorrelationContext::new(correlation_id));

    next.run(req).instrument(span).await
}

fn extract_correlation_id(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CORRELATION_HEADER)?.to_str().ok()?.trim();
    if value.is_empty() || value.len() > MAX_CORRELATION_LEN {
        return None;
    }
    Some(value.to_string())
}
