use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use telemetry_api::{TelemetryError, UnknownInstrument};

// ═══════════════════════════════════════════════════════════════
//  ApiError
// ═══════════════════════════════════════════════════════════════

/// Failure of one HTTP request, rendered as
/// `{"error": "...", "code": "...", "index": n}`.
#[derive(Debug)]
pub(crate) enum ApiError {
    UnknownInstrument(UnknownInstrument),
    Telemetry(TelemetryError),
}

impl From<UnknownInstrument> for ApiError {
    fn from(e: UnknownInstrument) -> Self {
        ApiError::UnknownInstrument(e)
    }
}

impl From<TelemetryError> for ApiError {
    fn from(e: TelemetryError) -> Self {
        ApiError::Telemetry(e)
    }
}

impl ApiError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        ApiError::Telemetry(TelemetryError::InvalidArgument(msg.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, index) = match &self {
            ApiError::UnknownInstrument(e) => (StatusCode::NOT_FOUND, "unknown_instrument", e.to_string(), None),
            ApiError::Telemetry(TelemetryError::StoreUnavailable(msg)) => {
                tracing::warn!(error = %msg, "request failed on store");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    "store unavailable, retry later".to_owned(),
                    None,
                )
            }
            ApiError::Telemetry(e) => {
                let index = match e {
                    TelemetryError::InvalidReading { index, .. } => Some(*index),
                    _ => None,
                };
                (StatusCode::BAD_REQUEST, e.code(), e.to_string(), index)
            }
        };

        let mut body = serde_json::json!({
            "error": message,
            "code": code,
        });
        if let Some(index) = index {
            body["index"] = index.into();
        }

        (status, Json(body)).into_response()
    }
}
