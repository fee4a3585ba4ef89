use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use telemetry_api::{InstrumentKind, PagedResult, PartitionKey, Reading, TelemetryError};

use crate::AppState;
use crate::error::ApiError;

// ═══════════════════════════════════════════════════════════════
//  GET /health
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ═══════════════════════════════════════════════════════════════
//  /api/spacecraft/{spacecraft_name}/{journey_id}/instruments/{kind}
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct StreamPath {
    spacecraft_name: String,
    journey_id: String,
    kind: String,
}

impl StreamPath {
    fn resolve(&self) -> Result<(InstrumentKind, PartitionKey), ApiError> {
        let kind: InstrumentKind = self.kind.parse()?;
        let journey_id = Uuid::parse_str(&self.journey_id).map_err(|e| {
            ApiError::invalid_argument(format!("journeyId '{}' is not a UUID: {e}", self.journey_id))
        })?;
        Ok((kind, PartitionKey::new(self.spacecraft_name.clone(), journey_id)))
    }
}

#[derive(Deserialize)]
pub(crate) struct PageParams {
    pagesize: Option<String>,
    pagestate: Option<String>,
}

impl PageParams {
    /// Absent and empty mean "use the default".
    fn page_size(&self) -> Result<Option<i64>, ApiError> {
        match self.pagesize.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| ApiError::invalid_argument(format!("pagesize '{raw}' is not an integer"))),
        }
    }
}

pub(crate) async fn handle_query(
    State(state): State<AppState>,
    Path(path): Path<StreamPath>,
    Query(params): Query<PageParams>,
) -> Result<Json<PagedResult<Reading>>, ApiError> {
    let (kind, partition) = path.resolve()?;
    let page_size = params.page_size()?;

    let page = state
        .service
        .query(
            kind,
            &partition.spacecraft_name,
            partition.journey_id,
            page_size,
            params.pagestate.as_deref(),
        )
        .await?;

    Ok(Json(page))
}

/// Body: JSON array of readings of the path's kind, all belonging to the
/// path's partition. Answers a plain `OK` once the whole batch is stored.
/// An empty body or `null` is an empty batch.
pub(crate) async fn handle_ingest(
    State(state): State<AppState>,
    Path(path): Path<StreamPath>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    let (kind, partition) = path.resolve()?;

    let values: Option<Vec<serde_json::Value>> = if body.trim_ascii().is_empty() {
        None
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::invalid_argument(format!("body must be a JSON array of readings: {e}")))?
    };
    let Some(values) = values else {
        return Ok((StatusCode::OK, "OK"));
    };

    let readings = values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            Reading::from_json(kind, value).map_err(|reason| TelemetryError::InvalidReading { index, reason })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let ack = state
        .service
        .ingest_partition(kind, &partition, &readings)
        .await?;
    tracing::debug!(%kind, %partition, accepted = ack.accepted, "ingest");

    Ok((StatusCode::OK, "OK"))
}
