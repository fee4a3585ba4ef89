pub mod error;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use telemetry_api::{
    CursorCodec, InstrumentKind, MAX_SPACECRAFT_NAME_BYTES, PagedResult, PartitionKey, Reading, StoreError,
    TelemetryError, TelemetryStore,
};
use uuid::Uuid;

pub use error::EngineError;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════
//  ServiceSettings
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Page size used when the client sends none.
    pub default_page_size: usize,
    /// Larger requested page sizes are clamped to this.
    pub max_page_size: usize,
    /// Upper bound on a single store call.
    pub store_timeout: Duration,
    /// Refuse to start on a store that may hide acknowledged writes
    /// from an immediately following query.
    pub require_read_your_writes: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            require_read_your_writes: false,
        }
    }
}

/// Acknowledgement of a fully persisted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestAck {
    pub accepted: usize,
}

// ═══════════════════════════════════════════════════════════════
//  TelemetryService
// ═══════════════════════════════════════════════════════════════

/// Query and ingest for every instrument kind over one store.
///
/// Stateless between calls: paging state lives entirely in the cursor
/// handed to the client, so any replica sharing the cursor secret and
/// the store can serve the next page.
pub struct TelemetryService {
    store: Arc<dyn TelemetryStore>,
    codec: CursorCodec,
    settings: ServiceSettings,
}

impl TelemetryService {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        codec: CursorCodec,
        settings: ServiceSettings,
    ) -> Result<Self, EngineError> {
        if settings.default_page_size == 0 || settings.max_page_size == 0 {
            return Err(EngineError::Settings("page sizes must be positive".into()));
        }
        if settings.default_page_size > settings.max_page_size {
            return Err(EngineError::Settings(format!(
                "default page size {} exceeds max page size {}",
                settings.default_page_size, settings.max_page_size
            )));
        }
        if settings.store_timeout.is_zero() {
            return Err(EngineError::Settings("store timeout must be positive".into()));
        }
        if settings.require_read_your_writes && !store.read_your_writes() {
            return Err(EngineError::ReadYourWritesUnsupported);
        }

        Ok(Self {
            store,
            codec,
            settings,
        })
    }

    /// One page of `kind` readings for a partition, oldest first.
    ///
    /// `page_size` falls back to the default when absent and is clamped to
    /// the maximum. An empty `page_state` counts as absent. The returned
    /// cursor is present only when more rows follow.
    pub async fn query(
        &self,
        kind: InstrumentKind,
        spacecraft_name: &str,
        journey_id: Uuid,
        page_size: Option<i64>,
        page_state: Option<&str>,
    ) -> Result<PagedResult<Reading>, TelemetryError> {
        if spacecraft_name.trim().is_empty() {
            return Err(TelemetryError::InvalidArgument(
                "spacecraftName must not be empty".into(),
            ));
        }
        if spacecraft_name.len() > MAX_SPACECRAFT_NAME_BYTES {
            return Err(TelemetryError::InvalidArgument(format!(
                "spacecraftName exceeds {MAX_SPACECRAFT_NAME_BYTES} bytes"
            )));
        }
        let limit = self.resolve_page_size(page_size)?;
        let partition = PartitionKey::new(spacecraft_name, journey_id);

        let after = match page_state.filter(|s| !s.is_empty()) {
            Some(token) => Some(self.codec.decode(token, kind, &partition)?),
            None => None,
        };

        tracing::debug!(%kind, %partition, limit, resumed = after.is_some(), "query");

        let page = self
            .call_store("scan", self.store.scan(kind, &partition, after, limit))
            .await?;

        let next_cursor = match (page.has_more, page.last_position) {
            (true, Some(position)) => Some(self.codec.encode(kind, &partition, &position)),
            _ => None,
        };

        Ok(PagedResult::new(page.readings, next_cursor))
    }

    /// Persist a batch of `kind` readings, all or nothing.
    ///
    /// Every reading is validated before the store is touched; the first
    /// offending index is reported. An empty batch succeeds without a
    /// store call.
    pub async fn ingest(&self, kind: InstrumentKind, readings: &[Reading]) -> Result<IngestAck, TelemetryError> {
        self.persist(kind, None, readings).await
    }

    /// Like [`ingest`](Self::ingest), additionally requiring every reading
    /// to belong to `partition`.
    pub async fn ingest_partition(
        &self,
        kind: InstrumentKind,
        partition: &PartitionKey,
        readings: &[Reading],
    ) -> Result<IngestAck, TelemetryError> {
        self.persist(kind, Some(partition), readings).await
    }

    async fn persist(
        &self,
        kind: InstrumentKind,
        partition: Option<&PartitionKey>,
        readings: &[Reading],
    ) -> Result<IngestAck, TelemetryError> {
        if readings.is_empty() {
            tracing::debug!(%kind, "empty batch, nothing to persist");
            return Ok(IngestAck { accepted: 0 });
        }

        for (index, reading) in readings.iter().enumerate() {
            reading
                .validate(kind)
                .map_err(|reason| TelemetryError::InvalidReading { index, reason })?;
            if let Some(partition) = partition.filter(|p| !reading.belongs_to(p)) {
                return Err(TelemetryError::InvalidReading {
                    index,
                    reason: format!("reading belongs to {}, not {partition}", reading.partition_key()),
                });
            }
        }

        self.call_store("batch_append", self.store.batch_append(readings))
            .await?;

        tracing::debug!(%kind, count = readings.len(), "batch persisted");
        Ok(IngestAck {
            accepted: readings.len(),
        })
    }

    fn resolve_page_size(&self, requested: Option<i64>) -> Result<usize, TelemetryError> {
        match requested {
            None => Ok(self.settings.default_page_size),
            Some(n) if n <= 0 => Err(TelemetryError::InvalidArgument(format!(
                "pagesize must be positive, got {n}"
            ))),
            Some(n) => Ok(usize::try_from(n)
                .unwrap_or(usize::MAX)
                .min(self.settings.max_page_size)),
        }
    }

    async fn call_store<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, TelemetryError> {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(op, error = %e, "store call failed");
                Err(e.into())
            }
            Err(_) => {
                let timeout_ms = self.settings.store_timeout.as_millis() as u64;
                tracing::warn!(op, timeout_ms, "store call timed out");
                Err(TelemetryError::StoreUnavailable(format!(
                    "{op} timed out after {timeout_ms} ms"
                )))
            }
        }
    }
}
