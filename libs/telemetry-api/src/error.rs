// ════════════════════════════════════════════════════════════════
//  Store Error
// ════════════════════════════════════════════════════════════════

/// Error returned by `TelemetryStore` implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Transient backend fault (I/O, connectivity, timeout). Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Persisted data could not be interpreted.
    #[error("corrupt store data: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

// ════════════════════════════════════════════════════════════════
//  Telemetry Error
// ════════════════════════════════════════════════════════════════

/// Error surfaced to callers of the query / ingest operations.
///
/// Everything except `StoreUnavailable` is a client error and is
/// detected before the store is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stale, foreign or corrupt page state. Restart from the first page.
    #[error("invalid page state: {0}")]
    InvalidCursor(String),

    /// The whole batch is rejected; nothing was written.
    #[error("invalid reading at index {index}: {reason}")]
    InvalidReading { index: usize, reason: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl TelemetryError {
    /// Only store faults are worth retrying; reads are side-effect free and
    /// re-submitting a batch at most duplicates rows.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TelemetryError::StoreUnavailable(_))
    }

    /// Machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TelemetryError::InvalidArgument(_) => "invalid_argument",
            TelemetryError::InvalidCursor(_) => "invalid_cursor",
            TelemetryError::InvalidReading { .. } => "invalid_reading",
            TelemetryError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<StoreError> for TelemetryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => TelemetryError::StoreUnavailable(msg),
            StoreError::Corrupt(msg) => TelemetryError::StoreUnavailable(format!("corrupt data: {msg}")),
        }
    }
}
