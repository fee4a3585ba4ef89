use std::path::PathBuf;

use chrono::{DateTime, Utc};
use telemetry_api::Measurement;

// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileStoreConfig {
    /// Root directory; one `.jsonl` file per instrument and partition.
    pub data_dir: PathBuf,
    /// Lines held in memory before they are written out.
    /// 0 writes every batch through immediately.
    #[serde(default)]
    pub buffer_records: usize,
}

// ════════════════════════════════════════════════════════════════
//  On-disk record format
// ════════════════════════════════════════════════════════════════

/// One line of a partition file. Spacecraft, journey and instrument live
/// in the file path.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct DiskRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub measurement: Measurement,
}
