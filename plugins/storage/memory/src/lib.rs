use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::RwLock;

use telemetry_api::{InstrumentKind, PartitionKey, Reading, ScanPage, ScanPosition, StoreError, TelemetryStore};

// ═══════════════════════════════════════════════════════════════
//  Partition
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Partition {
    /// Sorted by position.
    rows: Vec<(ScanPosition, Reading)>,
    next_seq: u64,
}

impl Partition {
    fn append(&mut self, reading: Reading) {
        let pos = ScanPosition::new(reading.timestamp, self.next_seq);
        self.next_seq += 1;
        let idx = self.rows.partition_point(|(p, _)| *p <= pos);
        self.rows.insert(idx, (pos, reading));
    }
}

type StreamKey = (InstrumentKind, PartitionKey);

// ═══════════════════════════════════════════════════════════════
//  MemoryStore
// ═══════════════════════════════════════════════════════════════

/// In-memory store. Nothing survives a restart; meant for development,
/// tests and single-node demos.
///
/// A batch is applied under one write lock, so readers see it entirely or
/// not at all.
#[derive(Default)]
pub struct MemoryStore {
    streams: RwLock<HashMap<StreamKey, Partition>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored readings across all streams.
    pub async fn len(&self) -> usize {
        self.streams.read().await.values().map(|p| p.rows.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl TelemetryStore for MemoryStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn scan(
        &self,
        kind: InstrumentKind,
        partition: &PartitionKey,
        after: Option<ScanPosition>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ScanPage, StoreError>> + Send + '_>> {
        let key = (kind, partition.clone());
        Box::pin(async move {
            let streams = self.streams.read().await;
            let Some(partition) = streams.get(&key) else {
                return Ok(ScanPage::default());
            };

            let start = match after {
                Some(a) => partition.rows.partition_point(|(p, _)| *p <= a),
                None => 0,
            };
            let rows = partition.rows[start..].iter().map(|(p, r)| (*p, r));
            Ok(ScanPage::from_ordered(rows, None, limit))
        })
    }

    fn batch_append(&self, readings: &[Reading]) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let readings = readings.to_vec();
        Box::pin(async move {
            let mut streams = self.streams.write().await;
            for reading in readings {
                let key = (reading.kind(), reading.partition_key());
                streams.entry(key).or_default().append(reading);
            }
            Ok(())
        })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn read_your_writes(&self) -> bool {
        true
    }
}
