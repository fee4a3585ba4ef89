use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::reading::{InstrumentKind, PartitionKey, Reading};

// ════════════════════════════════════════════════════════════════
//  ScanPosition / ScanPage
// ════════════════════════════════════════════════════════════════

/// Total order of rows inside one partition.
///
/// `seq` is assigned by the store in append order and never changes, so
/// rows sharing a timestamp still have a well-defined resume point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanPosition {
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
}

impl ScanPosition {
    pub fn new(timestamp: DateTime<Utc>, seq: u64) -> Self {
        Self { timestamp, seq }
    }
}

/// One bounded slice of a partition scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub readings: Vec<Reading>,
    /// Position of the last row in `readings`.
    pub last_position: Option<ScanPosition>,
    /// At least one more row exists after `last_position`.
    pub has_more: bool,
}

impl ScanPage {
    /// Cut a page out of rows already sorted by position.
    pub fn from_ordered<'a, I>(rows: I, after: Option<ScanPosition>, limit: usize) -> Self
    where
        I: IntoIterator<Item = (ScanPosition, &'a Reading)>,
    {
        let mut page = ScanPage::default();
        let rows = rows
            .into_iter()
            .filter(|(pos, _)| after.is_none_or(|a| *pos > a));

        for (pos, reading) in rows {
            if page.readings.len() == limit {
                page.has_more = true;
                break;
            }
            page.readings.push(reading.clone());
            page.last_position = Some(pos);
        }
        page
    }
}

// ════════════════════════════════════════════════════════════════
//  TelemetryStore
// ════════════════════════════════════════════════════════════════

/// Ordered storage backend for readings.
///
/// Each (instrument, partition) pair is an independent stream ordered by
/// `ScanPosition`. Implementations: in-memory, JSONL files.
pub trait TelemetryStore: Send + Sync {
    /// Prepare the backend (directories, tables, ...).
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Return at most `limit` rows strictly after `after`, ascending.
    fn scan(
        &self,
        kind: InstrumentKind,
        partition: &PartitionKey,
        after: Option<ScanPosition>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ScanPage, StoreError>> + Send + '_>>;

    /// Append readings. A reading is either stored whole or not at all;
    /// the batch as a whole may become visible gradually.
    fn batch_append(&self, readings: &[Reading]) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Persist buffered writes.
    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Whether a completed `batch_append` is visible to the next `scan`.
    fn read_your_writes(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Measurement;
    use uuid::Uuid;

    fn rows(n: u64) -> Vec<(ScanPosition, Reading)> {
        let partition = PartitionKey::new("vostok1", Uuid::nil());
        let ts: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        (0..n)
            .map(|i| {
                let reading = Reading::new(&partition, ts, Measurement::Speed { speed: i as f64 });
                (ScanPosition::new(ts, i), reading)
            })
            .collect()
    }

    #[test]
    fn page_stops_at_limit_and_reports_more() {
        let rows = rows(5);
        let page = ScanPage::from_ordered(rows.iter().map(|(p, r)| (*p, r)), None, 2);
        assert_eq!(page.readings.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.last_position.map(|p| p.seq), Some(1));
    }

    #[test]
    fn page_resumes_within_equal_timestamps() {
        let rows = rows(5);
        let after = Some(rows[2].0);
        let page = ScanPage::from_ordered(rows.iter().map(|(p, r)| (*p, r)), after, 10);
        assert_eq!(page.readings.len(), 2);
        assert!(!page.has_more);
        assert_eq!(page.readings[0].measurement, Measurement::Speed { speed: 3.0 });
    }

    #[test]
    fn exact_fit_has_no_more() {
        let rows = rows(3);
        let page = ScanPage::from_ordered(rows.iter().map(|(p, r)| (*p, r)), None, 3);
        assert_eq!(page.readings.len(), 3);
        assert!(!page.has_more);
    }
}
