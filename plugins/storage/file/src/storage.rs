use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use telemetry_api::{InstrumentKind, PartitionKey, Reading, ScanPage, ScanPosition, StoreError, TelemetryStore};

use super::config::{DiskRecord, FileStoreConfig};

/// File inside each spacecraft directory holding the full spacecraft name.
const NAME_FILE: &str = "spacecraft";

// ════════════════════════════════════════════════════════════════
//  FileStore
// ════════════════════════════════════════════════════════════════

/// Append-only JSONL store.
///
/// Layout: `{data_dir}/{instrument}/{blake3-hex(spacecraft)}/{journey}.jsonl`,
/// plus a `spacecraft` file next to the journeys naming the spacecraft.
/// A row's `seq` is its line index, which never changes because files are
/// only appended to.
///
/// Scans go through an in-memory offset index per file, extended with the
/// lines appended since the previous scan, so a page costs the rows it
/// returns rather than the whole partition.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

struct Inner {
    data_dir: PathBuf,
    buffer_records: usize,
    /// Held for the whole write so concurrent batches never interleave lines.
    pending: Mutex<Pending>,
    indexes: Mutex<HashMap<PathBuf, FileIndex>>,
}

struct Group {
    spacecraft_name: String,
    lines: Vec<String>,
}

#[derive(Default)]
struct Pending {
    groups: BTreeMap<PathBuf, Group>,
    count: usize,
}

impl Pending {
    fn push(&mut self, path: PathBuf, spacecraft_name: &str, lines: Vec<String>) {
        self.count += lines.len();
        self.groups
            .entry(path)
            .or_insert_with(|| Group {
                spacecraft_name: spacecraft_name.to_owned(),
                lines: Vec::new(),
            })
            .lines
            .extend(lines);
    }

    /// Write group by group. A group leaves the buffer only once it is on
    /// disk, so a failed write keeps everything not yet written.
    fn flush(&mut self) -> Result<(), StoreError> {
        while let Some((path, group)) = self.groups.pop_first() {
            if let Err(e) = append_group(&path, &group) {
                self.groups.insert(path, group);
                return Err(e);
            }
            self.count -= group.lines.len();
        }
        Ok(())
    }
}

impl FileStore {
    pub fn new(config: FileStoreConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                data_dir: config.data_dir,
                buffer_records: config.buffer_records,
                pending: Mutex::new(Pending::default()),
                indexes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Fixed-length directory per spacecraft, whatever the name's length
    /// or characters.
    fn partition_path(&self, kind: InstrumentKind, partition: &PartitionKey) -> PathBuf {
        let dir = blake3::hash(partition.spacecraft_name.as_bytes()).to_hex();
        self.inner
            .data_dir
            .join(kind.as_str())
            .join(dir.as_str())
            .join(format!("{}.jsonl", partition.journey_id))
    }

    fn serialize_line(reading: &Reading) -> Result<String, StoreError> {
        let record = DiskRecord {
            timestamp: reading.timestamp,
            measurement: reading.measurement,
        };
        Ok(serde_json::to_string(&record)?)
    }

    fn pending(&self) -> Result<MutexGuard<'_, Pending>, StoreError> {
        self.inner
            .pending
            .lock()
            .map_err(|_| StoreError::Unavailable("file store lock poisoned".into()))
    }

    // ── Append ──

    fn do_append(&self, readings: &[Reading]) -> Result<(), StoreError> {
        let mut batch = Pending::default();
        for reading in readings {
            let path = self.partition_path(reading.kind(), &reading.partition_key());
            batch.push(path, &reading.spacecraft_name, vec![Self::serialize_line(reading)?]);
        }

        let mut pending = self.pending()?;

        if self.inner.buffer_records == 0 {
            return batch.flush();
        }

        for (path, group) in batch.groups {
            pending.push(path, &group.spacecraft_name, group.lines);
        }
        if pending.count >= self.inner.buffer_records {
            pending.flush()?;
        }
        Ok(())
    }

    fn do_flush(&self) -> Result<(), StoreError> {
        self.pending()?.flush()
    }

    // ── Scan ──

    fn do_scan(
        &self,
        kind: InstrumentKind,
        partition: &PartitionKey,
        after: Option<ScanPosition>,
        limit: usize,
    ) -> Result<ScanPage, StoreError> {
        let path = self.partition_path(kind, partition);
        let mut file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ScanPage::default()),
            Err(e) => return Err(StoreError::Unavailable(format!("open {}: {e}", path.display()))),
        };

        let (selected, has_more) = {
            let mut indexes = self
                .inner
                .indexes
                .lock()
                .map_err(|_| StoreError::Unavailable("file index lock poisoned".into()))?;
            let index = indexes.entry(path.clone()).or_default();
            index.catch_up(&mut file, kind, &path)?;

            let start = match after {
                Some(a) => index.rows.partition_point(|(p, _)| *p <= a),
                None => 0,
            };
            let window = &index.rows[start..];
            let take = window.len().min(limit);
            (window[..take].to_vec(), window.len() > take)
        };

        let mut page = ScanPage {
            has_more,
            ..ScanPage::default()
        };
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        for (pos, offset) in selected {
            reader.seek(SeekFrom::Start(offset))?;
            line.clear();
            reader.read_until(b'\n', &mut line)?;
            let record: DiskRecord = serde_json::from_slice(&line)?;
            page.readings.push(Reading::new(partition, record.timestamp, record.measurement));
            page.last_position = Some(pos);
        }
        Ok(page)
    }
}

// ════════════════════════════════════════════════════════════════
//  FileIndex
// ════════════════════════════════════════════════════════════════

/// Sorted `(position, byte offset)` of every readable line of one file.
#[derive(Default)]
struct FileIndex {
    /// Prefix of the file already indexed; always ends on a line boundary.
    indexed_bytes: u64,
    /// Lines seen so far, readable or not. Also the next line's `seq`.
    lines: u64,
    rows: Vec<(ScanPosition, u64)>,
}

impl FileIndex {
    /// Index the complete lines appended since the last call. A torn last
    /// line is left for later: the next append terminates it.
    fn catch_up(&mut self, file: &mut std::fs::File, kind: InstrumentKind, path: &Path) -> Result<(), StoreError> {
        let len = file.metadata()?.len();
        if len < self.indexed_bytes {
            tracing::warn!(path = %path.display(), "partition file shrank, rebuilding index");
            *self = FileIndex::default();
        }
        if len == self.indexed_bytes {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.indexed_bytes))?;
        let mut reader = BufReader::new((&mut *file).take(len - self.indexed_bytes));
        let mut offset = self.indexed_bytes;
        let mut line = Vec::new();
        let mut added = false;
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 || line.last() != Some(&b'\n') {
                break;
            }
            let seq = self.lines;
            self.lines += 1;
            match serde_json::from_slice::<DiskRecord>(&line) {
                Ok(record) if record.measurement.kind() == kind => {
                    self.rows.push((ScanPosition::new(record.timestamp, seq), offset));
                    added = true;
                }
                Ok(_) => {
                    tracing::warn!(path = %path.display(), line = seq, "skipping line of another instrument");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), line = seq, error = %e, "skipping unreadable line");
                }
            }
            offset += n as u64;
        }
        self.indexed_bytes = offset;

        if added {
            self.rows.sort_by_key(|(pos, _)| *pos);
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════
//  TelemetryStore impl
// ════════════════════════════════════════════════════════════════

impl TelemetryStore for FileStore {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let dir = self.inner.data_dir.clone();
        Box::pin(async move {
            blocking(move || {
                std::fs::create_dir_all(&dir)
                    .map_err(|e| StoreError::Unavailable(format!("mkdir {}: {e}", dir.display())))
            })
            .await
        })
    }

    fn scan(
        &self,
        kind: InstrumentKind,
        partition: &PartitionKey,
        after: Option<ScanPosition>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ScanPage, StoreError>> + Send + '_>> {
        let this = self.clone();
        let partition = partition.clone();
        Box::pin(async move { blocking(move || this.do_scan(kind, &partition, after, limit)).await })
    }

    fn batch_append(&self, readings: &[Reading]) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let this = self.clone();
        let readings = readings.to_vec();
        Box::pin(async move { blocking(move || this.do_append(&readings)).await })
    }

    fn flush(&self) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let this = self.clone();
        Box::pin(async move { blocking(move || this.do_flush()).await })
    }

    fn read_your_writes(&self) -> bool {
        self.inner.buffer_records == 0
    }
}

// ════════════════════════════════════════════════════════════════
//  Helpers
// ════════════════════════════════════════════════════════════════

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Unavailable(format!("file store task: {e}")))?
}

fn append_group(path: &Path, group: &Group) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        claim_dir(dir, &group.spacecraft_name)?;
    }
    append_lines(path, &group.lines)
}

/// Create the spacecraft directory, or check that an existing one belongs
/// to the same spacecraft.
fn claim_dir(dir: &Path, spacecraft_name: &str) -> Result<(), StoreError> {
    std::fs::create_dir_all(dir).map_err(|e| StoreError::Unavailable(format!("mkdir: {e}")))?;

    let name_path = dir.join(NAME_FILE);
    match std::fs::read(&name_path) {
        Ok(stored) if stored == spacecraft_name.as_bytes() => Ok(()),
        Ok(_) => Err(StoreError::Corrupt(format!(
            "{} holds another spacecraft",
            dir.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => std::fs::write(&name_path, spacecraft_name)
            .map_err(|e| StoreError::Unavailable(format!("write {}: {e}", name_path.display()))),
        Err(e) => Err(StoreError::Unavailable(format!("read {}: {e}", name_path.display()))),
    }
}

/// Append `lines` with a single write. If a previous write left a torn
/// last line, a newline is inserted first so the new lines stay intact.
fn append_lines(path: &Path, lines: &[String]) -> Result<(), StoreError> {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", path.display())))?;

    let mut buf = String::new();
    if !ends_with_newline(&mut f)? {
        buf.push('\n');
    }
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }

    f.write_all(buf.as_bytes())
        .map_err(|e| StoreError::Unavailable(format!("write {}: {e}", path.display())))
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(f: &mut std::fs::File) -> Result<bool, StoreError> {
    let len = f
        .seek(SeekFrom::End(0))
        .map_err(|e| StoreError::Unavailable(format!("seek: {e}")))?;
    if len == 0 {
        return Ok(true);
    }
    f.seek(SeekFrom::Start(len - 1))
        .map_err(|e| StoreError::Unavailable(format!("seek: {e}")))?;
    let mut last = [0u8; 1];
    f.read_exact(&mut last)
        .map_err(|e| StoreError::Unavailable(format!("read: {e}")))?;
    Ok(last[0] == b'\n')
}
