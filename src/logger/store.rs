//! Durable storage for alarm log records

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::record::AlarmLogRecord;

/// Append-only keyed record storage
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write one record. Errors must reach the caller so delivery can be retried.
    async fn put(&self, record: &AlarmLogRecord) -> Result<(), StoreError>;

    /// Records for one alarm, newest first
    async fn query(&self, alarm_name: &str, limit: usize)
        -> Result<Vec<AlarmLogRecord>, StoreError>;

    /// Total records held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Records partitioned by alarm name, each partition sorted by timestamp
#[derive(Default)]
pub struct MemoryRecordStore {
    partitions: DashMap<String, Vec<AlarmLogRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, record: AlarmLogRecord) {
        let mut partition = self.partitions.entry(record.alarm_name.clone()).or_default();
        // Equal timestamps are kept side by side; duplicates are not merged
        let pos = partition.partition_point(|r| r.timestamp <= record.timestamp);
        partition.insert(pos, record);
    }

    fn newest(&self, alarm_name: &str, limit: usize) -> Vec<AlarmLogRecord> {
        self.partitions
            .get(alarm_name)
            .map(|p| p.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Alarm names with at least one record
    pub fn alarm_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partitions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, record: &AlarmLogRecord) -> Result<(), StoreError> {
        self.insert(record.clone());
        Ok(())
    }

    async fn query(
        &self,
        alarm_name: &str,
        limit: usize,
    ) -> Result<Vec<AlarmLogRecord>, StoreError> {
        Ok(self.newest(alarm_name, limit))
    }

    fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }
}

/// JSON-lines file store. Every record is appended and flushed before `put`
/// returns; the file is replayed into an in-memory index on open.
pub struct FileRecordStore {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
    index: MemoryRecordStore,
}

impl FileRecordStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let index = MemoryRecordStore::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let mut skipped = 0;
                for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<AlarmLogRecord>(line) {
                        Ok(record) => index.insert(record),
                        Err(_) => skipped += 1,
                    }
                }
                if skipped > 0 {
                    tracing::warn!(
                        path = %path.display(),
                        skipped,
                        "Skipped unreadable alarm log lines"
                    );
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        tracing::info!(path = %path.display(), records = index.len(), "Alarm log opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn put(&self, record: &AlarmLogRecord) -> Result<(), StoreError> {
        let mut line =
            serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push(b'\n');

        {
            let mut file = self.file.lock().await;
            file.write_all(&line).await?;
            file.flush().await?;
            file.sync_data().await?;
        }

        self.index.insert(record.clone());
        Ok(())
    }

    async fn query(
        &self,
        alarm_name: &str,
        limit: usize,
    ) -> Result<Vec<AlarmLogRecord>, StoreError> {
        Ok(self.index.newest(alarm_name, limit))
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
