use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::{RequestId, dates};
use crate::wire::OpLogEntry;

use super::{StorageError, read_json_or_default, write_json_atomic};

const JOURNAL_FILE: &str = "oplog.json";
const INDEX_FILE: &str = "applied_index.json";

/// Append-only journal of applied mutations with an idempotency index.
///
/// The journal and the applied index form one transactional unit behind one
/// lock. Appends write the journal first and the index second; if a crash
/// lands between the two, the next open replays the journal tail back into
/// the index. The log knows nothing about books or loans; it is a pure
/// event store keyed by request id.
pub struct OpLog {
    journal_file: PathBuf,
    index_file: PathBuf,
    inner: Mutex<OpLogInner>,
}

struct OpLogInner {
    entries: Vec<OpLogEntry>,
    applied: HashSet<RequestId>,
    last_applied_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppliedIndexFile {
    last_applied_index: i64,
    applied_operations: Vec<RequestId>,
}

impl Default for AppliedIndexFile {
    fn default() -> Self {
        Self {
            last_applied_index: -1,
            applied_operations: Vec::new(),
        }
    }
}

/// Counters exposed for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpLogStats {
    pub total_operations: usize,
    pub applied_operations: usize,
    pub last_applied_index: i64,
    pub journal_bytes: u64,
}

impl OpLog {
    /// Open the journal rooted at `data_dir`, reconciling the applied index
    /// with the journal contents.
    pub async fn open(data_dir: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| StorageError::Io {
                path: data_dir.to_path_buf(),
                source,
            })?;

        let journal_file = data_dir.join(JOURNAL_FILE);
        let index_file = data_dir.join(INDEX_FILE);

        let entries: Vec<OpLogEntry> = read_json_or_default(&journal_file).await;
        let index: AppliedIndexFile = read_json_or_default(&index_file).await;

        let mut applied: HashSet<RequestId> = index.applied_operations.into_iter().collect();
        let mut reconciled = false;
        for entry in &entries {
            if applied.insert(entry.id.clone()) {
                reconciled = true;
            }
        }
        let last_applied_index = entries.len() as i64 - 1;

        let log = Self {
            journal_file,
            index_file,
            inner: Mutex::new(OpLogInner {
                entries,
                applied,
                last_applied_index,
            }),
        };

        if reconciled || last_applied_index != index.last_applied_index {
            tracing::info!("applied index rebuilt from journal");
            let inner = log.inner.lock().await;
            log.persist_index(&inner).await?;
        }

        Ok(log)
    }

    /// Append an entry unless its id was already applied.
    ///
    /// Returns `false` for duplicates without touching the files. A missing
    /// timestamp is assigned at append time.
    pub async fn append(&self, mut entry: OpLogEntry) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;

        if inner.applied.contains(&entry.id) {
            tracing::debug!(id = %entry.id, op = %entry.op, "duplicate operation, journal unchanged");
            return Ok(false);
        }

        if entry.ts.is_none() {
            entry.ts = Some(dates::now_ms());
        }

        // Journal first, index second; open() reconciles a crash between.
        let mut entries = inner.entries.clone();
        entries.push(entry.clone());
        write_json_atomic(&self.journal_file, &entries).await?;

        inner.entries = entries;
        inner.applied.insert(entry.id.clone());
        inner.last_applied_index = inner.entries.len() as i64 - 1;
        self.persist_index(&inner).await?;

        tracing::debug!(id = %entry.id, op = %entry.op, remote = entry.remote, "operation journaled");
        Ok(true)
    }

    /// Entries strictly after `last_index`, for peer catch-up.
    pub async fn operations_since(&self, last_index: i64) -> Vec<OpLogEntry> {
        let inner = self.inner.lock().await;
        let start = (last_index + 1).max(0) as usize;
        inner.entries.get(start..).unwrap_or_default().to_vec()
    }

    /// O(1) idempotency check against the applied index.
    pub async fn is_applied(&self, id: &RequestId) -> bool {
        self.inner.lock().await.applied.contains(id)
    }

    /// Number of entries currently in the journal.
    pub async fn total(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Keep only the last `keep_last_n` entries and rebuild the applied
    /// index over the survivors.
    pub async fn truncate(&self, keep_last_n: usize) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if inner.entries.len() <= keep_last_n {
            return Ok(());
        }

        let tail_start = inner.entries.len() - keep_last_n;
        let entries = inner.entries[tail_start..].to_vec();
        write_json_atomic(&self.journal_file, &entries).await?;

        inner.applied = entries.iter().map(|entry| entry.id.clone()).collect();
        inner.entries = entries;
        inner.last_applied_index = inner.entries.len() as i64 - 1;
        self.persist_index(&inner).await?;

        tracing::info!(kept = keep_last_n, "journal truncated");
        Ok(())
    }

    pub async fn stats(&self) -> OpLogStats {
        let inner = self.inner.lock().await;
        let journal_bytes = tokio::fs::metadata(&self.journal_file)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        OpLogStats {
            total_operations: inner.entries.len(),
            applied_operations: inner.applied.len(),
            last_applied_index: inner.last_applied_index,
            journal_bytes,
        }
    }

    async fn persist_index(&self, inner: &OpLogInner) -> Result<(), StorageError> {
        let index = AppliedIndexFile {
            last_applied_index: inner.last_applied_index,
            applied_operations: inner.applied.iter().cloned().collect(),
        };
        write_json_atomic(&self.index_file, &index).await
    }
}
