//! Raft log and hard-state persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use super::state::{LogEntry, RaftState};
use crate::error::RaftError;

const LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_meta");

const HARD_STATE_KEY: &str = "hard_state";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    pub current_term: u64,
    pub voted_for: Option<u64>,
}

/// One atomic batch of log changes, applied in field order.
#[derive(Debug, Default)]
pub struct LogWrite<'a> {
    pub hard_state: Option<HardState>,
    /// Remove every stored entry at or above this index before inserting.
    pub truncate_from: Option<u64>,
    pub entries: &'a [LogEntry],
    /// Remove every stored entry at or below this index.
    pub compact_to: Option<u64>,
}

pub trait LogStore: Send + Sync {
    /// Hard state and every retained entry in index order.
    fn load(&self) -> Result<(HardState, Vec<LogEntry>), RaftError>;

    fn write(&self, batch: LogWrite<'_>) -> Result<(), RaftError>;
}

/// Write out whatever `state` changed since the last flush. On failure the
/// changes stay pending, so the next flush writes them again.
pub fn flush(store: &dyn LogStore, state: &mut RaftState) -> Result<(), RaftError> {
    let pending = state.take_pending();
    if pending.is_empty() {
        return Ok(());
    }
    let entries = match pending.log_from {
        Some(from) => state.get_entries_from(from, usize::MAX),
        None => Vec::new(),
    };
    let result = store.write(LogWrite {
        hard_state: pending.hard_state.then_some(HardState {
            current_term: state.current_term,
            voted_for: state.voted_for,
        }),
        truncate_from: pending.log_from,
        entries: &entries,
        compact_to: pending.compact_to,
    });
    if result.is_err() {
        state.requeue_pending(pending);
    }
    result
}

#[derive(Debug, Default)]
struct MemoryInner {
    hard_state: HardState,
    log: BTreeMap<u64, LogEntry>,
}

/// Log store for ephemeral nodes and tests; nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogStore for MemoryLogStore {
    fn load(&self) -> Result<(HardState, Vec<LogEntry>), RaftError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok((inner.hard_state, inner.log.values().cloned().collect()))
    }

    fn write(&self, batch: LogWrite<'_>) -> Result<(), RaftError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(from) = batch.truncate_from {
            inner.log.split_off(&from);
        }
        for entry in batch.entries {
            inner.log.insert(entry.index, entry.clone());
        }
        if let Some(to) = batch.compact_to {
            inner.log = inner.log.split_off(&(to + 1));
        }
        if let Some(hs) = batch.hard_state {
            inner.hard_state = hs;
        }
        Ok(())
    }
}

fn storage_err(err: impl Into<redb::Error>) -> RaftError {
    RaftError::Storage(err.into().to_string())
}

fn codec_err(err: serde_json::Error) -> RaftError {
    RaftError::Storage(format!("codec: {err}"))
}

/// Durable log store backed by an embedded redb database.
#[derive(Debug, Clone)]
pub struct RedbLogStore {
    db: Arc<Database>,
    path: PathBuf,
}

impl RedbLogStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RaftError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RaftError::Storage(e.to_string()))?;
        }

        let db = Database::create(&path).map_err(storage_err)?;

        let txn = db.begin_write().map_err(storage_err)?;
        {
            txn.open_table(LOG_TABLE).map_err(storage_err)?;
            txn.open_table(META_TABLE).map_err(storage_err)?;
        }
        txn.commit().map_err(storage_err)?;

        tracing::debug!(path = %path.display(), "Opened raft log store");
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogStore for RedbLogStore {
    fn load(&self) -> Result<(HardState, Vec<LogEntry>), RaftError> {
        let txn = self.db.begin_read().map_err(storage_err)?;

        let meta = txn.open_table(META_TABLE).map_err(storage_err)?;
        let hard_state = match meta.get(HARD_STATE_KEY).map_err(storage_err)? {
            Some(value) => serde_json::from_slice(value.value()).map_err(codec_err)?,
            None => HardState::default(),
        };

        let log = txn.open_table(LOG_TABLE).map_err(storage_err)?;
        let mut entries = Vec::new();
        for item in log.iter().map_err(storage_err)? {
            let (_, value) = item.map_err(storage_err)?;
            entries.push(serde_json::from_slice(value.value()).map_err(codec_err)?);
        }
        Ok((hard_state, entries))
    }

    fn write(&self, batch: LogWrite<'_>) -> Result<(), RaftError> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut log = txn.open_table(LOG_TABLE).map_err(storage_err)?;

            if let Some(from) = batch.truncate_from {
                let keys: Vec<u64> = log
                    .range(from..)
                    .map_err(storage_err)?
                    .map(|item| item.map(|(k, _)| k.value()).map_err(storage_err))
                    .collect::<Result<_, _>>()?;
                for key in keys {
                    log.remove(key).map_err(storage_err)?;
                }
            }

            for entry in batch.entries {
                let bytes = serde_json::to_vec(entry).map_err(codec_err)?;
                log.insert(entry.index, bytes.as_slice())
                    .map_err(storage_err)?;
            }

            if let Some(to) = batch.compact_to {
                let keys: Vec<u64> = log
                    .range(..=to)
                    .map_err(storage_err)?
                    .map(|item| item.map(|(k, _)| k.value()).map_err(storage_err))
                    .collect::<Result<_, _>>()?;
                for key in keys {
                    log.remove(key).map_err(storage_err)?;
                }
            }

            if let Some(hs) = batch.hard_state {
                let mut meta = txn.open_table(META_TABLE).map_err(storage_err)?;
                let bytes = serde_json::to_vec(&hs).map_err(codec_err)?;
                meta.insert(HARD_STATE_KEY, bytes.as_slice())
                    .map_err(storage_err)?;
            }
        }
        txn.commit().map_err(storage_err)?;
        Ok(())
    }
}
