//! Snapshot persistence with bounded retention.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::state::SnapshotMeta;
use crate::error::RaftError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}

/// Keeps the newest snapshots, either as `snapshot-<term>-<index>.json`
/// files in a directory or only in memory.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: Option<PathBuf>,
    retain: usize,
    latest: Mutex<Option<Snapshot>>,
}

fn io_err(err: std::io::Error) -> RaftError {
    RaftError::Snapshot(err.to_string())
}

impl SnapshotStore {
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            retain: 1,
            latest: Mutex::new(None),
        }
    }

    pub fn open(dir: impl Into<PathBuf>, retain: usize) -> Result<Self, RaftError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let store = Self {
            dir: Some(dir),
            retain: retain.max(1),
            latest: Mutex::new(None),
        };
        let newest = store.read_newest()?;
        *store.latest.lock().unwrap_or_else(|e| e.into_inner()) = newest;
        Ok(store)
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn save(&self, snapshot: Snapshot) -> Result<(), RaftError> {
        if let Some(dir) = &self.dir {
            let name = file_name(&snapshot.meta);
            let bytes =
                serde_json::to_vec(&snapshot).map_err(|e| RaftError::Snapshot(e.to_string()))?;
            // Rename into place, readers never see a partial file.
            let tmp = dir.join(format!("{name}.tmp"));
            std::fs::write(&tmp, bytes).map_err(io_err)?;
            std::fs::rename(&tmp, dir.join(&name)).map_err(io_err)?;
            self.prune()?;
        }

        tracing::info!(
            index = snapshot.meta.last_included_index,
            term = snapshot.meta.last_included_term,
            "Saved snapshot"
        );
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
        Ok(())
    }

    /// Snapshot files sorted oldest first.
    fn list(&self) -> Result<Vec<(u64, u64, PathBuf)>, RaftError> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for item in std::fs::read_dir(dir).map_err(io_err)? {
            let path = item.map_err(io_err)?.path();
            let parsed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_file_name);
            if let Some((term, index)) = parsed {
                found.push((term, index, path));
            }
        }
        found.sort();
        Ok(found)
    }

    fn read_newest(&self) -> Result<Option<Snapshot>, RaftError> {
        let Some((_, _, path)) = self.list()?.pop() else {
            return Ok(None);
        };
        let bytes = std::fs::read(&path).map_err(io_err)?;
        let snapshot =
            serde_json::from_slice(&bytes).map_err(|e| RaftError::Snapshot(e.to_string()))?;
        Ok(Some(snapshot))
    }

    fn prune(&self) -> Result<(), RaftError> {
        let files = self.list()?;
        let excess = files.len().saturating_sub(self.retain);
        for (term, index, path) in files.into_iter().take(excess) {
            tracing::debug!(term, index, "Removing old snapshot");
            std::fs::remove_file(path).map_err(io_err)?;
        }
        Ok(())
    }
}

fn file_name(meta: &SnapshotMeta) -> String {
    format!(
        "snapshot-{:020}-{:020}.json",
        meta.last_included_term, meta.last_included_index
    )
}

fn parse_file_name(name: &str) -> Option<(u64, u64)> {
    let rest = name.strip_prefix("snapshot-")?.strip_suffix(".json")?;
    let (term, index) = rest.split_once('-')?;
    Some((term.parse().ok()?, index.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(term: u64, index: u64) -> Snapshot {
        Snapshot {
            meta: SnapshotMeta {
                last_included_index: index,
                last_included_term: term,
                membership: [(1, "127.0.0.1:50051".to_string())].into(),
            },
            data: format!("state at {index}").into_bytes(),
        }
    }

    #[test]
    fn keeps_only_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(dir.path(), 2).unwrap();
        store.save(snapshot(1, 10)).unwrap();
        store.save(snapshot(1, 20)).unwrap();
        store.save(snapshot(2, 30)).unwrap();

        let files: Vec<(u64, u64)> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|(t, i, _)| (t, i))
            .collect();
        assert_eq!(files, vec![(1, 20), (2, 30)]);
        assert_eq!(store.latest().unwrap().meta.last_included_index, 30);
    }

    #[test]
    fn reopen_loads_newest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SnapshotStore::open(dir.path(), 3).unwrap();
            store.save(snapshot(1, 5)).unwrap();
            store.save(snapshot(3, 9)).unwrap();
        }
        let store = SnapshotStore::open(dir.path(), 3).unwrap();
        assert_eq!(store.latest(), Some(snapshot(3, 9)));
    }

    #[test]
    fn in_memory_store_keeps_latest() {
        let store = SnapshotStore::in_memory();
        assert!(store.latest().is_none());
        store.save(snapshot(1, 4)).unwrap();
        assert_eq!(store.latest().unwrap().data, b"state at 4".to_vec());
    }

    #[test]
    fn ignores_foreign_files() {
        assert_eq!(parse_file_name("snapshot-00000000000000000002-00000000000000000010.json"), Some((2, 10)));
        assert_eq!(parse_file_name("raft.redb"), None);
        assert_eq!(parse_file_name("snapshot-1-2.json.tmp"), None);
    }
}
