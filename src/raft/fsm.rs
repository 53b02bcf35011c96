//! Replicated key/value state machine.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::RaftError;

pub const ACT_SET: u8 = 0;
pub const ACT_DELETE: u8 = 1;

/// The tagged command envelope carried in `Data` log entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCommand {
    pub act: u8,
    pub bucket: String,
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl KvCommand {
    pub fn set(bucket: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            act: ACT_SET,
            bucket: bucket.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            act: ACT_DELETE,
            bucket: bucket.into(),
            key: key.into(),
            value: String::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, RaftError> {
        serde_json::to_vec(self).map_err(|e| RaftError::Storage(format!("encode command: {e}")))
    }
}

/// State machine driven by committed log entries.
///
/// `apply` is only ever called by the node's apply loop, one entry at a time
/// in index order. `restore` is only called from that same loop or before it
/// starts, so it never races an `apply`.
pub trait StateMachine: Send + Sync {
    fn apply(&self, index: u64, data: &[u8]);

    fn snapshot(&self) -> Result<Vec<u8>, RaftError>;

    fn restore(&self, data: &[u8]) -> Result<(), RaftError>;
}

fn map_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

#[derive(Debug, Default)]
pub struct KvFsm {
    map: RwLock<HashMap<String, String>>,
}

impl KvFsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local read; may lag the leader on followers.
    pub fn get(&self, bucket: &str, key: &str) -> Option<String> {
        self.map
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&map_key(bucket, key))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateMachine for KvFsm {
    /// Panics on a command this binary cannot interpret.
    fn apply(&self, index: u64, data: &[u8]) {
        let cmd: KvCommand = match serde_json::from_slice(data) {
            Ok(cmd) => cmd,
            Err(e) => panic!("undecodable replicated command at index {index}: {e}"),
        };

        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        match cmd.act {
            ACT_SET => {
                map.insert(map_key(&cmd.bucket, &cmd.key), cmd.value);
            }
            ACT_DELETE => {
                map.remove(&map_key(&cmd.bucket, &cmd.key));
            }
            other => panic!("unknown replicated command act {other} at index {index}"),
        }
        tracing::debug!(index, act = cmd.act, bucket = %cmd.bucket, key = %cmd.key, "Applied command");
    }

    fn snapshot(&self) -> Result<Vec<u8>, RaftError> {
        // Copy under the read lock, encode after releasing it.
        let copy = self.map.read().unwrap_or_else(|e| e.into_inner()).clone();
        serde_json::to_vec(&copy).map_err(|e| RaftError::Snapshot(e.to_string()))
    }

    fn restore(&self, data: &[u8]) -> Result<(), RaftError> {
        let restored: HashMap<String, String> =
            serde_json::from_slice(data).map_err(|e| RaftError::Snapshot(e.to_string()))?;
        *self.map.write().unwrap_or_else(|e| e.into_inner()) = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(fsm: &KvFsm, index: u64, cmd: KvCommand) {
        fsm.apply(index, &cmd.encode().unwrap());
    }

    #[test]
    fn set_then_delete() {
        let fsm = KvFsm::new();
        apply(&fsm, 1, KvCommand::set("hosts", "ipmi1", "10.0.0.5"));
        assert_eq!(fsm.get("hosts", "ipmi1").as_deref(), Some("10.0.0.5"));

        apply(&fsm, 2, KvCommand::delete("hosts", "ipmi1"));
        assert_eq!(fsm.get("hosts", "ipmi1"), None);
        assert!(fsm.is_empty());
    }

    #[test]
    fn buckets_do_not_collide() {
        let fsm = KvFsm::new();
        apply(&fsm, 1, KvCommand::set("a", "k", "1"));
        apply(&fsm, 2, KvCommand::set("b", "k", "2"));
        assert_eq!(fsm.get("a", "k").as_deref(), Some("1"));
        assert_eq!(fsm.get("b", "k").as_deref(), Some("2"));
    }

    #[test]
    fn snapshot_restore_replaces_map() {
        let source = KvFsm::new();
        apply(&source, 1, KvCommand::set("cfg", "tld", "example.com"));
        let snap = source.snapshot().unwrap();

        let target = KvFsm::new();
        apply(&target, 1, KvCommand::set("cfg", "stale", "x"));
        target.restore(&snap).unwrap();

        assert_eq!(target.get("cfg", "tld").as_deref(), Some("example.com"));
        assert_eq!(target.get("cfg", "stale"), None);
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn delete_of_missing_key_is_noop() {
        let fsm = KvFsm::new();
        apply(&fsm, 1, KvCommand::delete("hosts", "ghost"));
        assert!(fsm.is_empty());
    }

    #[test]
    #[should_panic(expected = "unknown replicated command act 7")]
    fn unknown_act_panics() {
        let fsm = KvFsm::new();
        let cmd = KvCommand {
            act: 7,
            bucket: "b".into(),
            key: "k".into(),
            value: String::new(),
        };
        apply(&fsm, 3, cmd);
    }

    #[test]
    #[should_panic(expected = "undecodable replicated command")]
    fn garbage_panics() {
        KvFsm::new().apply(1, b"not json");
    }
}
