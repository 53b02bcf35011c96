use std::sync::Arc;

use crate::error::RaftError;
use crate::raft::fsm::{KvCommand, KvFsm};
use crate::raft::service::ConsensusService;

/// Replicated bucket/key/value store.
///
/// Reads are served from the local state machine; writes go through the
/// consensus log and return once applied on this node.
#[derive(Clone)]
pub struct KvStore {
    fsm: Arc<KvFsm>,
    consensus: Arc<ConsensusService>,
}

impl KvStore {
    pub fn new(fsm: Arc<KvFsm>, consensus: Arc<ConsensusService>) -> Self {
        Self { fsm, consensus }
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<String> {
        self.fsm.get(bucket, key)
    }

    pub async fn set(&self, bucket: &str, key: &str, value: &str) -> Result<u64, RaftError> {
        let cmd = KvCommand::set(bucket, key, value).encode()?;
        self.consensus.apply(cmd).await
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<u64, RaftError> {
        let cmd = KvCommand::delete(bucket, key).encode()?;
        self.consensus.apply(cmd).await
    }

    pub fn consensus(&self) -> &Arc<ConsensusService> {
        &self.consensus
    }
}
