pub mod fsm;
pub mod kv;
pub mod node;
pub mod rpc;
pub mod service;
pub mod snapshot;
pub mod state;
pub mod storage;

pub use fsm::{KvCommand, KvFsm, StateMachine};
pub use kv::KvStore;
pub use node::{ClusterStatus, RaftNode};
pub use service::ConsensusService;
pub use state::{Command, LogEntry, Membership, RaftRole, RaftState};
pub use storage::{LogStore, MemoryLogStore, RedbLogStore};
