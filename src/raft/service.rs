//! Cluster lifecycle around a [`RaftNode`]: store selection, bootstrap,
//! membership changes and the `apply` entry point.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::proto::{ApplyRequest, JoinRequest};
use crate::raft::fsm::StateMachine;
use crate::raft::node::{ClusterStatus, RaftMessage, RaftNode};
use crate::raft::snapshot::SnapshotStore;
use crate::raft::state::{Command, Membership, RaftRole};
use crate::raft::storage::{LogStore, MemoryLogStore, RedbLogStore};

const LEADER_WAIT: Duration = Duration::from_secs(10);

pub struct ConsensusService {
    node: Arc<RaftNode>,
    config: RaftConfig,
    /// Configured nodes with resolved addresses.
    nodes: Membership,
    raft_rx: Mutex<Option<mpsc::Receiver<RaftMessage>>>,
}

impl ConsensusService {
    /// Resolve the configured nodes and open the stores the configuration
    /// asks for.
    pub async fn init(config: RaftConfig, fsm: Arc<dyn StateMachine>) -> Result<Self, RaftError> {
        let nodes = resolve_nodes(&config).await?;

        let (log_store, snapshots): (Arc<dyn LogStore>, SnapshotStore) = if config.inmemory_store {
            (Arc::new(MemoryLogStore::new()), SnapshotStore::in_memory())
        } else {
            (
                Arc::new(RedbLogStore::open(config.data_dir.join("raft.redb"))?),
                SnapshotStore::open(config.data_dir.join("snapshots"), config.snapshot_retain)?,
            )
        };

        Self::with_stores(config, nodes, log_store, Arc::new(snapshots), fsm)
    }

    /// Build the service over explicit stores, with `nodes` already resolved.
    pub fn with_stores(
        config: RaftConfig,
        nodes: Membership,
        log_store: Arc<dyn LogStore>,
        snapshots: Arc<SnapshotStore>,
        fsm: Arc<dyn StateMachine>,
    ) -> Result<Self, RaftError> {
        if !nodes.contains_key(&config.node_id) {
            return Err(RaftError::MissingLocalId(config.node_id));
        }
        let (node, raft_rx) = RaftNode::new(config.clone(), log_store, snapshots, fsm)?;
        Ok(Self {
            node: Arc::new(node),
            config,
            nodes,
            raft_rx: Mutex::new(Some(raft_rx)),
        })
    }

    pub fn node(&self) -> &Arc<RaftNode> {
        &self.node
    }

    pub fn id(&self) -> u64 {
        self.config.node_id
    }

    /// Start the consensus and apply loops on `tracker`. Only the first
    /// call has any effect.
    pub async fn start(&self, tracker: &TaskTracker, cancel: CancellationToken) {
        let Some(raft_rx) = self.raft_rx.lock().await.take() else {
            return;
        };

        let node = self.node.clone();
        let token = cancel.clone();
        tracker.spawn(async move { node.run(raft_rx, token).await });

        let node = self.node.clone();
        tracker.spawn(async move { node.run_apply_loop(cancel).await });
    }

    /// Bootstrap a new cluster from the configured node list. When the
    /// cluster already exists and `force` is set, every configured node is
    /// (re)joined through the leader instead.
    pub async fn bootstrap(&self, force: bool) -> Result<(), RaftError> {
        match self.node.bootstrap(self.nodes.clone()).await {
            Ok(()) => {
                tracing::info!(node_id = self.id(), nodes = self.nodes.len(), "Cluster bootstrapped");
                Ok(())
            }
            Err(RaftError::CantBootstrap) if force => {
                tracing::info!(node_id = self.id(), "Cluster exists, joining configured nodes");
                self.join_configured_nodes().await
            }
            Err(RaftError::CantBootstrap) => {
                tracing::info!(node_id = self.id(), "Cluster already bootstrapped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn join_configured_nodes(&self) -> Result<(), RaftError> {
        self.wait_for_leader(LEADER_WAIT).await?;
        for (&id, addr) in &self.nodes {
            if let Err(e) = self.join_via_leader(id, addr).await {
                if !self.config.skip_join_errors {
                    return Err(e);
                }
                tracing::warn!(node_id = id, addr, error = %e, "Skipping failed join");
            }
        }
        Ok(())
    }

    /// Start the loops, bootstrap, then serve until `cancel` fires.
    pub async fn run(&self, force_bootstrap: bool, cancel: CancellationToken) -> Result<(), RaftError> {
        let tracker = TaskTracker::new();
        self.start(&tracker, cancel.clone()).await;
        tracker.close();

        let result = self.bootstrap(force_bootstrap).await;
        if result.is_ok() {
            cancel.cancelled().await;
        } else {
            cancel.cancel();
        }
        tracker.wait().await;
        result
    }

    /// Wait until some node is known as leader.
    pub async fn wait_for_leader(&self, limit: Duration) -> Result<u64, RaftError> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if let Some(leader) = self.node.get_leader_id().await {
                return Ok(leader);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RaftError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Add `node_id` at `addr` as a voter (leader only).
    ///
    /// Idempotent: a member already at `addr` is left alone, a member at a
    /// different address is removed first and re-added.
    pub async fn join(&self, node_id: u64, addr: &str) -> Result<(), RaftError> {
        let members = self.node.membership().await;
        match members.get(&node_id) {
            Some(current) if current == addr => {
                tracing::debug!(node_id, addr, "Node already a member, ignoring join");
                return Ok(());
            }
            Some(current) => {
                tracing::info!(node_id, old = %current, new = addr, "Node address changed, re-adding");
                self.remove_peer(node_id).await?;
            }
            None => {}
        }

        let mut members = self.node.membership().await;
        members.insert(node_id, addr.to_string());
        self.node.propose(Command::Membership(members)).await?;
        tracing::info!(node_id, addr, "Node joined");
        Ok(())
    }

    /// Drop `node_id` from the voters (leader only).
    pub async fn remove_peer(&self, node_id: u64) -> Result<(), RaftError> {
        let mut members = self.node.membership().await;
        if members.remove(&node_id).is_none() {
            return Err(RaftError::UnknownNode(node_id));
        }
        self.node.propose(Command::Membership(members)).await?;
        tracing::info!(node_id, "Node removed");
        Ok(())
    }

    /// Join locally when leading, otherwise ask the leader over gRPC.
    pub async fn join_via_leader(&self, node_id: u64, addr: &str) -> Result<(), RaftError> {
        if self.node.is_leader().await {
            return self.join(node_id, addr).await;
        }
        let mut client = self.node.leader_client().await?;
        let resp = client
            .join(JoinRequest {
                node_id,
                address: addr.to_string(),
            })
            .await
            .map_err(|s| RaftError::Transport(s.message().to_string()))?
            .into_inner();
        if resp.success {
            Ok(())
        } else {
            Err(remote_error(resp.error, resp.leader_id))
        }
    }

    /// Replicate `command` and wait until it is applied. Never forwards:
    /// anywhere but the leader this fails with `NotLeader`.
    pub async fn apply(&self, command: Vec<u8>) -> Result<u64, RaftError> {
        self.node.propose(Command::Data(command)).await
    }

    /// Like [`apply`](Self::apply), but hands the command to the known leader
    /// when this node is not leading.
    pub async fn apply_forwarded(&self, command: Vec<u8>) -> Result<u64, RaftError> {
        match self.apply(command.clone()).await {
            Err(RaftError::NotLeader(Some(leader))) if leader != self.id() => {
                tracing::debug!(leader, "Forwarding command to leader");
                let mut client = self.node.leader_client().await?;
                let resp = client
                    .apply(ApplyRequest { command })
                    .await
                    .map_err(|s| RaftError::Transport(s.message().to_string()))?
                    .into_inner();
                if resp.success {
                    Ok(resp.index)
                } else {
                    Err(remote_error(resp.error, resp.leader_id))
                }
            }
            other => other,
        }
    }

    pub async fn state(&self) -> RaftRole {
        self.node.state.read().await.role
    }

    pub async fn leader(&self) -> Option<u64> {
        self.node.get_leader_id().await
    }

    pub async fn status(&self) -> ClusterStatus {
        self.node.status().await
    }
}

/// Rebuild an error reported by another node.
fn remote_error(message: String, leader_id: u64) -> RaftError {
    if leader_id != 0 {
        RaftError::NotLeader(Some(leader_id))
    } else {
        RaftError::Transport(message)
    }
}

/// Resolve every configured `host:port` to a socket address. Nodes that do
/// not resolve are left out; the local node must survive.
async fn resolve_nodes(config: &RaftConfig) -> Result<Membership, RaftError> {
    let mut nodes = Membership::new();
    for node in &config.nodes {
        match tokio::net::lookup_host(node.address.as_str()).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => {
                    nodes.insert(node.id, addr.to_string());
                }
                None => tracing::warn!(node_id = node.id, address = %node.address, "Node address resolved to nothing"),
            },
            Err(e) => {
                tracing::warn!(node_id = node.id, address = %node.address, error = %e, "Cannot resolve node address");
            }
        }
    }
    if !nodes.contains_key(&config.node_id) {
        return Err(RaftError::MissingLocalId(config.node_id));
    }
    Ok(nodes)
}
