use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::time::{timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

use crate::config::RaftConfig;
use crate::error::RaftError;
use crate::proto::raft_service_client::RaftServiceClient;
use crate::proto::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use crate::raft::fsm::StateMachine;
use crate::raft::rpc::{self, log_entry_to_proto, membership_to_proto};
use crate::raft::snapshot::{Snapshot, SnapshotStore};
use crate::raft::state::{Command, LogEntry, Membership, RaftRole, RaftState, SnapshotMeta};
use crate::raft::storage::{flush, LogStore};

const RPC_TIMEOUT: Duration = Duration::from_millis(100);
const SNAPSHOT_RPC_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_ENTRIES_PER_APPEND: usize = 256;
const PROPOSAL_QUEUE: usize = 256;

/// Message types for the Raft node event loop
#[derive(Debug)]
pub enum RaftMessage {
    /// Append a command; `response_tx` resolves once the entry is applied
    Propose {
        command: Command,
        response_tx: oneshot::Sender<Result<u64, RaftError>>,
    },
}

/// Point-in-time view of the node for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub node_id: u64,
    pub role: RaftRole,
    pub current_term: u64,
    pub leader_id: Option<u64>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub membership: Membership,
}

struct Waiter {
    term: u64,
    tx: oneshot::Sender<Result<u64, RaftError>>,
}

/// State shared with the per-peer replication tasks.
#[derive(Clone)]
struct Shared {
    id: u64,
    state: Arc<RwLock<RaftState>>,
    log_store: Arc<dyn LogStore>,
    snapshots: Arc<SnapshotStore>,
    commit_tx: Arc<watch::Sender<u64>>,
}

impl Shared {
    fn publish_commit(&self, commit_index: u64) {
        self.commit_tx.send_if_modified(|current| {
            if commit_index > *current {
                *current = commit_index;
                true
            } else {
                false
            }
        });
    }

    fn persist(&self, state: &mut RaftState) -> Result<(), RaftError> {
        flush(self.log_store.as_ref(), state).inspect_err(|e| {
            tracing::error!(node_id = self.id, error = %e, "Failed to persist raft state");
        })
    }

    /// Returns false when the peer knows a newer term and we stepped down.
    fn observe_term(&self, state: &mut RaftState, term: u64) -> bool {
        if term > state.current_term {
            tracing::info!(node_id = self.id, term, "Saw newer term, stepping down");
            state.become_follower(term);
            state.leader_id = None;
            if self.persist(state).is_err() {
                tracing::warn!(node_id = self.id, term, "New term not durable yet, kept pending");
            }
            return false;
        }
        true
    }

    async fn replicate(&self, peer_id: u64, mut client: RaftServiceClient<Channel>, req: AppendEntriesRequest) {
        let sent_term = req.term;
        let response = match timeout(RPC_TIMEOUT, client.append_entries(req)).await {
            Ok(Ok(response)) => response.into_inner(),
            Ok(Err(e)) => {
                tracing::trace!(peer_id, error = %e, "AppendEntries failed");
                return;
            }
            Err(_) => {
                tracing::trace!(peer_id, "AppendEntries timed out");
                return;
            }
        };

        let mut state = self.state.write().await;
        if !self.observe_term(&mut state, response.term) {
            return;
        }
        if state.role != RaftRole::Leader || state.current_term != sent_term {
            return;
        }
        self.on_append_response(&mut state, peer_id, &response);
    }

    fn on_append_response(&self, state: &mut RaftState, peer_id: u64, resp: &AppendEntriesResponse) {
        if resp.success {
            let matched = state.match_index.get(&peer_id).copied().unwrap_or(0).max(resp.match_index);
            state.match_index.insert(peer_id, matched);
            state.next_index.insert(peer_id, matched + 1);

            if state.advance_commit_index(self.id) {
                tracing::debug!(commit_index = state.commit_index, "Updated commit index");
                self.publish_commit(state.commit_index);
            }
        } else {
            // Back off towards the follower's hint
            let current = state.next_index.get(&peer_id).copied().unwrap_or(1);
            let next = (current.saturating_sub(1)).min(resp.match_index + 1).max(1);
            state.next_index.insert(peer_id, next);
        }
    }

    async fn send_snapshot(&self, peer_id: u64, mut client: RaftServiceClient<Channel>, term: u64) {
        let Some(snapshot) = self.snapshots.latest() else {
            return;
        };
        let index = snapshot.meta.last_included_index;
        let req = InstallSnapshotRequest {
            term,
            leader_id: self.id,
            last_included_index: index,
            last_included_term: snapshot.meta.last_included_term,
            membership: Some(membership_to_proto(&snapshot.meta.membership)),
            data: snapshot.data,
        };
        tracing::info!(peer_id, index, "Sending snapshot to lagging peer");

        let response = match timeout(SNAPSHOT_RPC_TIMEOUT, client.install_snapshot(req)).await {
            Ok(Ok(response)) => response.into_inner(),
            Ok(Err(e)) => {
                tracing::warn!(peer_id, error = %e, "InstallSnapshot failed");
                return;
            }
            Err(_) => {
                tracing::warn!(peer_id, "InstallSnapshot timed out");
                return;
            }
        };

        let mut state = self.state.write().await;
        if !self.observe_term(&mut state, response.term) || state.role != RaftRole::Leader {
            return;
        }
        let matched = state.match_index.get(&peer_id).copied().unwrap_or(0).max(index);
        state.match_index.insert(peer_id, matched);
        state.next_index.insert(peer_id, matched + 1);
    }
}

/// The main Raft node that coordinates consensus
pub struct RaftNode {
    pub id: u64,
    pub state: Arc<RwLock<RaftState>>,
    config: RaftConfig,
    shared: Shared,
    fsm: Arc<dyn StateMachine>,
    peers: Arc<Mutex<HashMap<u64, (String, RaftServiceClient<Channel>)>>>,
    message_tx: mpsc::Sender<RaftMessage>,
    last_heartbeat: Arc<RwLock<Instant>>,
    waiters: Mutex<HashMap<u64, Waiter>>,
    /// Held while the state machine is being written to.
    apply_lock: Mutex<()>,
}

impl RaftNode {
    /// Build a node from whatever the stores hold: the newest snapshot is
    /// loaded into `fsm`, then the hard state and log are restored.
    pub fn new(
        config: RaftConfig,
        log_store: Arc<dyn LogStore>,
        snapshots: Arc<SnapshotStore>,
        fsm: Arc<dyn StateMachine>,
    ) -> Result<(Self, mpsc::Receiver<RaftMessage>), RaftError> {
        let snapshot = snapshots.latest();
        if let Some(snapshot) = &snapshot {
            fsm.restore(&snapshot.data)?;
        }
        let (hard_state, entries) = log_store.load()?;
        let state = RaftState::restore(
            hard_state.current_term,
            hard_state.voted_for,
            snapshot.map(|s| s.meta),
            entries,
        );
        tracing::info!(
            node_id = config.node_id,
            term = state.current_term,
            last_log_index = state.last_log_index(),
            snapshot_index = state.log_offset(),
            "Restored raft state"
        );

        let (commit_tx, _) = watch::channel(state.commit_index);
        let (message_tx, message_rx) = mpsc::channel(PROPOSAL_QUEUE);
        let state = Arc::new(RwLock::new(state));

        let node = Self {
            id: config.node_id,
            shared: Shared {
                id: config.node_id,
                state: state.clone(),
                log_store,
                snapshots,
                commit_tx: Arc::new(commit_tx),
            },
            state,
            config,
            fsm,
            peers: Arc::new(Mutex::new(HashMap::new())),
            message_tx,
            last_heartbeat: Arc::new(RwLock::new(Instant::now())),
            waiters: Mutex::new(HashMap::new()),
            apply_lock: Mutex::new(()),
        };

        Ok((node, message_rx))
    }

    /// Receives the commit index every time it moves.
    pub fn subscribe_commits(&self) -> watch::Receiver<u64> {
        self.shared.commit_tx.subscribe()
    }

    fn election_timeout(&self) -> Duration {
        let ms = rand::thread_rng()
            .gen_range(self.config.election_timeout_min_ms..=self.config.election_timeout_max_ms);
        Duration::from_millis(ms)
    }

    /// Write the initial membership into an empty log.
    pub async fn bootstrap(&self, membership: Membership) -> Result<(), RaftError> {
        let mut state = self.state.write().await;
        if state.current_term > 0 || state.last_log_index() > 0 {
            return Err(RaftError::CantBootstrap);
        }
        state.become_follower(1);
        let index = state.append_entry(Command::Membership(membership));
        // Every bootstrapping node writes the identical entry, so it is committed.
        state.commit_index = index;
        self.shared.persist(&mut state)?;
        drop(state);

        self.shared.publish_commit(index);
        tracing::info!(node_id = self.id, "Bootstrapped cluster");
        Ok(())
    }

    /// Run the Raft node main loop
    pub async fn run(&self, mut message_rx: mpsc::Receiver<RaftMessage>, cancel: CancellationToken) {
        let mut election_timeout = self.election_timeout();
        let heartbeat = self.config.heartbeat_interval();
        let mut was_leader = false;

        loop {
            let (role, voter, leader_id) = {
                let state = self.state.read().await;
                (state.role, state.is_voter(self.id), state.leader_id)
            };
            if was_leader && role != RaftRole::Leader {
                self.fail_waiters(RaftError::NotLeader(leader_id)).await;
            }
            was_leader = role == RaftRole::Leader;

            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(msg) = message_rx.recv() => {
                    match msg {
                        RaftMessage::Propose { command, response_tx } => {
                            self.handle_propose(command, response_tx).await;
                        }
                    }
                }

                // Election timeout (for voting followers and candidates)
                _ = tokio::time::sleep(election_timeout), if role != RaftRole::Leader && voter => {
                    let elapsed = self.last_heartbeat.read().await.elapsed();
                    if elapsed >= election_timeout {
                        tracing::info!(
                            node_id = self.id,
                            elapsed_ms = elapsed.as_millis(),
                            "Election timeout, starting election"
                        );
                        self.start_election().await;
                    }
                    election_timeout = self.election_timeout();
                }

                // Heartbeat interval (for leaders)
                _ = tokio::time::sleep(heartbeat), if role == RaftRole::Leader => {
                    self.send_heartbeats().await;
                }
            }
        }

        self.fail_waiters(RaftError::Shutdown).await;
        tracing::info!(node_id = self.id, "Raft loop stopped");
    }

    async fn fail_waiters(&self, err: RaftError) {
        let mut waiters = self.waiters.lock().await;
        for (_, waiter) in waiters.drain() {
            let _ = waiter.tx.send(Err(err.clone()));
        }
    }

    /// Start a new election
    async fn start_election(&self) {
        let mut state = self.state.write().await;
        if !state.is_voter(self.id) {
            return;
        }
        state.become_candidate(self.id);
        let term = state.current_term;
        if self.shared.persist(&mut state).is_err() {
            state.become_follower(term);
            return;
        }
        let quorum = state.quorum() as u64;
        let peers: Vec<(u64, String)> = state
            .membership
            .iter()
            .filter(|(&id, _)| id != self.id)
            .map(|(&id, addr)| (id, addr.clone()))
            .collect();
        let req = VoteRequest {
            term,
            candidate_id: self.id,
            last_log_index: state.last_log_index(),
            last_log_term: state.last_log_term(),
        };
        drop(state);

        tracing::info!(node_id = self.id, term, "Starting election");

        let mut vote_count = 1u64; // Vote for self
        for (peer_id, addr) in peers {
            let Some(mut client) = self.client(peer_id, &addr).await else {
                continue;
            };
            match timeout(RPC_TIMEOUT, client.request_vote(req.clone())).await {
                Ok(Ok(response)) => {
                    let resp = response.into_inner();
                    if resp.term > term {
                        let mut state = self.state.write().await;
                        self.shared.observe_term(&mut state, resp.term);
                        return;
                    }
                    if resp.vote_granted {
                        vote_count += 1;
                        tracing::debug!(node_id = self.id, peer_id, votes = vote_count, "Received vote");
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!(peer_id, error = %e, "Vote request failed");
                }
                Err(_) => {
                    tracing::debug!(peer_id, "Vote request timed out");
                }
            }
        }

        let mut state = self.state.write().await;
        if state.role != RaftRole::Candidate || state.current_term != term {
            return;
        }
        state.votes_received = vote_count;
        if vote_count < quorum {
            tracing::debug!(
                node_id = self.id,
                term,
                votes = vote_count,
                needed = quorum,
                "Election failed, not enough votes"
            );
            return;
        }

        state.become_leader(self.id);
        tracing::info!(node_id = self.id, term, votes = vote_count, "Became leader");

        // Commit a no-op so entries from earlier terms become committable
        state.append_entry(Command::Noop);
        if self.shared.persist(&mut state).is_err() {
            return;
        }
        if state.advance_commit_index(self.id) {
            self.shared.publish_commit(state.commit_index);
        }
        drop(state);
        self.send_heartbeats().await;
    }

    /// Cached client for a peer, reconnecting lazily when its address changed.
    async fn client(&self, peer_id: u64, addr: &str) -> Option<RaftServiceClient<Channel>> {
        let mut peers = self.peers.lock().await;
        if let Some((known, client)) = peers.get(&peer_id) {
            if known == addr {
                return Some(client.clone());
            }
        }

        let endpoint = match Endpoint::from_shared(format!("http://{addr}")) {
            Ok(endpoint) => endpoint.connect_timeout(Duration::from_millis(500)),
            Err(e) => {
                tracing::warn!(peer_id, addr, error = %e, "Invalid peer address");
                return None;
            }
        };
        tracing::debug!(peer_id, addr, "Created peer channel");
        let client = RaftServiceClient::new(endpoint.connect_lazy());
        peers.insert(peer_id, (addr.to_string(), client.clone()));
        Some(client)
    }

    /// Client for the current leader, if one is known and it is not us.
    pub async fn leader_client(&self) -> Result<RaftServiceClient<Channel>, RaftError> {
        let (leader_id, addr) = {
            let state = self.state.read().await;
            let leader_id = state.leader_id.ok_or(RaftError::NotLeader(None))?;
            let addr = state
                .membership
                .get(&leader_id)
                .cloned()
                .ok_or(RaftError::UnknownNode(leader_id))?;
            (leader_id, addr)
        };
        self.client(leader_id, &addr)
            .await
            .ok_or_else(|| RaftError::Transport(format!("cannot reach leader {leader_id} at {addr}")))
    }

    /// Send AppendEntries (or InstallSnapshot) to every peer (leader only)
    async fn send_heartbeats(&self) {
        let mut state = self.state.write().await;
        if state.role != RaftRole::Leader {
            return;
        }

        let term = state.current_term;
        let commit_index = state.commit_index;
        let last_log_index = state.last_log_index();
        let members: Vec<(u64, String)> = state
            .membership
            .iter()
            .filter(|(&id, _)| id != self.id)
            .map(|(&id, addr)| (id, addr.clone()))
            .collect();

        let mut outbound = Vec::with_capacity(members.len());
        for (peer_id, addr) in members {
            let next = *state.next_index.entry(peer_id).or_insert(last_log_index + 1);
            if next <= state.log_offset() {
                outbound.push((peer_id, addr, None));
                continue;
            }
            let prev_log_index = next - 1;
            let req = AppendEntriesRequest {
                term,
                leader_id: self.id,
                prev_log_index,
                prev_log_term: state.term_at(prev_log_index).unwrap_or(0),
                entries: state
                    .get_entries_from(next, MAX_ENTRIES_PER_APPEND)
                    .iter()
                    .map(log_entry_to_proto)
                    .collect(),
                leader_commit: commit_index,
            };
            outbound.push((peer_id, addr, Some(req)));
        }
        drop(state);

        for (peer_id, addr, req) in outbound {
            let Some(client) = self.client(peer_id, &addr).await else {
                continue;
            };
            let shared = self.shared.clone();
            match req {
                Some(req) => {
                    tokio::spawn(async move { shared.replicate(peer_id, client, req).await });
                }
                None => {
                    tokio::spawn(async move { shared.send_snapshot(peer_id, client, term).await });
                }
            }
        }
    }

    /// Append a command as leader and park its caller until the entry applies
    async fn handle_propose(
        &self,
        command: Command,
        response_tx: oneshot::Sender<Result<u64, RaftError>>,
    ) {
        let mut state = self.state.write().await;

        if state.role != RaftRole::Leader {
            let _ = response_tx.send(Err(RaftError::NotLeader(state.leader_id)));
            return;
        }

        let index = state.append_entry(command);
        if let Err(e) = self.shared.persist(&mut state) {
            // The rollback stays pending with anything older still unwritten
            state.truncate_from(index);
            let _ = response_tx.send(Err(e));
            return;
        }
        let term = state.current_term;
        tracing::debug!(index, term, "Appended command to log");

        self.waiters.lock().await.insert(
            index,
            Waiter {
                term,
                tx: response_tx,
            },
        );
        if state.advance_commit_index(self.id) {
            self.shared.publish_commit(state.commit_index);
        }
        drop(state);

        self.send_heartbeats().await;
    }

    /// Submit a command and wait until it is applied locally.
    ///
    /// Fails immediately with `NotLeader` on any other role.
    pub async fn propose(&self, command: Command) -> Result<u64, RaftError> {
        {
            let state = self.state.read().await;
            if state.role != RaftRole::Leader {
                return Err(RaftError::NotLeader(state.leader_id));
            }
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.message_tx
            .try_send(RaftMessage::Propose {
                command,
                response_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RaftError::Busy,
                mpsc::error::TrySendError::Closed(_) => RaftError::Shutdown,
            })?;

        match timeout(self.config.apply_timeout(), response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RaftError::Shutdown),
            Err(_) => Err(RaftError::Timeout),
        }
    }

    /// Apply committed entries to the state machine as the commit index moves.
    pub async fn run_apply_loop(&self, cancel: CancellationToken) {
        let mut commits = self.subscribe_commits();
        loop {
            self.apply_committed().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = commits.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Entries that are committed but not yet applied
    pub async fn get_committed_entries(&self) -> Vec<LogEntry> {
        let state = self.state.read().await;
        let count = state.commit_index.saturating_sub(state.last_applied) as usize;
        state.get_entries_from(state.last_applied + 1, count)
    }

    async fn apply_committed(&self) {
        let _guard = self.apply_lock.lock().await;
        let entries = self.get_committed_entries().await;
        let Some(last) = entries.last().map(|e| e.index) else {
            return;
        };

        for entry in &entries {
            match &entry.command {
                Command::Data(data) => self.fsm.apply(entry.index, data),
                Command::Membership(members) => {
                    tracing::info!(
                        node_id = self.id,
                        index = entry.index,
                        voters = ?members.keys().collect::<Vec<_>>(),
                        "Membership committed"
                    );
                }
                Command::Noop => {}
            }
        }

        let leader_id = {
            let mut state = self.state.write().await;
            state.last_applied = state.last_applied.max(last);
            state.leader_id
        };

        let mut waiters = self.waiters.lock().await;
        for entry in &entries {
            if let Some(waiter) = waiters.remove(&entry.index) {
                let result = if waiter.term == entry.term {
                    Ok(entry.index)
                } else {
                    // Our entry was overwritten by another leader's
                    Err(RaftError::NotLeader(leader_id))
                };
                let _ = waiter.tx.send(result);
            }
        }
        drop(waiters);

        self.maybe_snapshot().await;
    }

    /// Snapshot the state machine and compact the log once enough applied
    /// entries pile up. Caller holds `apply_lock`.
    async fn maybe_snapshot(&self) {
        let threshold = self.config.snapshot_threshold;
        let (applied, offset) = {
            let state = self.state.read().await;
            (state.last_applied, state.log_offset())
        };
        if threshold == 0 || applied.saturating_sub(offset) < threshold {
            return;
        }

        let data = match self.fsm.snapshot() {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(node_id = self.id, error = %e, "Failed to snapshot state machine");
                return;
            }
        };

        let mut state = self.state.write().await;
        let Some(term) = state.term_at(applied) else {
            return;
        };
        let meta = SnapshotMeta {
            last_included_index: applied,
            last_included_term: term,
            membership: state.membership_at(applied),
        };
        if let Err(e) = self.shared.snapshots.save(Snapshot { meta, data }) {
            tracing::error!(node_id = self.id, error = %e, "Failed to save snapshot");
            return;
        }
        state.compact(applied);
        if self.shared.persist(&mut state).is_err() {
            tracing::warn!(node_id = self.id, index = applied, "Log compaction not durable yet, kept pending");
        }
        tracing::info!(node_id = self.id, index = applied, "Compacted log");
    }

    /// Handle incoming RequestVote RPC
    pub async fn handle_vote_request(&self, req: VoteRequest) -> VoteResponse {
        let mut state = self.state.write().await;
        let mut response = rpc::handle_request_vote(&mut state, &req, self.id);

        // A vote only counts once it is durable
        if self.shared.persist(&mut state).is_err() {
            response.vote_granted = false;
        }
        drop(state);

        if response.vote_granted {
            *self.last_heartbeat.write().await = Instant::now();
        }
        response
    }

    /// Handle incoming AppendEntries RPC
    pub async fn handle_append_entries(&self, req: AppendEntriesRequest) -> AppendEntriesResponse {
        let mut state = self.state.write().await;
        let mut response = rpc::handle_append_entries(&mut state, &req, self.id);

        if self.shared.persist(&mut state).is_err() {
            response.success = false;
        }
        let commit_index = state.commit_index;
        drop(state);

        // Any request from the current leader counts as a heartbeat
        if response.term == req.term {
            *self.last_heartbeat.write().await = Instant::now();
        }
        if response.success {
            self.shared.publish_commit(commit_index);
        }
        response
    }

    /// Handle incoming InstallSnapshot RPC
    pub async fn handle_install_snapshot(&self, req: InstallSnapshotRequest) -> InstallSnapshotResponse {
        // The state machine is replaced, so no entry may be applied meanwhile.
        let _guard = self.apply_lock.lock().await;
        let mut state = self.state.write().await;
        let (response, meta) = rpc::handle_install_snapshot(&mut state, &req, self.id);
        let durable = self.shared.persist(&mut state).is_ok();

        if response.term == req.term {
            *self.last_heartbeat.write().await = Instant::now();
        }

        let Some(meta) = meta else {
            return response;
        };
        if !durable {
            // The leader resends the snapshot on its next round
            tracing::warn!(node_id = self.id, index = meta.last_included_index, "Skipping snapshot install, term not durable");
            return response;
        }
        if let Err(e) = self.fsm.restore(&req.data) {
            tracing::error!(node_id = self.id, error = %e, "Failed to restore snapshot");
            return response;
        }
        let snapshot = Snapshot {
            meta: meta.clone(),
            data: req.data,
        };
        if let Err(e) = self.shared.snapshots.save(snapshot) {
            tracing::error!(node_id = self.id, error = %e, "Failed to save received snapshot");
        }
        let index = meta.last_included_index;
        state.install_snapshot(meta);
        if self.shared.persist(&mut state).is_err() {
            tracing::warn!(node_id = self.id, index, "Snapshot install not durable yet, kept pending");
        }
        let commit_index = state.commit_index;
        drop(state);

        self.shared.publish_commit(commit_index);
        response
    }

    /// Check if this node is the leader
    pub async fn is_leader(&self) -> bool {
        self.state.read().await.role == RaftRole::Leader
    }

    /// Get the current leader ID
    pub async fn get_leader_id(&self) -> Option<u64> {
        let state = self.state.read().await;
        if state.role == RaftRole::Leader {
            Some(self.id)
        } else {
            state.leader_id
        }
    }

    pub async fn membership(&self) -> Membership {
        self.state.read().await.membership.clone()
    }

    pub async fn status(&self) -> ClusterStatus {
        let state = self.state.read().await;
        ClusterStatus {
            node_id: self.id,
            role: state.role,
            current_term: state.current_term,
            leader_id: if state.role == RaftRole::Leader {
                Some(self.id)
            } else {
                state.leader_id
            },
            commit_index: state.commit_index,
            last_applied: state.last_applied,
            membership: state.membership.clone(),
        }
    }
}
