use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Raft node role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftRole::Follower => write!(f, "follower"),
            RaftRole::Candidate => write!(f, "candidate"),
            RaftRole::Leader => write!(f, "leader"),
        }
    }
}

/// Voting members keyed by node id, valued by resolved address.
pub type Membership = BTreeMap<u64, String>;

/// Commands that can be replicated through Raft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// No-op appended by a new leader so earlier terms can commit
    Noop,
    /// Full replacement of the voting membership
    Membership(Membership),
    /// Opaque state machine command
    Data(Vec<u8>),
}

/// A single entry in the Raft log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: Command,
}

/// Describes the log prefix a snapshot replaces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub membership: Membership,
}

/// Changes not yet written to the log store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingWrites {
    pub hard_state: bool,
    /// Stored entries at or above this index are stale and must be rewritten.
    pub log_from: Option<u64>,
    /// Stored entries at or below this index were compacted away.
    pub compact_to: Option<u64>,
}

impl PendingWrites {
    pub fn is_empty(&self) -> bool {
        !self.hard_state && self.log_from.is_none() && self.compact_to.is_none()
    }
}

/// Raft server state. `log` only holds entries above `snapshot.last_included_index`.
///
/// # Raft Safety Invariants
///
/// ## Election Safety
/// At most one leader can be elected in a given term. Enforced by:
/// - Each node votes for at most one candidate per term (`voted_for`)
/// - Candidate must receive votes from a majority of the current membership
///
/// ## Leader Append-Only
/// A leader never overwrites or deletes entries in its log. Enforced by:
/// - Leaders only append new entries via `append_entry()`
/// - Log truncation only occurs on followers during replication conflicts
///
/// ## Log Matching
/// If two logs contain an entry with the same index and term, then the logs
/// are identical in all entries up through that index. Enforced by:
/// - `AppendEntries` consistency check (prev_log_index, prev_log_term)
/// - Only conflicting suffixes are truncated before appending
///
/// ## Leader Completeness
/// - Vote restriction: candidates must have up-to-date logs (`is_log_up_to_date`)
/// - Leaders only commit entries from their current term (`advance_commit_index`)
///
/// ## State Machine Safety
/// - Entries are only applied after being committed (`last_applied <= commit_index`)
/// - Snapshots only cover applied entries
#[derive(Debug)]
pub struct RaftState {
    // Persistent state
    pub current_term: u64,
    pub voted_for: Option<u64>,
    pub log: Vec<LogEntry>,
    pub snapshot: SnapshotMeta,

    // Volatile state on all servers
    pub commit_index: u64,
    pub last_applied: u64,

    // Volatile state on leaders (reinitialized after election)
    pub next_index: HashMap<u64, u64>,
    pub match_index: HashMap<u64, u64>,

    // Current role
    pub role: RaftRole,

    // Known leader (if any)
    pub leader_id: Option<u64>,

    // Votes received in current election (for candidates)
    pub votes_received: u64,

    /// Latest membership found in the log, or the snapshot's when the log has none.
    pub membership: Membership,

    pending: PendingWrites,
}

impl RaftState {
    pub fn new() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            log: Vec::new(),
            snapshot: SnapshotMeta::default(),
            commit_index: 0,
            last_applied: 0,
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            role: RaftRole::Follower,
            leader_id: None,
            votes_received: 0,
            membership: Membership::new(),
            pending: PendingWrites::default(),
        }
    }

    /// Rebuild state from what the stores hold after a restart.
    pub fn restore(
        current_term: u64,
        voted_for: Option<u64>,
        snapshot: Option<SnapshotMeta>,
        entries: Vec<LogEntry>,
    ) -> Self {
        let mut state = Self::new();
        state.current_term = current_term;
        state.voted_for = voted_for;
        if let Some(meta) = snapshot {
            state.commit_index = meta.last_included_index;
            state.last_applied = meta.last_included_index;
            state.snapshot = meta;
        }
        let offset = state.snapshot.last_included_index;
        state.log = entries.into_iter().filter(|e| e.index > offset).collect();
        state.refresh_membership();
        state
    }

    /// Index of the last entry covered by the snapshot
    pub fn log_offset(&self) -> u64 {
        self.snapshot.last_included_index
    }

    /// Get the last log index
    pub fn last_log_index(&self) -> u64 {
        self.log
            .last()
            .map(|e| e.index)
            .unwrap_or(self.snapshot.last_included_index)
    }

    /// Get the last log term
    pub fn last_log_term(&self) -> u64 {
        self.log
            .last()
            .map(|e| e.term)
            .unwrap_or(self.snapshot.last_included_term)
    }

    /// Term of the entry at `index`, including the snapshot boundary.
    pub fn term_at(&self, index: u64) -> Option<u64> {
        if index == 0 {
            return Some(0);
        }
        if index == self.log_offset() {
            return Some(self.snapshot.last_included_term);
        }
        self.get_entry(index).map(|e| e.term)
    }

    /// Get log entry at index (1-indexed, None once compacted)
    pub fn get_entry(&self, index: u64) -> Option<&LogEntry> {
        let offset = self.log_offset();
        if index <= offset {
            return None;
        }
        self.log.get((index - offset - 1) as usize)
    }

    /// Get entries starting from index (inclusive), at most `limit` of them
    pub fn get_entries_from(&self, start_index: u64, limit: usize) -> Vec<LogEntry> {
        let offset = self.log_offset();
        let start = start_index.saturating_sub(offset + 1) as usize;
        if start >= self.log.len() {
            return Vec::new();
        }
        self.log[start..].iter().take(limit).cloned().collect()
    }

    /// Append a new entry at the current term and return its index
    pub fn append_entry(&mut self, command: Command) -> u64 {
        let index = self.last_log_index() + 1;
        if let Command::Membership(members) = &command {
            self.membership = members.clone();
        }
        self.log.push(LogEntry {
            term: self.current_term,
            index,
            command,
        });
        self.mark_log_dirty(index);
        index
    }

    /// Append replicated entries, truncating only at the first conflict.
    ///
    /// Entries already present with a matching term are left alone so a
    /// delayed AppendEntries can never drop a newer suffix.
    pub fn merge_entries(&mut self, entries: Vec<LogEntry>) {
        let mut truncated = false;
        for entry in entries {
            if entry.index <= self.log_offset() {
                continue;
            }
            if !truncated {
                match self.term_at(entry.index) {
                    Some(term) if term == entry.term => continue,
                    Some(_) => {
                        self.truncate_from(entry.index);
                        truncated = true;
                    }
                    None => truncated = true,
                }
            }
            self.mark_log_dirty(entry.index);
            self.log.push(entry);
        }
        self.refresh_membership();
    }

    /// Drop the entry at `index` and everything after it
    pub fn truncate_from(&mut self, index: u64) {
        let offset = self.log_offset();
        if index <= offset {
            self.log.clear();
        } else {
            self.log.truncate((index - offset - 1) as usize);
        }
        self.mark_log_dirty(index.max(offset + 1));
        self.refresh_membership();
    }

    /// Forget every entry up to and including `index`; the caller has
    /// already persisted a snapshot covering them.
    pub fn compact(&mut self, index: u64) {
        if index <= self.log_offset() || index > self.last_applied {
            return;
        }
        let Some(term) = self.term_at(index) else {
            return;
        };
        let membership = self.membership_at(index);
        let drop = (index - self.log_offset()) as usize;
        self.log.drain(..drop.min(self.log.len()));
        self.snapshot = SnapshotMeta {
            last_included_index: index,
            last_included_term: term,
            membership,
        };
        self.pending.compact_to = Some(index);
    }

    /// Replace local state with a snapshot received from the leader.
    ///
    /// The log suffix is kept when it already contains the snapshot's last
    /// entry, otherwise the whole log is discarded.
    pub fn install_snapshot(&mut self, meta: SnapshotMeta) {
        let index = meta.last_included_index;
        let keep_suffix = self.term_at(index) == Some(meta.last_included_term);
        if keep_suffix {
            let drop = (index - self.log_offset()) as usize;
            self.log.drain(..drop.min(self.log.len()));
        } else {
            self.log.clear();
            self.mark_log_dirty(index + 1);
        }
        self.snapshot = meta;
        self.commit_index = self.commit_index.max(index);
        self.last_applied = index;
        self.pending.compact_to = Some(index);
        self.refresh_membership();
    }

    /// Membership in effect at `index`
    pub fn membership_at(&self, index: u64) -> Membership {
        self.log
            .iter()
            .rev()
            .filter(|e| e.index <= index)
            .find_map(|e| match &e.command {
                Command::Membership(m) => Some(m.clone()),
                _ => None,
            })
            .unwrap_or_else(|| self.snapshot.membership.clone())
    }

    fn refresh_membership(&mut self) {
        self.membership = self.membership_at(u64::MAX);
    }

    pub fn is_voter(&self, id: u64) -> bool {
        self.membership.contains_key(&id)
    }

    /// Voters other than `my_id`
    pub fn peer_ids(&self, my_id: u64) -> Vec<u64> {
        self.membership
            .keys()
            .copied()
            .filter(|&id| id != my_id)
            .collect()
    }

    pub fn quorum(&self) -> usize {
        self.membership.len() / 2 + 1
    }

    /// Check if candidate's log is at least as up-to-date as ours
    pub fn is_log_up_to_date(&self, last_log_index: u64, last_log_term: u64) -> bool {
        let our_last_term = self.last_log_term();
        let our_last_index = self.last_log_index();

        last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= our_last_index)
    }

    /// Move the commit index to the highest entry of the current term that a
    /// majority of voters hold. Returns true when it moved.
    pub fn advance_commit_index(&mut self, my_id: u64) -> bool {
        if self.role != RaftRole::Leader || self.membership.is_empty() {
            return false;
        }
        let mut matched: Vec<u64> = self
            .membership
            .keys()
            .map(|&id| {
                if id == my_id {
                    self.last_log_index()
                } else {
                    self.match_index.get(&id).copied().unwrap_or(0)
                }
            })
            .collect();
        matched.sort_unstable_by(|a, b| b.cmp(a));
        let candidate = matched[self.quorum() - 1];

        if candidate > self.commit_index && self.term_at(candidate) == Some(self.current_term) {
            self.commit_index = candidate;
            return true;
        }
        false
    }

    /// Transition to follower state. Moving to a newer term clears the vote.
    pub fn become_follower(&mut self, term: u64) {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.pending.hard_state = true;
        }
        self.role = RaftRole::Follower;
        self.votes_received = 0;
    }

    /// Transition to candidate state
    pub fn become_candidate(&mut self, my_id: u64) {
        self.role = RaftRole::Candidate;
        self.current_term += 1;
        self.voted_for = Some(my_id);
        self.votes_received = 1; // Vote for self
        self.leader_id = None;
        self.pending.hard_state = true;
    }

    /// Transition to leader state
    pub fn become_leader(&mut self, my_id: u64) {
        self.role = RaftRole::Leader;
        self.leader_id = Some(my_id);

        let last_log_index = self.last_log_index();
        self.next_index.clear();
        self.match_index.clear();
        for peer_id in self.peer_ids(my_id) {
            self.next_index.insert(peer_id, last_log_index + 1);
            self.match_index.insert(peer_id, 0);
        }
    }

    pub fn record_vote(&mut self, candidate_id: u64) {
        self.voted_for = Some(candidate_id);
        self.pending.hard_state = true;
    }

    fn mark_log_dirty(&mut self, index: u64) {
        self.pending.log_from = Some(match self.pending.log_from {
            Some(from) => from.min(index),
            None => index,
        });
    }

    /// Hand out the writes accumulated since the last call.
    pub fn take_pending(&mut self) -> PendingWrites {
        std::mem::take(&mut self.pending)
    }

    /// Put back writes that did not reach the store, merged with anything
    /// marked since they were taken.
    pub fn requeue_pending(&mut self, failed: PendingWrites) {
        self.pending.hard_state |= failed.hard_state;
        if let Some(from) = failed.log_from {
            self.mark_log_dirty(from);
        }
        self.pending.compact_to = self.pending.compact_to.max(failed.compact_to);
    }
}

impl Default for RaftState {
    fn default() -> Self {
        Self::new()
    }
}
