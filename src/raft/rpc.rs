use crate::proto::{
    self, log_entry::Payload, AppendEntriesRequest, AppendEntriesResponse,
    InstallSnapshotRequest, InstallSnapshotResponse, LogEntry as ProtoLogEntry, VoteRequest,
    VoteResponse,
};
use crate::raft::state::{Command, LogEntry, Membership, RaftRole, RaftState, SnapshotMeta};

/// Handle RequestVote RPC
pub fn handle_request_vote(state: &mut RaftState, req: &VoteRequest, my_id: u64) -> VoteResponse {
    // If request term is greater, update our term and become follower
    if req.term > state.current_term {
        state.become_follower(req.term);
    }

    let vote_granted = if req.term < state.current_term {
        false
    } else if state.voted_for.is_some() && state.voted_for != Some(req.candidate_id) {
        // Already voted for someone else in this term
        false
    } else if !state.is_log_up_to_date(req.last_log_index, req.last_log_term) {
        false
    } else {
        state.record_vote(req.candidate_id);
        true
    };

    tracing::debug!(
        node_id = my_id,
        candidate = req.candidate_id,
        term = req.term,
        granted = vote_granted,
        "RequestVote response"
    );

    VoteResponse {
        term: state.current_term,
        vote_granted,
    }
}

/// Handle AppendEntries RPC
pub fn handle_append_entries(
    state: &mut RaftState,
    req: &AppendEntriesRequest,
    my_id: u64,
) -> AppendEntriesResponse {
    if req.term > state.current_term {
        state.become_follower(req.term);
    }

    if req.term < state.current_term {
        return reject(state);
    }

    // Valid AppendEntries from leader - step down if we're a candidate
    if state.role != RaftRole::Follower {
        state.become_follower(req.term);
    }
    state.leader_id = Some(req.leader_id);

    let mut entries: Vec<LogEntry> = req.entries.iter().map(proto_to_log_entry).collect();

    // The prefix up to our snapshot is committed, so it matches by definition.
    let (prev_index, prev_term) = if req.prev_log_index < state.log_offset() {
        entries.retain(|e| e.index > state.log_offset());
        (state.log_offset(), state.snapshot.last_included_term)
    } else {
        (req.prev_log_index, req.prev_log_term)
    };

    match state.term_at(prev_index) {
        None => return reject(state),
        Some(term) if term != prev_term => {
            // Conflicting entry, it and everything after it must go
            state.truncate_from(prev_index);
            return reject(state);
        }
        Some(_) => {}
    }

    let last_new_index = entries.last().map(|e| e.index).unwrap_or(prev_index);
    if !entries.is_empty() {
        let count = entries.len();
        state.merge_entries(entries);
        tracing::debug!(
            node_id = my_id,
            entries_appended = count,
            new_last_index = state.last_log_index(),
            "Appended entries"
        );
    }

    // A delayed request only vouches for its own prefix; never move back
    state.commit_index = state.commit_index.max(req.leader_commit.min(last_new_index));

    AppendEntriesResponse {
        term: state.current_term,
        success: true,
        match_index: last_new_index,
    }
}

fn reject(state: &RaftState) -> AppendEntriesResponse {
    AppendEntriesResponse {
        term: state.current_term,
        success: false,
        match_index: state.last_log_index().min(state.commit_index.max(state.log_offset())),
    }
}

/// Handle InstallSnapshot RPC.
///
/// Returns the snapshot to load into the state machine when it is newer than
/// anything applied locally.
pub fn handle_install_snapshot(
    state: &mut RaftState,
    req: &InstallSnapshotRequest,
    my_id: u64,
) -> (InstallSnapshotResponse, Option<SnapshotMeta>) {
    if req.term > state.current_term {
        state.become_follower(req.term);
    }
    let response = InstallSnapshotResponse {
        term: state.current_term,
    };
    if req.term < state.current_term {
        return (response, None);
    }
    if state.role != RaftRole::Follower {
        state.become_follower(req.term);
    }
    state.leader_id = Some(req.leader_id);

    if req.last_included_index <= state.last_applied {
        return (response, None);
    }

    tracing::info!(
        node_id = my_id,
        leader = req.leader_id,
        index = req.last_included_index,
        "Installing snapshot from leader"
    );
    let meta = SnapshotMeta {
        last_included_index: req.last_included_index,
        last_included_term: req.last_included_term,
        membership: req
            .membership
            .as_ref()
            .map(proto_to_membership)
            .unwrap_or_default(),
    };
    (response, Some(meta))
}

pub fn proto_to_membership(proto: &proto::Membership) -> Membership {
    proto
        .servers
        .iter()
        .map(|s| (s.node_id, s.address.clone()))
        .collect()
}

pub fn membership_to_proto(membership: &Membership) -> proto::Membership {
    proto::Membership {
        servers: membership
            .iter()
            .map(|(&node_id, address)| proto::Server {
                node_id,
                address: address.clone(),
            })
            .collect(),
    }
}

/// Convert protobuf LogEntry to internal LogEntry
pub fn proto_to_log_entry(proto: &ProtoLogEntry) -> LogEntry {
    let command = match &proto.payload {
        Some(Payload::Membership(m)) => Command::Membership(proto_to_membership(m)),
        Some(Payload::Data(data)) => Command::Data(data.clone()),
        Some(Payload::Noop(_)) | None => Command::Noop,
    };

    LogEntry {
        term: proto.term,
        index: proto.index,
        command,
    }
}

/// Convert internal LogEntry to protobuf LogEntry
pub fn log_entry_to_proto(entry: &LogEntry) -> ProtoLogEntry {
    let payload = match &entry.command {
        Command::Noop => Payload::Noop(proto::Noop {}),
        Command::Membership(m) => Payload::Membership(membership_to_proto(m)),
        Command::Data(data) => Payload::Data(data.clone()),
    };

    ProtoLogEntry {
        term: entry.term,
        index: entry.index,
        payload: Some(payload),
    }
}
