use crate::error::Result;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, LogEntry};
use crate::raft::state::ServerState;
use crate::raft::timer::now_ms;

/// Command name of the entry a fresh leader replicates to assert itself.
pub const NOP_COMMAND: &str = "nop";

/// Handle an inbound AppendEntries RPC. Caller holds the server lock.
///
/// A stale term is rejected outright and reports our current term. Any
/// other request adopts the sender as leader, then reconciles the log
/// against `(prev_log_index, prev_log_term)`:
///
/// - the leader is ahead of us: reply failure with our last index so it
///   backs up;
/// - our tail extends past or diverges from `prev`: truncate back to the
///   reconciliation point, append when the point is exactly `prev`,
///   otherwise report the point so the leader resends from there;
/// - an empty heartbeat (`prev = 0` against a non-empty log) matches
///   nothing and leaves the log untouched; the leader's follow-up against
///   the reported tail is what acknowledges it.
///
/// Success replies carry the post-append `last_log_info` so the leader can
/// use them directly as the next reconciliation anchor.
pub fn handle_append_entries(
    state: &mut ServerState,
    req: &AppendEntriesRequest,
) -> Result<AppendEntriesResponse> {
    if req.term < state.current_term {
        let (last_index, _) = state.log.last_log_info();
        return Ok(AppendEntriesResponse {
            term: state.current_term,
            success: false,
            index: last_index,
        });
    }

    state.become_follower(req.term);
    state.current_leader = req.leader_name.clone();
    state.leader_accept_time = now_ms();

    let (local_last_index, _) = state.log.last_log_info();
    let mut success = false;

    if req.prev_log_index <= local_last_index {
        match state
            .log
            .reconciliation_point(req.prev_log_index, req.prev_log_term)
        {
            Some(point) => {
                state.log.truncate_after(point)?;
                if point == req.prev_log_index {
                    for entry in &req.entries {
                        state.log.append(entry.clone())?;
                    }
                    success = true;
                }
            }
            None => {
                if req.prev_log_index == 0 && state.log.is_empty() {
                    for entry in &req.entries {
                        state.log.append(entry.clone())?;
                    }
                    success = true;
                }
            }
        }
    }

    if success {
        state.log.update_commit_index(req.commit_index);
    }

    let (last_index, last_term) = state.log.last_log_info();
    tracing::trace!(
        name = %state.name,
        leader = %req.leader_name,
        term = req.term,
        success,
        last_index,
        "AppendEntries handled"
    );
    Ok(AppendEntriesResponse {
        term: last_term,
        success,
        index: last_index,
    })
}

/// Snapshot of one leader-side append round: the request to fan out and the
/// hosts to send it to.
#[derive(Debug, Clone)]
pub struct AppendRound {
    pub term: u64,
    pub request: AppendEntriesRequest,
    pub peer_hosts: Vec<String>,
}

/// Start the round a fresh leader runs: count the self-acknowledgment,
/// append a no-op entry locally, and build the request replicating it.
/// Caller holds the lock.
pub fn begin_leader_round(state: &mut ServerState) -> Result<AppendRound> {
    state.append_entry_resp_cnt = 1;
    let (prev_log_index, prev_log_term) = state.log.last_log_info();
    let entry = LogEntry {
        index: prev_log_index + 1,
        term: state.current_term,
        command_name: NOP_COMMAND.to_string(),
        command: Vec::new(),
    };
    state.log.append(entry.clone())?;

    Ok(AppendRound {
        term: state.current_term,
        request: AppendEntriesRequest {
            term: state.current_term,
            leader_name: state.conf.host.clone(),
            prev_log_index,
            prev_log_term,
            commit_index: state.log.commit_index(),
            entries: vec![entry],
        },
        peer_hosts: state.remote_hosts(),
    })
}

/// Start a heartbeat round: reset the acknowledgment count and build the
/// empty request. Caller holds the lock.
pub fn begin_heartbeat_round(state: &mut ServerState) -> AppendRound {
    state.append_entry_resp_cnt = 1;
    AppendRound {
        term: state.current_term,
        request: AppendEntriesRequest {
            term: state.current_term,
            leader_name: state.conf.host.clone(),
            prev_log_index: 0,
            prev_log_term: 0,
            commit_index: state.log.commit_index(),
            entries: Vec::new(),
        },
        peer_hosts: state.remote_hosts(),
    }
}

/// Build the single catch-up retry after a peer rejected an append: resend
/// anchored at the tail the peer reported, carrying everything past it.
pub fn catch_up_request(
    state: &ServerState,
    rejection: &AppendEntriesResponse,
) -> AppendEntriesRequest {
    AppendEntriesRequest {
        term: state.current_term,
        leader_name: state.conf.host.clone(),
        prev_log_index: rejection.index,
        prev_log_term: rejection.term,
        commit_index: state.log.commit_index(),
        entries: state.log.entries_from(rejection.index),
    }
}
