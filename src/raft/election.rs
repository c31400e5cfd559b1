use crate::proto::{VoteRequest, VoteResponse};
use crate::raft::peer::VoteState;
use crate::raft::state::ServerState;

/// Handle an inbound RequestVote RPC. Caller holds the server lock.
///
/// The vote is granted when all of the following hold: the candidate's term
/// is at least ours, no vote has been cast in that term yet, and the
/// candidate's log is at least as up-to-date as ours.
pub fn handle_request_vote(state: &mut ServerState, req: &VoteRequest) -> VoteResponse {
    // A higher term is adopted before anything else, vote or no vote.
    if req.term > state.current_term {
        state.become_follower(req.term);
    }

    let vote_granted = req.term >= state.current_term
        && state.voted_for_term < req.term
        && state.is_log_up_to_date(req.last_log_index, req.last_log_term);

    if vote_granted {
        state.voted_for_term = req.term;
        state.become_follower(req.term);
    }

    tracing::debug!(
        name = %state.name,
        candidate = %req.candidate_name,
        term = req.term,
        granted = vote_granted,
        "RequestVote handled"
    );

    VoteResponse {
        term: state.current_term,
        vote_granted,
    }
}

/// Snapshot of everything one candidate round needs once the lock is
/// released: the request to fan out and the hosts to send it to.
#[derive(Debug, Clone)]
pub struct VoteRound {
    pub term: u64,
    pub request: VoteRequest,
    pub peer_hosts: Vec<String>,
}

/// Start an election round. Caller holds the lock, has already advanced the
/// term and cast the self-vote. Marks every remote peer `Requested`.
pub fn begin_vote_round(state: &mut ServerState) -> VoteRound {
    let (last_log_index, last_log_term) = state.log.last_log_info();
    let peer_hosts = state.remote_hosts();
    for host in &peer_hosts {
        if let Some(peer) = state.peers.get_mut(host) {
            peer.vote_state = VoteState::Requested;
        }
    }
    VoteRound {
        term: state.current_term,
        request: VoteRequest {
            term: state.current_term,
            candidate_name: state.conf.host.clone(),
            last_log_index,
            last_log_term,
        },
        peer_hosts,
    }
}

/// Record one peer's vote response. Returns `true` when the response carried
/// a higher term and this node stepped down.
pub fn record_vote_response(state: &mut ServerState, host: &str, resp: &VoteResponse) -> bool {
    if resp.term > state.current_term {
        tracing::info!(
            name = %state.name,
            peer = host,
            term = resp.term,
            "Peer reported a higher term, stepping down"
        );
        state.become_follower(resp.term);
        return true;
    }

    let granted = resp.vote_granted;
    if let Some(peer) = state.peers.get_mut(host) {
        peer.vote_state = if granted {
            VoteState::Granted
        } else {
            VoteState::Denied
        };
    }
    if granted {
        state.vote_granted_num += 1;
    }
    false
}
