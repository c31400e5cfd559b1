use std::collections::HashMap;

use crate::config::Config;
use crate::raft::log::Log;
use crate::raft::peer::{Peer, VoteState};

/// Server role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Stopped,
    Initiated,
    Follower,
    Candidate,
    Leader,
}

impl Role {
    /// Follower, Candidate and Leader are the running states.
    pub fn is_running(&self) -> bool {
        matches!(self, Role::Follower | Role::Candidate | Role::Leader)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Stopped => write!(f, "stopped"),
            Role::Initiated => write!(f, "initiated"),
            Role::Follower => write!(f, "follower"),
            Role::Candidate => write!(f, "candidate"),
            Role::Leader => write!(f, "leader"),
        }
    }
}

/// The mutable server core.
///
/// Every field here is protected by the server's single lock; this struct
/// never locks anything itself. Handlers and the role-loop driver lock once
/// per operation and work on `&mut ServerState`.
pub struct ServerState {
    pub name: String,
    pub role: Role,
    pub current_term: u64,
    /// Highest term in which this node cast a vote (including for itself).
    pub voted_for_term: u64,
    pub current_leader: String,
    /// Votes received in the current election round.
    pub vote_granted_num: usize,
    /// Successful append acknowledgments in the current round, self included.
    pub append_entry_resp_cnt: usize,
    /// Last time a valid leader RPC was received, ms since epoch.
    pub leader_accept_time: i64,
    pub heartbeat_interval_ms: i64,
    pub log: Log,
    pub peers: HashMap<String, Peer>,
    pub conf: Config,
}

impl ServerState {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            role: Role::Stopped,
            current_term: 0,
            voted_for_term: 0,
            current_leader: String::new(),
            vote_granted_num: 0,
            append_entry_resp_cnt: 0,
            leader_accept_time: 0,
            heartbeat_interval_ms: 1000,
            log: Log::volatile(),
            peers: HashMap::new(),
            conf: Config::default(),
        }
    }

    /// Majority of the cluster size; `peers` includes this node.
    pub fn quorum_size(&self) -> usize {
        self.peers.len() / 2 + 1
    }

    /// True when the candidate's log is at least as up-to-date as ours.
    pub fn is_log_up_to_date(&self, last_log_index: u64, last_log_term: u64) -> bool {
        let (our_last_index, our_last_term) = self.log.last_log_info();
        last_log_term > our_last_term
            || (last_log_term == our_last_term && last_log_index >= our_last_index)
    }

    /// Adopt `term` and fall back to Follower. Per-election bookkeeping is
    /// cleared; `voted_for_term` stays, it only ever advances.
    pub fn become_follower(&mut self, term: u64) {
        if term > self.current_term {
            self.reset_peer_votes();
        }
        self.role = Role::Follower;
        self.current_term = term;
        self.vote_granted_num = 0;
    }

    /// Start a new election round: advance the term and clear vote state.
    pub fn bump_term_for_vote(&mut self) {
        self.current_term += 1;
        self.vote_granted_num = 0;
        self.reset_peer_votes();
    }

    /// Cast this round's self-vote.
    pub fn vote_for_self(&mut self) {
        self.vote_granted_num = 1;
        self.voted_for_term = self.current_term;
        let own_host = self.conf.host.clone();
        if let Some(peer) = self.peers.get_mut(&own_host) {
            peer.vote_state = VoteState::Granted;
        }
    }

    pub fn reset_peer_votes(&mut self) {
        for peer in self.peers.values_mut() {
            peer.reset_vote();
        }
    }

    /// Remote peers, i.e. everyone but this node's own host.
    pub fn remote_hosts(&self) -> Vec<String> {
        self.peers
            .values()
            .filter(|p| p.host != self.conf.host)
            .map(|p| p.host.clone())
            .collect()
    }
}
