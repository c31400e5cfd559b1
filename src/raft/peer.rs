/// Outcome of the most recent vote solicitation towards one peer.
///
/// Transitions `None -> Requested -> {Granted, Denied}`; reset to `None`
/// whenever the local term advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoteState {
    #[default]
    None,
    Requested,
    Granted,
    Denied,
}

/// Per-remote-node descriptor.
///
/// Peers carry configuration and vote bookkeeping only; all RPC dispatch is
/// owned by the server driver, which receives the peer's host as an argument.
#[derive(Debug, Clone)]
pub struct Peer {
    pub name: String,
    pub host: String,
    pub vote_state: VoteState,
    pub heartbeat_interval_ms: i64,
}

impl Peer {
    pub fn new(name: &str, host: &str, heartbeat_interval_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            vote_state: VoteState::None,
            heartbeat_interval_ms,
        }
    }

    pub fn reset_vote(&mut self) {
        self.vote_state = VoteState::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_peer_has_no_vote() {
        let peer = Peer::new("n2", "127.0.0.1:4502", 1000);
        assert_eq!(peer.vote_state, VoteState::None);
        assert_eq!(peer.name, "n2");
        assert_eq!(peer.host, "127.0.0.1:4502");
    }

    #[test]
    fn test_reset_vote() {
        let mut peer = Peer::new("n2", "127.0.0.1:4502", 1000);
        peer.vote_state = VoteState::Granted;
        peer.reset_vote();
        assert_eq!(peer.vote_state, VoteState::None);
    }
}
