use std::net::SocketAddr;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_CONF_NAME};
use crate::error::{RegistryError, Result};
use crate::grpc::RpcServer;
use crate::proto::{AppendEntriesRequest, AppendEntriesResponse, VoteRequest, VoteResponse};
use crate::raft::election;
use crate::raft::log::Log;
use crate::raft::peer::Peer;
use crate::raft::replication::{self, AppendRound};
use crate::raft::state::{Role, ServerState};
use crate::raft::store::{FileLogStore, PersistedState, StateFile};
use crate::raft::timer::{now_ms, random_election_timeout};
use crate::raft::transport::Transport;

/// Deadline for a single outbound RPC within a round.
const RPC_TIMEOUT: Duration = Duration::from_millis(100);

/// One Raft node: the locked state core plus the drivers that move it.
///
/// All mutation goes through `shared`; handlers and role loops lock once
/// per operation. Outbound rounds snapshot what they need, release the
/// lock, fan out to peers concurrently, and apply the aggregated result
/// under a single reacquisition.
pub struct Server {
    name: String,
    path: PathBuf,
    conf_name: String,
    shared: Arc<RwLock<ServerState>>,
    transport: Arc<dyn Transport>,
    stopped: CancellationToken,
}

impl Server {
    /// A new server in the Stopped state. `conf_name` is resolved relative
    /// to `path`; pass `None` for the default `raft.cfg`.
    pub fn new(
        name: &str,
        path: &Path,
        conf_name: Option<&str>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            conf_name: conf_name.unwrap_or(DEFAULT_CONF_NAME).to_string(),
            shared: Arc::new(RwLock::new(ServerState::new(name))),
            transport,
            stopped: CancellationToken::new(),
        }
    }

    /// Load configuration, open the durable log, and recover persisted
    /// state. Idempotent once Initiated; an error while running.
    pub async fn init(&self) -> Result<()> {
        {
            let st = self.shared.read().await;
            if st.role.is_running() {
                return Err(RegistryError::InvalidState(st.role.to_string()));
            }
            if st.role == Role::Initiated {
                return Ok(());
            }
        }

        std::fs::create_dir_all(&self.path).map_err(RegistryError::Storage)?;
        make_private_dir(&self.path.join("snapshot"))?;
        let log_dir = self.path.join("internlog");
        make_private_dir(&log_dir)?;

        let conf = Config::from_file(&self.path.join(&self.conf_name))?;

        let log_path = log_dir.join(format!("{}{}", conf.log_prefix, conf.candidate_name));
        let store = FileLogStore::open(&log_path)?;
        let mut log = Log::open(Box::new(store))?;

        let persisted = StateFile::new(&self.path).load()?;
        log.update_commit_index(persisted.commit_index);

        let mut st = self.shared.write().await;
        st.heartbeat_interval_ms = conf.heartbeat_interval_ms;
        st.current_term = persisted.current_term;
        st.voted_for_term = persisted.voted_for_term;
        st.peers = conf
            .peer_hosts
            .iter()
            .map(|h| (h.clone(), Peer::new(h, h, conf.heartbeat_interval_ms)))
            .collect();
        st.conf = conf;
        st.log = log;
        st.role = Role::Initiated;
        tracing::info!(
            name = %self.name,
            term = st.current_term,
            log_len = st.log.len(),
            commit_index = st.log.commit_index(),
            "Server initiated"
        );
        Ok(())
    }

    /// Transition to Follower, spawn the gRPC listener, and run the role
    /// loop until the server stops. Runs `init` first when needed.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.is_running().await {
            let role = self.state().await;
            return Err(RegistryError::InvalidState(role.to_string()));
        }
        self.init().await?;

        let addr: SocketAddr = {
            let mut st = self.shared.write().await;
            let addr = st.conf.host.parse().map_err(|_| {
                RegistryError::InvalidState(format!("host {} is not a socket address", st.conf.host))
            })?;
            st.role = Role::Follower;
            addr
        };

        let rpc = RpcServer::new(addr, Arc::clone(self));
        let listener_token = self.stopped.child_token();
        let listener_server = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = rpc.run(listener_token).await {
                tracing::error!(error = %e, "gRPC listener failed, stopping server");
                listener_server.stop();
            }
        });

        tracing::info!(name = %self.name, addr = %addr, "Server started");
        self.run().await;
        Ok(())
    }

    /// Signal every loop and the listener to shut down.
    pub fn stop(&self) {
        self.stopped.cancel();
    }

    pub async fn is_running(&self) -> bool {
        self.shared.read().await.role.is_running()
    }

    pub async fn state(&self) -> Role {
        self.shared.read().await.role
    }

    pub async fn current_term(&self) -> u64 {
        self.shared.read().await.current_term
    }

    pub async fn current_leader(&self) -> String {
        self.shared.read().await.current_leader.clone()
    }

    pub async fn last_log_info(&self) -> (u64, u64) {
        self.shared.read().await.log.last_log_info()
    }

    pub async fn commit_index(&self) -> u64 {
        self.shared.read().await.log.commit_index()
    }

    /// True when the current round has acknowledgments from a quorum.
    pub async fn can_commit_log(&self) -> bool {
        let st = self.shared.read().await;
        st.append_entry_resp_cnt >= st.quorum_size()
    }

    /// Register a peer. Adding an existing peer or oneself is a no-op.
    pub async fn add_peer(&self, name: &str, host: &str) -> Result<()> {
        let mut st = self.shared.write().await;
        if st.peers.contains_key(name) || name == st.name {
            return Ok(());
        }
        let hb = st.heartbeat_interval_ms;
        st.peers.insert(name.to_string(), Peer::new(name, host, hb));
        Ok(())
    }

    /// Remove a peer. Removing oneself or an unknown peer is a no-op.
    pub async fn remove_peer(&self, name: &str) -> Result<()> {
        let mut st = self.shared.write().await;
        if name == st.name {
            return Ok(());
        }
        st.peers.remove(name);
        Ok(())
    }

    /// Inbound RequestVote entry point.
    pub async fn handle_request_vote(&self, req: VoteRequest) -> Result<VoteResponse> {
        let mut st = self.shared.write().await;
        if !st.role.is_running() {
            return Err(RegistryError::InvalidState(st.role.to_string()));
        }
        Ok(election::handle_request_vote(&mut st, &req))
    }

    /// Inbound AppendEntries entry point. A storage failure here is fatal:
    /// the server transitions to Stopped before the error propagates.
    pub async fn handle_append_entries(
        &self,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let mut st = self.shared.write().await;
        if !st.role.is_running() {
            return Err(RegistryError::InvalidState(st.role.to_string()));
        }
        match replication::handle_append_entries(&mut st, &req) {
            Ok(resp) => Ok(resp),
            Err(e) => {
                if matches!(e, RegistryError::Storage(_)) {
                    tracing::error!(name = %self.name, error = %e, "Log storage failure, stopping");
                    st.role = Role::Stopped;
                    self.stopped.cancel();
                }
                Err(e)
            }
        }
    }

    /// Role dispatch: each sub-loop runs until its role changes.
    async fn run(&self) {
        loop {
            let role = { self.shared.read().await.role };
            tracing::debug!(name = %self.name, role = %role, "Entering role loop");
            match role {
                Role::Follower => self.follower_loop().await,
                Role::Candidate => self.candidate_loop().await,
                Role::Leader => self.leader_loop().await,
                Role::Stopped | Role::Initiated => break,
            }
        }
        let st = self.shared.read().await;
        if let Err(e) = self.flush_state_of(&st) {
            tracing::warn!(name = %self.name, error = %e, "Final state flush failed");
        }
        tracing::info!(name = %self.name, "Server stopped");
    }

    async fn follower_loop(&self) {
        loop {
            let hb = {
                let st = self.shared.read().await;
                if st.role != Role::Follower {
                    return;
                }
                st.heartbeat_interval_ms
            };
            tokio::select! {
                _ = sleep(Duration::from_millis(hb as u64)) => {
                    let mut st = self.shared.write().await;
                    if st.role != Role::Follower {
                        return;
                    }
                    if now_ms() - st.leader_accept_time > 2 * st.heartbeat_interval_ms {
                        st.current_term += 1;
                        st.role = Role::Candidate;
                        tracing::info!(
                            name = %st.name,
                            term = st.current_term,
                            "Leader silent, standing for election"
                        );
                        return;
                    }
                    if let Err(e) = self.flush_state_of(&st) {
                        tracing::error!(name = %st.name, error = %e, "State flush failed, stopping");
                        st.role = Role::Stopped;
                        return;
                    }
                }
                _ = self.stopped.cancelled() => {
                    self.shared.write().await.role = Role::Stopped;
                    return;
                }
            }
        }
    }

    async fn candidate_loop(&self) {
        loop {
            {
                let st = self.shared.read().await;
                if st.role != Role::Candidate {
                    return;
                }
            }
            tokio::select! {
                _ = sleep(random_election_timeout()) => {
                    let round = {
                        let mut st = self.shared.write().await;
                        if st.role != Role::Candidate {
                            return;
                        }
                        st.bump_term_for_vote();
                        st.vote_for_self();
                        election::begin_vote_round(&mut st)
                    };
                    tracing::info!(name = %self.name, term = round.term, "Soliciting votes");

                    let responses = self.solicit_votes(&round).await;

                    let mut st = self.shared.write().await;
                    if st.role != Role::Candidate || st.current_term != round.term {
                        return;
                    }
                    for (host, resp) in &responses {
                        if election::record_vote_response(&mut st, host, resp) {
                            return;
                        }
                    }
                    if st.vote_granted_num >= st.quorum_size() {
                        st.role = Role::Leader;
                        st.current_leader = st.conf.host.clone();
                        tracing::info!(
                            name = %st.name,
                            term = st.current_term,
                            votes = st.vote_granted_num,
                            "Won election"
                        );
                        return;
                    }
                    // quorum missed; loop rearms with a fresh random draw
                }
                _ = self.stopped.cancelled() => {
                    self.shared.write().await.role = Role::Stopped;
                    return;
                }
            }
        }
    }

    async fn leader_loop(&self) {
        // assert leadership: replicate a no-op entry and try to commit it
        let round = {
            let mut st = self.shared.write().await;
            if st.role != Role::Leader {
                return;
            }
            match replication::begin_leader_round(&mut st) {
                Ok(round) => round,
                Err(e) => {
                    tracing::error!(name = %st.name, error = %e, "No-op append failed, stopping");
                    st.role = Role::Stopped;
                    return;
                }
            }
        };
        tracing::info!(name = %self.name, term = round.term, "Became leader, replicating no-op entry");

        let (acks, max_term) = self.drive_append_round(&round).await;
        {
            let mut st = self.shared.write().await;
            if st.role != Role::Leader {
                return;
            }
            if max_term > st.current_term {
                st.become_follower(max_term);
                return;
            }
            st.append_entry_resp_cnt += acks;
            if st.append_entry_resp_cnt >= st.quorum_size() {
                let (last_index, _) = st.log.last_log_info();
                st.log.update_commit_index(last_index);
                if let Err(e) = self.flush_state_of(&st) {
                    tracing::error!(name = %st.name, error = %e, "State flush failed, stopping");
                    st.role = Role::Stopped;
                    return;
                }
                tracing::info!(
                    name = %st.name,
                    index = last_index,
                    term = st.current_term,
                    "Committed log entry"
                );
            }
        }

        loop {
            let hb = {
                let st = self.shared.read().await;
                if st.role != Role::Leader {
                    return;
                }
                st.heartbeat_interval_ms
            };
            tokio::select! {
                _ = sleep(Duration::from_millis(hb as u64)) => {
                    let round = {
                        let mut st = self.shared.write().await;
                        if st.role != Role::Leader {
                            return;
                        }
                        if now_ms() - st.leader_accept_time <= st.heartbeat_interval_ms {
                            continue;
                        }
                        replication::begin_heartbeat_round(&mut st)
                    };

                    let (acks, max_term) = self.drive_append_round(&round).await;

                    let mut st = self.shared.write().await;
                    if st.role != Role::Leader {
                        return;
                    }
                    if max_term > st.current_term {
                        st.become_follower(max_term);
                        return;
                    }
                    st.append_entry_resp_cnt += acks;
                    if st.append_entry_resp_cnt < st.quorum_size() {
                        tracing::warn!(
                            name = %st.name,
                            acks = st.append_entry_resp_cnt,
                            quorum = st.quorum_size(),
                            "Heartbeat quorum lost, stepping down"
                        );
                        st.role = Role::Candidate;
                        return;
                    }
                }
                _ = self.stopped.cancelled() => {
                    self.shared.write().await.role = Role::Stopped;
                    return;
                }
            }
        }
    }

    /// Fan one RequestVote out to every peer in the round concurrently.
    async fn solicit_votes(&self, round: &election::VoteRound) -> Vec<(String, VoteResponse)> {
        let calls = round.peer_hosts.iter().cloned().map(|host| {
            let transport = Arc::clone(&self.transport);
            let req = round.request.clone();
            async move {
                match timeout(RPC_TIMEOUT, transport.request_vote(&host, req)).await {
                    Ok(Ok(resp)) => Some((host, resp)),
                    Ok(Err(e)) => {
                        tracing::debug!(peer = %host, error = %e, "RequestVote failed");
                        None
                    }
                    Err(_) => {
                        tracing::debug!(peer = %host, "RequestVote timed out");
                        None
                    }
                }
            }
        });
        join_all(calls).await.into_iter().flatten().collect()
    }

    /// Fan one AppendEntries round out to every peer concurrently. A peer
    /// that rejects gets a single catch-up retry anchored at the tail it
    /// reported. Returns the acknowledgment count and the highest term
    /// seen, so the caller can step down under one lock acquisition.
    async fn drive_append_round(&self, round: &AppendRound) -> (usize, u64) {
        let calls = round.peer_hosts.iter().cloned().map(|host| {
            let transport = Arc::clone(&self.transport);
            let shared = Arc::clone(&self.shared);
            let req = round.request.clone();
            async move {
                let resp = match timeout(RPC_TIMEOUT, transport.append_entries(&host, req)).await {
                    Ok(Ok(resp)) => resp,
                    Ok(Err(e)) => {
                        tracing::trace!(peer = %host, error = %e, "AppendEntries failed");
                        return (0usize, 0u64);
                    }
                    Err(_) => {
                        tracing::trace!(peer = %host, "AppendEntries timed out");
                        return (0, 0);
                    }
                };
                if resp.success {
                    return (1, resp.term);
                }

                let retry = {
                    let st = shared.read().await;
                    replication::catch_up_request(&st, &resp)
                };
                tracing::debug!(
                    peer = %host,
                    from_index = resp.index,
                    entries = retry.entries.len(),
                    "Append rejected, resending from peer tail"
                );
                match timeout(RPC_TIMEOUT, transport.append_entries(&host, retry)).await {
                    Ok(Ok(r2)) if r2.success => (1, resp.term.max(r2.term)),
                    Ok(Ok(r2)) => (0, resp.term.max(r2.term)),
                    Ok(Err(e)) => {
                        tracing::trace!(peer = %host, error = %e, "Catch-up append failed");
                        (0, resp.term)
                    }
                    Err(_) => {
                        tracing::trace!(peer = %host, "Catch-up append timed out");
                        (0, resp.term)
                    }
                }
            }
        });
        join_all(calls)
            .await
            .into_iter()
            .fold((0, 0), |(acks, max_term), (a, t)| {
                (acks + a, max_term.max(t))
            })
    }

    fn flush_state_of(&self, st: &ServerState) -> Result<()> {
        StateFile::new(&self.path)
            .save(&PersistedState {
                current_term: st.current_term,
                voted_for_term: st.voted_for_term,
                commit_index: st.log.commit_index(),
            })
            .map_err(RegistryError::Storage)
    }
}

fn make_private_dir(path: &Path) -> Result<()> {
    match std::fs::DirBuilder::new().mode(0o700).create(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(RegistryError::Storage(e)),
    }
}
