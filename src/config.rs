use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// Default config filename under the server data directory.
pub const DEFAULT_CONF_NAME: &str = "raft.cfg";

fn default_heartbeat_interval_ms() -> i64 {
    1000
}

/// Cluster configuration for a single registry node.
///
/// `peer_hosts` lists every member of the cluster including this node's own
/// `host`; quorum arithmetic counts the node itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub candidate_name: String,
    /// host:port this node listens on, also its identity towards peers
    pub host: String,
    pub peer_hosts: Vec<String>,
    pub log_prefix: String,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            candidate_name: String::new(),
            host: String::new(),
            peer_hosts: Vec::new(),
            log_prefix: String::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl Config {
    pub fn new(candidate_name: &str, host: &str) -> Self {
        Self {
            candidate_name: candidate_name.to_string(),
            host: host.to_string(),
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, host: &str) -> Self {
        self.peer_hosts.push(host.to_string());
        self
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| RegistryError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let conf: Config = serde_json::from_str(&raw)?;
        Ok(conf)
    }
}
