//! Node configuration.
//!
//! Loaded in layers with figment: compiled defaults, then a TOML file, then
//! `KS_`-prefixed environment variables (`KS_QUEUE__WORKERS=8`, double
//! underscore separates sections).

#![allow(clippy::result_large_err)] // figment::Error is external

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing directive, `RUST_LOG` takes precedence.
    pub log_level: String,
    /// Nameserver used for reverse lookups; system configuration when unset.
    pub dns_resolver: Option<SocketAddr>,
    pub http: HttpConfig,
    pub ipmi: IpmiConfig,
    pub queue: QueueConfig,
    pub rsview: RsviewConfig,
    pub raft: RaftConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dns_resolver: None,
            http: HttpConfig::default(),
            ipmi: IpmiConfig::default(),
            queue: QueueConfig::default(),
            rsview: RsviewConfig::default(),
            raft: RaftConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub listen: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// What host-create does when a host with the same hostname is already
/// registered under a different IPMI address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Fail the job with a terminal conflict error.
    #[default]
    Reject,
    /// Replace the stored IPMI address and creator.
    Overwrite,
    /// Keep the stored IPMI address, only refresh creator and timestamp.
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpmiConfig {
    pub cidr_block: IpNet,
    /// Domain every resolved IPMI name must end in; unchecked when empty.
    pub hostname_tld: String,
    pub conflict_policy: ConflictPolicy,
}

impl Default for IpmiConfig {
    fn default() -> Self {
        Self {
            cidr_block: IpNet::V4(ipnet::Ipv4Net::default()),
            hostname_tld: String::new(),
            conflict_policy: ConflictPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub workers: usize,
    pub worker_capacity: usize,
    pub queue_buffer: usize,
    pub max_job_fails: u32,
    pub retry_interval_ms: u64,
    /// Upper bound a blocked job waits for its sibling before re-checking.
    pub block_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            worker_capacity: 1,
            queue_buffer: 64,
            max_job_fails: 3,
            retry_interval_ms: 1000,
            block_timeout_ms: 5000,
        }
    }
}

impl QueueConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RsviewConfig {
    pub url: String,
    pub login: String,
    pub password: String,
    /// Marker that must appear on the page to prove the credentials work.
    pub test_string: String,
    pub timeout_ms: u64,
    /// Allow-listed VLAN ids.
    pub vlans: Vec<u32>,
    /// Allow-listed switch port name fragments.
    pub port_names: Vec<String>,
    /// Allow-listed switch name fragments.
    pub switch_names: Vec<String>,
}

impl Default for RsviewConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            login: String::new(),
            password: String::new(),
            test_string: String::new(),
            timeout_ms: 10_000,
            vlans: Vec::new(),
            port_names: Vec::new(),
            switch_names: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub id: u64,
    pub address: String, // host:port, hostnames are resolved at startup
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub node_id: u64,
    pub listen: SocketAddr,
    pub nodes: Vec<NodeAddress>,
    pub inmemory_store: bool,
    pub data_dir: PathBuf,
    pub snapshot_retain: usize,
    /// Applied entries kept in the log before a snapshot compacts them.
    pub snapshot_threshold: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub apply_timeout_ms: u64,
    pub skip_join_errors: bool,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            listen: SocketAddr::from(([127, 0, 0, 1], 50051)),
            nodes: vec![NodeAddress {
                id: 1,
                address: "127.0.0.1:50051".to_string(),
            }],
            inmemory_store: true,
            data_dir: PathBuf::from("data"),
            snapshot_retain: 2,
            snapshot_threshold: 1024,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            apply_timeout_ms: 5000,
            skip_join_errors: false,
        }
    }
}

impl RaftConfig {
    pub fn new(node_id: u64, listen: SocketAddr) -> Self {
        Self {
            node_id,
            listen,
            nodes: vec![NodeAddress {
                id: node_id,
                address: listen.to_string(),
            }],
            ..Default::default()
        }
    }

    pub fn with_node(mut self, id: u64, address: impl Into<String>) -> Self {
        self.nodes.push(NodeAddress {
            id,
            address: address.into(),
        });
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }
}

impl Config {
    /// Load defaults, then `path` (if it exists), then the environment.
    pub fn load(path: &Path) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("KS_").split("__"))
            .extract()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(content))
            .extract()
    }

    pub fn validate(&self) -> Result<(), Error> {
        let q = &self.queue;
        if q.workers == 0 {
            return Err(Error::Config("queue.workers must be at least 1".into()));
        }
        if q.worker_capacity == 0 || q.queue_buffer == 0 {
            return Err(Error::Config(
                "queue.worker_capacity and queue.queue_buffer must be at least 1".into(),
            ));
        }
        if q.max_job_fails == 0 {
            return Err(Error::Config("queue.max_job_fails must be at least 1".into()));
        }

        let r = &self.raft;
        if r.election_timeout_min_ms > r.election_timeout_max_ms {
            return Err(Error::Config(format!(
                "raft.election_timeout_min_ms ({}) exceeds raft.election_timeout_max_ms ({})",
                r.election_timeout_min_ms, r.election_timeout_max_ms
            )));
        }
        if r.heartbeat_interval_ms >= r.election_timeout_min_ms {
            return Err(Error::Config(
                "raft.heartbeat_interval_ms must be below raft.election_timeout_min_ms".into(),
            ));
        }
        if r.snapshot_retain == 0 {
            return Err(Error::Config("raft.snapshot_retain must be at least 1".into()));
        }
        if r.nodes.iter().all(|n| n.id != r.node_id) {
            return Err(Error::Config(format!(
                "raft.node_id {} is missing from raft.nodes",
                r.node_id
            )));
        }
        Ok(())
    }
}
