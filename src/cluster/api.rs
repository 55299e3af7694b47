//! Capability traits for the collaborators the harness drives: the admin
//! control plane, the cluster-state observer, per-node clients, node process
//! control and the storage layer's metadata service.
//!
//! Every trait is `Send + Sync` so a [`ClusterContext`] can be shared with the
//! deferred safe-mode task. Implementations exist per target platform; the
//! crate ships an in-memory one in [`crate::cluster::sim`].

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::Result;

/// Identifies one cluster node process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Shard identifier, `shard<N>` with `N` starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(String);

impl ShardId {
    /// The shard at 1-based position `n`.
    #[must_use]
    pub fn nth(n: u32) -> Self {
        Self(format!("shard{n}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Admin control-plane request (`/admin/collections`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum AdminRequest {
    Create {
        name: String,
        #[serde(rename = "numShards")]
        num_shards: u32,
        #[serde(rename = "replicationFactor")]
        replication_factor: u32,
        #[serde(rename = "maxShardsPerNode")]
        max_shards_per_node: u32,
    },
    Delete {
        name: String,
    },
    /// Cluster-wide auto soft commit interval; `None` disables it.
    #[serde(rename = "SETAUTOSOFTCOMMIT")]
    SetAutoSoftCommit {
        #[serde(rename = "maxTime")]
        max_time_ms: Option<u64>,
    },
}

/// Replica lifecycle state as published in cluster state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Active,
    Recovering,
    Down,
    RecoveryFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    /// Core node name, e.g. `core_node3`.
    pub name: String,
    pub node: NodeId,
    pub status: ReplicaStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardState {
    pub id: ShardId,
    pub replicas: Vec<ReplicaState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    pub name: String,
    pub shards: Vec<ShardState>,
}

/// Resolved shard leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderRef {
    pub shard: ShardId,
    pub replica: String,
    pub node: NodeId,
}

/// Commit variants the indexing agent picks between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitVariant {
    /// Server-default hard commit.
    Plain,
    /// Commit with every flag spelled out.
    Flagged {
        wait_flush: bool,
        wait_searcher: bool,
        soft_commit: bool,
    },
}

impl CommitVariant {
    /// The flagged variant with all three flags set.
    #[must_use]
    pub const fn all_flags() -> Self {
        Self::Flagged {
            wait_flush: true,
            wait_searcher: true,
            soft_commit: true,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Flagged { .. } => "flagged",
        }
    }
}

/// A document to index: a flat field map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document(Map<String, Value>);

impl Document {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// The numeric `id` field, when present.
    pub fn id(&self) -> Option<u64> {
        self.get("id").and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub num_found: u64,
}

/// Match-all query string.
pub const MATCH_ALL: &str = "*:*";

/// Collection-level client (routes through cluster state to the right shards).
pub trait CloudClient: Send + Sync {
    /// Submit an admin request. Acceptance is synchronous; convergence is not.
    fn request(&self, request: &AdminRequest) -> Result<()>;
    fn delete_by_query(&self, collection: &str, query: &str) -> Result<()>;
    fn commit(&self, collection: &str) -> Result<()>;
    fn query(&self, collection: &str, query: &str) -> Result<QueryResponse>;
}

/// Read side of the coordination service.
pub trait ClusterStateReader: Send + Sync {
    fn collection_state(&self, collection: &str) -> Result<Option<CollectionState>>;

    fn has_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.collection_state(collection)?.is_some())
    }

    /// Current leader of `shard`, if one is resolvable right now.
    fn leader(&self, collection: &str, shard: &ShardId) -> Result<Option<LeaderRef>>;

    /// Drop any locally cached state for `collection`.
    fn force_refresh(&self, collection: &str) -> Result<()>;
}

/// Direct client for one node's local cores.
pub trait NodeClient: Send + Sync {
    fn node(&self) -> NodeId;
    fn base_url(&self) -> String;
    fn set_connect_timeout(&self, timeout: Duration);
    fn add(&self, collection: &str, doc: Document) -> Result<()>;
    fn commit(&self, collection: &str, variant: CommitVariant) -> Result<()>;
    /// `/admin/system` response for the node's core of `collection`.
    fn system_status(&self, collection: &str) -> Result<Value>;
}

/// Node process control (process supervisor, container runtime, ...).
pub trait NodeController: Send + Sync {
    fn stop(&self, node: NodeId) -> Result<()>;
    fn start(&self, node: NodeId) -> Result<()>;
}

/// Client settings for opening a storage handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageClientConfig {
    pub uri: String,
    /// Bypass the process-wide handle cache.
    pub disable_cache: bool,
}

impl StorageClientConfig {
    #[must_use]
    pub fn uncached(mut self) -> Self {
        self.disable_cache = true;
        self
    }
}

/// Metadata service of the backing storage layer.
pub trait StorageController: Send + Sync {
    fn enter_safe_mode(&self, force: bool) -> Result<()>;
    fn leave_safe_mode(&self) -> Result<()>;
    fn is_in_safe_mode(&self) -> Result<bool>;
    fn client_config(&self) -> StorageClientConfig;
    fn open(&self, config: &StorageClientConfig) -> Result<Box<dyn StorageHandle>>;
}

/// An open filesystem handle.
pub trait StorageHandle: Send {
    fn exists(&self, path: &str) -> Result<bool>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// Everything a scenario needs, built once by the caller and torn down by it.
#[derive(Clone)]
pub struct ClusterContext {
    pub cloud: Arc<dyn CloudClient>,
    pub state: Arc<dyn ClusterStateReader>,
    pub nodes: Vec<Arc<dyn NodeClient>>,
    pub controller: Arc<dyn NodeController>,
    pub storage: Arc<dyn StorageController>,
}

impl fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field(
                "nodes",
                &self.nodes.iter().map(|n| n.base_url()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
