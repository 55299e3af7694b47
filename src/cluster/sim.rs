//! In-memory cluster: admin plane, cluster state, node clients, node control
//! and a storage namespace with safe mode, all behind one lock.
//!
//! Time advances lazily. Every call first settles whatever transitions are due
//! at `Instant::now()` (replica recoveries, pending deletes, auto soft
//! commits), so waits observe the same eventual-consistency shape a real
//! cluster shows without any background thread.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::cluster::api::{
    AdminRequest, CloudClient, ClusterContext, ClusterStateReader, CollectionState, CommitVariant,
    Document, LeaderRef, MATCH_ALL, NodeClient, NodeController, NodeId, QueryResponse,
    ReplicaState, ReplicaStatus, ShardId, ShardState, StorageClientConfig, StorageController,
    StorageHandle,
};
use crate::core::config::SimConfig;
use crate::core::errors::{Result, StressError};

/// Upper bound on transitions settled for one replica in a single tick.
const MAX_STEPS_PER_TICK: usize = 16;

/// Injected misbehavior for negative tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimFaults {
    /// Delete converges in cluster state but leaves data directories behind.
    pub leak_data_dirs: bool,
    /// Delete is accepted but the collection never leaves cluster state.
    pub stuck_delete: bool,
    /// Delete-by-query is accepted and silently dropped.
    pub ignore_delete_by_query: bool,
    /// System status omits `core.directory.data`.
    pub omit_data_dir_field: bool,
    /// Recovery after a restart never succeeds.
    pub fail_recovery_permanently: bool,
}

// ──── state ────

#[derive(Debug)]
struct SimReplica {
    core: String,
    node: NodeId,
    data_dir: String,
    status: ReplicaStatus,
    next_transition: Option<Instant>,
}

#[derive(Debug)]
struct SimShard {
    id: ShardId,
    replicas: Vec<SimReplica>,
    visible: BTreeSet<u64>,
    pending: BTreeSet<u64>,
}

#[derive(Debug)]
struct SimCollection {
    shards: Vec<SimShard>,
    deleting_since: Option<Instant>,
    pending_since: Option<Instant>,
    clear_on_commit: bool,
}

impl SimCollection {
    fn data_dirs(&self) -> impl Iterator<Item = &str> {
        self.shards
            .iter()
            .flat_map(|s| s.replicas.iter().map(|r| r.data_dir.as_str()))
    }

    fn apply_commit(&mut self) {
        let clear = std::mem::take(&mut self.clear_on_commit);
        for shard in &mut self.shards {
            if clear {
                shard.visible.clear();
            }
            let pending = std::mem::take(&mut shard.pending);
            shard.visible.extend(pending);
        }
        self.pending_since = None;
    }

    fn visible_count(&self) -> u64 {
        self.shards.iter().map(|s| s.visible.len() as u64).sum()
    }
}

#[derive(Debug, Default)]
struct SimStorage {
    dirs: BTreeSet<String>,
    safe_mode: bool,
    cached: Option<Arc<BTreeSet<String>>>,
    open_handles: usize,
}

#[derive(Debug)]
struct SimState {
    nodes_up: Vec<bool>,
    collections: BTreeMap<String, SimCollection>,
    storage: SimStorage,
    auto_soft_commit: Option<Duration>,
    next_core: u64,
    faults: SimFaults,
}

#[derive(Debug)]
struct Shared {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl Shared {
    fn recovery_delay(&self) -> Duration {
        Duration::from_millis(self.config.recovery_delay_ms)
    }

    fn recovery_retry(&self) -> Duration {
        Duration::from_millis(self.config.recovery_retry_ms)
    }

    fn delete_delay(&self) -> Duration {
        Duration::from_millis(self.config.delete_delay_ms)
    }

    /// Lock the state and settle every transition due at `now`.
    fn settled(&self) -> parking_lot::MutexGuard<'_, SimState> {
        let mut state = self.state.lock();
        self.tick(&mut state, Instant::now());
        state
    }

    fn tick(&self, state: &mut SimState, now: Instant) {
        let faults = state.faults;
        let safe_mode = state.storage.safe_mode;

        let finished: Vec<String> = state
            .collections
            .iter()
            .filter(|(_, c)| {
                !faults.stuck_delete
                    && c.deleting_since
                        .is_some_and(|since| since + self.delete_delay() <= now)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in finished {
            if let Some(coll) = state.collections.remove(&name)
                && !(safe_mode || faults.leak_data_dirs)
            {
                for dir in coll.data_dirs() {
                    state.storage.dirs.remove(dir);
                }
            }
        }

        let auto_soft_commit = state.auto_soft_commit;
        for coll in state.collections.values_mut() {
            if let (Some(interval), Some(since)) = (auto_soft_commit, coll.pending_since)
                && since + interval <= now
            {
                coll.apply_commit();
            }
            for replica in coll.shards.iter_mut().flat_map(|s| s.replicas.iter_mut()) {
                if !state.nodes_up.get(replica.node.0).copied().unwrap_or(false) {
                    continue;
                }
                self.advance_replica(replica, now, safe_mode, faults);
            }
        }
    }

    fn advance_replica(
        &self,
        replica: &mut SimReplica,
        now: Instant,
        safe_mode: bool,
        faults: SimFaults,
    ) {
        for _ in 0..MAX_STEPS_PER_TICK {
            let Some(at) = replica.next_transition.filter(|at| *at <= now) else {
                return;
            };
            match replica.status {
                ReplicaStatus::Recovering if safe_mode || faults.fail_recovery_permanently => {
                    replica.status = ReplicaStatus::RecoveryFailed;
                    replica.next_transition = Some(at + self.recovery_retry());
                }
                ReplicaStatus::Recovering => {
                    replica.status = ReplicaStatus::Active;
                    replica.next_transition = None;
                }
                ReplicaStatus::RecoveryFailed => {
                    replica.status = ReplicaStatus::Recovering;
                    replica.next_transition = Some(at + self.recovery_delay());
                }
                ReplicaStatus::Active | ReplicaStatus::Down => {
                    replica.next_transition = None;
                }
            }
        }
    }

    fn live_nodes(state: &SimState) -> Vec<NodeId> {
        state
            .nodes_up
            .iter()
            .enumerate()
            .filter(|(_, up)| **up)
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    fn data_dir(&self, collection: &str, core: &str) -> String {
        format!(
            "{}{}/{collection}/{core}/data",
            self.config.storage_uri,
            self.config.data_root.trim_end_matches('/')
        )
    }
}

fn transport(endpoint: &str, details: impl Into<String>) -> StressError {
    StressError::transport(endpoint, details)
}

fn collection_mut<'a>(
    state: &'a mut SimState,
    endpoint: &str,
    name: &str,
) -> Result<&'a mut SimCollection> {
    state
        .collections
        .get_mut(name)
        .ok_or_else(|| transport(endpoint, format!("collection not found: {name}")))
}

// ──── cluster ────

/// Cloneable handle to one simulated cluster.
#[derive(Debug, Clone)]
pub struct SimCluster {
    shared: Arc<Shared>,
}

impl SimCluster {
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        Self::with_faults(config, SimFaults::default())
    }

    #[must_use]
    pub fn with_faults(config: SimConfig, faults: SimFaults) -> Self {
        let state = SimState {
            nodes_up: vec![true; config.node_count],
            collections: BTreeMap::new(),
            storage: SimStorage::default(),
            auto_soft_commit: None,
            next_core: 1,
            faults,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Wire every capability of this cluster into a scenario context.
    #[must_use]
    pub fn context(&self) -> ClusterContext {
        let nodes = (0..self.shared.config.node_count)
            .map(|i| {
                Arc::new(SimNodeClient {
                    shared: Arc::clone(&self.shared),
                    node: NodeId(i),
                }) as Arc<dyn NodeClient>
            })
            .collect();
        ClusterContext {
            cloud: Arc::new(self.clone()),
            state: Arc::new(self.clone()),
            nodes,
            controller: Arc::new(self.clone()),
            storage: Arc::new(self.clone()),
        }
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.shared.state.lock().faults = faults;
    }

    /// Directories currently present in the storage namespace.
    pub fn storage_directories(&self) -> Vec<String> {
        self.shared.settled().storage.dirs.iter().cloned().collect()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.shared.settled().collections.keys().cloned().collect()
    }

    pub fn is_node_up(&self, node: NodeId) -> bool {
        self.shared
            .state
            .lock()
            .nodes_up
            .get(node.0)
            .copied()
            .unwrap_or(false)
    }

    pub fn safe_mode(&self) -> bool {
        self.shared.state.lock().storage.safe_mode
    }

    pub fn auto_soft_commit(&self) -> Option<Duration> {
        self.shared.state.lock().auto_soft_commit
    }

    /// Storage handles opened and not yet closed.
    pub fn open_storage_handles(&self) -> usize {
        self.shared.state.lock().storage.open_handles
    }

    fn create(
        &self,
        name: &str,
        num_shards: u32,
        replication_factor: u32,
        max_shards_per_node: u32,
    ) -> Result<()> {
        let endpoint = "/admin/collections?action=CREATE";
        let mut state = self.shared.settled();
        if state.collections.contains_key(name) {
            return Err(transport(endpoint, format!("collection already exists: {name}")));
        }
        if state.storage.safe_mode {
            return Err(transport(
                endpoint,
                "cannot create data directories: storage is in safe mode",
            ));
        }
        if num_shards == 0 || replication_factor == 0 {
            return Err(transport(endpoint, "numShards and replicationFactor must be >= 1"));
        }
        let live = Shared::live_nodes(&state);
        let wanted = u64::from(num_shards) * u64::from(replication_factor);
        let capacity = live.len() as u64 * u64::from(max_shards_per_node);
        if wanted > capacity {
            return Err(transport(
                endpoint,
                format!(
                    "cannot place {wanted} replicas on {} live nodes with maxShardsPerNode={max_shards_per_node}",
                    live.len()
                ),
            ));
        }

        let now = Instant::now();
        let mut load: BTreeMap<NodeId, u32> = live.iter().map(|n| (*n, 0)).collect();
        let mut shards = Vec::with_capacity(num_shards as usize);
        for n in 1..=num_shards {
            let mut replicas: Vec<SimReplica> = Vec::new();
            for _ in 0..replication_factor {
                let node = pick_node(&load, max_shards_per_node, &replicas).ok_or_else(|| {
                    transport(endpoint, format!("no node has room for a replica of shard{n}"))
                })?;
                *load.entry(node).or_default() += 1;
                let core = format!("core_node{}", state.next_core);
                state.next_core += 1;
                let data_dir = self.shared.data_dir(name, &core);
                state.storage.dirs.insert(data_dir.clone());
                replicas.push(SimReplica {
                    core,
                    node,
                    data_dir,
                    status: ReplicaStatus::Recovering,
                    next_transition: Some(now + self.shared.recovery_delay()),
                });
            }
            shards.push(SimShard {
                id: ShardId::nth(n),
                replicas,
                visible: BTreeSet::new(),
                pending: BTreeSet::new(),
            });
        }

        state.collections.insert(
            name.to_string(),
            SimCollection {
                shards,
                deleting_since: None,
                pending_since: None,
                clear_on_commit: false,
            },
        );
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut state = self.shared.settled();
        let coll = collection_mut(&mut state, "/admin/collections?action=DELETE", name)?;
        if coll.deleting_since.is_none() {
            coll.deleting_since = Some(Instant::now());
        }
        Ok(())
    }

    fn require_live_node(state: &SimState, endpoint: &str) -> Result<()> {
        if state.nodes_up.iter().any(|up| *up) {
            Ok(())
        } else {
            Err(transport(endpoint, "no live nodes"))
        }
    }
}

/// Least-loaded live node with room, preferring one without a copy of this shard.
fn pick_node(load: &BTreeMap<NodeId, u32>, cap: u32, placed: &[SimReplica]) -> Option<NodeId> {
    let has_room = |(_, used): &(&NodeId, &u32)| **used < cap;
    let fresh = load
        .iter()
        .filter(has_room)
        .filter(|(node, _)| placed.iter().all(|r| r.node != **node))
        .min_by_key(|(node, used)| (**used, **node))
        .map(|(node, _)| *node);
    fresh.or_else(|| {
        load.iter()
            .filter(has_room)
            .min_by_key(|(node, used)| (**used, **node))
            .map(|(node, _)| *node)
    })
}

impl CloudClient for SimCluster {
    fn request(&self, request: &AdminRequest) -> Result<()> {
        match request {
            AdminRequest::Create {
                name,
                num_shards,
                replication_factor,
                max_shards_per_node,
            } => self.create(name, *num_shards, *replication_factor, *max_shards_per_node),
            AdminRequest::Delete { name } => self.delete(name),
            AdminRequest::SetAutoSoftCommit { max_time_ms } => {
                self.shared.settled().auto_soft_commit = max_time_ms.map(Duration::from_millis);
                Ok(())
            }
        }
    }

    fn delete_by_query(&self, collection: &str, query: &str) -> Result<()> {
        let endpoint = format!("/{collection}/update");
        let mut state = self.shared.settled();
        Self::require_live_node(&state, &endpoint)?;
        if query != MATCH_ALL {
            return Err(transport(&endpoint, format!("unsupported query: {query}")));
        }
        let ignore = state.faults.ignore_delete_by_query;
        let coll = collection_mut(&mut state, &endpoint, collection)?;
        if !ignore {
            for shard in &mut coll.shards {
                shard.pending.clear();
            }
            coll.clear_on_commit = true;
        }
        Ok(())
    }

    fn commit(&self, collection: &str) -> Result<()> {
        let endpoint = format!("/{collection}/update?commit=true");
        let mut state = self.shared.settled();
        Self::require_live_node(&state, &endpoint)?;
        collection_mut(&mut state, &endpoint, collection)?.apply_commit();
        Ok(())
    }

    fn query(&self, collection: &str, query: &str) -> Result<QueryResponse> {
        let endpoint = format!("/{collection}/select");
        let mut state = self.shared.settled();
        Self::require_live_node(&state, &endpoint)?;
        if query != MATCH_ALL {
            return Err(transport(&endpoint, format!("unsupported query: {query}")));
        }
        let coll = collection_mut(&mut state, &endpoint, collection)?;
        Ok(QueryResponse {
            num_found: coll.visible_count(),
        })
    }
}

impl ClusterStateReader for SimCluster {
    fn collection_state(&self, collection: &str) -> Result<Option<CollectionState>> {
        let state = self.shared.settled();
        Ok(state.collections.get(collection).map(|coll| CollectionState {
            name: collection.to_string(),
            shards: coll
                .shards
                .iter()
                .map(|shard| ShardState {
                    id: shard.id.clone(),
                    replicas: shard
                        .replicas
                        .iter()
                        .map(|r| ReplicaState {
                            name: r.core.clone(),
                            node: r.node,
                            status: r.status,
                        })
                        .collect(),
                })
                .collect(),
        }))
    }

    fn leader(&self, collection: &str, shard: &ShardId) -> Result<Option<LeaderRef>> {
        let state = self.shared.settled();
        Ok(state
            .collections
            .get(collection)
            .and_then(|coll| coll.shards.iter().find(|s| &s.id == shard))
            .and_then(|s| {
                s.replicas
                    .iter()
                    .find(|r| r.status == ReplicaStatus::Active)
                    .map(|r| LeaderRef {
                        shard: s.id.clone(),
                        replica: r.core.clone(),
                        node: r.node,
                    })
            }))
    }

    fn force_refresh(&self, _collection: &str) -> Result<()> {
        drop(self.shared.settled());
        Ok(())
    }
}

impl NodeController for SimCluster {
    fn stop(&self, node: NodeId) -> Result<()> {
        let mut state = self.shared.settled();
        let Some(up) = state.nodes_up.get_mut(node.0) else {
            return Err(transport(&node.to_string(), "unknown node"));
        };
        *up = false;
        for replica in state
            .collections
            .values_mut()
            .flat_map(|c| c.shards.iter_mut())
            .flat_map(|s| s.replicas.iter_mut())
            .filter(|r| r.node == node)
        {
            replica.status = ReplicaStatus::Down;
            replica.next_transition = None;
        }
        Ok(())
    }

    fn start(&self, node: NodeId) -> Result<()> {
        let mut state = self.shared.settled();
        let Some(up) = state.nodes_up.get_mut(node.0) else {
            return Err(transport(&node.to_string(), "unknown node"));
        };
        if *up {
            return Ok(());
        }
        *up = true;
        let due = Instant::now() + self.shared.recovery_delay();
        for replica in state
            .collections
            .values_mut()
            .flat_map(|c| c.shards.iter_mut())
            .flat_map(|s| s.replicas.iter_mut())
            .filter(|r| r.node == node)
        {
            replica.status = ReplicaStatus::Recovering;
            replica.next_transition = Some(due);
        }
        Ok(())
    }
}

impl StorageController for SimCluster {
    fn enter_safe_mode(&self, _force: bool) -> Result<()> {
        self.shared.settled().storage.safe_mode = true;
        Ok(())
    }

    fn leave_safe_mode(&self) -> Result<()> {
        self.shared.settled().storage.safe_mode = false;
        Ok(())
    }

    fn is_in_safe_mode(&self) -> Result<bool> {
        Ok(self.shared.state.lock().storage.safe_mode)
    }

    fn client_config(&self) -> StorageClientConfig {
        StorageClientConfig {
            uri: self.shared.config.storage_uri.clone(),
            disable_cache: false,
        }
    }

    fn open(&self, config: &StorageClientConfig) -> Result<Box<dyn StorageHandle>> {
        if config.uri != self.shared.config.storage_uri {
            return Err(StressError::StorageUnavailable {
                details: format!("unknown filesystem uri: {}", config.uri),
            });
        }
        let mut state = self.shared.settled();
        let storage = &mut state.storage;
        storage.open_handles += 1;
        let view = if config.disable_cache {
            StorageView::Live
        } else {
            let snapshot = storage
                .cached
                .get_or_insert_with(|| Arc::new(storage.dirs.clone()));
            StorageView::Cached(Arc::clone(snapshot))
        };
        Ok(Box::new(SimStorageHandle {
            shared: Arc::clone(&self.shared),
            view,
        }))
    }
}

// ──── storage handles ────

#[derive(Debug)]
enum StorageView {
    Live,
    /// Namespace as it was when the process-wide cached client was first opened.
    Cached(Arc<BTreeSet<String>>),
}

#[derive(Debug)]
struct SimStorageHandle {
    shared: Arc<Shared>,
    view: StorageView,
}

impl StorageHandle for SimStorageHandle {
    fn exists(&self, path: &str) -> Result<bool> {
        match &self.view {
            StorageView::Cached(snapshot) => Ok(snapshot.contains(path)),
            StorageView::Live => Ok(self.shared.settled().storage.dirs.contains(path)),
        }
    }

    fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.storage.open_handles = state.storage.open_handles.saturating_sub(1);
        Ok(())
    }
}

// ──── node clients ────

/// Client bound to one simulated node.
#[derive(Debug)]
pub struct SimNodeClient {
    shared: Arc<Shared>,
    node: NodeId,
}

impl SimNodeClient {
    fn require_up(&self, state: &SimState) -> Result<()> {
        if state.nodes_up.get(self.node.0).copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(transport(&self.base_url(), "connection refused"))
        }
    }
}

impl NodeClient for SimNodeClient {
    fn node(&self) -> NodeId {
        self.node
    }

    fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}/solr", 8983 + self.node.0)
    }

    // In-process calls never block on a connection.
    fn set_connect_timeout(&self, _timeout: Duration) {}

    fn add(&self, collection: &str, doc: Document) -> Result<()> {
        let endpoint = format!("{}/{collection}/update", self.base_url());
        let mut state = self.shared.settled();
        self.require_up(&state)?;
        let id = doc
            .id()
            .ok_or_else(|| transport(&endpoint, "document is missing uniqueKey field id"))?;
        let coll = collection_mut(&mut state, &endpoint, collection)?;
        let shard_count = coll.shards.len() as u64;
        let Some(shard) = id
            .checked_rem(shard_count)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| coll.shards.get_mut(i))
        else {
            return Err(transport(&endpoint, "collection has no shards"));
        };
        if !shard
            .replicas
            .iter()
            .any(|r| r.status == ReplicaStatus::Active)
        {
            return Err(transport(&endpoint, format!("no active leader for {}", shard.id)));
        }
        shard.pending.insert(id);
        coll.pending_since.get_or_insert_with(Instant::now);
        Ok(())
    }

    fn commit(&self, collection: &str, _variant: CommitVariant) -> Result<()> {
        let endpoint = format!("{}/{collection}/update?commit=true", self.base_url());
        let mut state = self.shared.settled();
        self.require_up(&state)?;
        collection_mut(&mut state, &endpoint, collection)?.apply_commit();
        Ok(())
    }

    fn system_status(&self, collection: &str) -> Result<Value> {
        let endpoint = format!("{}/{collection}/admin/system", self.base_url());
        let state = self.shared.settled();
        self.require_up(&state)?;
        let coll = state
            .collections
            .get(collection)
            .ok_or_else(|| transport(&endpoint, format!("collection not found: {collection}")))?;
        // A node without a local core proxies to an active replica elsewhere.
        let replicas = || coll.shards.iter().flat_map(|s| s.replicas.iter());
        let core = replicas()
            .find(|r| r.node == self.node)
            .or_else(|| replicas().find(|r| r.status == ReplicaStatus::Active))
            .ok_or_else(|| transport(&endpoint, "no core available to serve request"))?;

        let mut core_info = json!({ "name": core.core, "collection": collection });
        if !state.faults.omit_data_dir_field {
            core_info["directory"] = json!({ "data": core.data_dir });
        }
        Ok(json!({ "core": core_info, "node": self.node.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config(nodes: usize) -> SimConfig {
        SimConfig {
            node_count: nodes,
            recovery_delay_ms: 10,
            recovery_retry_ms: 10,
            delete_delay_ms: 10,
            ..SimConfig::default()
        }
    }

    fn create(ctx: &ClusterContext, name: &str, shards: u32, rf: u32, max: u32) -> Result<()> {
        ctx.cloud.request(&AdminRequest::Create {
            name: name.to_string(),
            num_shards: shards,
            replication_factor: rf,
            max_shards_per_node: max,
        })
    }

    fn wait_active(ctx: &ClusterContext, name: &str) {
        for _ in 0..200 {
            let state = ctx.state.collection_state(name).unwrap().unwrap();
            if state
                .shards
                .iter()
                .flat_map(|s| &s.replicas)
                .all(|r| r.status == ReplicaStatus::Active)
            {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("{name} never became active");
    }

    #[test]
    fn create_places_replicas_and_directories() {
        let sim = SimCluster::new(config(3));
        let ctx = sim.context();
        create(&ctx, "c1", 6, 1, 8).unwrap();
        let state = ctx.state.collection_state("c1").unwrap().unwrap();
        assert_eq!(state.shards.len(), 6);
        assert_eq!(state.shards[0].id, ShardId::nth(1));
        assert_eq!(sim.storage_directories().len(), 6);
        assert!(sim.storage_directories()[0].starts_with("hdfs://sim-namenode:8020/solr/c1/core_node"));
    }

    #[test]
    fn undersharded_replicas_land_on_distinct_nodes() {
        let sim = SimCluster::new(config(3));
        let ctx = sim.context();
        create(&ctx, "c1", 1, 2, 1).unwrap();
        let state = ctx.state.collection_state("c1").unwrap().unwrap();
        let nodes: BTreeSet<_> = state.shards[0].replicas.iter().map(|r| r.node).collect();
        assert_eq!(nodes.len(), 2);
    }

    #[test]
    fn create_rejects_over_capacity_and_duplicates() {
        let sim = SimCluster::new(config(2));
        let ctx = sim.context();
        let err = create(&ctx, "c1", 3, 1, 1).unwrap_err();
        assert_eq!(err.code(), "CST-4001");
        create(&ctx, "c1", 2, 1, 1).unwrap();
        assert!(create(&ctx, "c1", 2, 1, 1).is_err());
    }

    #[test]
    fn create_rejected_in_safe_mode() {
        let sim = SimCluster::new(config(1));
        let ctx = sim.context();
        ctx.storage.enter_safe_mode(true).unwrap();
        assert!(create(&ctx, "c1", 1, 1, 1).is_err());
    }

    #[test]
    fn replicas_recover_and_leaders_resolve() {
        let sim = SimCluster::new(config(2));
        let ctx = sim.context();
        create(&ctx, "c1", 2, 1, 8).unwrap();
        assert!(ctx.state.leader("c1", &ShardId::nth(1)).unwrap().is_none());
        wait_active(&ctx, "c1");
        let leader = ctx.state.leader("c1", &ShardId::nth(2)).unwrap().unwrap();
        assert_eq!(leader.shard, ShardId::nth(2));
    }

    #[test]
    fn documents_visible_only_after_commit() {
        let sim = SimCluster::new(config(2));
        let ctx = sim.context();
        create(&ctx, "c1", 2, 1, 8).unwrap();
        wait_active(&ctx, "c1");
        for id in 0..10_u64 {
            ctx.nodes[(id % 2) as usize]
                .add("c1", Document::new().field("id", id))
                .unwrap();
        }
        assert_eq!(ctx.cloud.query("c1", MATCH_ALL).unwrap().num_found, 0);
        ctx.nodes[0].commit("c1", CommitVariant::Plain).unwrap();
        assert_eq!(ctx.cloud.query("c1", MATCH_ALL).unwrap().num_found, 10);

        ctx.cloud.delete_by_query("c1", MATCH_ALL).unwrap();
        assert_eq!(ctx.cloud.query("c1", MATCH_ALL).unwrap().num_found, 10);
        ctx.cloud.commit("c1").unwrap();
        assert_eq!(ctx.cloud.query("c1", MATCH_ALL).unwrap().num_found, 0);
    }

    #[test]
    fn auto_soft_commit_publishes_pending_docs() {
        let sim = SimCluster::new(config(1));
        let ctx = sim.context();
        ctx.cloud
            .request(&AdminRequest::SetAutoSoftCommit {
                max_time_ms: Some(5),
            })
            .unwrap();
        assert_eq!(sim.auto_soft_commit(), Some(Duration::from_millis(5)));
        create(&ctx, "c1", 1, 1, 1).unwrap();
        wait_active(&ctx, "c1");
        ctx.nodes[0].add("c1", Document::new().field("id", 1_u64)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ctx.cloud.query("c1", MATCH_ALL).unwrap().num_found, 1);
    }

    #[test]
    fn system_status_exposes_data_dir() {
        let sim = SimCluster::new(config(3));
        let ctx = sim.context();
        create(&ctx, "c1", 1, 1, 1).unwrap();
        wait_active(&ctx, "c1");
        for node in &ctx.nodes {
            let status = node.system_status("c1").unwrap();
            let dir = status.pointer("/core/directory/data").and_then(Value::as_str);
            assert!(dir.is_some_and(|d| sim.storage_directories().iter().any(|s| s == d)));
        }
        sim.set_faults(SimFaults {
            omit_data_dir_field: true,
            ..SimFaults::default()
        });
        let status = ctx.nodes[0].system_status("c1").unwrap();
        assert!(status.pointer("/core/directory/data").is_none());
    }

    #[test]
    fn delete_removes_collection_and_directories_after_delay() {
        let sim = SimCluster::new(config(2));
        let ctx = sim.context();
        create(&ctx, "c1", 2, 1, 8).unwrap();
        ctx.cloud
            .request(&AdminRequest::Delete {
                name: "c1".to_string(),
            })
            .unwrap();
        assert!(ctx.state.has_collection("c1").unwrap());
        thread::sleep(Duration::from_millis(20));
        assert!(!ctx.state.has_collection("c1").unwrap());
        assert!(sim.storage_directories().is_empty());
    }

    #[test]
    fn leak_fault_keeps_directories() {
        let sim = SimCluster::with_faults(
            config(1),
            SimFaults {
                leak_data_dirs: true,
                ..SimFaults::default()
            },
        );
        let ctx = sim.context();
        create(&ctx, "c1", 1, 1, 1).unwrap();
        ctx.cloud
            .request(&AdminRequest::Delete {
                name: "c1".to_string(),
            })
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(sim.collection_names().is_empty());
        assert_eq!(sim.storage_directories().len(), 1);
    }

    #[test]
    fn stopped_node_refuses_requests_and_recovers_after_safe_mode() {
        let sim = SimCluster::new(config(1));
        let ctx = sim.context();
        create(&ctx, "c1", 1, 1, 1).unwrap();
        wait_active(&ctx, "c1");

        ctx.controller.stop(NodeId(0)).unwrap();
        assert!(!sim.is_node_up(NodeId(0)));
        assert!(ctx.nodes[0].system_status("c1").is_err());
        let status = |ctx: &ClusterContext| {
            ctx.state.collection_state("c1").unwrap().unwrap().shards[0].replicas[0].status
        };
        assert_eq!(status(&ctx), ReplicaStatus::Down);

        ctx.storage.enter_safe_mode(true).unwrap();
        ctx.controller.start(NodeId(0)).unwrap();
        thread::sleep(Duration::from_millis(15));
        assert_ne!(status(&ctx), ReplicaStatus::Active);

        ctx.storage.leave_safe_mode().unwrap();
        wait_active(&ctx, "c1");
    }

    #[test]
    fn cached_handles_see_stale_namespace() {
        let sim = SimCluster::new(config(1));
        let ctx = sim.context();
        create(&ctx, "c1", 1, 1, 1).unwrap();
        let dir = sim.storage_directories()[0].clone();

        let cached = ctx.storage.open(&ctx.storage.client_config()).unwrap();
        assert!(cached.exists(&dir).unwrap());

        ctx.cloud
            .request(&AdminRequest::Delete {
                name: "c1".to_string(),
            })
            .unwrap();
        thread::sleep(Duration::from_millis(20));

        let uncached = ctx
            .storage
            .open(&ctx.storage.client_config().uncached())
            .unwrap();
        assert!(!uncached.exists(&dir).unwrap());
        assert!(cached.exists(&dir).unwrap());
        assert_eq!(sim.open_storage_handles(), 2);
        uncached.close().unwrap();
        cached.close().unwrap();
        assert_eq!(sim.open_storage_handles(), 0);
    }

    #[test]
    fn open_rejects_unknown_uri() {
        let sim = SimCluster::new(config(1));
        let err = sim
            .open(&StorageClientConfig {
                uri: "hdfs://elsewhere:9000".to_string(),
                disable_cache: true,
            })
            .err()
            .unwrap();
        assert_eq!(err.code(), "CST-4002");
    }
}
