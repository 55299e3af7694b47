//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use collection_stress::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, StressError};
pub use crate::core::interrupt::InterruptFlag;

// Cluster
pub use crate::cluster::api::{
    ClusterContext, CloudClient, ClusterStateReader, NodeClient, NodeController, NodeId, ShardId,
    StorageController, StorageHandle,
};
pub use crate::cluster::driver::ClusterLifecycleDriver;
pub use crate::cluster::sim::{SimCluster, SimFaults};

// Scenario
pub use crate::scenario::chaos::{ChaosInjector, ChaosOutcome};
pub use crate::scenario::cleanup::CleanupVerifier;
pub use crate::scenario::indexing::{DataDirectory, IndexingAgent};
pub use crate::scenario::orchestrator::{ScenarioOrchestrator, ScenarioPlan, ScenarioReport};
pub use crate::scenario::schedule::{CancelOutcome, DeferredTask};
pub use crate::scenario::topology::{Topology, TopologyProfile, plan_topology};

// Logging
pub use crate::logger::activity::{ActivityLoggerHandle, ScenarioEvent, spawn_logger};
