#![forbid(unsafe_code)]

//! Collection stress harness.
//!
//! Proves that deleting a search-cluster collection releases every backing
//! storage directory it created, across randomized shard/replica topologies
//! and across a node restart racing a storage safe-mode transition.
//!
//! The harness consumes the cluster only through the capability traits in
//! [`cluster::api`]; [`cluster::sim::SimCluster`] implements all of them in
//! memory.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use collection_stress::prelude::*;
//!
//! let config = Config::default();
//! let sim = SimCluster::new(config.sim.clone());
//! let report = ScenarioOrchestrator::new(sim.context(), config, InterruptFlag::new(), None)
//!     .run()
//!     .expect("scenario should pass");
//! println!("seed {}", report.seed);
//! ```

pub mod prelude;

pub mod cluster;
pub mod core;
pub mod logger;
pub mod scenario;
