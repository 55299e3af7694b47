//! Scenario state machine:
//! `START -> (CREATE_INDEX_DELETE) x N -> [CHAOS_CYCLE] -> DONE`.
//!
//! Every random choice is drawn from one `StdRng` seeded from the configured
//! (or a freshly drawn) seed, so a failing run can be replayed exactly.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::cluster::api::{AdminRequest, ClusterContext, MATCH_ALL};
use crate::cluster::driver::{ClusterLifecycleDriver, elapsed_ms};
use crate::core::config::Config;
use crate::core::errors::{Result, StressError};
use crate::core::interrupt::InterruptFlag;
use crate::logger::activity::{ActivityLoggerHandle, ScenarioEvent, emit};
use crate::scenario::chaos::{ChaosInjector, ChaosOutcome};
use crate::scenario::cleanup::CleanupVerifier;
use crate::scenario::indexing::{IndexedBatch, IndexingAgent};
use crate::scenario::topology::{Topology, check_fits, random_topology};

/// Choices fixed at scenario start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioPlan {
    pub seed: u64,
    pub cycles: u32,
    pub chaos: bool,
    pub auto_soft_commit: bool,
    pub base_shard_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: u32,
    pub topology: Topology,
    pub batches: Vec<IndexedBatch>,
    pub docs_indexed: u64,
    pub delete_by_query: bool,
    /// Match-all count after the final commit, just before deletion.
    pub num_found: u64,
    pub directories_checked: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub seed: u64,
    pub config_hash: String,
    pub plan: ScenarioPlan,
    pub cycles: Vec<CycleReport>,
    pub chaos: Option<ChaosOutcome>,
    pub duration_ms: u64,
}

pub struct ScenarioOrchestrator {
    ctx: ClusterContext,
    config: Config,
    driver: ClusterLifecycleDriver,
    interrupt: InterruptFlag,
    logger: Option<ActivityLoggerHandle>,
    seed: u64,
}

impl ScenarioOrchestrator {
    /// The context is owned by the caller's lifecycle; the orchestrator only
    /// drives it and never tears it down.
    pub fn new(
        ctx: ClusterContext,
        config: Config,
        interrupt: InterruptFlag,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        let driver = ClusterLifecycleDriver::new(
            Arc::clone(&ctx.cloud),
            Arc::clone(&ctx.state),
            config.timeouts.clone(),
            interrupt.clone(),
            logger.clone(),
        );
        let seed = config.scenario.seed.unwrap_or_else(rand::random);
        Self {
            ctx,
            config,
            driver,
            interrupt,
            logger,
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw the per-scenario choices from `rng`.
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> ScenarioPlan {
        let s = &self.config.scenario;
        ScenarioPlan {
            seed: self.seed,
            cycles: rng.random_range(s.min_cycles..=s.max_cycles),
            chaos: rng.random_bool(s.chaos_probability),
            auto_soft_commit: rng.random_bool(s.auto_soft_commit_probability),
            base_shard_count: self.base_shard_count(),
        }
    }

    /// The configured base shard count, or the node count when unset.
    fn base_shard_count(&self) -> u32 {
        let node_count = u32::try_from(self.ctx.nodes.len()).unwrap_or(u32::MAX);
        self.config
            .scenario
            .base_shard_count
            .unwrap_or(node_count)
            .max(1)
    }

    /// Run the whole scenario. `Ok` means every assertion held.
    pub fn run(&self) -> Result<ScenarioReport> {
        self.config.validate()?;
        check_fits(self.base_shard_count(), self.ctx.nodes.len())?;
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let plan = self.plan(&mut rng);
        let config_hash = self.config.stable_hash()?;

        emit(
            self.logger.as_ref(),
            ScenarioEvent::ScenarioStarted {
                seed: plan.seed,
                cycles: plan.cycles,
                chaos: plan.chaos,
                config_hash: config_hash.clone(),
            },
        );

        let result = self.execute(&plan, &mut rng);
        let duration_ms = elapsed_ms(started);
        if let Err(err) = &result {
            emit(self.logger.as_ref(), ScenarioEvent::error(err));
        }
        emit(
            self.logger.as_ref(),
            ScenarioEvent::ScenarioFinished {
                ok: result.is_ok(),
                duration_ms,
            },
        );

        let (cycles, chaos) = result?;
        Ok(ScenarioReport {
            seed: plan.seed,
            config_hash,
            plan,
            cycles,
            chaos,
            duration_ms,
        })
    }

    fn execute(
        &self,
        plan: &ScenarioPlan,
        rng: &mut StdRng,
    ) -> Result<(Vec<CycleReport>, Option<ChaosOutcome>)> {
        if plan.auto_soft_commit {
            self.ctx.cloud.request(&AdminRequest::SetAutoSoftCommit {
                max_time_ms: Some(self.config.scenario.auto_soft_commit_ms),
            })?;
        }

        let mut cycles = Vec::with_capacity(plan.cycles as usize);
        for cycle in 1..=plan.cycles {
            cycles.push(self.run_cycle(rng, cycle, plan.base_shard_count)?);
        }

        let chaos = if plan.chaos {
            Some(self.run_chaos_cycle(rng)?)
        } else {
            None
        };
        Ok((cycles, chaos))
    }

    /// One create → index → (delete-by-query) → delete → verify cycle.
    pub fn run_cycle<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        cycle: u32,
        base_shard_count: u32,
    ) -> Result<CycleReport> {
        self.interrupt.check(&format!("starting cycle {cycle}"))?;
        let started = Instant::now();
        let name = self.config.scenario.collection_name.as_str();

        let topology = random_topology(rng, base_shard_count);
        emit(
            self.logger.as_ref(),
            ScenarioEvent::TopologyChosen {
                cycle,
                profile: topology.profile.to_string(),
                num_shards: topology.num_shards,
                replication_factor: topology.replication_factor,
                max_shards_per_node: topology.max_shards_per_node,
            },
        );

        self.driver.create_collection(
            name,
            topology.num_shards,
            topology.replication_factor,
            topology.max_shards_per_node,
        )?;
        self.driver.await_recoveries_finished(name, false)?;
        self.driver.force_refresh(name)?;
        self.driver.await_all_leaders(name, topology.num_shards)?;

        let mut agent = IndexingAgent::new(
            name,
            &self.config.scenario.doc_text,
            self.config.scenario.max_docs_per_node,
            self.config.timeouts.client_timeout(),
            self.logger.clone(),
        );
        let batches = self
            .ctx
            .nodes
            .iter()
            .map(|node| agent.index_random_batch(rng, node.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let delete_by_query = rng.random_bool(self.config.scenario.delete_by_query_probability);
        if delete_by_query {
            self.verify_delete_by_query(name)?;
        }

        self.ctx.cloud.commit(name)?;
        let num_found = self.ctx.cloud.query(name, MATCH_ALL)?.num_found;

        self.driver.delete_collection(name)?;
        self.driver
            .await_collection_absent(name, self.driver.timeouts().collection_absent())?;

        let verifier = CleanupVerifier::new(Arc::clone(&self.ctx.storage), self.logger.clone());
        let directories_checked = verifier.verify_absent(name, agent.directories())?;

        Ok(CycleReport {
            cycle,
            topology,
            docs_indexed: agent.docs_indexed(),
            batches,
            delete_by_query,
            num_found,
            directories_checked,
            duration_ms: elapsed_ms(started),
        })
    }

    fn verify_delete_by_query(&self, name: &str) -> Result<()> {
        self.ctx.cloud.delete_by_query(name, MATCH_ALL)?;
        self.ctx.cloud.commit(name)?;
        let found = self.ctx.cloud.query(name, MATCH_ALL)?.num_found;
        if found != 0 {
            return Err(StressError::UnexpectedResultCount {
                query: MATCH_ALL.to_string(),
                expected: 0,
                found,
            });
        }
        emit(
            self.logger.as_ref(),
            ScenarioEvent::DeleteByQueryVerified {
                collection: name.to_string(),
            },
        );
        Ok(())
    }

    /// Fresh 1x1 collection, then the fault against the first node.
    ///
    /// The chaos collection is left in place for the caller's teardown.
    pub fn run_chaos_cycle<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ChaosOutcome> {
        self.interrupt.check("starting chaos cycle")?;
        let name = self.config.scenario.collection_name.as_str();
        let target = self
            .ctx
            .nodes
            .first()
            .map(|n| n.node())
            .ok_or_else(|| StressError::Runtime {
                details: "cluster context has no nodes to stop".to_string(),
            })?;

        self.driver.create_collection(name, 1, 1, 1)?;
        self.driver.await_recoveries_finished(name, false)?;

        ChaosInjector::new(
            &self.driver,
            Arc::clone(&self.ctx.controller),
            Arc::clone(&self.ctx.storage),
            self.config.scenario.max_safe_mode_delay_ms,
            self.logger.clone(),
        )
        .run_chaos_cycle(rng, name, target)
    }
}
