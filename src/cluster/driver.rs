//! Collection lifecycle driver: admin requests plus bounded convergence waits.
//!
//! Every wait is a blocking poll with a fixed deadline. Running past the
//! deadline returns [`StressError::ConvergenceTimeout`]; the driver never
//! retries a wait on its own.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cluster::api::{
    AdminRequest, CloudClient, ClusterStateReader, CollectionState, LeaderRef, ReplicaStatus,
    ShardId,
};
use crate::core::config::TimeoutConfig;
use crate::core::errors::{Result, StressError};
use crate::core::interrupt::InterruptFlag;
use crate::logger::activity::{ActivityLoggerHandle, ScenarioEvent, emit};

/// Issues create/delete requests and waits for cluster state to follow.
pub struct ClusterLifecycleDriver {
    cloud: Arc<dyn CloudClient>,
    state: Arc<dyn ClusterStateReader>,
    timeouts: TimeoutConfig,
    interrupt: InterruptFlag,
    logger: Option<ActivityLoggerHandle>,
}

impl ClusterLifecycleDriver {
    pub fn new(
        cloud: Arc<dyn CloudClient>,
        state: Arc<dyn ClusterStateReader>,
        timeouts: TimeoutConfig,
        interrupt: InterruptFlag,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            cloud,
            state,
            timeouts,
            interrupt,
            logger,
        }
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Submit a CREATE request. Does not wait for the collection to come up.
    pub fn create_collection(
        &self,
        name: &str,
        num_shards: u32,
        replication_factor: u32,
        max_shards_per_node: u32,
    ) -> Result<()> {
        self.cloud.request(&AdminRequest::Create {
            name: name.to_string(),
            num_shards,
            replication_factor,
            max_shards_per_node,
        })?;
        emit(
            self.logger.as_ref(),
            ScenarioEvent::CollectionCreateRequested {
                collection: name.to_string(),
                num_shards,
            },
        );
        Ok(())
    }

    /// Submit a DELETE request and return immediately.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        self.cloud.request(&AdminRequest::Delete {
            name: name.to_string(),
        })?;
        emit(
            self.logger.as_ref(),
            ScenarioEvent::CollectionDeleteRequested {
                collection: name.to_string(),
            },
        );
        Ok(())
    }

    /// Block until every replica of `name` has recovered.
    ///
    /// Strict mode (`allow_failures == false`) requires every replica to be
    /// active and fails as soon as any replica reports a failed recovery.
    /// Tolerant mode keeps waiting through failed attempts and accepts every
    /// replica active or recovering with at least one active replica per shard.
    pub fn await_recoveries_finished(&self, name: &str, allow_failures: bool) -> Result<()> {
        let started = Instant::now();
        self.poll_until(
            &format!("recoveries of {name} (allow_failures={allow_failures})"),
            self.timeouts.recovery_wait(),
            Duration::from_millis(self.timeouts.recovery_poll_interval_ms),
            || {
                let Some(state) = self.state.collection_state(name)? else {
                    return Ok(None);
                };
                if !allow_failures && let Some(err) = first_failed_replica(&state) {
                    return Err(err);
                }
                Ok(recovery_converged(&state, allow_failures).then_some(()))
            },
        )?;
        emit(
            self.logger.as_ref(),
            ScenarioEvent::RecoveriesFinished {
                collection: name.to_string(),
                allow_failures,
                duration_ms: elapsed_ms(started),
            },
        );
        Ok(())
    }

    /// Block until a leader for `shard` is resolvable.
    pub fn await_leader_resolved(
        &self,
        name: &str,
        shard: &ShardId,
        timeout: Duration,
    ) -> Result<LeaderRef> {
        self.poll_until(
            &format!("leader of {name}/{shard}"),
            timeout,
            Duration::from_millis(self.timeouts.leader_poll_interval_ms),
            || self.state.leader(name, shard),
        )
    }

    /// Resolve the leader of every shard `shard1..=shardN`, each with the
    /// configured leader timeout.
    pub fn await_all_leaders(&self, name: &str, num_shards: u32) -> Result<Vec<LeaderRef>> {
        let started = Instant::now();
        let leaders = (1..=num_shards)
            .map(|n| self.await_leader_resolved(name, &ShardId::nth(n), self.timeouts.leader_wait()))
            .collect::<Result<Vec<_>>>()?;
        emit(
            self.logger.as_ref(),
            ScenarioEvent::LeadersResolved {
                collection: name.to_string(),
                shards: num_shards,
                duration_ms: elapsed_ms(started),
            },
        );
        Ok(leaders)
    }

    /// Poll cluster state until `name` is no longer listed.
    pub fn await_collection_absent(&self, name: &str, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        self.poll_until(
            &format!("collection {name} to leave cluster state"),
            timeout,
            Duration::from_millis(self.timeouts.absent_poll_interval_ms),
            || Ok((!self.state.has_collection(name)?).then_some(())),
        )?;
        emit(
            self.logger.as_ref(),
            ScenarioEvent::CollectionAbsent {
                collection: name.to_string(),
                duration_ms: elapsed_ms(started),
            },
        );
        Ok(())
    }

    pub fn force_refresh(&self, name: &str) -> Result<()> {
        self.state.force_refresh(name)
    }

    /// Run `attempt` every `interval` until it yields a value or `timeout` elapses.
    ///
    /// The attempt always runs at least once, and once more at the deadline.
    fn poll_until<T>(
        &self,
        waiting_for: &str,
        timeout: Duration,
        interval: Duration,
        mut attempt: impl FnMut() -> Result<Option<T>>,
    ) -> Result<T> {
        let deadline = Instant::now() + timeout;
        loop {
            self.interrupt.check(&format!("waiting for {waiting_for}"))?;
            if let Some(value) = attempt()? {
                return Ok(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StressError::ConvergenceTimeout {
                    waiting_for: waiting_for.to_string(),
                    waited_ms: duration_ms(timeout),
                });
            }
            thread::sleep(interval.min(deadline - now));
        }
    }
}

fn first_failed_replica(state: &CollectionState) -> Option<StressError> {
    state.shards.iter().find_map(|shard| {
        shard
            .replicas
            .iter()
            .find(|r| r.status == ReplicaStatus::RecoveryFailed)
            .map(|r| StressError::RecoveryFailed {
                collection: state.name.clone(),
                shard: shard.id.to_string(),
                replica: r.name.clone(),
            })
    })
}

/// Whether `state` counts as recovered under the given tolerance.
pub fn recovery_converged(state: &CollectionState, allow_failures: bool) -> bool {
    if state.shards.is_empty() {
        return false;
    }
    state.shards.iter().all(|shard| {
        if allow_failures {
            shard
                .replicas
                .iter()
                .any(|r| r.status == ReplicaStatus::Active)
                && shard.replicas.iter().all(|r| {
                    matches!(r.status, ReplicaStatus::Active | ReplicaStatus::Recovering)
                })
        } else {
            !shard.replicas.is_empty()
                && shard
                    .replicas
                    .iter()
                    .all(|r| r.status == ReplicaStatus::Active)
        }
    })
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    duration_ms(start.elapsed())
}
