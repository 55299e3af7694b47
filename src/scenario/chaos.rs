//! Node crash plus storage safe mode, lifted after a random delay while the
//! restarted node is recovering.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::cluster::api::{NodeController, NodeId, StorageController};
use crate::cluster::driver::{ClusterLifecycleDriver, elapsed_ms};
use crate::core::errors::{Result, StressError};
use crate::logger::activity::{ActivityLoggerHandle, ScenarioEvent, emit};
use crate::scenario::schedule::{CancelOutcome, DeferredTask};

/// What happened during one chaos cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosOutcome {
    pub node: NodeId,
    pub collection: String,
    pub safe_mode_delay_ms: u64,
    /// Whether the deferred safe-mode exit ran before the cycle ended.
    pub safe_mode_exit: CancelOutcome,
    pub recovery_ms: u64,
}

pub struct ChaosInjector<'a> {
    driver: &'a ClusterLifecycleDriver,
    controller: Arc<dyn NodeController>,
    storage: Arc<dyn StorageController>,
    max_delay_ms: u64,
    logger: Option<ActivityLoggerHandle>,
}

impl<'a> ChaosInjector<'a> {
    pub fn new(
        driver: &'a ClusterLifecycleDriver,
        controller: Arc<dyn NodeController>,
        storage: Arc<dyn StorageController>,
        max_delay_ms: u64,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            driver,
            controller,
            storage,
            max_delay_ms: max_delay_ms.max(1),
            logger,
        }
    }

    /// Draw a delay in `[0, max_delay_ms)` and run the cycle with it.
    pub fn run_chaos_cycle<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        collection: &str,
        node: NodeId,
    ) -> Result<ChaosOutcome> {
        let delay = Duration::from_millis(rng.random_range(0..self.max_delay_ms));
        self.run_with_delay(collection, node, delay)
    }

    /// Stop `node`, force safe mode, schedule its exit after `delay`, restart
    /// the node and wait for tolerant recovery of `collection`.
    ///
    /// The pending safe-mode exit is cancelled before returning on every path.
    /// A cancelled exit leaves the storage layer in safe mode.
    pub fn run_with_delay(
        &self,
        collection: &str,
        node: NodeId,
        delay: Duration,
    ) -> Result<ChaosOutcome> {
        self.controller.stop(node)?;
        emit(
            self.logger.as_ref(),
            ScenarioEvent::NodeStopped {
                node: node.to_string(),
            },
        );

        self.storage.enter_safe_mode(true)?;
        if !self.storage.is_in_safe_mode()? {
            return Err(StressError::StorageUnavailable {
                details: "forced safe mode was not entered".to_string(),
            });
        }
        emit(self.logger.as_ref(), ScenarioEvent::SafeModeEntered);

        let storage = Arc::clone(&self.storage);
        let logger = self.logger.clone();
        let mut task = DeferredTask::schedule("cst-safe-mode-exit", delay, move || {
            let result = storage.leave_safe_mode();
            if let Err(e) = &result {
                eprintln!("[CST-CHAOS] leaving safe mode failed: {e}");
            }
            emit(
                logger.as_ref(),
                ScenarioEvent::SafeModeExitFired {
                    ok: result.is_ok(),
                    details: result.err().map(|e| e.to_string()),
                },
            );
        })?;
        let delay_ms = u64::try_from(task.delay().as_millis()).unwrap_or(u64::MAX);
        emit(
            self.logger.as_ref(),
            ScenarioEvent::SafeModeExitScheduled { delay_ms },
        );

        let started = Instant::now();
        let recovered = self.controller.start(node).and_then(|()| {
            emit(
                self.logger.as_ref(),
                ScenarioEvent::NodeStarted {
                    node: node.to_string(),
                },
            );
            self.driver.await_recoveries_finished(collection, true)
        });
        let recovery_ms = elapsed_ms(started);

        let safe_mode_exit = task.cancel();
        if safe_mode_exit == CancelOutcome::Cancelled {
            emit(self.logger.as_ref(), ScenarioEvent::SafeModeExitCancelled);
        }
        recovered?;

        Ok(ChaosOutcome {
            node,
            collection: collection.to_string(),
            safe_mode_delay_ms: delay_ms,
            safe_mode_exit,
            recovery_ms,
        })
    }
}
