//! Post-delete storage check: every recorded data directory must be gone.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::cluster::api::StorageController;
use crate::core::errors::{Result, StressError};
use crate::logger::activity::{ActivityLoggerHandle, ScenarioEvent, emit};
use crate::scenario::indexing::DataDirectory;

pub struct CleanupVerifier {
    storage: Arc<dyn StorageController>,
    logger: Option<ActivityLoggerHandle>,
}

impl CleanupVerifier {
    pub fn new(storage: Arc<dyn StorageController>, logger: Option<ActivityLoggerHandle>) -> Self {
        Self { storage, logger }
    }

    /// Check each distinct path through its own uncached handle.
    ///
    /// A cached handle can still list a directory another cluster member
    /// already removed, so every check opens a fresh one and closes it
    /// before moving on. Returns the number of distinct paths checked.
    pub fn verify_absent(&self, collection: &str, directories: &[DataDirectory]) -> Result<usize> {
        let config = self.storage.client_config().uncached();
        let paths: BTreeSet<&str> = directories.iter().map(|d| d.path.as_str()).collect();

        let mut residual = Vec::new();
        for path in &paths {
            let handle = self.storage.open(&config)?;
            let exists = handle.exists(path);
            handle.close()?;
            if exists? {
                eprintln!("[CST-CLEANUP] residual data directory after deleting {collection}: {path}");
                residual.push(*path);
            }
        }

        if let Some(first) = residual.first() {
            let err = StressError::ResidualResource {
                path: (*first).to_string(),
                residual_count: residual.len(),
            };
            emit(self.logger.as_ref(), ScenarioEvent::error(&err));
            return Err(err);
        }

        emit(
            self.logger.as_ref(),
            ScenarioEvent::DirectoriesVerified {
                collection: collection.to_string(),
                count: paths.len() as u64,
            },
        );
        Ok(paths.len())
    }
}
