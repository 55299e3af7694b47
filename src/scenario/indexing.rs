//! Per-node indexing: a random batch, a random commit flavor, then the node's
//! reported data directory.

#![allow(missing_docs)]

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster::api::{CommitVariant, Document, NodeClient, NodeId};
use crate::core::errors::{Result, StressError};
use crate::logger::activity::{ActivityLoggerHandle, ScenarioEvent, emit};

/// JSON pointer of the data directory in a system-status response.
pub const DATA_DIR_POINTER: &str = "/core/directory/data";

/// A storage directory reported by a node while the collection was live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDirectory {
    pub node: NodeId,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedBatch {
    pub node: NodeId,
    pub first_id: u64,
    pub docs: u64,
    pub commit: CommitVariant,
    pub data_dir: String,
}

/// Indexes through each node in turn for one collection instance.
///
/// Document ids come from one counter owned by the agent, so ids never repeat
/// across nodes within a cycle.
pub struct IndexingAgent {
    collection: String,
    doc_text: String,
    max_docs: u32,
    client_timeout: Duration,
    next_id: u64,
    directories: Vec<DataDirectory>,
    logger: Option<ActivityLoggerHandle>,
}

impl IndexingAgent {
    pub fn new(
        collection: &str,
        doc_text: &str,
        max_docs: u32,
        client_timeout: Duration,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            collection: collection.to_string(),
            doc_text: doc_text.to_string(),
            max_docs: max_docs.max(1),
            client_timeout,
            next_id: 0,
            directories: Vec::new(),
            logger,
        }
    }

    /// Write 1..=`max_docs` documents through `node`, commit, and record the
    /// node's current data directory.
    pub fn index_random_batch<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        node: &dyn NodeClient,
    ) -> Result<IndexedBatch> {
        let docs = rng.random_range(1..=self.max_docs);
        let commit = if rng.random_bool(0.5) {
            CommitVariant::Plain
        } else {
            CommitVariant::all_flags()
        };
        self.index_batch(node, u64::from(docs), commit)
    }

    /// Deterministic form of [`Self::index_random_batch`].
    pub fn index_batch(
        &mut self,
        node: &dyn NodeClient,
        docs: u64,
        commit: CommitVariant,
    ) -> Result<IndexedBatch> {
        let first_id = self.next_id;
        for _ in 0..docs {
            let doc = Document::new()
                .field("id", self.next_id)
                .field("txt_t", self.doc_text.as_str());
            node.add(&self.collection, doc)?;
            self.next_id += 1;
        }
        node.commit(&self.collection, commit)?;

        node.set_connect_timeout(self.client_timeout);
        let status = node.system_status(&self.collection)?;
        let data_dir = extract_data_dir(&status)?;

        self.directories.push(DataDirectory {
            node: node.node(),
            path: data_dir.clone(),
        });
        emit(
            self.logger.as_ref(),
            ScenarioEvent::BatchIndexed {
                node: node.node().to_string(),
                collection: self.collection.clone(),
                docs,
                commit: commit.label().to_string(),
                data_dir: data_dir.clone(),
            },
        );

        Ok(IndexedBatch {
            node: node.node(),
            first_id,
            docs,
            commit,
            data_dir,
        })
    }

    pub fn directories(&self) -> &[DataDirectory] {
        &self.directories
    }

    /// Total documents added so far.
    pub fn docs_indexed(&self) -> u64 {
        self.next_id
    }
}

/// Pull `core.directory.data` out of a system-status response.
pub fn extract_data_dir(status: &Value) -> Result<String> {
    status
        .pointer(DATA_DIR_POINTER)
        .and_then(Value::as_str)
        .filter(|dir| !dir.is_empty())
        .map(str::to_string)
        .ok_or(StressError::MissingField {
            field: "core.directory.data",
        })
}
