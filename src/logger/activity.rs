//! Activity logger: a dedicated thread owns the `JsonlWriter`; every other
//! component sends `ScenarioEvent`s through a bounded crossbeam channel.
//!
//! `try_send()` keeps the control thread and the deferred safe-mode task from
//! ever blocking on logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::LoggingConfig;
use crate::core::errors::{Result, StressError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Events emitted over a scenario run.
#[derive(Debug, Clone)]
pub enum ScenarioEvent {
    ScenarioStarted {
        seed: u64,
        cycles: u32,
        chaos: bool,
        config_hash: String,
    },
    ScenarioFinished {
        ok: bool,
        duration_ms: u64,
    },
    TopologyChosen {
        cycle: u32,
        profile: String,
        num_shards: u32,
        replication_factor: u32,
        max_shards_per_node: u32,
    },
    CollectionCreateRequested {
        collection: String,
        num_shards: u32,
    },
    RecoveriesFinished {
        collection: String,
        allow_failures: bool,
        duration_ms: u64,
    },
    LeadersResolved {
        collection: String,
        shards: u32,
        duration_ms: u64,
    },
    BatchIndexed {
        node: String,
        collection: String,
        docs: u64,
        commit: String,
        data_dir: String,
    },
    DeleteByQueryVerified {
        collection: String,
    },
    CollectionDeleteRequested {
        collection: String,
    },
    CollectionAbsent {
        collection: String,
        duration_ms: u64,
    },
    DirectoriesVerified {
        collection: String,
        count: u64,
    },
    NodeStopped {
        node: String,
    },
    NodeStarted {
        node: String,
    },
    SafeModeEntered,
    SafeModeExitScheduled {
        delay_ms: u64,
    },
    SafeModeExitFired {
        ok: bool,
        details: Option<String>,
    },
    SafeModeExitCancelled,
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

impl ScenarioEvent {
    /// Convenience constructor for error events.
    pub fn error(err: &StressError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Thread-safe, cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ScenarioEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking; a full channel drops
    /// the event and bumps the dropped-events counter.
    pub fn send(&self, event: ScenarioEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ScenarioEvent::Shutdown);
    }
}

/// Send through an optional handle; most components run without a logger in tests.
pub fn emit(logger: Option<&ActivityLoggerHandle>, event: ScenarioEvent) {
    if let Some(handle) = logger {
        handle.send(event);
    }
}

/// Spawn the logger thread described by `[logging]`.
pub fn spawn_logger(
    config: &LoggingConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let jsonl = JsonlConfig {
        path: config.jsonl_path.clone(),
        fallback_path: config.fallback_path.clone(),
        ..JsonlConfig::default()
    };
    spawn_logger_with(jsonl, config.channel_capacity)
}

/// Spawn the logger thread with an explicit writer config.
pub fn spawn_logger_with(
    jsonl: JsonlConfig,
    channel_capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ScenarioEvent>(channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("cst-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl, &dropped_clone))
        .map_err(|e| StressError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ScenarioEvent>, jsonl: JsonlConfig, dropped: &AtomicU64) {
    let mut writer = JsonlWriter::open(jsonl);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            writer.write_entry(&warn);
        }

        if matches!(event, ScenarioEvent::Shutdown) {
            break;
        }
        writer.write_entry(&event_to_log_entry(&event));
    }

    writer.flush();
    writer.fsync();
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ScenarioEvent) -> LogEntry {
    match event {
        ScenarioEvent::ScenarioStarted {
            seed,
            cycles,
            chaos,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::ScenarioStart, Severity::Info);
            e.seed = Some(*seed);
            e.count = Some(u64::from(*cycles));
            e.details = Some(format!("chaos={chaos} config_hash={config_hash}"));
            e
        }
        ScenarioEvent::ScenarioFinished { ok, duration_ms } => {
            let severity = if *ok {
                Severity::Info
            } else {
                Severity::Critical
            };
            let mut e = LogEntry::new(EventType::ScenarioFinish, severity);
            e.ok = Some(*ok);
            e.duration_ms = Some(*duration_ms);
            e
        }
        ScenarioEvent::TopologyChosen {
            cycle,
            profile,
            num_shards,
            replication_factor,
            max_shards_per_node,
        } => {
            let mut e = LogEntry::new(EventType::TopologyChosen, Severity::Info);
            e.cycle = Some(*cycle);
            e.details = Some(format!(
                "profile={profile} shards={num_shards} rf={replication_factor} max_per_node={max_shards_per_node}"
            ));
            e
        }
        ScenarioEvent::CollectionCreateRequested {
            collection,
            num_shards,
        } => {
            let mut e = LogEntry::new(EventType::CollectionCreate, Severity::Info);
            e.collection = Some(collection.clone());
            e.count = Some(u64::from(*num_shards));
            e
        }
        ScenarioEvent::RecoveriesFinished {
            collection,
            allow_failures,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RecoveriesFinished, Severity::Info);
            e.collection = Some(collection.clone());
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("allow_failures={allow_failures}"));
            e.ok = Some(true);
            e
        }
        ScenarioEvent::LeadersResolved {
            collection,
            shards,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::LeadersResolved, Severity::Info);
            e.collection = Some(collection.clone());
            e.count = Some(u64::from(*shards));
            e.duration_ms = Some(*duration_ms);
            e
        }
        ScenarioEvent::BatchIndexed {
            node,
            collection,
            docs,
            commit,
            data_dir,
        } => {
            let mut e = LogEntry::new(EventType::BatchIndexed, Severity::Info);
            e.node = Some(node.clone());
            e.collection = Some(collection.clone());
            e.count = Some(*docs);
            e.path = Some(data_dir.clone());
            e.details = Some(format!("commit={commit}"));
            e
        }
        ScenarioEvent::DeleteByQueryVerified { collection } => {
            let mut e = LogEntry::new(EventType::DeleteByQuery, Severity::Info);
            e.collection = Some(collection.clone());
            e.ok = Some(true);
            e
        }
        ScenarioEvent::CollectionDeleteRequested { collection } => {
            let mut e = LogEntry::new(EventType::CollectionDelete, Severity::Info);
            e.collection = Some(collection.clone());
            e
        }
        ScenarioEvent::CollectionAbsent {
            collection,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::CollectionAbsent, Severity::Info);
            e.collection = Some(collection.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ScenarioEvent::DirectoriesVerified { collection, count } => {
            let mut e = LogEntry::new(EventType::DirectoriesVerified, Severity::Info);
            e.collection = Some(collection.clone());
            e.count = Some(*count);
            e.ok = Some(true);
            e
        }
        ScenarioEvent::NodeStopped { node } => {
            let mut e = LogEntry::new(EventType::NodeStop, Severity::Warning);
            e.node = Some(node.clone());
            e
        }
        ScenarioEvent::NodeStarted { node } => {
            let mut e = LogEntry::new(EventType::NodeStart, Severity::Info);
            e.node = Some(node.clone());
            e
        }
        ScenarioEvent::SafeModeEntered => LogEntry::new(EventType::SafeModeEnter, Severity::Warning),
        ScenarioEvent::SafeModeExitScheduled { delay_ms } => {
            let mut e = LogEntry::new(EventType::SafeModeExit, Severity::Info);
            e.duration_ms = Some(*delay_ms);
            e.details = Some("scheduled".to_string());
            e
        }
        ScenarioEvent::SafeModeExitFired { ok, details } => {
            let severity = if *ok {
                Severity::Info
            } else {
                Severity::Warning
            };
            let mut e = LogEntry::new(EventType::SafeModeExit, severity);
            e.ok = Some(*ok);
            e.details = Some(details.clone().unwrap_or_else(|| "fired".to_string()));
            e
        }
        ScenarioEvent::SafeModeExitCancelled => {
            let mut e = LogEntry::new(EventType::SafeModeExit, Severity::Info);
            e.details = Some("cancelled".to_string());
            e
        }
        ScenarioEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ScenarioEvent::Shutdown => LogEntry::new(EventType::ScenarioFinish, Severity::Info),
    }
}
