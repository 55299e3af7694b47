//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, StressError};

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scenario: ScenarioConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
    pub sim: SimConfig,
    /// Where this config was loaded from (not part of the file format).
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Randomization knobs for one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Collection name reused by every cycle.
    pub collection_name: String,
    /// Base shard count for topology planning; defaults to the node count.
    pub base_shard_count: Option<u32>,
    pub min_cycles: u32,
    pub max_cycles: u32,
    /// Probability that the scenario ends with a chaos cycle.
    pub chaos_probability: f64,
    /// Per-cycle probability of the delete-by-query verification step.
    pub delete_by_query_probability: f64,
    /// Upper bound (inclusive) of documents written through each node.
    pub max_docs_per_node: u32,
    pub doc_text: String,
    /// Upper bound (exclusive) of the deferred safe-mode exit delay.
    pub max_safe_mode_delay_ms: u64,
    pub auto_soft_commit_probability: f64,
    pub auto_soft_commit_ms: u64,
    /// Fixed RNG seed for replay; random when absent.
    pub seed: Option<u64>,
}

/// Bounded waits. Exceeding any of these is a hard failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub leader_wait_ms: u64,
    pub leader_poll_interval_ms: u64,
    pub recovery_wait_ms: u64,
    pub recovery_poll_interval_ms: u64,
    pub collection_absent_ms: u64,
    pub absent_poll_interval_ms: u64,
    pub client_timeout_ms: u64,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub channel_capacity: usize,
}

/// Simulated cluster behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimConfig {
    pub node_count: usize,
    pub recovery_delay_ms: u64,
    pub recovery_retry_ms: u64,
    pub delete_delay_ms: u64,
    pub storage_uri: String,
    pub data_root: String,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            collection_name: "delete_data_dir".to_string(),
            base_shard_count: None,
            min_cycles: 1,
            max_cycles: 2,
            chaos_probability: 0.5,
            delete_by_query_probability: 0.5,
            max_docs_per_node: 1_000,
            doc_text: "just some random text for a doc".to_string(),
            max_safe_mode_delay_ms: 10_000,
            auto_soft_commit_probability: 0.5,
            auto_soft_commit_ms: 1_000,
            seed: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            leader_wait_ms: 30_000,
            leader_poll_interval_ms: 100,
            recovery_wait_ms: 330_000,
            recovery_poll_interval_ms: 250,
            collection_absent_ms: 10_000,
            absent_poll_interval_ms: 200,
            client_timeout_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub const fn leader_wait(&self) -> Duration {
        Duration::from_millis(self.leader_wait_ms)
    }

    #[must_use]
    pub const fn recovery_wait(&self) -> Duration {
        Duration::from_millis(self.recovery_wait_ms)
    }

    #[must_use]
    pub const fn collection_absent(&self) -> Duration {
        Duration::from_millis(self.collection_absent_ms)
    }

    #[must_use]
    pub const fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            enabled: true,
            jsonl_path: data.join("activity.jsonl"),
            fallback_path: Some(env::temp_dir().join("cstress-activity.jsonl")),
            channel_capacity: 1_024,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node_count: 3,
            recovery_delay_ms: 100,
            recovery_retry_ms: 200,
            delete_delay_ms: 100,
            storage_uri: "hdfs://sim-namenode:8020".to_string(),
            data_root: "/solr".to_string(),
        }
    }
}

impl SimConfig {
    /// Checks that only matter when the simulated backend is the cluster.
    pub fn validate(&self) -> Result<()> {
        // Undersharded cycles place two copies of a shard on distinct nodes.
        if self.node_count < 2 {
            return Err(StressError::InvalidConfig {
                details: format!("sim.node_count must be >= 2, got {}", self.node_count),
            });
        }
        if !self.data_root.starts_with('/') {
            return Err(StressError::InvalidConfig {
                details: format!("sim.data_root must be absolute, got {:?}", self.data_root),
            });
        }
        Ok(())
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[CST-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("cstress")
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        home_dir().join(".config").join("cstress").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| StressError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(StressError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.source = path_buf.exists().then_some(path_buf);
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for log correlation (FNV-1a).
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Shrink every delay and timeout so a whole scenario runs in seconds.
    ///
    /// Used by `cstress run --fast` and by the integration tests.
    #[must_use]
    pub fn fast(mut self) -> Self {
        self.scenario.max_docs_per_node = self.scenario.max_docs_per_node.min(200);
        self.scenario.max_safe_mode_delay_ms = 400;
        self.scenario.auto_soft_commit_ms = 50;
        self.timeouts.leader_wait_ms = 5_000;
        self.timeouts.leader_poll_interval_ms = 10;
        self.timeouts.recovery_wait_ms = 10_000;
        self.timeouts.recovery_poll_interval_ms = 10;
        self.timeouts.collection_absent_ms = 5_000;
        self.timeouts.absent_poll_interval_ms = 20;
        self.sim.recovery_delay_ms = 20;
        self.sim.recovery_retry_ms = 30;
        self.sim.delete_delay_ms = 20;
        self
    }

    #[allow(clippy::too_many_lines)]
    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // scenario
        if let Some(raw) = lookup("CST_SCENARIO_COLLECTION_NAME") {
            self.scenario.collection_name = raw;
        }
        if let Some(raw) = lookup("CST_SCENARIO_BASE_SHARD_COUNT") {
            self.scenario.base_shard_count =
                Some(parse_env("CST_SCENARIO_BASE_SHARD_COUNT", &raw)?);
        }
        set_parsed(
            &mut lookup,
            "CST_SCENARIO_MIN_CYCLES",
            &mut self.scenario.min_cycles,
        )?;
        set_parsed(
            &mut lookup,
            "CST_SCENARIO_MAX_CYCLES",
            &mut self.scenario.max_cycles,
        )?;
        set_parsed(
            &mut lookup,
            "CST_SCENARIO_CHAOS_PROBABILITY",
            &mut self.scenario.chaos_probability,
        )?;
        set_parsed(
            &mut lookup,
            "CST_SCENARIO_DELETE_BY_QUERY_PROBABILITY",
            &mut self.scenario.delete_by_query_probability,
        )?;
        set_parsed(
            &mut lookup,
            "CST_SCENARIO_MAX_DOCS_PER_NODE",
            &mut self.scenario.max_docs_per_node,
        )?;
        set_parsed(
            &mut lookup,
            "CST_SCENARIO_MAX_SAFE_MODE_DELAY_MS",
            &mut self.scenario.max_safe_mode_delay_ms,
        )?;
        set_parsed(
            &mut lookup,
            "CST_SCENARIO_AUTO_SOFT_COMMIT_PROBABILITY",
            &mut self.scenario.auto_soft_commit_probability,
        )?;
        if let Some(raw) = lookup("CST_SCENARIO_SEED") {
            self.scenario.seed = Some(parse_env("CST_SCENARIO_SEED", &raw)?);
        }

        // timeouts
        set_parsed(
            &mut lookup,
            "CST_TIMEOUTS_LEADER_WAIT_MS",
            &mut self.timeouts.leader_wait_ms,
        )?;
        set_parsed(
            &mut lookup,
            "CST_TIMEOUTS_RECOVERY_WAIT_MS",
            &mut self.timeouts.recovery_wait_ms,
        )?;
        set_parsed(
            &mut lookup,
            "CST_TIMEOUTS_COLLECTION_ABSENT_MS",
            &mut self.timeouts.collection_absent_ms,
        )?;
        set_parsed(
            &mut lookup,
            "CST_TIMEOUTS_ABSENT_POLL_INTERVAL_MS",
            &mut self.timeouts.absent_poll_interval_ms,
        )?;
        set_parsed(
            &mut lookup,
            "CST_TIMEOUTS_CLIENT_TIMEOUT_MS",
            &mut self.timeouts.client_timeout_ms,
        )?;

        // logging
        set_parsed(&mut lookup, "CST_LOGGING_ENABLED", &mut self.logging.enabled)?;
        if let Some(raw) = lookup("CST_LOGGING_JSONL_PATH") {
            self.logging.jsonl_path = PathBuf::from(raw);
        }

        // sim
        set_parsed(&mut lookup, "CST_SIM_NODE_COUNT", &mut self.sim.node_count)?;
        set_parsed(
            &mut lookup,
            "CST_SIM_RECOVERY_DELAY_MS",
            &mut self.sim.recovery_delay_ms,
        )?;
        set_parsed(
            &mut lookup,
            "CST_SIM_DELETE_DELAY_MS",
            &mut self.sim.delete_delay_ms,
        )?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scenario;
        if s.collection_name.trim().is_empty() {
            return Err(StressError::InvalidConfig {
                details: "scenario.collection_name must not be empty".to_string(),
            });
        }
        if s.base_shard_count == Some(0) {
            return Err(StressError::InvalidConfig {
                details: "scenario.base_shard_count must be >= 1".to_string(),
            });
        }
        if !(1 <= s.min_cycles && s.min_cycles <= s.max_cycles) {
            return Err(StressError::InvalidConfig {
                details: format!(
                    "scenario cycles must satisfy 1 <= min_cycles <= max_cycles, got {}..={}",
                    s.min_cycles, s.max_cycles
                ),
            });
        }
        validate_prob("scenario.chaos_probability", s.chaos_probability)?;
        validate_prob(
            "scenario.delete_by_query_probability",
            s.delete_by_query_probability,
        )?;
        validate_prob(
            "scenario.auto_soft_commit_probability",
            s.auto_soft_commit_probability,
        )?;
        if s.max_docs_per_node == 0 {
            return Err(StressError::InvalidConfig {
                details: "scenario.max_docs_per_node must be >= 1".to_string(),
            });
        }
        if s.max_safe_mode_delay_ms == 0 {
            return Err(StressError::InvalidConfig {
                details: "scenario.max_safe_mode_delay_ms must be > 0".to_string(),
            });
        }

        let t = &self.timeouts;
        for (name, wait, interval) in [
            ("leader_wait", t.leader_wait_ms, t.leader_poll_interval_ms),
            (
                "recovery_wait",
                t.recovery_wait_ms,
                t.recovery_poll_interval_ms,
            ),
            (
                "collection_absent",
                t.collection_absent_ms,
                t.absent_poll_interval_ms,
            ),
        ] {
            if wait == 0 || interval == 0 {
                return Err(StressError::InvalidConfig {
                    details: format!("timeouts.{name} and its poll interval must be > 0"),
                });
            }
            if interval > wait {
                return Err(StressError::InvalidConfig {
                    details: format!(
                        "timeouts.{name} poll interval ({interval}ms) exceeds its timeout ({wait}ms)"
                    ),
                });
            }
        }
        if t.client_timeout_ms == 0 {
            return Err(StressError::InvalidConfig {
                details: "timeouts.client_timeout_ms must be > 0".to_string(),
            });
        }

        if self.logging.channel_capacity == 0 {
            return Err(StressError::InvalidConfig {
                details: "logging.channel_capacity must be > 0".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_prob(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(StressError::InvalidConfig {
            details: format!("{name} must be in [0,1], got {value}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = parse_env(name, &raw)?;
    }
    Ok(())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| StressError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
