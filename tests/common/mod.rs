#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use collection_stress::cluster::api::{ClusterContext, ReplicaStatus};
use collection_stress::cluster::driver::ClusterLifecycleDriver;
use collection_stress::cluster::sim::{SimCluster, SimFaults};
use collection_stress::core::config::Config;
use collection_stress::core::interrupt::InterruptFlag;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_cstress") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "cstress.exe" } else { "cstress" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve cstress binary path for integration test"),
    }
}

/// Run the binary with the activity log redirected into the per-case log dir.
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("cstress-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let stamp = format!("{}-{}", sanitize(case_name), now_millis());
    let log_path = root.join(format!("{stamp}.log"));
    let activity_path = root.join(format!("{stamp}.activity.jsonl"));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("CST_LOGGING_JSONL_PATH", &activity_path)
        .env("CST_OUTPUT_FORMAT", "human")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute cstress command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── simulated cluster fixtures ────────────────────

/// Fast-mode config with a fixed seed and logging off.
pub fn fast_config(seed: u64) -> Config {
    let mut cfg = Config::default().fast();
    cfg.scenario.seed = Some(seed);
    cfg.scenario.max_docs_per_node = 100;
    cfg.logging.enabled = false;
    cfg
}

pub fn sim_cluster(cfg: &Config, faults: SimFaults) -> (SimCluster, ClusterContext) {
    let sim = SimCluster::with_faults(cfg.sim.clone(), faults);
    let ctx = sim.context();
    (sim, ctx)
}

pub fn driver(ctx: &ClusterContext, cfg: &Config) -> ClusterLifecycleDriver {
    ClusterLifecycleDriver::new(
        Arc::clone(&ctx.cloud),
        Arc::clone(&ctx.state),
        cfg.timeouts.clone(),
        InterruptFlag::new(),
        None,
    )
}

/// Poll until every replica of `name` is active or `timeout` passes.
pub fn wait_all_active(ctx: &ClusterContext, name: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(Some(state)) = ctx.state.collection_state(name)
            && state
                .shards
                .iter()
                .flat_map(|s| &s.replicas)
                .all(|r| r.status == ReplicaStatus::Active)
        {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
