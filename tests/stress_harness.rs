//! Stress harness: many seeded scenario runs against the simulated cluster
//! with machine-readable reporting.
//!
//! Runs in "fast" mode by default (a handful of seeds, a few seconds) and in
//! "full" mode when `CST_STRESS_FULL=1` is set.
//!
//! ## Scenarios
//!
//! | ID | Name | Components |
//! |----|------|------------|
//! | A | Lifecycle churn | Orchestrator + Driver + Indexing + Cleanup |
//! | B | Chaos every run | Orchestrator + ChaosInjector + DeferredTask |
//! | C | Fault detection | Cleanup + Driver against injected faults |

mod common;

use std::time::Instant;

use collection_stress::cluster::sim::SimFaults;
use collection_stress::core::config::Config;
use collection_stress::core::errors::StressError;
use collection_stress::core::interrupt::InterruptFlag;
use collection_stress::scenario::orchestrator::{ScenarioOrchestrator, ScenarioReport};
use collection_stress::scenario::schedule::CancelOutcome;

use common::{fast_config, sim_cluster};

// ──────────────────── percentile stats ────────────────────

#[derive(Debug, Clone, serde::Serialize, PartialEq)]
struct PercentileStats {
    min: f64,
    max: f64,
    mean: f64,
    p50: f64,
    p95: f64,
}

impl PercentileStats {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                p50: 0.0,
                p95: 0.0,
            };
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / usize_to_f64(n);
        Self {
            min: sorted[0],
            max: sorted[n - 1],
            mean,
            p50: percentile(&sorted, 50),
            p95: percentile(&sorted, 95),
        }
    }
}

fn percentile(sorted: &[f64], pct: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let max_idx = sorted.len() - 1;
    let idx = max_idx.saturating_mul(pct).saturating_add(50) / 100;
    sorted[idx.min(max_idx)]
}

// ──────────────────── report structs ────────────────────

#[derive(Debug, serde::Serialize)]
struct StressReport {
    mode: String,
    base_seed: u64,
    scenarios: Vec<ScenarioResult>,
    all_passed: bool,
    total_duration_ms: u64,
}

#[derive(Debug, serde::Serialize)]
struct ScenarioResult {
    name: String,
    passed: bool,
    runs: usize,
    cycles: PercentileStats,
    docs_indexed: PercentileStats,
    run_duration_ms: PercentileStats,
    duration_ms: u64,
    failures: Vec<String>,
}

// ──────────────────── mode switching ────────────────────

fn is_full_mode() -> bool {
    std::env::var("CST_STRESS_FULL").is_ok_and(|v| v == "1")
}

fn fast_or_full(fast: usize, full: usize) -> usize {
    if is_full_mode() { full } else { fast }
}

fn elapsed_millis_u64(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn u64_from_usize(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

#[allow(clippy::cast_precision_loss)]
fn u64_to_f64(value: u64) -> f64 {
    value as f64
}

// ──────────────────── scenario runners ────────────────────

fn stress_config(seed: u64) -> Config {
    let mut cfg = fast_config(seed);
    cfg.scenario.max_docs_per_node = 40;
    cfg.scenario.max_cycles = cfg.scenario.min_cycles.max(3);
    cfg
}

fn run_once(cfg: Config, faults: SimFaults) -> (Result<ScenarioReport, StressError>, Vec<String>) {
    let (sim, ctx) = sim_cluster(&cfg, faults);
    let result = ScenarioOrchestrator::new(ctx, cfg, InterruptFlag::new(), None).run();
    let mut leftovers = Vec::new();
    if result.is_ok() && sim.open_storage_handles() != 0 {
        leftovers.push(format!("{} storage handles left open", sim.open_storage_handles()));
    }
    (result, leftovers)
}

fn summarize(name: &str, runs: usize, reports: &[ScenarioReport], failures: Vec<String>, start: Instant) -> ScenarioResult {
    let cycles: Vec<f64> = reports.iter().map(|r| usize_to_f64(r.cycles.len())).collect();
    let docs: Vec<f64> = reports
        .iter()
        .map(|r| u64_to_f64(r.cycles.iter().map(|c| c.docs_indexed).sum()))
        .collect();
    let durations: Vec<f64> = reports.iter().map(|r| u64_to_f64(r.duration_ms)).collect();
    ScenarioResult {
        name: name.to_string(),
        passed: failures.is_empty(),
        runs,
        cycles: PercentileStats::from_values(&cycles),
        docs_indexed: PercentileStats::from_values(&docs),
        run_duration_ms: PercentileStats::from_values(&durations),
        duration_ms: elapsed_millis_u64(start),
        failures,
    }
}

/// A: plain create/index/delete churn over many seeds.
fn run_scenario_a(base_seed: u64, runs: usize) -> ScenarioResult {
    let start = Instant::now();
    let mut reports = Vec::with_capacity(runs);
    let mut failures = Vec::new();

    for i in 0..runs {
        let seed = base_seed.wrapping_add(u64_from_usize(i));
        let mut cfg = stress_config(seed);
        cfg.scenario.chaos_probability = 0.0;
        let (result, leftovers) = run_once(cfg, SimFaults::default());
        failures.extend(leftovers.into_iter().map(|l| format!("seed {seed}: {l}")));
        match result {
            Ok(report) => {
                for cycle in &report.cycles {
                    if cycle.delete_by_query && cycle.num_found > cycle.docs_indexed {
                        failures.push(format!(
                            "seed {seed} cycle {}: found {} docs after delete-by-query of {}",
                            cycle.cycle, cycle.num_found, cycle.docs_indexed
                        ));
                    }
                    if !cycle.delete_by_query && cycle.num_found != cycle.docs_indexed {
                        failures.push(format!(
                            "seed {seed} cycle {}: indexed {} but found {}",
                            cycle.cycle, cycle.docs_indexed, cycle.num_found
                        ));
                    }
                }
                reports.push(report);
            }
            Err(e) => failures.push(format!("seed {seed}: {e}")),
        }
    }

    summarize("A: Lifecycle churn", runs, &reports, failures, start)
}

/// B: every run ends in a chaos cycle.
fn run_scenario_b(base_seed: u64, runs: usize) -> ScenarioResult {
    let start = Instant::now();
    let mut reports = Vec::with_capacity(runs);
    let mut failures = Vec::new();

    for i in 0..runs {
        let seed = base_seed.wrapping_add(1_000).wrapping_add(u64_from_usize(i));
        let mut cfg = stress_config(seed);
        cfg.scenario.min_cycles = 1;
        cfg.scenario.max_cycles = 1;
        cfg.scenario.chaos_probability = 1.0;
        let (result, leftovers) = run_once(cfg, SimFaults::default());
        failures.extend(leftovers.into_iter().map(|l| format!("seed {seed}: {l}")));
        match result {
            Ok(report) => {
                match &report.chaos {
                    Some(chaos) if chaos.safe_mode_exit == CancelOutcome::AlreadyCancelled => {
                        failures.push(format!("seed {seed}: safe-mode exit settled twice"));
                    }
                    Some(_) => {}
                    None => failures.push(format!("seed {seed}: chaos cycle did not run")),
                }
                reports.push(report);
            }
            Err(e) => failures.push(format!("seed {seed}: {e}")),
        }
    }

    summarize("B: Chaos every run", runs, &reports, failures, start)
}

/// C: injected faults must surface as assertion failures, never as a pass.
fn run_scenario_c(base_seed: u64, runs: usize) -> ScenarioResult {
    let start = Instant::now();
    let mut failures = Vec::new();
    let faults = [
        (
            "leak_data_dirs",
            SimFaults {
                leak_data_dirs: true,
                ..SimFaults::default()
            },
            "CST-3001",
        ),
        (
            "ignore_delete_by_query",
            SimFaults {
                ignore_delete_by_query: true,
                ..SimFaults::default()
            },
            "CST-3002",
        ),
        (
            "omit_data_dir_field",
            SimFaults {
                omit_data_dir_field: true,
                ..SimFaults::default()
            },
            "CST-3003",
        ),
    ];

    for i in 0..runs {
        let seed = base_seed.wrapping_add(2_000).wrapping_add(u64_from_usize(i));
        for (label, fault, expected) in &faults {
            let mut cfg = stress_config(seed);
            cfg.scenario.min_cycles = 1;
            cfg.scenario.max_cycles = 1;
            cfg.scenario.chaos_probability = 0.0;
            cfg.scenario.delete_by_query_probability = 1.0;
            let (result, _) = run_once(cfg, *fault);
            match result {
                Ok(_) => failures.push(format!("seed {seed}: {label} went undetected")),
                Err(e) if e.code() != *expected => failures.push(format!(
                    "seed {seed}: {label} surfaced as {} instead of {expected}: {e}",
                    e.code()
                )),
                Err(_) => {}
            }
        }
    }

    summarize("C: Fault detection", runs, &[], failures, start)
}

// ──────────────────── determinism verification ────────────────────

fn verify_determinism(seed: u64) -> Vec<String> {
    let shape = |report: &ScenarioReport| {
        report
            .cycles
            .iter()
            .map(|c| (c.topology, c.docs_indexed, c.delete_by_query, c.num_found))
            .collect::<Vec<_>>()
    };
    let mut cfg = stress_config(seed);
    cfg.scenario.chaos_probability = 0.0;
    let (r1, _) = run_once(cfg.clone(), SimFaults::default());
    let (r2, _) = run_once(cfg, SimFaults::default());

    let mut mismatches = Vec::new();
    match (r1, r2) {
        (Ok(a), Ok(b)) => {
            if a.plan != b.plan {
                mismatches.push(format!("plans differ for seed {seed}"));
            }
            if shape(&a) != shape(&b) {
                mismatches.push(format!("cycle shapes differ for seed {seed}"));
            }
        }
        (a, b) => mismatches.push(format!(
            "seed {seed} did not pass twice: {:?} / {:?}",
            a.err(),
            b.err()
        )),
    }
    mismatches
}

// ──────────────────── Individual test functions ────────────────────

const DEFAULT_SEED: u64 = 0xC011_EC71_0000_0001;

#[test]
fn stress_a_lifecycle_churn() {
    let result = run_scenario_a(DEFAULT_SEED, fast_or_full(4, 40));
    assert!(
        result.passed,
        "Scenario A failed ({} failures): {:?}",
        result.failures.len(),
        result.failures
    );

    let mismatches = verify_determinism(DEFAULT_SEED);
    assert!(mismatches.is_empty(), "Determinism failed: {mismatches:?}");
}

#[test]
fn stress_b_chaos_every_run() {
    let result = run_scenario_b(DEFAULT_SEED, fast_or_full(3, 30));
    assert!(
        result.passed,
        "Scenario B failed ({} failures): {:?}",
        result.failures.len(),
        result.failures
    );
}

#[test]
fn stress_c_fault_detection() {
    let result = run_scenario_c(DEFAULT_SEED, fast_or_full(2, 20));
    assert!(
        result.passed,
        "Scenario C failed ({} failures): {:?}",
        result.failures.len(),
        result.failures
    );
}

// ──────────────────── Aggregate report ────────────────────

#[test]
fn stress_aggregate_report() {
    let seed = DEFAULT_SEED;
    let start = Instant::now();

    let scenarios = vec![
        run_scenario_a(seed, fast_or_full(2, 20)),
        run_scenario_b(seed, fast_or_full(2, 20)),
        run_scenario_c(seed, fast_or_full(1, 10)),
    ];

    let all_passed = scenarios.iter().all(|s| s.passed);
    let report = StressReport {
        mode: if is_full_mode() {
            "full".to_string()
        } else {
            "fast".to_string()
        },
        base_seed: seed,
        scenarios,
        all_passed,
        total_duration_ms: elapsed_millis_u64(start),
    };

    let json = serde_json::to_string_pretty(&report).expect("serialize stress report");

    if let Ok(dir) = std::env::var("CST_STRESS_REPORT_DIR") {
        let path = std::path::Path::new(&dir).join("stress_harness_report.json");
        std::fs::create_dir_all(&dir).ok();
        std::fs::write(&path, &json).expect("write stress report");
        eprintln!("Stress report written to {}", path.display());
    }

    eprintln!("--- STRESS HARNESS REPORT ---");
    eprintln!("{json}");
    eprintln!("--- END REPORT ---");

    assert!(report.all_passed, "Some stress scenarios failed");
}
