//! V2V Deterministic Simulator CLI
//!
//! Run walker-sharing scenarios against a virtual clock.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use v2v_core::SensorConfig;
use v2v_sim::scenarios::ScenarioId;
use v2v_sim::{ScenarioResult, ScenarioRunner, SimError};

/// V2V walker-sharing simulation CLI
#[derive(Parser, Debug)]
#[command(name = "v2v-sim")]
#[command(about = "Run deterministic walker-sharing simulations", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Number of vehicles in the crowd scenario
    #[arg(short = 'n', long, default_value = "8")]
    vehicles: usize,

    /// Number of walkers in the crowd scenario
    #[arg(short, long, default_value = "40")]
    walkers: usize,

    /// Scenario to run (handoff, out_of_range, convoy, crowd, teardown, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulation duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Scan frame rate in Hz
    #[arg(long, default_value = "30")]
    tick_rate: u32,

    /// Sensor config JSON file (trace_range, broadcast_radius)
    #[arg(long)]
    config: Option<String>,

    /// Override the scan trace range
    #[arg(long)]
    trace_range: Option<f64>,

    /// Override the broadcast radius
    #[arg(long)]
    broadcast_radius: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export frames of a single scenario to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn sensor_config(args: &Args) -> Result<SensorConfig, SimError> {
    let mut sensor = match &args.config {
        Some(path) => SensorConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => SensorConfig::default(),
    };
    if let Some(range) = args.trace_range {
        sensor = sensor.with_trace_range(range);
    }
    if let Some(radius) = args.broadcast_radius {
        sensor = sensor.with_broadcast_radius(radius);
    }
    sensor.validate()?;
    Ok(sensor)
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!("✓ {} (seed={}) PASSED", result.scenario.name(), result.seed);
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn run(args: &Args, scenarios: &[ScenarioId], base_seed: u64) -> Result<bool, SimError> {
    let sensor = sensor_config(args)?;
    let runner_for = |seed: u64| {
        ScenarioRunner::new(seed, args.vehicles)
            .with_walkers(args.walkers)
            .with_tick_rate(args.tick_rate)
            .with_duration(args.duration)
            .with_sensor(sensor)
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        let [scenario] = scenarios else {
            error!("--export only supports a single scenario, not 'all'");
            return Ok(false);
        };

        info!("Running with export to: {}", export_path);
        let (result, export) = runner_for(base_seed).run_recorded(*scenario);
        export.write_to_file(export_path)?;
        info!("Exported {} frames to {}", export.frames.len(), export_path);
        report(&result);
        return Ok(result.passed);
    }

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(seed);

        for scenario in scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let failed: Vec<&ScenarioResult> = all_results.iter().filter(|r| !r.passed).collect();

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed.len(),
            "failed": failed.len(),
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed.is_empty() {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed.len(), total);
            for result in &failed {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    Ok(failed.is_empty())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    if !args.json {
        info!("V2V Walker Sharing Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: handoff, out_of_range, convoy, crowd, teardown, all");
                return ExitCode::FAILURE;
            }
        }
    };

    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    match run(&args, &scenarios, base_seed) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("simulation failed: {e}");
            ExitCode::FAILURE
        }
    }
}
