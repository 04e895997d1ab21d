//! # wlansim
//!
//! CLI runner for the wlansim slot-level 802.11 MAC simulator.

use wlansim_runner::metrics_export;
use wlansim_runner::{
    build_simulation, create_simulator, format_duration, load_models, ProgressInfo, ReportWriter, RunnerError,
    SimulationStats, Simulator, Statistic,
};

use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Duration Parsing
// ============================================================================

/// Parse a duration string with units into seconds.
///
/// Supported formats:
/// - Plain number: `60` (interpreted as seconds)
/// - With unit suffix: `500ms`, `60s`, `10m`, `2h`
/// - Combined units: `1m30s`, `2s500ms`
fn parse_duration(s: &str) -> Result<f64, String> {
    let s = s.trim();

    if let Ok(secs) = s.parse::<f64>() {
        if secs > 0.0 {
            return Ok(secs);
        }
        return Err(format!("Invalid duration: '{}'", s));
    }

    let mut total_seconds = 0.0;
    let mut number = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        if number.is_empty() {
            return Err(format!("Invalid duration format: unexpected '{}' in '{}'", c, s));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", number, s))?;
        let multiplier = match c {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                0.001
            }
            's' => 1.0,
            'm' => 60.0,
            'h' => 3600.0,
            _ => return Err(format!("Unknown duration unit '{}' in '{}'. Use ms, s, m or h.", c, s)),
        };
        total_seconds += value * multiplier;
        number.clear();
    }

    if !number.is_empty() {
        let value: f64 = number
            .parse()
            .map_err(|_| format!("Invalid number '{}' in duration '{}'", number, s))?;
        total_seconds += value;
    }

    if total_seconds <= 0.0 {
        return Err(format!("Invalid duration: '{}'", s));
    }

    Ok(total_seconds)
}

// ============================================================================
// CLI Configuration
// ============================================================================

/// Output format for metrics at end of simulation.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum MetricsOutputFormat {
    /// JSON format for programmatic consumption.
    Json,
    /// Prometheus text exposition format.
    Prometheus,
}

/// wlansim - slot-level IEEE 802.11 CSMA/CA simulator
#[derive(Parser, Debug)]
#[command(name = "wlansim")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a simulation from YAML scenario files
    Run(RunnerConfig),
    /// List all emitted metrics with descriptions and labels
    Metrics,
}

/// Configuration for running a simulation
#[derive(Parser, Debug)]
pub struct RunnerConfig {
    /// Path(s) to YAML scenario file(s). Multiple files are merged in order (later overrides earlier).
    #[arg(required = true)]
    pub models: Vec<PathBuf>,

    /// Simulated duration, overriding the scenario.
    /// Accepts plain seconds or units: 10, 10s, 500ms, 2m, 1m30s
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<f64>,

    /// Statistics interval, overriding the scenario (same format as --duration)
    #[arg(short, long, value_parser = parse_duration)]
    pub interval: Option<f64>,

    /// Random seed, overriding the scenario
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Directory for the per-interval statistics files
    #[arg(short, long)]
    pub results_dir: Option<PathBuf>,

    /// Statistics to write, as codes: tb,tp,ut,md,qd,td,dj,ql,ra (default: scenario selection, else all)
    #[arg(long, value_delimiter = ',')]
    pub stats: Vec<String>,

    /// Score the backoff policy after every interval and reselect it
    #[arg(long)]
    pub adaptive: bool,

    /// Output format for metrics at end of simulation.
    #[arg(long, value_enum)]
    pub metrics_output: Option<MetricsOutputFormat>,

    /// File path to write metrics (stdout if not specified).
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Simulation
// ============================================================================

/// Run a simulation from CLI configuration.
pub fn run_simulation(config: RunnerConfig) -> Result<SimulationStats, RunnerError> {
    let metrics_recorder = if config.metrics_output.is_some() {
        let recorder = metrics_export::InMemoryRecorder::new();
        if let Err(e) = metrics::set_global_recorder(recorder.clone()) {
            eprintln!("Warning: Failed to set metrics recorder: {}", e);
            None
        } else {
            wlansim_common::metric_defs::describe_metrics();
            Some(recorder)
        }
    } else {
        None
    };

    let paths: Vec<&Path> = config.models.iter().map(|p| p.as_path()).collect();
    let mut model = load_models(&paths)?;

    {
        let settings = model.simulation_mut();
        if let Some(duration) = config.duration {
            settings.duration_ms = duration * 1000.0;
        }
        if let Some(interval) = config.interval {
            settings.interval_ms = interval * 1000.0;
        }
        if let Some(seed) = config.seed {
            settings.seed = seed;
        }
        if config.adaptive {
            settings.adaptive = true;
        }
        if !config.stats.is_empty() {
            settings.results = config.stats.clone();
        }
    }
    let settings = model.simulation().clone();

    if config.verbose {
        eprintln!(
            "Loaded scenario with {} nodes from {} file(s)",
            model.nodes().len(),
            config.models.len()
        );
        eprintln!("Using seed: {}", settings.seed);
    }

    let statistics = Statistic::parse_selection(&settings.results)?;
    let simulation = build_simulation(&model)?;
    let mut simulator = create_simulator(simulation, &settings);

    if config.verbose {
        eprintln!(
            "PHY {} with {} us slots, {} ms intervals, {} strategy candidates",
            settings.mac.phy,
            simulator.slot_ns() / 1000,
            settings.interval_ms,
            simulator.selector().candidates().len()
        );
    }

    let mut report = match &config.results_dir {
        Some(dir) => Some(ReportWriter::create(dir, &statistics)?),
        None => None,
    };

    eprintln!("Running simulation for {:.3} seconds...", settings.duration_ms / 1000.0);

    let print_progress = |_simulator: &Simulator, progress: ProgressInfo, is_final: bool| {
        if is_final {
            return;
        }
        eprintln!(
            "  [{:5.1}%] sim: {:.1}s | intervals: {} | speed: {:.1}x | elapsed: {} | ETA: {}",
            progress.progress_percent,
            progress.sim_time_s,
            progress.intervals,
            progress.time_multiplier,
            format_duration(progress.wall_elapsed),
            format_duration(progress.estimated_remaining)
        );
    };

    let stats = simulator.run_with_progress(None, report.as_mut(), print_progress)?;

    print_summary_table(&simulator, &stats);

    if let Some(ref dir) = config.results_dir {
        if config.verbose {
            eprintln!("Statistics written to: {}", dir.display());
        }
    }

    if let (Some(format), Some(recorder)) = (config.metrics_output, metrics_recorder) {
        let snapshot = recorder.snapshot();
        let mut writer: Box<dyn Write> = match &config.metrics_file {
            Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
            None => Box::new(std::io::stdout()),
        };
        match format {
            MetricsOutputFormat::Json => metrics_export::export_json(&snapshot, &mut writer)?,
            MetricsOutputFormat::Prometheus => metrics_export::export_prometheus(&snapshot, &mut writer)?,
        }
        writer.flush()?;

        if config.verbose {
            if let Some(ref path) = config.metrics_file {
                eprintln!("Metrics exported to: {}", path.display());
            }
        }
    }

    Ok(stats)
}

/// Print a per-node summary of the run to stderr.
fn print_summary_table(simulator: &Simulator, stats: &SimulationStats) {
    eprintln!();
    eprintln!(
        "Simulated {:.3}s ({} slots, {} intervals) in {} ms",
        stats.simulated_time_s, stats.slots, stats.intervals, stats.wall_time_ms
    );
    eprintln!(
        "Slots: {} empty, {} success, {} collision, {} busy",
        stats.channel.empty_slots, stats.channel.success_slots, stats.channel.collision_slots, stats.channel.frozen_slots
    );
    eprintln!();
    eprintln!(
        "{:>6} {:>14} {:>10} {:>10} {:>12} {:>12} {:>8}",
        "Node", "Thr (bps)", "Delivered", "Collided", "Delay (ms)", "Jitter (ms)", "Queue"
    );
    for node in &stats.nodes {
        eprintln!(
            "{:>6} {:>14.0} {:>10} {:>10} {:>12.3} {:>12.3} {:>8}",
            node.id,
            node.statistics.throughput_bps,
            node.successful_transmissions,
            node.collisions,
            node.statistics.total_delay_ms,
            node.statistics.jitter_ms,
            node.queued
        );
    }
    eprintln!(
        "{:>6} {:>14.0} {:>10} {:>10} {:>12.3} {:>12.3}",
        "System",
        stats.system.throughput_bps,
        stats.nodes.iter().map(|n| n.successful_transmissions).sum::<u64>(),
        stats.nodes.iter().map(|n| n.collisions).sum::<u64>(),
        stats.system.total_delay_ms,
        stats.system.jitter_ms
    );
    if simulator.selector().candidates().len() > 1 {
        eprintln!();
        eprint!("{}", simulator.selector().report());
    }
}

fn main() -> Result<(), RunnerError> {
    // Initialize tracing subscriber with RUST_LOG env filter
    // Default to "warn" level if RUST_LOG is not set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(config) => {
            let metrics_to_stdout = config.metrics_output.is_some() && config.metrics_file.is_none();
            let stats = run_simulation(config)?;

            // Output stats as JSON to stdout only if not exporting metrics to stdout
            if !metrics_to_stdout {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
        }
        Commands::Metrics => {
            print_metrics_info();
        }
    }

    Ok(())
}

/// Print information about all emitted metrics
fn print_metrics_info() {
    use wlansim_common::metric_defs;

    println!("wlansim Available Metrics");
    println!("=========================\n");

    let categories = [
        ("Channel", "wlansim.channel."),
        ("MAC", "wlansim.mac."),
        ("Queue", "wlansim.queue."),
        ("Strategy", "wlansim.strategy."),
    ];

    for (category_name, prefix) in categories {
        println!("## {}\n", category_name);

        for metric in metric_defs::ALL {
            if metric.name.starts_with(prefix) {
                println!("  {}", metric.name);
                println!("    Type: {}", metric.kind);
                let unit_str = metric.unit_str();
                if !unit_str.is_empty() {
                    println!("    Unit: {}", unit_str);
                }
                if !metric.description.is_empty() {
                    println!("    Description: {}", metric.description);
                }
                if !metric.labels.is_empty() {
                    println!("    Labels: {}", metric.labels.join(", "));
                }
                println!();
            }
        }
    }

    println!("## Usage Examples\n");
    println!("  # Run a scenario and export metrics by node:");
    println!("  wlansim run scenarios/basic.yaml --duration 10s --metrics-output json\n");
    println!("  # Write throughput and delay files every 500 ms:");
    println!("  wlansim run scenarios/hidden.yaml --interval 500ms --results-dir out --stats tb,td\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_plain_and_units() {
        assert_eq!(parse_duration("10").unwrap(), 10.0);
        assert_eq!(parse_duration("10s").unwrap(), 10.0);
        assert_eq!(parse_duration("2m").unwrap(), 120.0);
        assert_eq!(parse_duration("1h").unwrap(), 3600.0);
        assert!((parse_duration("500ms").unwrap() - 0.5).abs() < 1e-12);
        assert!((parse_duration("1m30s").unwrap() - 90.0).abs() < 1e-12);
        assert!((parse_duration("2s500ms").unwrap() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("0").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from([
            "wlansim",
            "run",
            "a.yaml",
            "b.yaml",
            "--duration",
            "2s",
            "--stats",
            "tb,dj",
            "--adaptive",
            "--metrics-output",
            "prometheus",
        ]);
        let Commands::Run(config) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.duration, Some(2.0));
        assert_eq!(config.stats, vec!["tb".to_string(), "dj".to_string()]);
        assert!(config.adaptive);
        assert!(matches!(config.metrics_output, Some(MetricsOutputFormat::Prometheus)));
    }
}
