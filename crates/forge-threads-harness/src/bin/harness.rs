//! CLI entrypoint for the forge threading stress harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use forge_threads_core::TimedWaitMode;
use forge_threads_harness::config::{MUTEX_KIND_ENV, parse_mutex_kind};
use forge_threads_harness::runner::validate_run_id;
use forge_threads_harness::structured_log::validate_log_file;
use forge_threads_harness::{Scenario, StressConfig, StressRunner};

/// Stress and evidence tooling for the forge threading primitives.
#[derive(Debug, Parser)]
#[command(name = "forge-threads-harness")]
#[command(about = "Stress harness for the forge threading primitives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run stress scenarios and write a JSONL log, report, and artifact index.
    Stress {
        /// Scenario to run (repeatable). Runs every scenario when omitted.
        #[arg(long = "scenario")]
        scenarios: Vec<String>,
        /// Worker threads per scenario.
        #[arg(long)]
        threads: Option<usize>,
        /// Operations per worker.
        #[arg(long)]
        iterations: Option<u32>,
        /// Timeout requested by each timed-wait sample (milliseconds).
        #[arg(long)]
        timed_wait_ms: Option<u32>,
        /// Number of timed-wait samples.
        #[arg(long)]
        samples: Option<u32>,
        /// Timed-wait deadline policy: `deadline` or `legacy`.
        #[arg(long)]
        timed_wait_mode: Option<String>,
        /// Mutex kind contended in `mutex-handoff`: `normal`, `recursive`, or
        /// `errorcheck`.
        #[arg(long)]
        mutex_kind: Option<String>,
        /// Output directory for run artifacts.
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Run identifier used in trace ids (defaults to a timestamp). Must not
        /// contain `::`.
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Validate a structured JSONL log against the schema.
    ValidateLog {
        /// JSONL log path.
        #[arg(long)]
        log: PathBuf,
    },
    /// Print the logical CPU count as seen by the threading layer.
    CpuInfo,
    /// List available scenarios.
    ListScenarios,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    forge_threads::set_main_thread();

    match cli.command {
        Command::Stress {
            scenarios,
            threads,
            iterations,
            timed_wait_ms,
            samples,
            timed_wait_mode,
            mutex_kind,
            out_dir,
            run_id,
        } => {
            let mut cfg = StressConfig::from_env()?;
            if let Some(n) = threads {
                cfg = cfg.with_threads(n);
            }
            if let Some(n) = iterations {
                cfg = cfg.with_iterations(n);
            }
            if let Some(ms) = timed_wait_ms {
                cfg = cfg.with_timed_wait_ms(ms);
            }
            if let Some(n) = samples {
                cfg = cfg.with_samples(n);
            }
            if let Some(mode) = timed_wait_mode {
                cfg = cfg.with_timed_wait_mode(TimedWaitMode::from_str_loose(&mode));
            }
            if let Some(kind) = mutex_kind {
                cfg = cfg.with_mutex_kind(parse_mutex_kind(MUTEX_KIND_ENV, &kind)?);
            }
            if let Some(dir) = out_dir {
                cfg = cfg.with_out_dir(dir);
            }

            let selected = if scenarios.is_empty() {
                Scenario::ALL.to_vec()
            } else {
                scenarios
                    .iter()
                    .map(|name| Scenario::parse(name))
                    .collect::<Result<Vec<_>, _>>()?
            };

            let run_id = run_id.unwrap_or_else(default_run_id);
            validate_run_id(&run_id)?;
            eprintln!(
                "Running {} scenario(s) with {} thread(s), run id {run_id}",
                selected.len(),
                cfg.threads
            );
            let runner = StressRunner::new(run_id, cfg);
            let (report, artifacts) = runner.run_to_dir(&selected)?;

            for result in &report.results {
                let status = if result.passed() { "PASS" } else { "FAIL" };
                eprintln!(
                    "  {status} {:<22} {:>6} ms",
                    result.scenario.as_str(),
                    result.duration.as_millis()
                );
                for failure in &result.failures {
                    eprintln!("       {failure}");
                }
            }
            eprintln!(
                "{}/{} passed. Log: {}  Report: {}  Index: {}",
                report.passed,
                report.total,
                artifacts.log.display(),
                artifacts.report.display(),
                artifacts.index.display()
            );
            if !report.ok {
                return Err(format!("{} scenario(s) failed", report.failed).into());
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            if errors.is_empty() {
                eprintln!("{}: {lines} line(s) valid", log.display());
            } else {
                for err in &errors {
                    eprintln!("{err}");
                }
                return Err(format!(
                    "{}: {} error(s) across {lines} line(s)",
                    log.display(),
                    errors.len()
                )
                .into());
            }
        }
        Command::CpuInfo => {
            let cores = forge_threads::num_cpu_cores()?;
            println!(
                "{}",
                serde_json::json!({
                    "cores": cores,
                    "timed_wait_mode": forge_threads_core::timed_wait_mode().as_str(),
                })
            );
        }
        Command::ListScenarios => {
            for scenario in Scenario::ALL {
                println!("{scenario}");
            }
        }
    }

    Ok(())
}

fn default_run_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("stress-{secs}")
}
