//! Scenario execution engine.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::config::StressConfig;
use crate::error::HarnessError;
use crate::scenarios::{Scenario, ScenarioResult};
use crate::structured_log::{ArtifactIndex, LogEmitter, LogLevel, Outcome, now_utc};

pub const LOG_FILE: &str = "stress.log.jsonl";
pub const REPORT_FILE: &str = "stress.report.json";
pub const INDEX_FILE: &str = "stress.artifacts.json";

/// Trace ids are `<run_id>::<scope>::<seq>`, so a run id may not contain
/// the separator.
pub fn validate_run_id(run_id: &str) -> Result<(), HarnessError> {
    if run_id.trim().is_empty() || run_id.contains("::") {
        return Err(HarnessError::InvalidRunId(run_id.to_string()));
    }
    Ok(())
}

/// Machine-readable summary of one stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub run_id: String,
    pub generated_utc: String,
    pub config: StressConfig,
    pub ok: bool,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<ScenarioResult>,
}

impl StressReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Paths written by [`StressRunner::run_to_dir`].
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub log: PathBuf,
    pub report: PathBuf,
    pub index: PathBuf,
}

/// Runs scenarios and records every step as structured evidence.
pub struct StressRunner {
    pub run_id: String,
    pub config: StressConfig,
}

impl StressRunner {
    #[must_use]
    pub fn new(run_id: impl Into<String>, config: StressConfig) -> Self {
        Self {
            run_id: run_id.into(),
            config,
        }
    }

    /// Run `scenarios` in order, logging to `emitter`.
    ///
    /// A scenario that cannot be carried out (spawn failure, clock failure)
    /// is logged as an error and aborts the run.
    pub fn run(
        &self,
        scenarios: &[Scenario],
        emitter: &mut LogEmitter,
    ) -> Result<StressReport, HarnessError> {
        validate_run_id(&self.run_id)?;
        let run_start = Instant::now();
        let entry = emitter
            .entry("run", LogLevel::Info, "run_start")
            .with_details(serde_json::to_value(&self.config)?);
        emitter.emit_entry(entry)?;

        let mut results = Vec::with_capacity(scenarios.len());
        for &scenario in scenarios {
            let id = scenario.as_str();
            let entry = emitter
                .entry(id, LogLevel::Info, "scenario_start")
                .with_scenario(id)
                .with_primitive(scenario.primitive())
                .with_thread_count(self.config.threads);
            emitter.emit_entry(entry)?;

            let result = match scenario.run(&self.config) {
                Ok(result) => result,
                Err(err) => {
                    let mut entry = emitter
                        .entry(id, LogLevel::Error, "scenario_error")
                        .with_scenario(id)
                        .with_primitive(scenario.primitive())
                        .with_outcome(Outcome::Error)
                        .with_details(serde_json::json!({ "error": err.to_string() }));
                    if let HarnessError::Thread(thread_err) = &err
                        && let Some(errno) = thread_err.errno()
                    {
                        entry = entry.with_errno(errno);
                    }
                    emitter.emit_entry(entry)?;
                    emitter.flush()?;
                    return Err(err);
                }
            };

            let (level, outcome) = if result.passed() {
                (LogLevel::Info, Outcome::Pass)
            } else {
                (LogLevel::Error, Outcome::Fail)
            };
            let mut details = result.details.clone();
            if !result.failures.is_empty() {
                details.insert("failures".to_string(), result.failures.clone().into());
            }
            let entry = emitter
                .entry(id, level, "scenario_end")
                .with_scenario(id)
                .with_primitive(result.primitive)
                .with_outcome(outcome)
                .with_thread_count(result.thread_count)
                .with_duration_ms(u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX))
                .with_op_counts(result.op_counts.clone())
                .with_details(serde_json::Value::Object(details));
            emitter.emit_entry(entry)?;
            results.push(result);
        }

        let passed = results.iter().filter(|r| r.passed()).count();
        let report = StressReport {
            run_id: self.run_id.clone(),
            generated_utc: now_utc(),
            config: self.config.clone(),
            ok: passed == results.len(),
            total: results.len(),
            passed,
            failed: results.len() - passed,
            results,
        };
        let entry = emitter
            .entry("run", LogLevel::Info, "run_end")
            .with_outcome(if report.ok { Outcome::Pass } else { Outcome::Fail })
            .with_duration_ms(
                u64::try_from(run_start.elapsed().as_millis()).unwrap_or(u64::MAX),
            )
            .with_details(serde_json::json!({
                "total": report.total,
                "passed": report.passed,
                "failed": report.failed,
            }));
        emitter.emit_entry(entry)?;
        emitter.flush()?;
        Ok(report)
    }

    /// Run into `config.out_dir`: JSONL log, JSON report, and an artifact
    /// index hashing both.
    pub fn run_to_dir(
        &self,
        scenarios: &[Scenario],
    ) -> Result<(StressReport, RunArtifacts), HarnessError> {
        validate_run_id(&self.run_id)?;
        let dir = self.config.out_dir.as_path();
        std::fs::create_dir_all(dir)?;
        let artifacts = RunArtifacts {
            log: dir.join(LOG_FILE),
            report: dir.join(REPORT_FILE),
            index: dir.join(INDEX_FILE),
        };

        let report = {
            let mut emitter = LogEmitter::to_file(&artifacts.log, &self.run_id)?;
            self.run(scenarios, &mut emitter)?
        };
        std::fs::write(&artifacts.report, report.to_json()?)?;

        let mut index = ArtifactIndex::new(&self.run_id);
        index.add_file(&artifacts.log, file_name(&artifacts.log), "log")?;
        index.add_file(&artifacts.report, file_name(&artifacts.report), "report")?;
        std::fs::write(&artifacts.index, index.to_json()?)?;

        Ok((report, artifacts))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured_log::validate_log_line;

    #[test]
    fn run_logs_start_and_end_for_each_scenario() {
        let cfg = StressConfig::default().with_threads(2).with_iterations(50);
        let runner = StressRunner::new("unit-run", cfg);
        let mut emitter = LogEmitter::to_buffer("unit-run");
        let report = runner
            .run(&[Scenario::CounterFanout, Scenario::CpuCores], &mut emitter)
            .unwrap();

        assert!(report.ok, "{:?}", report.results);
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 2);

        let text = emitter.buffered().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        // run_start + 2 * (start, end) + run_end
        assert_eq!(lines.len(), 6);
        for (i, line) in lines.iter().enumerate() {
            let entry = validate_log_line(line, i + 1).unwrap();
            assert!(entry.trace_id.starts_with("unit-run::"));
        }
        assert!(lines[0].contains("\"run_start\""));
        assert!(lines[2].contains("\"outcome\":\"pass\""));
        assert!(lines[5].contains("\"run_end\""));
    }

    #[test]
    fn run_ids_with_trace_separator_are_rejected() {
        for bad in ["nightly::7", "", "  "] {
            let runner = StressRunner::new(bad, StressConfig::default());
            let mut emitter = LogEmitter::to_buffer(bad);
            let err = runner.run(&[Scenario::CpuCores], &mut emitter).unwrap_err();
            assert!(matches!(err, HarnessError::InvalidRunId(_)), "{bad:?}: {err}");
            assert_eq!(emitter.buffered().unwrap(), "");
        }
        assert!(validate_run_id("nightly-7:a").is_ok());
    }

    #[test]
    fn accepted_run_id_yields_valid_trace_ids() {
        let runner = StressRunner::new("nightly:7", StressConfig::default());
        let mut emitter = LogEmitter::to_buffer("nightly:7");
        runner.run(&[Scenario::CpuCores], &mut emitter).unwrap();
        let text = emitter.buffered().unwrap();
        for (i, line) in text.lines().enumerate() {
            validate_log_line(line, i + 1).unwrap();
        }
    }

    #[test]
    fn failing_scenario_marks_report_not_ok() {
        let cfg = StressConfig::default()
            .with_samples(1)
            .with_timed_wait_ms(40)
            .with_timed_wait_mode(forge_threads_core::TimedWaitMode::LegacyEpoch);
        let runner = StressRunner::new("legacy-run", cfg);
        let mut emitter = LogEmitter::to_buffer("legacy-run");
        let report = runner
            .run(&[Scenario::TimedWaitJitter], &mut emitter)
            .unwrap();
        assert!(!report.ok);
        assert_eq!(report.failed, 1);
        let text = emitter.buffered().unwrap();
        assert!(text.contains("\"outcome\":\"fail\""));
        assert!(text.contains("failures"));
    }
}
