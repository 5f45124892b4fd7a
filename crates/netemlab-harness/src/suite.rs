//! Suite orchestration: preflight, run directory, scenario loop, report.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::netem::ImpairmentController;
use crate::report::{ScenarioOutcome, SuiteReport};
use crate::runner::ScenarioRunner;
use crate::scenario::{Phase, Scenario};
use crate::teardown::{CleanupGuard, TeardownSequencer};

pub struct SuiteDriver {
    cfg: HarnessConfig,
    scenarios: Vec<Scenario>,
    interrupt: Arc<AtomicBool>,
}

impl SuiteDriver {
    pub fn new(cfg: HarnessConfig, scenarios: Vec<Scenario>, interrupt: Arc<AtomicBool>) -> Self {
        Self {
            cfg,
            scenarios,
            interrupt,
        }
    }

    /// Run every scenario in order. A failing scenario does not stop the
    /// suite; an operator interrupt finishes the current teardown and marks
    /// the rest skipped. Returns the run directory and the report that was
    /// also written there as `report.json`.
    pub fn run(&self) -> Result<(PathBuf, SuiteReport), HarnessError> {
        self.preflight()?;

        let run_root = self.cfg.out_root.join(run_dir_name(Local::now()));
        std::fs::create_dir_all(&run_root)?;
        tracing::info!(
            run_root = %run_root.display(),
            scenarios = self.scenarios.len(),
            "suite starting"
        );

        let node_bin = self.cfg.node_binary();
        let sequencer = TeardownSequencer::new(&node_bin, self.cfg.timing.teardown_settle());
        let netem = ImpairmentController::new(&self.cfg.interface);
        let mut guard = CleanupGuard::new(&sequencer, netem);

        // Clean slate before the first scenario, in case a previous run
        // crashed out with rules or processes still around.
        sequencer.clean_all(guard.netem());

        let mut report = SuiteReport::new();
        for scenario in &self.scenarios {
            if self.interrupt.load(Ordering::SeqCst) {
                report.push(ScenarioOutcome::skipped(&scenario.section, &scenario.name));
                continue;
            }
            let mut runner =
                ScenarioRunner::new(&self.cfg, guard.netem(), &sequencer, &self.interrupt);
            report.push(runner.run(scenario, &run_root));
        }

        sequencer.clean_all(guard.netem());
        guard.disarm();

        let report_path = run_root.join("report.json");
        report.write_json(&report_path)?;
        tracing::info!(report = %report_path.display(), "suite finished");
        Ok((run_root, report))
    }

    /// Fail fast on missing privileges or tools instead of half-running a
    /// suite that cannot install its impairments.
    fn preflight(&self) -> Result<(), HarnessError> {
        if needs_impairment(&self.scenarios) {
            if !is_root() {
                return Err(HarnessError::Environment(
                    "netem impairment requires root".into(),
                ));
            }
            let out = Command::new("tc")
                .args(["qdisc", "show", "dev", &self.cfg.interface])
                .output()
                .map_err(|e| HarnessError::Environment(format!("tc unavailable: {e}")))?;
            if !out.status.success() {
                return Err(HarnessError::Environment(format!(
                    "interface {} not usable: {}",
                    self.cfg.interface,
                    String::from_utf8_lossy(&out.stderr).trim()
                )));
            }
        }

        if self.scenarios.iter().any(|s| s.capture) {
            if !is_root() {
                return Err(HarnessError::Environment(
                    "packet capture requires root".into(),
                ));
            }
            Command::new("tcpdump")
                .arg("--version")
                .output()
                .map_err(|e| HarnessError::Environment(format!("tcpdump unavailable: {e}")))?;
        }

        Ok(())
    }
}

/// Whether any scenario will touch qdisc state.
fn needs_impairment(scenarios: &[Scenario]) -> bool {
    scenarios.iter().any(|s| {
        !s.profile.is_unimpaired()
            || s.timeline.iter().any(|p| matches!(p, Phase::Impair(_)))
    })
}

fn run_dir_name(now: DateTime<Local>) -> String {
    format!("run-{}", now.format("%Y%m%d-%H%M%S"))
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::netem::NetemProfile;
    use chrono::TimeZone;

    #[test]
    fn run_dir_name_is_sortable() {
        let when = Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 32).unwrap();
        assert_eq!(run_dir_name(when), "run-20250309-140532");
    }

    #[test]
    fn clean_suite_needs_no_impairment() {
        let suite = catalog::filter(
            catalog::standard_suite(10, 1.0, 1, false),
            &["load".to_string()],
            &[],
        );
        assert!(!suite.is_empty());
        assert!(!needs_impairment(&suite));
    }

    #[test]
    fn impair_phase_counts_even_with_clean_base_profile() {
        let mut suite = catalog::filter(
            catalog::standard_suite(10, 1.0, 1, false),
            &[],
            &["blackout_recovery".to_string()],
        );
        assert_eq!(suite.len(), 1);
        assert!(suite[0].profile.is_unimpaired());
        assert!(needs_impairment(&suite));

        suite[0].timeline.retain(|p| !matches!(p, Phase::Impair(_)));
        assert!(!needs_impairment(&suite));

        suite[0].profile = NetemProfile::loss(5.0);
        assert!(needs_impairment(&suite));
    }
}
