//! Suite results: per-scenario verdicts, the console summary, and the
//! machine-readable `report.json`.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

/// Verdict for one scenario.
///
/// `Anomaly` means the scenario produced data but something off-script
/// happened along the way (forced kills, degraded impairment); the run is
/// usable but deserves a look. Only `Failed` fails the suite.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ScenarioStatus {
    Passed,
    Anomaly(String),
    Failed(String),
    Skipped,
}

impl ScenarioStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ScenarioStatus::Passed => "PASS",
            ScenarioStatus::Anomaly(_) => "ANOMALY",
            ScenarioStatus::Failed(_) => "FAIL",
            ScenarioStatus::Skipped => "SKIP",
        }
    }

    fn detail(&self) -> Option<&str> {
        match self {
            ScenarioStatus::Anomaly(d) | ScenarioStatus::Failed(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub section: String,
    pub name: String,
    pub status: ScenarioStatus,
    pub duration_ms: u64,
    /// The requested impairment could not be (fully) installed.
    pub impairment_degraded: bool,
    pub server_forced: bool,
    pub clients_forced: u32,
    pub csv: Option<PathBuf>,
    pub pcap: Option<PathBuf>,
}

impl ScenarioOutcome {
    /// Outcome for a scenario that never started.
    pub fn skipped(section: &str, name: &str) -> Self {
        Self {
            section: section.to_string(),
            name: name.to_string(),
            status: ScenarioStatus::Skipped,
            duration_ms: 0,
            impairment_degraded: false,
            server_forced: false,
            clients_forced: 0,
            csv: None,
            pcap: None,
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.section, self.name)
    }
}

#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub started_at: DateTime<Local>,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl SuiteReport {
    pub fn new() -> Self {
        Self {
            started_at: Local::now(),
            outcomes: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: ScenarioOutcome) {
        match &outcome.status {
            ScenarioStatus::Passed => {
                tracing::info!(scenario = %outcome.slug(), "scenario passed")
            }
            ScenarioStatus::Anomaly(detail) => {
                tracing::warn!(scenario = %outcome.slug(), detail = %detail, "scenario passed with anomaly")
            }
            ScenarioStatus::Failed(detail) => {
                tracing::error!(scenario = %outcome.slug(), detail = %detail, "scenario failed")
            }
            ScenarioStatus::Skipped => {
                tracing::info!(scenario = %outcome.slug(), "scenario skipped")
            }
        }
        self.outcomes.push(outcome);
    }

    pub fn passed(&self) -> usize {
        self.count(|s| matches!(s, ScenarioStatus::Passed))
    }

    pub fn anomalies(&self) -> usize {
        self.count(|s| matches!(s, ScenarioStatus::Anomaly(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ScenarioStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ScenarioStatus::Skipped))
    }

    fn count(&self, pred: impl Fn(&ScenarioStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    /// Anomalies are informational; only failures sink the suite.
    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    /// Human-readable summary for the console, one line per scenario plus
    /// a detail line where there is one.
    pub fn render(&self) -> String {
        let bar = "=".repeat(70);
        let mut out = String::new();
        let _ = writeln!(out, "{bar}");
        let _ = writeln!(out, " scenario suite report");
        let _ = writeln!(out, "{bar}");
        for o in &self.outcomes {
            let _ = writeln!(
                out,
                " {:<8} {:<42} {:>6.1}s",
                o.status.label(),
                o.slug(),
                o.duration_ms as f64 / 1000.0
            );
            if let Some(detail) = o.status.detail() {
                let _ = writeln!(out, "          {detail}");
            }
        }
        let _ = writeln!(out, "{bar}");
        let _ = writeln!(
            out,
            " {} scenarios: {} passed, {} anomalies, {} failed, {} skipped",
            self.outcomes.len(),
            self.passed(),
            self.anomalies(),
            self.failed(),
            self.skipped()
        );
        let _ = writeln!(out, "{bar}");
        out
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

impl Default for SuiteReport {
    fn default() -> Self {
        Self::new()
    }
}
