//! Error taxonomy for the orchestration engine.
//!
//! Variants map to the stage that produced the failure so callers can pick
//! the right policy: environment problems abort the suite in preflight,
//! impairment and capture problems degrade the affected scenario, process
//! problems fail it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// Missing privilege, missing tool, or unusable configuration.
    /// Detected in preflight; fatal for the whole suite.
    #[error("environment: {0}")]
    Environment(String),

    /// `tc` invocation failed while installing or removing a netem rule.
    #[error("impairment: {0}")]
    Impairment(String),

    /// A managed child process failed to launch or died prematurely.
    #[error("process {label}: {reason}")]
    Process { label: String, reason: String },

    /// `tcpdump` could not be started or exited immediately.
    #[error("capture: {0}")]
    Capture(String),

    /// Operator interrupt observed mid-scenario.
    #[error("interrupted by operator")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Shorthand for process-stage failures.
    pub fn process(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Process {
            label: label.into(),
            reason: reason.into(),
        }
    }
}
