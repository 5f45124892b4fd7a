//! Guaranteed cleanup of host state.
//!
//! A scenario leaves two kinds of residue on the host: a netem qdisc on the
//! interface and stray node processes. Both survive a harness crash, so
//! cleanup is idempotent and runs from three places: between scenarios, in
//! a drop guard at the end of the suite, and from the Ctrl-C handler via
//! [`emergency_clean`].

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use crate::netem::ImpairmentController;

/// pkill patterns for our node processes, qualified by role so they never
/// match the harness itself (whose argv can contain the binary path).
fn node_patterns(node_bin: &Path) -> Vec<String> {
    let name = node_bin
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| node_bin.to_string_lossy().into_owned());
    vec![format!("{name} server"), format!("{name} client")]
}

fn kill_stray_nodes(node_bin: &Path) {
    for pattern in node_patterns(node_bin) {
        match Command::new("pkill").arg("-9").arg("-f").arg(&pattern).output() {
            Ok(out) if out.status.success() => {
                tracing::warn!(pattern = %pattern, "killed stray node processes");
            }
            Ok(_) => {} // nothing matched
            Err(e) => tracing::debug!(error = %e, "pkill unavailable"),
        }
    }
}

pub struct TeardownSequencer {
    node_bin: std::path::PathBuf,
    settle: Duration,
}

impl TeardownSequencer {
    pub fn new(node_bin: &Path, settle: Duration) -> Self {
        Self {
            node_bin: node_bin.to_path_buf(),
            settle,
        }
    }

    /// Remove impairment and stray processes, then give the kernel a
    /// moment before the next scenario touches the interface.
    pub fn clean_all(&self, netem: &mut ImpairmentController) {
        if let Err(e) = netem.clear() {
            tracing::warn!(error = %e, "failed to clear impairment during cleanup");
        }
        kill_stray_nodes(&self.node_bin);
        std::thread::sleep(self.settle);
    }
}

/// Stateless cleanup for the interrupt path. Safe to call from a signal
/// handler context thread with no access to the suite's state.
pub fn emergency_clean(interface: &str, node_bin: &Path) {
    let _ = Command::new("tc")
        .args(["qdisc", "del", "dev", interface, "root"])
        .output();
    kill_stray_nodes(node_bin);
}

/// Runs [`TeardownSequencer::clean_all`] on drop so the host is restored
/// even when the suite unwinds early.
pub struct CleanupGuard<'a> {
    sequencer: &'a TeardownSequencer,
    netem: ImpairmentController,
    disarmed: bool,
}

impl<'a> CleanupGuard<'a> {
    pub fn new(sequencer: &'a TeardownSequencer, netem: ImpairmentController) -> Self {
        Self {
            sequencer,
            netem,
            disarmed: false,
        }
    }

    pub fn netem(&mut self) -> &mut ImpairmentController {
        &mut self.netem
    }

    /// The suite already ran its final cleanup; skip the one on drop.
    pub fn disarm(&mut self) {
        self.disarmed = true;
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.disarmed {
            tracing::info!("cleanup guard running final teardown");
            self.sequencer.clean_all(&mut self.netem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn patterns_are_role_qualified() {
        let patterns = node_patterns(&PathBuf::from("/opt/lab/netemlab-node"));
        assert_eq!(patterns, vec!["netemlab-node server", "netemlab-node client"]);
    }

    #[test]
    fn patterns_fall_back_to_full_path_text() {
        let patterns = node_patterns(&PathBuf::from("netemlab-node"));
        assert_eq!(patterns[0], "netemlab-node server");
    }

    // The bin name is bogus so the pkill patterns match nothing real, and
    // clear() failures are suppressed inside clean_all, so this runs fine
    // without root or tc.
    #[test]
    fn clean_all_is_idempotent() {
        let sequencer = TeardownSequencer::new(
            &PathBuf::from("netemlab-teardown-test-bin"),
            Duration::from_millis(10),
        );
        let mut netem = ImpairmentController::new("netemlab-test-no-such-if");
        sequencer.clean_all(&mut netem);
        sequencer.clean_all(&mut netem);
        assert!(netem.active().is_none());
    }
}
