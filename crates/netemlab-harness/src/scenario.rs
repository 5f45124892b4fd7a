//! Scenario model: what to run, under which link conditions, for how long.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::netem::NetemProfile;

/// One step of a scenario's timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// Let traffic flow for the window.
    Hold(Duration),
    /// Swap the installed netem rule for this profile.
    Impair(NetemProfile),
    /// Remove the installed netem rule.
    ClearImpairment,
}

/// Disruption knobs forwarded to every client of a scenario.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientExtras {
    /// Seconds after start before the client floods the link.
    pub jam_after_secs: Option<u64>,
    /// How long the flood lasts.
    pub jam_for_secs: Option<u64>,
}

/// A single orchestrated experiment.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Reporting section, e.g. `baseline` or `disruption`.
    pub section: String,
    pub name: String,
    pub summary: String,
    /// Link condition installed before traffic starts.
    pub profile: NetemProfile,
    pub clients: u32,
    pub sample_interval_secs: f64,
    pub batch_size: u32,
    pub extras: ClientExtras,
    /// Record a pcap alongside the CSV.
    pub capture: bool,
    pub timeline: Vec<Phase>,
}

impl Scenario {
    /// Total traffic time: the sum of hold windows.
    pub fn run_time(&self) -> Duration {
        self.timeline
            .iter()
            .map(|phase| match phase {
                Phase::Hold(window) => *window,
                _ => Duration::ZERO,
            })
            .sum()
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.section, self.name)
    }
}

/// Artifact paths for one scenario run, under `<run_root>/<section>/`.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub dir: PathBuf,
    pub csv: PathBuf,
    pub pcap: PathBuf,
    pub server_log: PathBuf,
    pub capture_log: PathBuf,
    stem: String,
}

impl ArtifactSet {
    pub fn new(run_root: &Path, scenario: &Scenario) -> Self {
        let dir = run_root.join(&scenario.section);
        Self {
            csv: dir.join(format!("{}.csv", scenario.name)),
            pcap: dir.join(format!("{}.pcap", scenario.name)),
            server_log: dir.join(format!("{}.server.log", scenario.name)),
            capture_log: dir.join(format!("{}.tcpdump.log", scenario.name)),
            stem: scenario.name.clone(),
            dir,
        }
    }

    pub fn client_log(&self, device_id: u16) -> PathBuf {
        self.dir.join(format!("{}.client-{}.log", self.stem, device_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario {
            section: "impairment".into(),
            name: "loss_20".into(),
            summary: "20% random packet loss".into(),
            profile: NetemProfile::loss(20.0),
            clients: 2,
            sample_interval_secs: 1.0,
            batch_size: 1,
            extras: ClientExtras::default(),
            capture: false,
            timeline: vec![
                Phase::Hold(Duration::from_secs(10)),
                Phase::ClearImpairment,
                Phase::Hold(Duration::from_secs(5)),
            ],
        }
    }

    #[test]
    fn run_time_sums_only_hold_phases() {
        assert_eq!(scenario().run_time(), Duration::from_secs(15));
    }

    #[test]
    fn slug_joins_section_and_name() {
        assert_eq!(scenario().slug(), "impairment/loss_20");
    }

    #[test]
    fn artifacts_live_under_the_section_dir() {
        let arts = ArtifactSet::new(Path::new("/tmp/run-x"), &scenario());
        assert_eq!(arts.dir, Path::new("/tmp/run-x/impairment"));
        assert_eq!(arts.csv, Path::new("/tmp/run-x/impairment/loss_20.csv"));
        assert_eq!(arts.pcap, Path::new("/tmp/run-x/impairment/loss_20.pcap"));
        assert_eq!(
            arts.server_log,
            Path::new("/tmp/run-x/impairment/loss_20.server.log")
        );
        assert_eq!(
            arts.client_log(1002),
            Path::new("/tmp/run-x/impairment/loss_20.client-1002.log")
        );
    }
}
