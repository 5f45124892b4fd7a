//! Engine configuration.
//!
//! Defaults mirror the stock suite: loopback interface, the bundled
//! `netemlab-node` binary, 30-second scenarios. A TOML file can override any
//! field; CLI flags are applied on top of that and win.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::HarnessError;

/// Environment variable that overrides the node binary path.
pub const NODE_BIN_ENV: &str = "NETEMLAB_NODE_BIN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Interface the netem rules are installed on.
    pub interface: String,
    /// Address clients send to.
    pub host: String,
    /// UDP port the server binds.
    pub port: u16,
    /// Telemetry node binary. `NETEMLAB_NODE_BIN` wins over this value;
    /// unset, the binary is resolved from `PATH`.
    pub node_bin: Option<PathBuf>,
    /// Root directory for run artifacts.
    pub out_root: PathBuf,
    /// Default hold window per scenario, in seconds.
    pub duration_secs: u64,
    /// Client sampling interval in seconds.
    pub sample_interval_secs: f64,
    /// Packets per sample tick.
    pub batch_size: u32,
    /// Record a pcap per scenario.
    pub capture: bool,
    pub timing: Timing,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            interface: "lo".into(),
            host: "127.0.0.1".into(),
            port: 12000,
            node_bin: None,
            out_root: PathBuf::from("results"),
            duration_secs: 30,
            sample_interval_secs: 1.0,
            batch_size: 1,
            capture: false,
            timing: Timing::default(),
        }
    }
}

impl HarnessConfig {
    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Environment(format!("cannot read config {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            HarnessError::Environment(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Resolve the node binary: env override, then config, then `PATH`.
    pub fn node_binary(&self) -> PathBuf {
        if let Ok(p) = std::env::var(NODE_BIN_ENV) {
            return PathBuf::from(p);
        }
        self.node_bin
            .clone()
            .unwrap_or_else(|| PathBuf::from("netemlab-node"))
    }
}

/// Pacing knobs, all overridable from the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Delay after spawning the server before clients start.
    pub server_settle_ms: u64,
    /// Delay between successive client spawns.
    pub client_stagger_ms: u64,
    /// Window clients get to exit after SIGINT.
    pub client_grace_secs: u64,
    /// Window the server gets to flush its log and exit after SIGINT.
    /// Longer than the client window on purpose.
    pub server_grace_secs: u64,
    /// Delay after starting tcpdump before traffic begins.
    pub capture_settle_ms: u64,
    /// Pause after cleanup before the next scenario.
    pub teardown_settle_ms: u64,
    /// Interval between progress log lines during a hold.
    pub progress_tick_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            server_settle_ms: 1000,
            client_stagger_ms: 200,
            client_grace_secs: 3,
            server_grace_secs: 10,
            capture_settle_ms: 1000,
            teardown_settle_ms: 500,
            progress_tick_secs: 5,
        }
    }
}

impl Timing {
    pub fn server_settle(&self) -> Duration {
        Duration::from_millis(self.server_settle_ms)
    }

    pub fn client_stagger(&self) -> Duration {
        Duration::from_millis(self.client_stagger_ms)
    }

    pub fn client_grace(&self) -> Duration {
        Duration::from_secs(self.client_grace_secs)
    }

    pub fn server_grace(&self) -> Duration {
        Duration::from_secs(self.server_grace_secs)
    }

    pub fn capture_settle(&self) -> Duration {
        Duration::from_millis(self.capture_settle_ms)
    }

    pub fn teardown_settle(&self) -> Duration {
        Duration::from_millis(self.teardown_settle_ms)
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_secs(self.progress_tick_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_means_defaults() {
        let cfg: HarnessConfig = toml::from_str("").expect("parse empty");
        assert_eq!(cfg.interface, "lo");
        assert_eq!(cfg.port, 12000);
        assert_eq!(cfg.duration_secs, 30);
        assert!(!cfg.capture);
        assert_eq!(cfg.timing.server_grace_secs, 10);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let cfg: HarnessConfig = toml::from_str(
            r#"
            interface = "veth0"
            duration_secs = 60

            [timing]
            client_grace_secs = 7
            "#,
        )
        .expect("parse partial");
        assert_eq!(cfg.interface, "veth0");
        assert_eq!(cfg.duration_secs, 60);
        assert_eq!(cfg.timing.client_grace_secs, 7);
        // untouched fields keep defaults
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.timing.server_grace_secs, 10);
    }

    #[test]
    fn node_binary_prefers_env_then_config() {
        let mut cfg = HarnessConfig::default();
        assert_eq!(cfg.node_binary(), PathBuf::from("netemlab-node"));

        cfg.node_bin = Some(PathBuf::from("/opt/lab/netemlab-node"));
        assert_eq!(cfg.node_binary(), PathBuf::from("/opt/lab/netemlab-node"));

        std::env::set_var(NODE_BIN_ENV, "/tmp/override-node");
        assert_eq!(cfg.node_binary(), PathBuf::from("/tmp/override-node"));
        std::env::remove_var(NODE_BIN_ENV);
    }
}
