//! `tc netem` impairment control.
//!
//! At most one netem rule is ever installed on the interface: every apply
//! removes the previous root qdisc before adding the new one, so rules never
//! stack, and clearing an already-clean interface is a no-op.

use std::fmt;
use std::process::Command;

use crate::error::HarnessError;

/// Network impairment parameters applied via `tc netem`.
///
/// Only non-`None` parameters are passed to netem. A profile with every
/// field `None` means "unimpaired"; applying it just removes whatever rule
/// is installed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetemProfile {
    pub delay_ms: Option<u32>,
    pub jitter_ms: Option<u32>,
    /// Delay distribution (`normal`, `pareto`, ...). Only emitted when both
    /// delay and a nonzero jitter are set; netem rejects it otherwise.
    pub distribution: Option<String>,
    pub loss_percent: Option<f32>,
    pub duplicate_percent: Option<f32>,
}

impl NetemProfile {
    pub fn is_unimpaired(&self) -> bool {
        self.delay_ms.is_none() && self.loss_percent.is_none() && self.duplicate_percent.is_none()
    }

    pub fn loss(percent: f32) -> Self {
        Self {
            loss_percent: Some(percent),
            ..Default::default()
        }
    }

    pub fn delay(delay_ms: u32, jitter_ms: u32, distribution: &str) -> Self {
        Self {
            delay_ms: Some(delay_ms),
            jitter_ms: Some(jitter_ms),
            distribution: Some(distribution.to_string()),
            ..Default::default()
        }
    }

    pub fn duplicate(percent: f32) -> Self {
        Self {
            duplicate_percent: Some(percent),
            ..Default::default()
        }
    }
}

impl fmt::Display for NetemProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unimpaired() {
            return write!(f, "clean");
        }
        let mut parts = Vec::new();
        if let Some(delay) = self.delay_ms {
            let mut part = format!("delay {}ms", delay);
            if let Some(jitter) = self.jitter_ms {
                if jitter > 0 {
                    part.push_str(&format!(" jitter {}ms", jitter));
                }
            }
            parts.push(part);
        }
        if let Some(loss) = self.loss_percent {
            parts.push(format!("loss {}%", loss));
        }
        if let Some(dup) = self.duplicate_percent {
            parts.push(format!("duplicate {}%", dup));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Builds the `tc` argument list that installs `profile` on `interface`.
pub fn qdisc_add_args(interface: &str, profile: &NetemProfile) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "qdisc".into(),
        "add".into(),
        "dev".into(),
        interface.into(),
        "root".into(),
        "netem".into(),
    ];
    append_netem_params(profile, &mut args);
    args
}

/// Builds the `tc` argument list that removes the root qdisc.
pub fn qdisc_del_args(interface: &str) -> Vec<String> {
    vec![
        "qdisc".into(),
        "del".into(),
        "dev".into(),
        interface.into(),
        "root".into(),
    ]
}

fn append_netem_params(profile: &NetemProfile, args: &mut Vec<String>) {
    if let Some(delay) = profile.delay_ms {
        args.push("delay".into());
        args.push(format!("{}ms", delay));

        if let Some(jitter) = profile.jitter_ms {
            if jitter > 0 {
                args.push(format!("{}ms", jitter));
                if let Some(dist) = &profile.distribution {
                    args.push("distribution".into());
                    args.push(dist.clone());
                }
            }
        }
    }

    if let Some(loss) = profile.loss_percent {
        args.push("loss".into());
        args.push(format!("{}%", loss));
    }

    if let Some(dup) = profile.duplicate_percent {
        args.push("duplicate".into());
        args.push(format!("{}%", dup));
    }
}

/// Owns the netem rule on one interface.
///
/// The controller is the only mutation path for qdisc state during a suite;
/// it tracks what is installed so scenarios can assert a known-clean start.
pub struct ImpairmentController {
    interface: String,
    active: Option<NetemProfile>,
}

impl ImpairmentController {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            active: None,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Currently installed profile, if any.
    pub fn active(&self) -> Option<&NetemProfile> {
        self.active.as_ref()
    }

    /// Install `profile` as the interface's root qdisc, replacing whatever
    /// rule was present. An unimpaired profile is equivalent to [`clear`].
    ///
    /// [`clear`]: ImpairmentController::clear
    pub fn apply(&mut self, profile: &NetemProfile) -> Result<(), HarnessError> {
        // Remove any existing qdisc first so rules never stack.
        self.run_del()?;
        self.active = None;

        if profile.is_unimpaired() {
            return Ok(());
        }

        let args = qdisc_add_args(&self.interface, profile);
        let output = Command::new("tc")
            .args(&args)
            .output()
            .map_err(|e| HarnessError::Impairment(format!("failed to run tc: {e}")))?;
        if !output.status.success() {
            return Err(HarnessError::Impairment(format!(
                "failed to install netem rule: {}\nCommand: tc {}",
                String::from_utf8_lossy(&output.stderr).trim(),
                args.join(" ")
            )));
        }

        tracing::info!(interface = %self.interface, profile = %profile, "netem rule installed");
        self.active = Some(profile.clone());
        Ok(())
    }

    /// Remove the root qdisc. Succeeds when no rule is installed; a nonzero
    /// `tc` exit only means there was nothing to delete.
    pub fn clear(&mut self) -> Result<(), HarnessError> {
        self.run_del()?;
        self.active = None;
        Ok(())
    }

    fn run_del(&self) -> Result<(), HarnessError> {
        let args = qdisc_del_args(&self.interface);
        let output = Command::new("tc")
            .args(&args)
            .output()
            .map_err(|e| HarnessError::Impairment(format!("failed to run tc: {e}")))?;
        if !output.status.success() {
            tracing::debug!(
                interface = %self.interface,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "qdisc del: nothing to remove"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::check_privileges;

    #[test]
    fn add_args_for_loss_profile() {
        let args = qdisc_add_args("lo", &NetemProfile::loss(20.0));
        assert_eq!(
            args,
            vec!["qdisc", "add", "dev", "lo", "root", "netem", "loss", "20%"]
        );
    }

    #[test]
    fn add_args_for_delay_with_distribution() {
        let args = qdisc_add_args("eth0", &NetemProfile::delay(100, 20, "normal"));
        assert_eq!(
            args,
            vec![
                "qdisc",
                "add",
                "dev",
                "eth0",
                "root",
                "netem",
                "delay",
                "100ms",
                "20ms",
                "distribution",
                "normal"
            ]
        );
    }

    #[test]
    fn zero_jitter_drops_jitter_and_distribution() {
        let args = qdisc_add_args("lo", &NetemProfile::delay(50, 0, "normal"));
        assert_eq!(
            args,
            vec!["qdisc", "add", "dev", "lo", "root", "netem", "delay", "50ms"]
        );
    }

    #[test]
    fn add_args_for_combined_profile() {
        let profile = NetemProfile {
            delay_ms: Some(80),
            jitter_ms: Some(20),
            distribution: Some("normal".into()),
            loss_percent: Some(7.0),
            duplicate_percent: Some(3.0),
        };
        let args = qdisc_add_args("lo", &profile);
        assert_eq!(
            args,
            vec![
                "qdisc",
                "add",
                "dev",
                "lo",
                "root",
                "netem",
                "delay",
                "80ms",
                "20ms",
                "distribution",
                "normal",
                "loss",
                "7%",
                "duplicate",
                "3%"
            ]
        );
    }

    #[test]
    fn del_args_shape() {
        assert_eq!(
            qdisc_del_args("lo"),
            vec!["qdisc", "del", "dev", "lo", "root"]
        );
    }

    #[test]
    fn empty_profile_is_unimpaired() {
        assert!(NetemProfile::default().is_unimpaired());
        assert!(!NetemProfile::loss(0.5).is_unimpaired());
        assert!(!NetemProfile::duplicate(1.0).is_unimpaired());
    }

    #[test]
    fn display_renders_compactly() {
        assert_eq!(NetemProfile::default().to_string(), "clean");
        assert_eq!(NetemProfile::loss(5.0).to_string(), "loss 5%");
        assert_eq!(
            NetemProfile::delay(100, 20, "normal").to_string(),
            "delay 100ms jitter 20ms"
        );
    }

    /// Installs and removes a real rule on loopback. Needs root and `tc`.
    #[test]
    fn apply_and_clear_on_loopback() {
        if !check_privileges() {
            eprintln!("Skipping apply_and_clear_on_loopback, insufficient privileges");
            return;
        }

        let mut ctl = ImpairmentController::new("lo");
        ctl.clear().expect("initial clear");

        ctl.apply(&NetemProfile::loss(1.0)).expect("apply loss");
        assert!(qdisc_show("lo").contains("netem"));

        // Re-apply must replace, not stack.
        ctl.apply(&NetemProfile::delay(10, 2, "normal"))
            .expect("apply delay");
        let shown = qdisc_show("lo");
        assert_eq!(shown.matches("netem").count(), 1, "rules must not stack");
        assert_eq!(ctl.active(), Some(&NetemProfile::delay(10, 2, "normal")));

        ctl.clear().expect("clear");
        assert!(!qdisc_show("lo").contains("netem"));
        assert!(ctl.active().is_none());

        // Clearing a clean interface stays an Ok no-op.
        ctl.clear().expect("second clear");
    }

    fn qdisc_show(interface: &str) -> String {
        let out = Command::new("tc")
            .args(["qdisc", "show", "dev", interface])
            .output()
            .expect("tc qdisc show");
        String::from_utf8_lossy(&out.stdout).into_owned()
    }
}
