//! The built-in scenario suite.
//!
//! Scenarios are grouped into sections that double as report headings and
//! artifact subdirectories:
//!
//! * `baseline`   - clean link, sanity reference for every other number
//! * `impairment` - single netem conditions held for the whole run
//! * `load`       - more clients and faster sampling on a clean link
//! * `disruption` - conditions that change mid-run

use std::time::Duration;

use crate::netem::NetemProfile;
use crate::scenario::{ClientExtras, Phase, Scenario};

fn base(section: &str, name: &str, summary: &str, duration_secs: u64) -> Scenario {
    Scenario {
        section: section.to_string(),
        name: name.to_string(),
        summary: summary.to_string(),
        profile: NetemProfile::default(),
        clients: 1,
        sample_interval_secs: 1.0,
        batch_size: 1,
        extras: ClientExtras::default(),
        capture: false,
        timeline: vec![Phase::Hold(Duration::from_secs(duration_secs))],
    }
}

/// The full suite, in run order. The seeds (`duration_secs`,
/// `interval_secs`, `batch_size`, `capture`) flow into every scenario;
/// individual scenarios override where the point of the scenario is a
/// different value.
pub fn standard_suite(
    duration_secs: u64,
    interval_secs: f64,
    batch_size: u32,
    capture: bool,
) -> Vec<Scenario> {
    let seeded = |section: &str, name: &str, summary: &str| Scenario {
        sample_interval_secs: interval_secs,
        batch_size,
        capture,
        ..base(section, name, summary, duration_secs)
    };

    let third = Duration::from_secs((duration_secs / 3).max(1));

    vec![
        seeded("baseline", "clean_link", "unimpaired link, single client"),
        Scenario {
            profile: NetemProfile::loss(5.0),
            ..seeded("impairment", "loss_5", "5% random packet loss")
        },
        Scenario {
            profile: NetemProfile::loss(20.0),
            ..seeded("impairment", "loss_20", "20% random packet loss")
        },
        Scenario {
            profile: NetemProfile::delay(100, 20, "normal"),
            ..seeded(
                "impairment",
                "delay_jitter",
                "100ms delay with 20ms normal jitter",
            )
        },
        Scenario {
            profile: NetemProfile::duplicate(10.0),
            ..seeded("impairment", "duplicate_10", "10% packet duplication")
        },
        Scenario {
            profile: NetemProfile {
                delay_ms: Some(80),
                jitter_ms: Some(20),
                distribution: Some("normal".to_string()),
                loss_percent: Some(7.0),
                duplicate_percent: Some(3.0),
            },
            ..seeded(
                "impairment",
                "degraded_combo",
                "delay, jitter, loss and duplication together",
            )
        },
        Scenario {
            clients: 3,
            ..seeded("load", "clients_3", "three concurrent clients, clean link")
        },
        Scenario {
            clients: 5,
            sample_interval_secs: 0.25,
            ..seeded("load", "clients_5", "five clients sampling at 4 Hz")
        },
        Scenario {
            timeline: vec![
                Phase::Hold(third),
                Phase::Impair(NetemProfile::loss(100.0)),
                Phase::Hold(third),
                Phase::ClearImpairment,
                Phase::Hold(third),
            ],
            ..seeded(
                "disruption",
                "blackout_recovery",
                "total loss mid-run, then recovery",
            )
        },
        Scenario {
            clients: 2,
            extras: ClientExtras {
                jam_after_secs: Some((duration_secs / 3).max(1)),
                jam_for_secs: Some((duration_secs / 6).max(1)),
            },
            ..seeded(
                "disruption",
                "client_jam",
                "one client floods the link mid-run",
            )
        },
    ]
}

/// Narrow a suite to the requested sections and scenario names. Empty
/// selectors match everything; names accept either `name` or
/// `section/name`.
pub fn filter(scenarios: Vec<Scenario>, sections: &[String], names: &[String]) -> Vec<Scenario> {
    scenarios
        .into_iter()
        .filter(|s| sections.is_empty() || sections.iter().any(|sec| *sec == s.section))
        .filter(|s| {
            names.is_empty() || names.iter().any(|n| *n == s.name || *n == s.slug())
        })
        .collect()
}
