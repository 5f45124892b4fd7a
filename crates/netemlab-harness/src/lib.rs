//! Scenario orchestration for UDP telemetry experiments.
//!
//! Drives a telemetry server and a set of clients through network-condition
//! scenarios: `tc netem` impairment on an interface, optional tcpdump
//! capture, ordered SIGINT shutdown that preserves the server's CSV, and
//! guaranteed teardown of qdisc rules and stray processes. Scenarios are
//! grouped into sections and summarized in a per-run report.

pub mod capture;
pub mod catalog;
pub mod config;
pub mod error;
pub mod netem;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod suite;
pub mod supervisor;
pub mod teardown;

pub mod test_util;
