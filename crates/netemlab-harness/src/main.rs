//! netemlab suite driver.
//!
//! Runs a UDP telemetry server and clients through network-condition
//! scenarios on a host interface.
//!
//! - Installs `tc netem` impairments (delay, jitter, loss, duplication)
//! - Optionally captures traffic with tcpdump (`--capture`)
//! - Shuts processes down in order so the telemetry CSV survives
//! - Cleans qdisc state and stray processes even on crash or Ctrl-C
//! - Writes per-scenario artifacts and a suite `report.json`

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use netemlab_harness::catalog;
use netemlab_harness::config::HarnessConfig;
use netemlab_harness::suite::SuiteDriver;
use netemlab_harness::teardown;

/// Network-condition scenario harness.
#[derive(Parser, Debug)]
#[command(name = "netemlab", about = "Network-condition scenario harness")]
struct Cli {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface to impair (overrides config).
    #[arg(long)]
    interface: Option<String>,

    /// Directory that receives run artifacts (overrides config).
    #[arg(long)]
    out_root: Option<PathBuf>,

    /// Traffic seconds per scenario (overrides config).
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Run only these sections (repeatable).
    #[arg(long = "section")]
    sections: Vec<String>,

    /// Run only these scenarios, by name or section/name (repeatable).
    #[arg(long = "scenario")]
    scenarios: Vec<String>,

    /// Capture pcaps with tcpdump.
    #[arg(long, default_value_t = false)]
    capture: bool,

    /// Path to the node binary (overrides config and NETEMLAB_NODE_BIN).
    #[arg(long)]
    node_bin: Option<PathBuf>,

    /// List the selected scenarios and exit.
    #[arg(long, default_value_t = false)]
    list: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(interface) = cli.interface {
        cfg.interface = interface;
    }
    if let Some(out_root) = cli.out_root {
        cfg.out_root = out_root;
    }
    if let Some(duration) = cli.duration_secs {
        cfg.duration_secs = duration;
    }
    if let Some(bin) = cli.node_bin {
        cfg.node_bin = Some(bin);
    }
    cfg.capture |= cli.capture;

    let suite = catalog::filter(
        catalog::standard_suite(
            cfg.duration_secs,
            cfg.sample_interval_secs,
            cfg.batch_size,
            cfg.capture,
        ),
        &cli.sections,
        &cli.scenarios,
    );
    if suite.is_empty() {
        anyhow::bail!("no scenarios match the requested sections/names");
    }

    if cli.list {
        for scenario in &suite {
            println!("{:<32} {}", scenario.slug(), scenario.summary);
        }
        return Ok(());
    }

    tracing::info!(
        interface = %cfg.interface,
        scenarios = suite.len(),
        capture = cfg.capture,
        "netemlab starting"
    );

    // First Ctrl-C asks the suite to stop after the current teardown;
    // a second one cleans the host statelessly and exits hard.
    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = interrupt.clone();
        let interface = cfg.interface.clone();
        let node_bin = cfg.node_binary();
        ctrlc::set_handler(move || {
            if interrupt.swap(true, Ordering::SeqCst) {
                eprintln!("second interrupt: emergency cleanup");
                teardown::emergency_clean(&interface, &node_bin);
                std::process::exit(130);
            }
            eprintln!("interrupt: finishing current scenario teardown, skipping the rest");
        })?;
    }

    let driver = SuiteDriver::new(cfg, suite, interrupt);
    let (run_root, report) = driver.run()?;

    print!("{}", report.render());
    println!("artifacts: {}", run_root.display());

    if !report.success() {
        std::process::exit(1);
    }
    Ok(())
}
