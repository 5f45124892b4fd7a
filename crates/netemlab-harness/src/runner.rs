//! Drives a single scenario from clean host to verdict.
//!
//! The runner's contract is that teardown always happens: whatever goes
//! wrong between setup and verdict, the processes started for the scenario
//! are shut down in order, the capture is stopped and the netem rule is
//! removed before `run` returns.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::capture::CaptureSession;
use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::netem::ImpairmentController;
use crate::report::{ScenarioOutcome, ScenarioStatus};
use crate::scenario::{ArtifactSet, Phase, Scenario};
use crate::supervisor::{ClientSpec, ProcessSupervisor, ServerSpec, ShutdownGrace};
use crate::teardown::TeardownSequencer;

/// Device ids are assigned sequentially from here, so logs and CSV rows
/// line up with client-1001, client-1002, ...
pub const BASE_DEVICE_ID: u16 = 1001;

const HOLD_NAP: Duration = Duration::from_millis(500);

#[derive(Default)]
struct RunFacts {
    degraded: bool,
    server_forced: bool,
    clients_forced: u32,
    got_pcap: bool,
}

pub struct ScenarioRunner<'a> {
    cfg: &'a HarnessConfig,
    netem: &'a mut ImpairmentController,
    sequencer: &'a TeardownSequencer,
    interrupt: &'a AtomicBool,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(
        cfg: &'a HarnessConfig,
        netem: &'a mut ImpairmentController,
        sequencer: &'a TeardownSequencer,
        interrupt: &'a AtomicBool,
    ) -> Self {
        Self {
            cfg,
            netem,
            sequencer,
            interrupt,
        }
    }

    /// Run one scenario to completion and fold everything that happened
    /// into its outcome. Never panics out with host state dirty.
    pub fn run(&mut self, scenario: &Scenario, run_root: &Path) -> ScenarioOutcome {
        tracing::info!(
            scenario = %scenario.slug(),
            profile = %scenario.profile,
            clients = scenario.clients,
            run_secs = scenario.run_time().as_secs(),
            "starting scenario"
        );
        let started = Instant::now();
        let arts = ArtifactSet::new(run_root, scenario);
        let mut facts = RunFacts::default();
        let result = self.execute(scenario, &arts, &mut facts);

        let status = match result {
            Err(e) => ScenarioStatus::Failed(e.to_string()),
            Ok(()) => match telemetry_rows(&arts.csv) {
                Err(e) => ScenarioStatus::Failed(format!("telemetry log unreadable: {e}")),
                Ok(0) => ScenarioStatus::Failed("no telemetry rows".into()),
                Ok(rows) => {
                    tracing::info!(scenario = %scenario.slug(), rows, "telemetry collected");
                    let mut notes = Vec::new();
                    if facts.server_forced {
                        notes.push("server required SIGKILL".to_string());
                    }
                    if facts.clients_forced > 0 {
                        notes.push(format!("{} client(s) required SIGKILL", facts.clients_forced));
                    }
                    if facts.degraded {
                        notes.push("impairment degraded".to_string());
                    }
                    if notes.is_empty() {
                        ScenarioStatus::Passed
                    } else {
                        ScenarioStatus::Anomaly(notes.join("; "))
                    }
                }
            },
        };

        ScenarioOutcome {
            section: scenario.section.clone(),
            name: scenario.name.clone(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            impairment_degraded: facts.degraded,
            server_forced: facts.server_forced,
            clients_forced: facts.clients_forced,
            csv: arts.csv.exists().then(|| arts.csv.clone()),
            pcap: (facts.got_pcap && arts.pcap.exists()).then(|| arts.pcap.clone()),
        }
    }

    fn execute(
        &mut self,
        scenario: &Scenario,
        arts: &ArtifactSet,
        facts: &mut RunFacts,
    ) -> Result<(), HarnessError> {
        // Known-clean start even if the previous scenario crashed out.
        self.sequencer.clean_all(self.netem);
        std::fs::create_dir_all(&arts.dir)?;

        if let Err(e) = self.netem.apply(&scenario.profile) {
            tracing::warn!(error = %e, "initial impairment failed, running degraded");
            facts.degraded = true;
        }

        let capture = if scenario.capture {
            match CaptureSession::start(
                self.netem.interface(),
                self.cfg.port,
                &arts.pcap,
                &arts.capture_log,
                self.cfg.timing.capture_settle(),
            ) {
                Ok(session) => {
                    facts.got_pcap = true;
                    Some(session)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "capture unavailable, continuing without pcap");
                    None
                }
            }
        } else {
            None
        };

        let mut supervisor = ProcessSupervisor::new();
        let drove = self.drive(scenario, arts, &mut supervisor, facts);

        // Teardown runs regardless of how the drive ended.
        let shutdown = supervisor.shutdown(ShutdownGrace {
            client: self.cfg.timing.client_grace(),
            server: self.cfg.timing.server_grace(),
        });
        facts.server_forced = shutdown.server_forced;
        facts.clients_forced = shutdown.clients_forced;

        if let Some(session) = capture {
            session.stop();
        }
        if let Err(e) = self.netem.clear() {
            tracing::warn!(error = %e, "failed to clear impairment after scenario");
        }

        drove
    }

    fn drive(
        &mut self,
        scenario: &Scenario,
        arts: &ArtifactSet,
        supervisor: &mut ProcessSupervisor,
        facts: &mut RunFacts,
    ) -> Result<(), HarnessError> {
        let bin = self.cfg.node_binary();

        let server = ServerSpec {
            bin: bin.clone(),
            port: self.cfg.port,
            output_csv: arts.csv.clone(),
            log: arts.server_log.clone(),
        };
        supervisor.start_server(&server, self.cfg.timing.server_settle())?;

        for i in 0..scenario.clients {
            if self.interrupt.load(Ordering::SeqCst) {
                return Err(HarnessError::Interrupted);
            }
            let device_id = BASE_DEVICE_ID + i as u16;
            let client = ClientSpec {
                bin: bin.clone(),
                device_id,
                host: self.cfg.host.clone(),
                port: self.cfg.port,
                interval_secs: scenario.sample_interval_secs,
                batch_size: scenario.batch_size,
                extras: scenario.extras.clone(),
                log: arts.client_log(device_id),
            };
            supervisor.start_client(&client)?;
            std::thread::sleep(self.cfg.timing.client_stagger());
        }

        for phase in &scenario.timeline {
            match phase {
                Phase::Hold(window) => self.hold(*window, supervisor)?,
                Phase::Impair(profile) => {
                    if let Err(e) = self.netem.apply(profile) {
                        tracing::warn!(error = %e, "mid-run impairment failed, running degraded");
                        facts.degraded = true;
                    }
                }
                Phase::ClearImpairment => {
                    if let Err(e) = self.netem.clear() {
                        tracing::warn!(error = %e, "mid-run clear failed, running degraded");
                        facts.degraded = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Sleep out a hold window while watching for operator interrupt and
    /// server death.
    fn hold(
        &mut self,
        window: Duration,
        supervisor: &mut ProcessSupervisor,
    ) -> Result<(), HarnessError> {
        let deadline = Instant::now() + window;
        let mut last_tick = Instant::now();
        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                return Err(HarnessError::Interrupted);
            }
            if !supervisor.server_alive() {
                return Err(HarnessError::process("server", "exited mid-run"));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            if now.duration_since(last_tick) >= self.cfg.timing.progress_tick() {
                tracing::info!(
                    remaining_secs = deadline.saturating_duration_since(now).as_secs(),
                    "scenario running"
                );
                last_tick = now;
            }
            std::thread::sleep(HOLD_NAP.min(deadline - now));
        }
    }
}

/// Data rows in the server's CSV, excluding the header.
fn telemetry_rows(csv: &Path) -> std::io::Result<usize> {
    let text = std::fs::read_to_string(csv)?;
    Ok(text
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::scratch_path;

    #[test]
    fn telemetry_rows_skips_header_and_blanks() {
        let path = scratch_path("rows.csv");
        std::fs::write(
            &path,
            "device_id,seq,timestamp_sent\n1001,0,123\n1001,1,124\n\n",
        )
        .expect("write csv");
        assert_eq!(telemetry_rows(&path).expect("count"), 2);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn header_only_means_zero_rows() {
        let path = scratch_path("empty.csv");
        std::fs::write(&path, "device_id,seq,timestamp_sent\n").expect("write csv");
        assert_eq!(telemetry_rows(&path).expect("count"), 0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_csv_is_an_error() {
        let path = scratch_path("missing.csv");
        assert!(telemetry_rows(&path).is_err());
    }
}
