//! Child process lifecycle for one scenario.
//!
//! The supervisor owns the server and client processes of a running scenario
//! and implements the ordered shutdown protocol: clients are interrupted
//! first so their final packets land while the server is still receiving,
//! then the server is interrupted and given a longer window to flush its
//! telemetry log. Processes that ignore the interrupt are killed, and every
//! child is reaped before `shutdown` returns.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::error::HarnessError;
use crate::scenario::ClientExtras;

const EXIT_POLL: Duration = Duration::from_millis(100);

/// Where a managed process sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Starting,
    Running,
    SignaledGraceful,
    SignaledForce,
    Exited,
}

/// One child process under supervision.
pub struct ManagedProcess {
    pub label: String,
    pub state: ProcState,
    child: Child,
    started_at: Instant,
}

impl ManagedProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Launch parameters for the telemetry server.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub bin: PathBuf,
    pub port: u16,
    pub output_csv: PathBuf,
    pub log: PathBuf,
}

impl ServerSpec {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("server")
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--output")
            .arg(&self.output_csv);
        cmd
    }
}

/// Launch parameters for one telemetry client.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub bin: PathBuf,
    pub device_id: u16,
    pub host: String,
    pub port: u16,
    pub interval_secs: f64,
    pub batch_size: u32,
    pub extras: ClientExtras,
    pub log: PathBuf,
}

impl ClientSpec {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("client")
            .arg("--device-id")
            .arg(self.device_id.to_string())
            .arg("--host")
            .arg(&self.host)
            .arg("--port")
            .arg(self.port.to_string())
            .arg("--interval")
            .arg(self.interval_secs.to_string())
            .arg("--batch-size")
            .arg(self.batch_size.to_string());
        if let Some(after) = self.extras.jam_after_secs {
            cmd.arg("--jam-after").arg(after.to_string());
        }
        if let Some(window) = self.extras.jam_for_secs {
            cmd.arg("--jam-for").arg(window.to_string());
        }
        cmd
    }
}

/// Grace windows for the ordered shutdown.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownGrace {
    pub client: Duration,
    pub server: Duration,
}

/// What happened during shutdown, for reporting.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// When each client received its interrupt, in spawn order.
    pub client_signals: Vec<Instant>,
    /// When the server received its interrupt.
    pub server_signal: Option<Instant>,
    /// Clients that had to be killed after the grace window.
    pub clients_forced: u32,
    /// The server ignored its grace window and was killed; the telemetry
    /// log may be truncated.
    pub server_forced: bool,
    pub server_exit: Option<ExitStatus>,
}

#[derive(Default)]
pub struct ProcessSupervisor {
    server: Option<ManagedProcess>,
    clients: Vec<ManagedProcess>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the server and give it `settle` to come up. Fails if the
    /// process dies within the settle window.
    pub fn start_server(
        &mut self,
        spec: &ServerSpec,
        settle: Duration,
    ) -> Result<(), HarnessError> {
        if self.server.is_some() {
            return Err(HarnessError::process("server", "already running"));
        }
        let mut proc = spawn_logged(spec.command(), "server", &spec.log)?;
        tracing::info!(pid = proc.pid(), port = spec.port, "server started");

        std::thread::sleep(settle);
        if let Ok(Some(status)) = proc.child.try_wait() {
            return Err(HarnessError::process(
                "server",
                format!("exited during settle ({status}), see {}", spec.log.display()),
            ));
        }
        proc.state = ProcState::Running;
        self.server = Some(proc);
        Ok(())
    }

    /// Spawn one client. The caller staggers successive launches.
    pub fn start_client(&mut self, spec: &ClientSpec) -> Result<(), HarnessError> {
        let label = format!("client-{}", spec.device_id);
        let mut proc = spawn_logged(spec.command(), &label, &spec.log)?;
        tracing::info!(pid = proc.pid(), device_id = spec.device_id, "client started");
        proc.state = ProcState::Running;
        self.clients.push(proc);
        Ok(())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether the server process is still running. The exit status itself
    /// is collected during [`shutdown`].
    ///
    /// [`shutdown`]: ProcessSupervisor::shutdown
    pub fn server_alive(&mut self) -> bool {
        match self.server.as_mut() {
            Some(proc) => match proc.child.try_wait() {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(_) => true, // cannot tell; shutdown will sort it out
            },
            None => false,
        }
    }

    /// Ordered teardown: interrupt all clients, wait out a shared grace
    /// window, interrupt the server, wait out its longer window, kill
    /// whatever is left, and reap everything.
    pub fn shutdown(&mut self, grace: ShutdownGrace) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        // ── Clients first, so the server still sees their last packets ──
        for proc in &mut self.clients {
            send_sigint(&proc.child);
            proc.state = ProcState::SignaledGraceful;
            report.client_signals.push(Instant::now());
            tracing::debug!(label = %proc.label, pid = proc.pid(), "client interrupted");
        }

        let deadline = Instant::now() + grace.client;
        for proc in &mut self.clients {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match wait_with_deadline(&mut proc.child, remaining) {
                Ok(Some(_)) => proc.state = ProcState::Exited,
                Ok(None) | Err(_) => {
                    tracing::warn!(
                        label = %proc.label,
                        pid = proc.pid(),
                        "client ignored interrupt, killing"
                    );
                    proc.state = ProcState::SignaledForce;
                    let _ = proc.child.kill();
                    let _ = proc.child.wait();
                    proc.state = ProcState::Exited;
                    report.clients_forced += 1;
                }
            }
        }

        // ── Then the server, with room to flush its log ──
        if let Some(proc) = &mut self.server {
            send_sigint(&proc.child);
            proc.state = ProcState::SignaledGraceful;
            report.server_signal = Some(Instant::now());
            match wait_with_deadline(&mut proc.child, grace.server) {
                Ok(Some(status)) => {
                    tracing::info!(pid = proc.pid(), %status, "server exited cleanly");
                    report.server_exit = Some(status);
                }
                Ok(None) | Err(_) => {
                    tracing::warn!(
                        pid = proc.pid(),
                        "server ignored interrupt, killing; telemetry log may be truncated"
                    );
                    proc.state = ProcState::SignaledForce;
                    report.server_forced = true;
                    let _ = proc.child.kill();
                    match proc.child.wait() {
                        Ok(status) => report.server_exit = Some(status),
                        Err(e) => tracing::warn!(error = %e, "failed to reap server"),
                    }
                }
            }
            proc.state = ProcState::Exited;
        }

        self.clients.clear();
        self.server = None;
        report
    }
}

/// Deliver SIGINT to a child.
pub(crate) fn send_sigint(child: &Child) {
    let pid = child.id() as libc::pid_t;
    // SAFETY: `child.id()` is the OS pid of a process we spawned. Sending
    // SIGINT is safe; worst case is a no-op if it already exited (ESRCH).
    unsafe {
        libc::kill(pid, libc::SIGINT);
    }
}

/// Poll a child until it exits or the deadline passes.
pub(crate) fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None => {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                std::thread::sleep(EXIT_POLL);
            }
        }
    }
}

fn spawn_logged(mut cmd: Command, label: &str, log: &Path) -> Result<ManagedProcess, HarnessError> {
    let out = File::create(log).map_err(|e| {
        HarnessError::process(label, format!("cannot create log {}: {e}", log.display()))
    })?;
    let err = out
        .try_clone()
        .map_err(|e| HarnessError::process(label, e.to_string()))?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err));
    let child = cmd
        .spawn()
        .map_err(|e| HarnessError::process(label, format!("spawn failed: {e}")))?;
    Ok(ManagedProcess {
        label: label.to_string(),
        state: ProcState::Starting,
        child,
        started_at: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Child {
        Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sh")
    }

    #[test]
    fn wait_with_deadline_times_out() {
        let mut child = sh("exec sleep 5");
        let waited = wait_with_deadline(&mut child, Duration::from_millis(200)).expect("try_wait");
        assert!(waited.is_none());
        let _ = child.kill();
        let _ = child.wait();
    }

    #[test]
    fn wait_with_deadline_sees_quick_exit() {
        let mut child = sh("exit 0");
        let status = wait_with_deadline(&mut child, Duration::from_secs(2))
            .expect("try_wait")
            .expect("exited");
        assert!(status.success());
    }

    #[test]
    fn sigint_terminates_default_disposition() {
        let mut child = sh("exec sleep 30");
        std::thread::sleep(Duration::from_millis(100));
        send_sigint(&child);
        let status = wait_with_deadline(&mut child, Duration::from_secs(2)).expect("try_wait");
        assert!(status.is_some(), "sleep should die on SIGINT");
    }
}
