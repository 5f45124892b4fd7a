//! Optional tcpdump capture alongside a scenario run.
//!
//! Capture is best effort: the runner keeps going when tcpdump cannot be
//! started, it just loses the pcap artifact. A running capture is stopped
//! with SIGINT so tcpdump flushes its packet buffer before exiting.

use std::fs::File;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::error::HarnessError;
use crate::supervisor::{send_sigint, wait_with_deadline};

const STOP_GRACE: Duration = Duration::from_secs(3);

pub struct CaptureSession {
    child: Child,
}

impl CaptureSession {
    /// Start tcpdump writing `pcap`, filtered to the scenario's UDP port.
    /// Waits `settle` so the capture is live before traffic starts, and
    /// fails if tcpdump exits within that window (bad filter, no
    /// permission, unknown interface).
    pub fn start(
        interface: &str,
        port: u16,
        pcap: &Path,
        log: &Path,
        settle: Duration,
    ) -> Result<Self, HarnessError> {
        let out = File::create(log)
            .map_err(|e| HarnessError::Capture(format!("cannot create {}: {e}", log.display())))?;
        let err = out
            .try_clone()
            .map_err(|e| HarnessError::Capture(e.to_string()))?;

        let mut child = Command::new("tcpdump")
            .arg("-i")
            .arg(interface)
            .arg("-U")
            .arg("-w")
            .arg(pcap)
            .arg(format!("udp port {port}"))
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .spawn()
            .map_err(|e| HarnessError::Capture(format!("tcpdump spawn failed: {e}")))?;

        std::thread::sleep(settle);
        if let Ok(Some(status)) = child.try_wait() {
            return Err(HarnessError::Capture(format!(
                "tcpdump exited during settle ({status}), see {}",
                log.display()
            )));
        }
        tracing::info!(pid = child.id(), interface, pcap = %pcap.display(), "capture started");
        Ok(Self { child })
    }

    /// Stop the capture, letting tcpdump flush before the pcap is read.
    pub fn stop(mut self) {
        send_sigint(&self.child);
        match wait_with_deadline(&mut self.child, STOP_GRACE) {
            Ok(Some(_)) => tracing::debug!("capture stopped"),
            Ok(None) | Err(_) => {
                tracing::warn!("tcpdump ignored interrupt, killing; pcap may be incomplete");
                let _ = self.child.kill();
                let _ = self.child.wait();
            }
        }
    }
}
