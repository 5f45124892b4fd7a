//! Helpers for tests that touch real qdisc state or spawn real processes.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

/// Whether this process can manipulate qdiscs. Tests that need tc call
/// this first and return early (with a note) when it fails, so the suite
/// stays green on unprivileged developer machines and in CI containers
/// without NET_ADMIN.
pub fn check_privileges() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let root = unsafe { libc::geteuid() == 0 };
    if !root {
        eprintln!("skipping: requires root");
        return false;
    }
    let tc_ok = Command::new("tc")
        .args(["qdisc", "show", "dev", "lo"])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false);
    if !tc_ok {
        eprintln!("skipping: tc not usable on this host");
        return false;
    }
    true
}

static SCRATCH_SEQ: AtomicU32 = AtomicU32::new(0);

/// A unique path under the system temp dir. The caller creates and removes
/// the file; uniqueness holds across threads within one test binary.
pub fn scratch_path(tag: &str) -> PathBuf {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "netemlab-{}-{}-{}",
        std::process::id(),
        seq,
        tag
    ))
}
