//! Process lifecycle tests using throwaway shell scripts in place of the
//! real node binary. The scripts only need to honor (or deliberately
//! ignore) SIGINT; the supervisor passes its usual server/client argv,
//! which the scripts discard.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use netemlab_harness::scenario::ClientExtras;
use netemlab_harness::supervisor::{ClientSpec, ProcessSupervisor, ServerSpec, ShutdownGrace};
use netemlab_harness::test_util::scratch_path;

fn script(tag: &str, body: &str) -> PathBuf {
    let path = scratch_path(&format!("{tag}.sh"));
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("stat").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

/// Dies promptly on SIGINT (sleep's default disposition).
fn graceful() -> PathBuf {
    script("graceful", "exec sleep 600")
}

/// Ignores SIGINT; only SIGKILL stops it.
fn stubborn() -> PathBuf {
    script("stubborn", "trap '' INT\nwhile :; do sleep 1; done")
}

fn server_spec(bin: PathBuf) -> ServerSpec {
    ServerSpec {
        bin,
        port: 19999,
        output_csv: scratch_path("out.csv"),
        log: scratch_path("server.log"),
    }
}

fn client_spec(bin: PathBuf, device_id: u16) -> ClientSpec {
    ClientSpec {
        bin,
        device_id,
        host: "127.0.0.1".into(),
        port: 19999,
        interval_secs: 1.0,
        batch_size: 1,
        extras: ClientExtras::default(),
        log: scratch_path(&format!("client-{device_id}.log")),
    }
}

#[test]
fn clients_are_interrupted_before_the_server() {
    let mut sup = ProcessSupervisor::new();
    sup.start_server(&server_spec(graceful()), Duration::from_millis(200))
        .expect("server");
    for device_id in 1001..1006 {
        sup.start_client(&client_spec(graceful(), device_id)).expect("client");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(sup.client_count(), 5);

    let report = sup.shutdown(ShutdownGrace {
        client: Duration::from_secs(3),
        server: Duration::from_secs(3),
    });

    assert_eq!(report.client_signals.len(), 5);
    let server_signal = report.server_signal.expect("server was signaled");
    for client_signal in &report.client_signals {
        assert!(
            *client_signal < server_signal,
            "client must be signaled before the server"
        );
    }
    assert_eq!(report.clients_forced, 0);
    assert!(!report.server_forced);
    assert!(report.server_exit.is_some());
}

#[test]
fn stubborn_server_is_escalated_to_sigkill() {
    let mut sup = ProcessSupervisor::new();
    sup.start_server(&server_spec(stubborn()), Duration::from_millis(300))
        .expect("server");

    let started = Instant::now();
    let report = sup.shutdown(ShutdownGrace {
        client: Duration::from_millis(200),
        server: Duration::from_millis(500),
    });

    assert!(report.server_forced, "server should have needed SIGKILL");
    let exit = report.server_exit.expect("server reaped despite escalation");
    assert!(!exit.success());
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "escalation must not block indefinitely"
    );
}

#[test]
fn straggler_client_is_killed_without_blocking_the_rest() {
    let mut sup = ProcessSupervisor::new();
    sup.start_server(&server_spec(graceful()), Duration::from_millis(200))
        .expect("server");
    sup.start_client(&client_spec(stubborn(), 1001)).expect("client");
    sup.start_client(&client_spec(graceful(), 1002)).expect("client");

    let report = sup.shutdown(ShutdownGrace {
        client: Duration::from_millis(500),
        server: Duration::from_secs(3),
    });

    assert_eq!(report.clients_forced, 1);
    assert!(!report.server_forced);
    assert!(report.server_signal.is_some(), "sequence continued to the server");
}

#[test]
fn server_exiting_during_settle_is_an_error() {
    let mut sup = ProcessSupervisor::new();
    let err = sup
        .start_server(
            &server_spec(script("quitter", "exit 0")),
            Duration::from_millis(300),
        )
        .expect_err("settle window should catch the early exit");
    assert!(err.to_string().contains("server"));
}
