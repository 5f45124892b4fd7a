//! Telemetry receiver: decode, annotate, log.
//!
//! Every accepted frame becomes one CSV row annotated with per-device
//! sequence analysis (duplicates, gaps, wrap-around) and latency/jitter
//! derived from the sender's truncated timestamp. The CSV is flushed on
//! SIGINT before the process exits, which is why the harness always
//! interrupts the server instead of killing it.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::wire::{MsgType, Packet, SEQ_MODULUS, WRAP_THRESHOLD};

const CSV_HEADER: &str = "device_id,seq,timestamp_sent,arrival_time,duplicate_flag,gap_flag,gap_count,latency_ms,jitter_ms,msg_type,payload_size";

/// Duplicate detection window, in packets per device.
const DUP_WINDOW: usize = 100;

#[derive(clap::Args, Debug)]
pub struct ServerArgs {
    /// UDP listen port.
    #[arg(long, default_value_t = 12000)]
    pub port: u16,

    /// CSV output path.
    #[arg(long, default_value = "telemetry_log.csv")]
    pub output: PathBuf,

    /// Seconds between receive-rate log lines.
    #[arg(long, default_value_t = 10)]
    pub stats_interval: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct SeqFlags {
    duplicate: bool,
    gap: bool,
    gap_count: u32,
    out_of_order: bool,
}

struct DeviceState {
    last_seq: Option<u16>,
    recent: VecDeque<u16>,
    last_latency_ms: i64,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            last_seq: None,
            recent: VecDeque::with_capacity(DUP_WINDOW),
            last_latency_ms: 0,
        }
    }

    /// Classify `seq` against this device's history. Duplicates and
    /// reordered packets leave the cursor where it was, so a late packet
    /// cannot erase an already-counted gap.
    fn observe_seq(&mut self, seq: u16) -> SeqFlags {
        let mut flags = SeqFlags::default();

        if self.recent.contains(&seq) {
            flags.duplicate = true;
            return flags;
        }
        self.recent.push_back(seq);
        if self.recent.len() > DUP_WINDOW {
            self.recent.pop_front();
        }

        let Some(last) = self.last_seq else {
            self.last_seq = Some(seq);
            return flags;
        };

        let diff = seq as i32 - last as i32;
        if diff < -(WRAP_THRESHOLD as i32) {
            // Wrapped through zero.
            let real_diff = seq as u32 + SEQ_MODULUS - last as u32;
            if real_diff > 1 {
                flags.gap = true;
                flags.gap_count = real_diff - 1;
            }
            self.last_seq = Some(seq);
        } else if diff < 0 {
            flags.out_of_order = true;
        } else {
            if diff > 1 {
                flags.gap = true;
                flags.gap_count = (diff - 1) as u32;
            }
            self.last_seq = Some(seq);
        }
        flags
    }

    /// Latency against the sender's 32-bit millisecond timestamp, plus
    /// jitter as the absolute change from the previous latency.
    fn observe_latency(&mut self, sent_ms: u32, arrival_secs: f64) -> (i64, i64) {
        let arrival_masked = ((arrival_secs * 1000.0) as i64) & 0xFFFF_FFFF;
        let mut latency = arrival_masked - sent_ms as i64;
        if latency < 0 {
            if latency < -(1_i64 << 31) {
                // Arrival clock wrapped its 32 bits before the send clock.
                latency += 1_i64 << 32;
            } else {
                // Small clock skew on the same host; clamp.
                latency = 0;
            }
        }
        let jitter = if self.last_latency_ms > 0 {
            (latency - self.last_latency_ms).abs()
        } else {
            0
        };
        self.last_latency_ms = latency;
        (latency, jitter)
    }
}

struct Row {
    device_id: u16,
    seq: u16,
    timestamp_sent: u32,
    arrival_secs: f64,
    flags: SeqFlags,
    latency_ms: i64,
    jitter_ms: i64,
    msg_type: MsgType,
    payload_size: usize,
}

fn format_row(row: &Row) -> String {
    format!(
        "{},{},{},{:.6},{},{},{},{:.3},{:.3},{},{}",
        row.device_id,
        row.seq,
        row.timestamp_sent,
        row.arrival_secs,
        row.flags.duplicate as u8,
        row.flags.gap as u8,
        row.flags.gap_count,
        row.latency_ms as f64,
        row.jitter_ms as f64,
        row.msg_type.label(),
        row.payload_size
    )
}

fn unix_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub async fn run(args: ServerArgs) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", args.port)).await?;
    let mut writer = BufWriter::new(File::create(&args.output)?);
    writeln!(writer, "{CSV_HEADER}")?;
    writer.flush()?;
    tracing::info!(
        port = args.port,
        output = %args.output.display(),
        "telemetry server listening"
    );

    let mut devices: HashMap<u16, DeviceState> = HashMap::new();
    let mut received: u64 = 0;
    let mut bad_frames: u64 = 0;
    let mut reordered: u64 = 0;

    let period = Duration::from_secs(args.stats_interval.max(1));
    let mut stats = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut buf = vec![0u8; 2048];

    loop {
        tokio::select! {
            res = socket.recv_from(&mut buf) => {
                let (len, peer) = res?;
                let arrival_secs = unix_secs();
                match Packet::decode(&buf[..len]) {
                    Ok(packet) => {
                        let state = devices.entry(packet.device_id).or_insert_with(|| {
                            tracing::info!(device_id = packet.device_id, "new device");
                            DeviceState::new()
                        });
                        let flags = state.observe_seq(packet.seq);
                        let (latency_ms, jitter_ms) =
                            state.observe_latency(packet.timestamp_ms, arrival_secs);

                        if flags.duplicate {
                            tracing::debug!(device_id = packet.device_id, seq = packet.seq, "duplicate");
                        }
                        if flags.gap {
                            tracing::debug!(
                                device_id = packet.device_id,
                                seq = packet.seq,
                                lost = flags.gap_count,
                                "sequence gap"
                            );
                        }
                        if flags.out_of_order {
                            reordered += 1;
                        }

                        let row = Row {
                            device_id: packet.device_id,
                            seq: packet.seq,
                            timestamp_sent: packet.timestamp_ms,
                            arrival_secs,
                            flags,
                            latency_ms,
                            jitter_ms,
                            msg_type: packet.msg_type,
                            payload_size: packet.payload.len(),
                        };
                        writeln!(writer, "{}", format_row(&row))?;
                        received += 1;
                    }
                    Err(e) => {
                        bad_frames += 1;
                        tracing::warn!(error = %e, peer = %peer, "dropping bad frame");
                    }
                }
            }
            _ = stats.tick() => {
                tracing::info!(received, bad_frames, reordered, devices = devices.len(), "receiving");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, flushing telemetry log");
                break;
            }
        }
    }

    writer.flush()?;
    tracing::info!(received, bad_frames, "telemetry server stopped");
    Ok(())
}
