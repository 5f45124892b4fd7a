//! Telemetry sender: periodic sensor batches, keep-alive heartbeats, and
//! an optional jam window during which it floods the link.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use tokio::net::UdpSocket;
use tokio::time::{interval_at, Instant, Interval};

use crate::wire::Packet;

/// Packet spacing while a jam window is active.
const JAM_INTERVAL: Duration = Duration::from_millis(5);

#[derive(clap::Args, Debug)]
pub struct ClientArgs {
    /// Device identity carried in every frame.
    #[arg(long, default_value_t = 1001)]
    pub device_id: u16,

    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port.
    #[arg(long, default_value_t = 12000)]
    pub port: u16,

    /// Seconds between batches.
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,

    /// DATA packets per batch.
    #[arg(long, default_value_t = 1)]
    pub batch_size: u32,

    /// Seconds after start before flooding the link.
    #[arg(long)]
    pub jam_after: Option<u64>,

    /// How long the flood lasts, in seconds.
    #[arg(long)]
    pub jam_for: Option<u64>,

    /// Seconds between keep-alive heartbeats.
    #[arg(long, default_value_t = 15)]
    pub heartbeat_secs: u64,
}

fn jam_window_active(jam_after: Option<u64>, jam_for: Option<u64>, elapsed: Duration) -> bool {
    let (Some(after), Some(window)) = (jam_after, jam_for) else {
        return false;
    };
    let start = Duration::from_secs(after);
    elapsed >= start && elapsed < start + Duration::from_secs(window)
}

/// Three big-endian f32 readings: temperature, humidity, voltage.
fn sensor_payload(rng: &mut StdRng) -> Bytes {
    let mut payload = BytesMut::with_capacity(12);
    payload.put_f32(20.0 + rng.random::<f32>() * 10.0);
    payload.put_f32(30.0 + rng.random::<f32>() * 40.0);
    payload.put_f32(3.0 + rng.random::<f32>() * 2.0);
    payload.freeze()
}

fn cadence(period: Duration) -> Interval {
    // First tick completes immediately, so a fresh cadence sends right away.
    tokio::time::interval(period)
}

pub async fn run(args: ClientArgs) -> anyhow::Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((args.host.as_str(), args.port)).await?;
    let server = format!("{}:{}", args.host, args.port);
    tracing::info!(
        device_id = args.device_id,
        server = %server,
        interval = args.interval,
        batch_size = args.batch_size,
        "telemetry client started"
    );

    let sample_period = Duration::from_secs_f64(args.interval.max(0.001));
    let hb_period = Duration::from_secs(args.heartbeat_secs.max(1));

    // Seeding from the device id keeps a device's readings reproducible
    // across runs.
    let mut rng = StdRng::seed_from_u64(args.device_id as u64);
    let mut seq: u16 = 0;
    let mut sent: u64 = 0;
    let mut send_errors: u64 = 0;
    let started = Instant::now();

    let mut ticker = cadence(sample_period);
    let mut heartbeat = interval_at(Instant::now() + hb_period, hb_period);
    let mut jamming = false;

    loop {
        let jam_now = jam_window_active(args.jam_after, args.jam_for, started.elapsed());
        if jam_now != jamming {
            jamming = jam_now;
            ticker = cadence(if jamming { JAM_INTERVAL } else { sample_period });
            tracing::info!(jamming, "send cadence changed");
        }

        tokio::select! {
            _ = ticker.tick() => {
                for _ in 0..args.batch_size.max(1) {
                    let packet = Packet::data(args.device_id, seq, sensor_payload(&mut rng));
                    seq = seq.wrapping_add(1);
                    match socket.send(&packet.encode()).await {
                        Ok(_) => sent += 1,
                        Err(e) => {
                            // Transient on connected UDP when the server is
                            // not up yet; keep sending.
                            send_errors += 1;
                            tracing::debug!(error = %e, "send failed");
                        }
                    }
                }
            }
            _ = heartbeat.tick() => {
                let packet = Packet::heartbeat(args.device_id, seq);
                seq = seq.wrapping_add(1);
                match socket.send(&packet.encode()).await {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        send_errors += 1;
                        tracing::debug!(error = %e, "heartbeat send failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(sent, send_errors, "interrupt received, stopping");
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn jam_window_boundaries() {
        assert!(!jam_window_active(None, None, secs(10)));
        assert!(!jam_window_active(Some(5), None, secs(10)));
        assert!(!jam_window_active(Some(5), Some(3), secs(4)));
        assert!(jam_window_active(Some(5), Some(3), secs(5)));
        assert!(jam_window_active(Some(5), Some(3), secs(7)));
        assert!(!jam_window_active(Some(5), Some(3), secs(8)));
    }

    #[test]
    fn payload_is_three_readings_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let payload = sensor_payload(&mut rng);
        assert_eq!(payload.len(), 12);
        let temp = f32::from_be_bytes(payload[0..4].try_into().unwrap());
        let humidity = f32::from_be_bytes(payload[4..8].try_into().unwrap());
        let voltage = f32::from_be_bytes(payload[8..12].try_into().unwrap());
        assert!((20.0..30.0).contains(&temp));
        assert!((30.0..70.0).contains(&humidity));
        assert!((3.0..5.0).contains(&voltage));
    }

    #[test]
    fn seeded_stream_is_reproducible() {
        let mut a = StdRng::seed_from_u64(1001);
        let mut b = StdRng::seed_from_u64(1001);
        assert_eq!(sensor_payload(&mut a), sensor_payload(&mut b));
    }
}
