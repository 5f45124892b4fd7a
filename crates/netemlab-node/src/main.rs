//! netemlab-node: the UDP telemetry pair driven by the harness.
//!
//! One binary, two roles:
//!
//! ```bash
//! # Receiver: decodes frames, annotates loss/duplication/latency, writes CSV
//! netemlab-node server --port 12000 --output telemetry.csv
//!
//! # Sender: periodic sensor readings plus heartbeats
//! netemlab-node client --device-id 1001 --host 127.0.0.1 --port 12000 --interval 1.0
//! ```
//!
//! Both roles exit cleanly on SIGINT; the server flushes its CSV first.

mod client;
mod server;
mod wire;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "netemlab-node", about = "UDP telemetry server/client pair")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Receive telemetry and write the annotated CSV.
    Server(server::ServerArgs),
    /// Send periodic sensor readings.
    Client(client::ClientArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    match Cli::parse().role {
        Role::Server(args) => server::run(args).await,
        Role::Client(args) => client::run(args).await,
    }
}
