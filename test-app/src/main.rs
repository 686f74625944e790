// NetSDR test application -- CLI tool for exercising the NetSDR client
// against a receiver on the network.
//
// Usage:
//   netsdr-test-app --host 192.168.1.50 frequency 14010000
//   netsdr-test-app --host 192.168.1.50 frequency 7050000 --channel 2
//   netsdr-test-app --host 192.168.1.50 --reorder-capacity 0 stream --seconds 5
//   netsdr-test-app --host 192.168.1.50 listen --seconds 30
//
// Logging is controlled with RUST_LOG (e.g. RUST_LOG=netsdr_client=debug).

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use netsdr_client::{NetSdrClient, NetSdrClientBuilder};
use netsdr_core::{ChannelId, ControlItemCode, ControlItemMessage};
use netsdr_protocol::codec;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// NetSDR test application -- drives a receiver from the command line.
#[derive(Parser)]
#[command(name = "netsdr-test-app", version, about)]
struct Cli {
    /// Receiver IP address or hostname.
    #[arg(long)]
    host: String,

    /// TCP control port on the receiver.
    #[arg(long, default_value_t = 50000)]
    control_port: u16,

    /// Local UDP port to receive IQ data on (0 = any free port).
    #[arg(long, default_value_t = 60000)]
    data_port: u16,

    /// Command response timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Reorder window in packets (0 = arrival order).
    #[arg(long, default_value_t = 5)]
    reorder_capacity: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Tune a receiver channel.
    Frequency {
        /// Frequency in Hz.
        freq_hz: i64,

        /// Channel: 1, 2, or all.
        #[arg(long, default_value = "1")]
        channel: ChannelId,
    },

    /// Start a capture, count delivered packets and sequence gaps, then stop.
    Stream {
        /// How long to capture.
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// FIFO size byte sent with the start command.
        #[arg(long, default_value_t = 10)]
        fifo_size: u8,
    },

    /// Print unsolicited messages from the receiver.
    Listen {
        /// How long to listen (0 = until the connection ends).
        #[arg(long, default_value_t = 30)]
        seconds: u64,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Format a frequency in Hz as a human-readable MHz string.
fn format_freq(hz: i64) -> String {
    let mhz = hz as f64 / 1_000_000.0;
    format!("{mhz:.6} MHz")
}

fn describe(message: &ControlItemMessage) -> String {
    match message.item_code {
        Some(ControlItemCode::ReceiverFrequency) => {
            match codec::decode_frequency_parameters(&message.parameters) {
                Ok((channel, hz)) => {
                    format!("frequency channel 0x{channel:02X}: {}", format_freq(hz))
                }
                Err(_) => format!("frequency (malformed: {:02X?})", &message.parameters[..]),
            }
        }
        Some(ControlItemCode::ReceiverState) => {
            let running = message.parameters.get(1) == Some(&0x02);
            format!("receiver state: {}", if running { "running" } else { "idle" })
        }
        Some(code) => format!("item {code}: {:02X?}", &message.parameters[..]),
        None => "NAK".to_string(),
    }
}

/// Time left before `deadline`, or `None` once it has passed.
fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    match deadline {
        Some(dl) => {
            let left = dl.saturating_duration_since(Instant::now());
            (!left.is_zero()).then_some(left)
        }
        None => Some(Duration::from_secs(3600)),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_frequency(client: &NetSdrClient, channel: ChannelId, freq_hz: i64) -> Result<()> {
    client
        .set_receiver_frequency(channel, freq_hz)
        .await
        .context("set frequency failed")?;
    println!("Channel {channel}: set to {}", format_freq(freq_hz));
    Ok(())
}

async fn cmd_stream(client: &NetSdrClient, seconds: u64, fifo_size: u8) -> Result<()> {
    let mut data = client.subscribe_data();
    client
        .start_capture(fifo_size)
        .await
        .context("start capture failed")?;

    if let Some(addr) = client.data_local_addr().await {
        println!("Streaming on {addr} for {seconds}s...");
    }

    let started = Instant::now();
    let deadline = started + Duration::from_secs(seconds);
    let mut packets: u64 = 0;
    let mut bytes: u64 = 0;
    let mut gaps: u64 = 0;
    let mut last: Option<i16> = None;

    while let Some(left) = remaining(Some(deadline)) {
        match tokio::time::timeout(left, data.recv()).await {
            Ok(Some(packet)) => {
                if let Some(prev) = last {
                    if packet.sequence_number.wrapping_sub(prev) != 1 {
                        gaps += 1;
                    }
                }
                last = Some(packet.sequence_number);
                packets += 1;
                bytes += packet.sample_bytes.len() as u64;
            }
            Ok(None) => {
                println!("Data channel closed.");
                break;
            }
            Err(_) => break,
        }
    }

    client.stop_capture().await.context("stop capture failed")?;

    // Packets flushed from the reorder buffer on stop.
    while let Ok(packet) = data.try_recv() {
        packets += 1;
        bytes += packet.sample_bytes.len() as u64;
    }

    let elapsed = started.elapsed().as_secs_f64();
    println!("Packets:        {packets}");
    println!("Sample bytes:   {bytes}");
    println!("Sequence gaps:  {gaps}");
    println!("Dropped (slow): {}", client.dropped_data_packets());
    if elapsed > 0.0 {
        println!("Rate:           {:.1} packets/s", packets as f64 / elapsed);
    }
    Ok(())
}

async fn cmd_listen(client: &NetSdrClient, seconds: u64) -> Result<()> {
    let mut unsolicited = client.subscribe_unsolicited();
    let mut events = client.subscribe();

    println!("Listening for unsolicited messages (Ctrl-C to stop)...");

    let deadline = (seconds > 0).then(|| Instant::now() + Duration::from_secs(seconds));

    while let Some(left) = remaining(deadline) {
        tokio::select! {
            message = unsolicited.recv() => match message {
                Ok(message) => println!("[unsolicited] {}", describe(&message)),
                Err(RecvError::Lagged(n)) => {
                    println!("[warning] missed {n} messages (consumer too slow)");
                }
                Err(RecvError::Closed) => break,
            },
            event = events.recv() => match event {
                Ok(event) => {
                    println!("[event] {event:?}");
                    if !client.is_connected() {
                        break;
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = tokio::time::sleep(left) => {}
        }
    }

    println!("Listen finished.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let client = NetSdrClientBuilder::new()
        .host(&cli.host)
        .control_port(cli.control_port)
        .data_port(cli.data_port)
        .response_timeout(Duration::from_millis(cli.timeout_ms))
        .reorder_capacity(cli.reorder_capacity)
        .build()?;

    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to {}:{}", cli.host, cli.control_port))?;

    let result = match &cli.command {
        Command::Frequency { freq_hz, channel } => cmd_frequency(&client, *channel, *freq_hz).await,
        Command::Stream { seconds, fifo_size } => cmd_stream(&client, *seconds, *fifo_size).await,
        Command::Listen { seconds } => cmd_listen(&client, *seconds).await,
    };

    client.disconnect().await.ok();
    result
}
