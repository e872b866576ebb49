//! keysync daemon
//!
//! Reads a keyboard, converts its events and serves them to the downstream
//! pipeline over a Unix socket.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use evdev::InputEventKind;
use keysync_config::Config;
use keysync_core::Converter;
use keysync_daemon::device;
use keysync_daemon::host::HostKeyboard;
use keysync_daemon::transport::{ChannelSink, TransportServer};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "keysyncd")]
#[command(about = "Keyboard event conversion daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = keysync_config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Input device to read, overriding the configuration
    #[arg(short, long)]
    device: Option<PathBuf>,

    /// Socket path, overriding the configuration
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Grab the device for exclusive access
    #[arg(short, long)]
    grab: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    let config = if config_path.exists() {
        keysync_config::parse_config(&config_path)
            .with_context(|| format!("Failed to load {}", config_path.display()))?
    } else {
        Config::default()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.global.log_level.as_filter())),
        )
        .init();

    if config_path.exists() {
        tracing::info!("Loaded configuration from {}", config_path.display());
    } else {
        tracing::info!(
            "No configuration at {}, using the built-in keymap",
            config_path.display()
        );
    }

    let device_path = args.device.or_else(|| config.global.device.clone());
    let (device_path, mut device) = device::open_keyboard(device_path.as_deref())?;
    if args.grab {
        device
            .grab()
            .with_context(|| format!("Failed to grab {}", device_path.display()))?;
        tracing::info!("Grabbed {}", device_path.display());
    }

    let socket_path = args
        .socket
        .or_else(|| config.global.socket_path.clone())
        .unwrap_or_else(TransportServer::default_socket_path);
    let server = TransportServer::bind(&socket_path)?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
    let transport = tokio::spawn(server.run(outbound_rx, ack_tx));

    let mut host = HostKeyboard::new(&config.keymap);
    let mut converter = Converter::new(config.keymap.key_tables(), ChannelSink::new(outbound_tx));

    let mut events = device
        .into_event_stream()
        .with_context(|| format!("Failed to read events from {}", device_path.display()))?;

    tracing::info!("keysync daemon running");

    loop {
        tokio::select! {
            event = events.next_event() => {
                let event = event.context("Input device read failed")?;
                let InputEventKind::Key(key) = event.kind() else {
                    continue;
                };

                let Some(hardware) = host.process(key.code(), event.value(), timestamp_us(event.timestamp())) else {
                    continue;
                };

                let code = hardware.code;
                converter
                    .handle(&hardware, move |handled| {
                        tracing::trace!("Event for code {} handled={}", code, handled);
                    })
                    .context("Key event conversion failed")?;
            }
            ack = ack_rx.recv() => {
                let Some((response_id, handled)) = ack else {
                    anyhow::bail!("Transport stopped unexpectedly");
                };
                converter
                    .acknowledge(response_id, handled)
                    .context("Invalid acknowledgment")?;
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    tracing::info!("Shutting down...");

    // Closing the sink ends the transport task and removes the socket
    drop(converter);
    match transport.await {
        Ok(result) => result?,
        Err(e) => tracing::warn!("Transport task failed: {}", e),
    }

    Ok(())
}

fn timestamp_us(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}
