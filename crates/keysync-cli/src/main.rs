//! keysync CLI
//!
//! Configuration, device inspection and offline replay tool for keysync.

mod replay;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use keysync_config::Config;
use miette::IntoDiagnostic;

#[derive(Parser, Debug)]
#[command(name = "keysync")]
#[command(about = "Keyboard event conversion tool")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = keysync_config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate,

    /// List available input devices
    Devices,

    /// Print the effective keymap as KDL
    Keymap,

    /// Run a trace of hardware events through the converter
    Replay {
        /// File of hardware events, one JSON object per line
        trace: PathBuf,

        /// Acknowledge primary events as unhandled
        #[arg(long)]
        unhandled: bool,
    },
}

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Validate => cmd_validate(&config_path),
        Commands::Devices => cmd_devices(),
        Commands::Keymap => cmd_keymap(&config_path),
        Commands::Replay { trace, unhandled } => cmd_replay(&config_path, &trace, !unhandled),
    }
}

/// The configuration at `path`, or the defaults when there is no file.
fn load_config(path: &Path) -> miette::Result<Config> {
    if !path.exists() {
        tracing::info!("No configuration at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    Ok(keysync_config::parse_config(path)?)
}

fn cmd_validate(config_path: &Path) -> miette::Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = keysync_config::parse_config(config_path)?;

    println!("Configuration is valid!");
    println!("  Log level: {}", config.global.log_level.as_filter());
    if let Some(device) = &config.global.device {
        println!("  Device: {}", device.display());
    }
    if let Some(socket) = &config.global.socket_path {
        println!("  Socket: {}", socket.display());
    }
    println!("  Keys: {}", config.keymap.keys.len());
    println!("  Modifiers: {}", config.keymap.modifiers.len());
    match config.keymap.caps_lock {
        Some((code, flag)) => println!("  CapsLock: code {} flag 0x{:x}", code, flag),
        None => println!("  CapsLock: none"),
    }

    Ok(())
}

fn cmd_devices() -> miette::Result<()> {
    println!("Available input devices:\n");

    let devices = keysync_daemon::device::enumerate_devices()
        .map_err(|e| miette::miette!("{:#}", e))?;

    for device in devices {
        let device_type = if device.keyboard { "keyboard" } else { "other" };
        println!("  {} [{}]", device.name, device_type);
        println!("    Path: {}", device.path.display());
        println!("    ID: {}", device.vendor_product());
        println!();
    }

    Ok(())
}

fn cmd_keymap(config_path: &Path) -> miette::Result<()> {
    let config = load_config(config_path)?;
    print!("{}", config.keymap.to_kdl());
    Ok(())
}

fn cmd_replay(config_path: &Path, trace: &Path, handled: bool) -> miette::Result<()> {
    let config = load_config(config_path)?;
    let input = BufReader::new(File::open(trace).into_diagnostic()?);
    let stdout = std::io::stdout();

    let summary = replay::replay(config.keymap.key_tables(), input, stdout.lock(), handled)?;

    eprintln!(
        "Replayed {} event(s): {} primary, {} synthesized, {} handled, {} unhandled",
        summary.events, summary.primary, summary.synthesized, summary.handled, summary.unhandled
    );

    Ok(())
}
