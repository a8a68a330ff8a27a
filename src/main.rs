//! Twitch chat client - main binary

use clap::{Parser, Subcommand};
use rustwitch_core::{ChatSession, Config, SessionEvent};
use std::path::PathBuf;
use tracing::{info, warn};

/// Twitch chat client for the legacy IRC-based protocol
#[derive(Parser)]
#[command(name = "rustwitch")]
#[command(about = "A Twitch chat client engine for the legacy IRC-based protocol")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level)?;

    // Handle subcommands
    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => {
                generate_config(&output)?;
                return Ok(());
            }
            Commands::Version => {
                show_version();
                return Ok(());
            }
        }
    }

    // Load configuration
    let config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };

    // Test configuration if requested
    if cli.test_config {
        config.validate()?;
        info!("Configuration is valid");
        return Ok(());
    }

    config.validate()?;

    let channels = config.server.channels.clone();
    let (session, mut events) = ChatSession::new(config)?;
    session.prepare_connection(&channels)?;

    info!("Session started, waiting for events (ctrl-c to quit)");
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => report_event(event),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                session.disconnect();
                break;
            }
        }
    }

    Ok(())
}

/// Print a session event for the terminal
fn report_event(event: SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => info!("Connection state: {:?}", state),
        SessionEvent::ChannelJoined { channel } => info!("Joined {}", channel),
        SessionEvent::ChannelParted { channel } => info!("Left {}", channel),
        SessionEvent::ChannelMessage {
            channel,
            name,
            text,
        } => info!("[{}] <{}> {}", channel, name, text),
        SessionEvent::ModeratorsChanged { channel, names } => {
            info!("Moderators changed in {}: {:?}", channel, names)
        }
        SessionEvent::SubscriberConfirmed { channel, name } => {
            info!("{} is a subscriber of {}", name, channel)
        }
        SessionEvent::UserBanned { channel, name } => {
            warn!("{} was banned/timed out in {}", name, channel)
        }
        SessionEvent::Notice { text } => info!("{}", text),
        SessionEvent::UserAdded { .. }
        | SessionEvent::UserUpdated { .. }
        | SessionEvent::UserOffline { .. } => {}
    }
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &PathBuf) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Show version information
fn show_version() {
    println!("rustwitch {}", env!("CARGO_PKG_VERSION"));
}
