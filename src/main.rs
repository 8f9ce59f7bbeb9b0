//! TrieMQ - Trie-routed TCP publish/subscribe broker
//!
//! Usage:
//!   triemq [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   --pub-bind <ADDR>      Publisher port bind address (default: 0.0.0.0:5561)
//!   --sub-bind <ADDR>      Subscriber port bind address (default: 0.0.0.0:5562)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use triemq::broker::Broker;
use triemq::config::Config;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// TrieMQ - trie-routed publish/subscribe broker
#[derive(Parser, Debug)]
#[command(name = "triemq")]
#[command(author = "TrieMQ Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Trie-routed TCP publish/subscribe broker")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Publisher port bind address
    #[arg(long)]
    pub_bind: Option<SocketAddr>,

    /// Subscriber port bind address
    #[arg(long)]
    sub_bind: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise use defaults
    let file_config = if let Some(config_path) = &args.config {
        match Config::load(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    match &file_config.log.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("failed to open log file {:?}: {}", path, e))?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level.to_tracing_level())
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level.to_tracing_level())
                .with_target(false)
                .compact()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // Write the PID file before the listeners come up
    if let Some(pid_path) = &file_config.server.pid_file {
        std::fs::write(pid_path, format!("{}\n", std::process::id()))
            .map_err(|e| format!("failed to create pid file {:?}: {}", pid_path, e))?;
        info!("Wrote PID file {:?}", pid_path);
    }

    // CLI args override file config
    let mut broker_config = file_config.broker_config();
    if let Some(addr) = args.pub_bind {
        broker_config.pub_bind = addr;
    }
    if let Some(addr) = args.sub_bind {
        broker_config.sub_bind = addr;
    }

    info!("Starting TrieMQ broker");
    let broker = Broker::new(broker_config);
    broker.run().await?;

    Ok(())
}
