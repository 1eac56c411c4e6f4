//! pulsar-http-shim - HTTP request/reply shim for Apache Pulsar
//!
//! Usage:
//!   pulsar-http-shim [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>          Configuration file path
//!   -b, --bind <ADDR>            HTTP bind address (default: 0.0.0.0:8080)
//!   -s, --service-url <URL>      Broker service URL (default: pulsar://localhost:6650)
//!   -t, --reply-timeout <DUR>    Time to wait for a reply, e.g. "60s" or "2m"
//!   -l, --log-level              Log level (error, warn, info, debug, trace)
//!   -h, --help                   Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use pulsar_http_shim::broker::{connector_for, scheme_supported};
use pulsar_http_shim::config::Config;
use pulsar_http_shim::{AppState, Bridge, HttpServer, Metrics};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
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

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// pulsar-http-shim - bridge HTTP requests to Pulsar topics
#[derive(Parser, Debug)]
#[command(name = "pulsar-http-shim")]
#[command(version)]
#[command(about = "HTTP request/reply shim for Apache Pulsar")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Broker service URL (pulsar://, pulsar+ssl:// or memory://)
    #[arg(short, long)]
    service_url: Option<String>,

    /// How long /pulsar/send waits for a reply
    #[arg(short = 't', long, value_parser = humantime::parse_duration)]
    reply_timeout: Option<Duration>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Config file if given, otherwise defaults plus SHIM__* overrides
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides default (info)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(service_url) = args.service_url {
        config.broker.service_url = service_url;
    }
    if let Some(reply_timeout) = args.reply_timeout {
        config.broker.reply_timeout = reply_timeout;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let connector = match connector_for(&config.broker.service_url) {
        Ok(connector) => connector,
        Err(e) => {
            let scheme = config
                .broker
                .service_url
                .split("://")
                .next()
                .unwrap_or_default();
            if !scheme_supported(scheme) {
                error!(
                    "Broker scheme '{}' is not available in this build (rebuild with --features pulsar)",
                    scheme
                );
            }
            eprintln!("Error creating broker client: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting pulsar-http-shim");
    info!("  Bind address: {}", config.server.bind);
    info!("  Broker: {}", config.broker.service_url);
    info!("  Reply timeout: {:?}", config.broker.reply_timeout);
    info!("  Subscription: {}", config.broker.subscription_name);
    info!("  Max body size: {} bytes", config.server.max_body_size);

    let metrics = config.metrics.enabled.then(|| Arc::new(Metrics::new()));

    let mut bridge = Bridge::new(connector, config.broker.bridge_options());
    if let Some(metrics) = &metrics {
        bridge = bridge.with_metrics(metrics.clone());
    }

    let mut state = AppState::new(bridge).with_max_body_size(config.server.max_body_size);
    if let Some(metrics) = metrics {
        state = state.with_metrics(metrics);
        info!("  Metrics: enabled (http://{}/metrics)", config.server.bind);
    } else {
        info!("  Metrics: disabled");
    }

    HttpServer::new(state, config.server.bind).run().await?;

    Ok(())
}
