use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Use the library instead of redeclaring modules
use deadman::{config::Config, database::Database, sweeper::SweeperService, web::WebServer};

#[derive(Parser)]
#[command(name = "deadman")]
#[command(version = "0.1.0")]
#[command(about = "A dead man's switch job monitor with cron and interval schedules")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Sweep interval in seconds (overrides config file)
    #[arg(short = 's', long, value_name = "SECS")]
    sweep_interval: Option<u64>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = format!("deadman={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting deadman job monitor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from specified file
    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }
    if let Some(sweep_interval) = cli.sweep_interval {
        config.monitor.sweep_interval_secs = sweep_interval;
    }

    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    // Start the expiry/hang sweeper on its own task
    let sweeper = SweeperService::new(
        database.clone(),
        Duration::from_secs(config.monitor.sweep_interval_secs),
    );
    tokio::spawn({
        let sweeper = sweeper.clone();
        async move {
            if let Err(e) = sweeper.start().await {
                tracing::error!("Sweeper service failed: {}", e);
            }
        }
    });

    let web_server = WebServer::new(config, database, sweeper).await?;

    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    web_server.serve().await?;

    Ok(())
}
