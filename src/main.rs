use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use nas_ddns_api::app::App;
use nas_ddns_api::config::NasApiConfig;
use nas_ddns_api::http::HttpServer;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// NAS management API with sliding-window rate limiting.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "NASAPI_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides the configuration file)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Shared rate limit store URL (overrides the configuration file)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    match cli.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }

    info!("Starting NAS DDNS API");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = NasApiConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.http_addr = listen;
    }
    if cli.redis_url.is_some() {
        config.rate_limiting.redis_url = cli.redis_url;
    }
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let app = App::build(&config).await?;
    let server = HttpServer::new(config.server.http_addr, app.router());

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    app.shutdown();
    info!("NAS DDNS API stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
