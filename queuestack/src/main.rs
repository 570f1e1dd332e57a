//! Queuestack - local SQS emulator
//!
//! Serves an SQS-compatible API from process memory so applications and
//! integration tests can run real AWS SDKs without touching the cloud.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use queuestack::{config, AppState};
use queuestack_sqs::QueueRegistry;

#[derive(Parser, Debug)]
#[command(name = "queuestack")]
#[command(about = "Local in-memory SQS emulator", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9324", env = "PORT")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "QUEUESTACK_HOST")]
    host: String,

    /// Path to a YAML configuration file with queues to create at startup
    #[arg(short, long, env = "QUEUESTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "QUEUESTACK_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("queuestack={},tower_http=debug", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let registry = QueueRegistry::new();

    let mut port = args.port;
    let mut host = args.host.clone();
    if let Some(path) = &args.config {
        let config = config::load(path)?;
        info!(path = %path.display(), "loaded configuration");
        config::bootstrap(&registry, &config);

        // Flags and environment win over the file.
        if port == 9324 && std::env::var_os("PORT").is_none() {
            port = config.server.port;
        }
        if host == "0.0.0.0" && std::env::var_os("QUEUESTACK_HOST").is_none() {
            host = config.server.host.clone();
        }
    }

    let app = queuestack::create_router(AppState {
        registry: registry.clone(),
    });

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Starting Queuestack");
    info!("SQS endpoint: http://localhost:{port}/");
    info!("Admin UI: http://localhost:{port}/admin");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    registry.shutdown();
    Ok(())
}
