use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gymdesk::config::Config;
use gymdesk::AppState;

#[derive(Parser, Debug)]
#[command(name = "gymdesk")]
#[command(author, version, about = "Gym membership server", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "gymdesk.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the listening port
    #[arg(short, long, env = "GYMDESK_PORT")]
    port: Option<u16>,

    /// Session signing secret
    #[arg(long, env = "GYMDESK_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Password for the manager account created on first start
    #[arg(long, env = "GYMDESK_MANAGER_PASSWORD", hide_env_values = true)]
    manager_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.jwt_secret.is_some() {
        config.auth.jwt_secret = cli.jwt_secret;
    }
    if cli.manager_password.is_some() {
        config.auth.manager_password = cli.manager_password;
    }

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting gymdesk v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.server.data_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create data directory {}",
                config.server.data_dir.display()
            )
        })?;
    let upload_dir = config.upload_dir();
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", upload_dir.display()))?;

    if !config.server.static_dir.join("index.html").exists() {
        tracing::warn!(
            "No index.html in {}; pages will return 404 until the front end is built",
            config.server.static_dir.display()
        );
    }

    // Initialize database
    let db = gymdesk::db::init(&config.server.data_dir).await?;

    // Ensure the manager account exists
    gymdesk::api::auth::ensure_manager_user(&db, &config.auth).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, db));
    let app = gymdesk::api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
