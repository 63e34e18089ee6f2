//! Treasury Proxy - serve condominium appraisal lookups
//!
//! An HTTP service that fetches the Treasury Department's appraisal dataset,
//! keeps it in memory, and answers search and pagination requests from the
//! appraisal lookup UI.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use treasury_proxy::cli::Cli;
use treasury_proxy::config::Config;
use treasury_proxy::query::FetchMode;
use treasury_proxy::refresh::RefreshHandle;
use treasury_proxy::server::{build_router, AppState};

/// Installs the global tracing subscriber
///
/// Verbosity comes from `RUST_LOG` and defaults to `info`.
fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Resolves when the process receives Ctrl-C
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config.as_deref())?;
    let config = cli.apply(config)?;

    let source = Arc::new(config.upstream.client());
    let state = AppState::from_config(&config, source.clone());

    // Passthrough never reads the snapshot, so there is nothing to keep warm
    let refresh = match config.server.mode {
        FetchMode::Cached => Some(RefreshHandle::spawn(
            state.cache.clone(),
            config.cache.refresh_config(),
        )),
        FetchMode::Passthrough => None,
    };

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        mode = config.server.mode.as_str(),
        upstream = source.base_url(),
        "treasury-proxy listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(refresh) = refresh {
        refresh.shutdown().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
