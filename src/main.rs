//! linkfeed server entry point
//!
//! All operations are exposed via GraphQL at /graphql (HTTP) and
//! /graphql/ws (subscriptions).

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linkfeed::config::Config;
use linkfeed::db::Database;
use linkfeed::{AppState, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "linkfeed=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting linkfeed");

    let config = Arc::new(Config::from_env()?);
    info!(
        app_env = %config.app_env,
        queue_cap = ?config.subscription_queue_cap,
        "Configuration loaded"
    );

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;
    info!("Database connected");

    let state = AppState::new(config.clone(), db);
    let app = build_app(state.clone());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    info!("GraphQL playground: http://localhost:{}/graphql", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends every subscription stream so open sockets can drain.
            state.shutdown_realtime();
        })
        .await
        .context("Server error")?;

    info!("linkfeed stopped");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
