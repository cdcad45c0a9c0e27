//! Dolo API server

use anyhow::Context;
use dolo_api::{create_router, AppState, Config};
use dolo_shared::create_pool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG wins; LOG_FORMAT=json switches to structured output
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,dolo_api=debug,tower_http=info".into());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let json_layer = json_logs.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!json_logs).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    let addr = config.socket_addr()?;

    let pool = match &config.database_url {
        Some(url) => match create_pool(url, config.database_max_connections).await {
            Ok(pool) => {
                tracing::info!("Database pool created");
                Some(pool)
            }
            Err(e) => {
                tracing::error!(error = %e, "Database unavailable, submissions will not be stored");
                None
            }
        },
        None => {
            tracing::warn!("DATABASE_URL not set, running without persistence");
            None
        }
    };

    if config.stripe.is_none() {
        tracing::warn!("Stripe not configured, checkout and webhooks will answer 503");
    }
    if !config.email.is_enabled() {
        tracing::warn!("RESEND_API_KEY not set, emails will be skipped");
    }
    if config.supabase_url.is_some() {
        tracing::debug!("Supabase settings recorded for dashboard tooling");
    }

    let state = AppState::new(config, pool);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Dolo API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
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
