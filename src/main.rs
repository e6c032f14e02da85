use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use payment_connector::{app_router, config, db, events, AppState};

fn init_tracing(config: &config::AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    if config.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::load_config().context("loading configuration")?;
    init_tracing(&config);
    info!(environment = %config.environment, "starting payment connector");

    let db = db::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    if config.auto_migrate {
        db::ensure_schema(&db).await.context("creating schema")?;
    }

    let (event_sender, event_receiver) = events::event_channel(1024);
    tokio::spawn(events::run_event_listener(event_receiver));

    let state = Arc::new(AppState::build(config, db, event_sender)?);

    let capture_process = Arc::new(state.capture_process());
    tokio::spawn(capture_process.run_scheduler());

    let addr = state.config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(
        listener,
        app_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    Ok(())
}
