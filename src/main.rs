//! Vessel position tracker service

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};

use vessel_tracker::{
    config::AppConfig,
    database::Database,
    errors::TrackerError,
    feed::{FeedClient, WsConnector},
    http::{self, ApiState},
    provider::RestPositionProvider,
    registry::{PositionStore, Registry},
};

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    config.feed.validate()?;
    config.database.validate()?;

    let db = Arc::new(Database::from_url(&config.database.url).await?);
    let registry = Registry::new(db);

    // Subscribe scoped to already-configured vessels when any exist;
    // otherwise the client filters against the store per message.
    let tracked = registry.store().tracked_mmsis().await?;
    info!(mmsis = tracked.len(), "starting feed client");

    let connector = WsConnector::new(config.feed.url.clone());
    let feed = FeedClient::new(connector, registry.clone(), config.feed.clone());
    let feed_handle = feed.spawn(tracked);

    let provider = Arc::new(RestPositionProvider::new(config.provider.clone())?);
    let state = ApiState {
        registry,
        provider,
        cron_secret: config.http.cron_secret.clone(),
    };
    let app = http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.http.bind).await?;
    info!(bind = %config.http.bind, "serving reconciliation trigger endpoint");

    let shutdown_signal = signal::ctrl_c();

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("HTTP server exited: {e}");
            }
        }
        result = feed_handle.join() => {
            match result {
                Ok(()) => info!("feed client stopped"),
                Err(e) => error!("feed client fatal error: {e}"),
            }
        }
        _ = shutdown_signal => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
