//! Errors for the vessel tracker
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("feed transport error")]
    FeedTransport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("feed reconnect attempts exhausted after {0} tries")]
    FeedReconnectExhausted(u32),

    #[error("provider request error")]
    ProviderRequest(#[from] reqwest::Error),

    #[error("position provider is not configured")]
    ProviderNotConfigured,

    #[error("serialization error")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error")]
    Config(#[from] config::ConfigError),

    #[error("configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("invalid MMSI: {0}")]
    InvalidMmsi(String),

    #[error("no MMSI or IMO identifier for vessel {0}")]
    MissingIdentifiers(String),

    #[error("unrecognized feed frame: {0}")]
    UnknownFrame(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("database migration error")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
