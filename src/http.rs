//! HTTP surface: the reconciliation trigger endpoint.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{
    provider::PositionProvider,
    reconcile::{self, ReconcileSummary},
    registry::{PositionStore, Registry},
};

/// Shared state for the API router.
pub struct ApiState<S, P> {
    pub registry: Registry<S>,
    pub provider: Arc<P>,
    /// Shared secret for the trigger endpoint. `None` means unauthenticated
    /// calls are accepted, trading strictness for external scheduler
    /// simplicity.
    pub cron_secret: Option<String>,
}

impl<S, P> Clone for ApiState<S, P> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            provider: Arc::clone(&self.provider),
            cron_secret: self.cron_secret.clone(),
        }
    }
}

pub fn router<S, P>(state: ApiState<S, P>) -> Router
where
    S: PositionStore + 'static,
    P: PositionProvider + 'static,
{
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/reconcile", post(trigger_reconcile))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileParams {
    /// Ignore the per-vessel 24 h provider rate limit for this run
    #[serde(default)]
    pub forced: bool,
}

#[derive(Serialize)]
struct ReconcileResponse {
    message: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    summary: ReconcileSummary,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Scheduled trigger for the reconciliation job.
///
/// Rejection happens only before processing begins (bad auth); once the run
/// starts the response is always a structured summary.
async fn trigger_reconcile<S, P>(
    State(state): State<ApiState<S, P>>,
    Query(params): Query<ReconcileParams>,
    headers: HeaderMap,
) -> Result<Json<ReconcileResponse>, (StatusCode, Json<ErrorResponse>)>
where
    S: PositionStore + 'static,
    P: PositionProvider + 'static,
{
    if let Some(secret) = &state.cron_secret {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value == format!("Bearer {secret}"))
            .unwrap_or(false);

        if !authorized {
            warn!("rejected reconciliation trigger with bad or missing authorization");
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "unauthorized".to_string(),
                }),
            ));
        }
    }

    match reconcile::run(&state.registry, state.provider.as_ref(), params.forced).await {
        Ok(summary) => Ok(Json(ReconcileResponse {
            message: "vessel position reconciliation completed".to_string(),
            timestamp: Utc::now(),
            summary,
        })),
        Err(e) => {
            error!("reconciliation run failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "reconciliation run failed".to_string(),
                }),
            ))
        }
    }
}
