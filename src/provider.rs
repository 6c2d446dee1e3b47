//! REST position provider client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::ProviderConfig,
    errors::TrackerError,
    models::{Mmsi, ProviderReport},
};

/// Identifiers for one provider lookup. At least one of MMSI/IMO must be
/// set; the reconciliation job never queries by name alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderQuery {
    pub vessel_name: String,
    pub mmsi: Option<Mmsi>,
    pub imo: Option<String>,
}

/// Fetch the latest known position record for one vessel.
///
/// `Ok(None)` means the provider had no data for this vessel; a missing
/// credential surfaces as [`TrackerError::ProviderNotConfigured`] so
/// operators can tell a configuration problem from a data-availability gap.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    async fn fetch(&self, query: &ProviderQuery) -> Result<Option<ProviderReport>, TrackerError>;
}

/// HTTP implementation of [`PositionProvider`].
pub struct RestPositionProvider {
    client: Client,
    config: ProviderConfig,
}

impl RestPositionProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl PositionProvider for RestPositionProvider {
    async fn fetch(&self, query: &ProviderQuery) -> Result<Option<ProviderReport>, TrackerError> {
        let Some(api_key) = &self.config.api_key else {
            return Err(TrackerError::ProviderNotConfigured);
        };

        let url = format!("{}/v1/vessel", self.config.base_url.trim_end_matches('/'));

        let mut params: Vec<(&str, String)> = vec![("name", query.vessel_name.clone())];
        if let Some(mmsi) = query.mmsi {
            params.push(("mmsi", mmsi.to_string()));
        }
        if let Some(imo) = &query.imo {
            params.push(("imo", imo.clone()));
        }

        debug!(vessel_name = %query.vessel_name, "requesting provider position");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .bearer_auth(api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(
                vessel_name = %query.vessel_name,
                status = %response.status(),
                "provider returned non-success status"
            );
            return Ok(None);
        }

        let payload: Value = response.json().await?;

        let mut report: ProviderReport = match serde_json::from_value(payload.clone()) {
            Ok(report) => report,
            Err(e) => {
                warn!(vessel_name = %query.vessel_name, "provider payload not understood: {e}");
                return Ok(None);
            }
        };

        if !report.has_coordinates() {
            return Ok(None);
        }

        report.raw_payload = Some(payload);
        Ok(Some(report))
    }
}
