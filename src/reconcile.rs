//! Daily reconciliation against the REST position provider.
//!
//! Runs on an external trigger, derives the active vessel set from the
//! shipment registry and walks it sequentially through the same registry
//! pipeline the streaming path uses. Idempotent; safe to run alongside the
//! feed client.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::{
    errors::TrackerError,
    models::{parse_vessel_name, ActiveVessel, ShipmentVoyage},
    provider::{PositionProvider, ProviderQuery},
    registry::{PositionStore, Registry},
};

/// Minimum age of `last_api_call_at` before a vessel is refreshed again.
const PROVIDER_CALL_INTERVAL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedVessel {
    pub vessel_name: String,
    pub reason: String,
}

/// Outcome of one reconciliation run, grouped for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub total_active_vessels: usize,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedVessel>,
    pub missing_identifiers: Vec<String>,
}

/// Per-vessel rate limit against the provider. Forced runs ignore it.
pub fn should_call_provider(
    last_api_call_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    forced: bool,
) -> bool {
    if forced {
        return true;
    }
    match last_api_call_at {
        None => true,
        Some(last) => now - last >= Duration::hours(PROVIDER_CALL_INTERVAL_HOURS),
    }
}

/// Derive the active vessel working set from shipment voyages.
///
/// Voyage suffixes are stripped, names deduplicated, and the greatest known
/// ETA across all shipments kept per vessel. Output is sorted by name; the
/// order is deterministic but not a contract.
pub fn derive_active_vessels(voyages: &[ShipmentVoyage]) -> Vec<ActiveVessel> {
    let mut by_name: BTreeMap<String, Option<DateTime<Utc>>> = BTreeMap::new();

    for voyage in voyages {
        let Some(name) = parse_vessel_name(&voyage.vessel_name) else {
            continue;
        };

        let entry = by_name.entry(name).or_insert(None);
        if let Some(eta) = voyage.eta {
            if entry.map(|current| current < eta).unwrap_or(true) {
                *entry = Some(eta);
            }
        }
    }

    by_name
        .into_iter()
        .map(|(vessel_name, latest_eta)| ActiveVessel {
            vessel_name,
            latest_eta,
        })
        .collect()
}

/// Run one reconciliation pass over the active vessel set.
///
/// Always returns a structured summary; an empty active set is a success
/// with empty lists. Vessels are processed one at a time to bound provider
/// request rate.
pub async fn run<S, P>(
    registry: &Registry<S>,
    provider: &P,
    forced: bool,
) -> Result<ReconcileSummary, TrackerError>
where
    S: PositionStore,
    P: PositionProvider,
{
    let now = Utc::now();
    let voyages = registry.store().active_voyages(now).await?;
    let vessels = derive_active_vessels(&voyages);

    let mut summary = ReconcileSummary {
        total_active_vessels: vessels.len(),
        ..Default::default()
    };

    if vessels.is_empty() {
        info!("no active vessels found, nothing to reconcile");
        return Ok(summary);
    }

    info!(vessels = vessels.len(), forced, "starting reconciliation run");

    for vessel in vessels {
        let name = vessel.vessel_name;

        let row = match registry.store().row_by_name(&name).await? {
            Some(row) => row,
            // Shipment-referenced vessels are trusted input, so this path
            // may create the row the streaming path will later populate.
            None => registry.create_placeholder(&name).await?,
        };

        if !should_call_provider(row.last_api_call_at, now, forced) {
            summary.skipped.push(name);
            continue;
        }

        if row.mmsi.is_none() && row.imo.is_none() {
            summary.missing_identifiers.push(name.clone());
            summary.failed.push(FailedVessel {
                vessel_name: name,
                reason: "no MMSI or IMO configured for this vessel".to_string(),
            });
            continue;
        }

        let query = ProviderQuery {
            vessel_name: name.clone(),
            mmsi: row.mmsi,
            imo: row.imo.clone(),
        };

        match provider.fetch(&query).await {
            Ok(Some(report)) => match registry.apply_provider_report(row, &report, now).await {
                Ok(_) => summary.updated.push(name),
                Err(e) => {
                    error!(vessel_name = %name, "failed to store provider result: {e}");
                    summary.failed.push(FailedVessel {
                        vessel_name: name,
                        reason: format!("failed to store provider result: {e}"),
                    });
                }
            },
            Ok(None) => summary.failed.push(FailedVessel {
                vessel_name: name,
                reason: "provider returned no data for this vessel".to_string(),
            }),
            Err(TrackerError::ProviderNotConfigured) => summary.failed.push(FailedVessel {
                vessel_name: name,
                reason: "position provider is not configured (missing credentials)".to_string(),
            }),
            Err(e) => summary.failed.push(FailedVessel {
                vessel_name: name,
                reason: format!("provider request failed: {e}"),
            }),
        }
    }

    info!(
        updated = summary.updated.len(),
        skipped = summary.skipped.len(),
        failed = summary.failed.len(),
        missing_identifiers = summary.missing_identifiers.len(),
        "reconciliation run completed"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rate_limit_blocks_recent_calls() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        assert!(should_call_provider(None, now, false));
        assert!(should_call_provider(
            Some(now - Duration::hours(25)),
            now,
            false
        ));
        assert!(!should_call_provider(
            Some(now - Duration::hours(23)),
            now,
            false
        ));
        assert!(should_call_provider(
            Some(now - Duration::hours(1)),
            now,
            true
        ));
    }

    #[test]
    fn active_vessels_deduplicated_with_latest_eta() {
        let eta_early = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let eta_late = Utc.with_ymd_and_hms(2026, 3, 20, 0, 0, 0).unwrap();

        let voyages = vec![
            ShipmentVoyage {
                vessel_name: "MAERSK EDMONTON [V.45E]".to_string(),
                eta: Some(eta_early),
            },
            ShipmentVoyage {
                vessel_name: "MAERSK EDMONTON [V.46W]".to_string(),
                eta: Some(eta_late),
            },
            ShipmentVoyage {
                vessel_name: "EVER GIVEN".to_string(),
                eta: None,
            },
            ShipmentVoyage {
                vessel_name: "  ".to_string(),
                eta: None,
            },
        ];

        let vessels = derive_active_vessels(&voyages);
        assert_eq!(vessels.len(), 2);
        assert_eq!(vessels[0].vessel_name, "EVER GIVEN");
        assert_eq!(vessels[0].latest_eta, None);
        assert_eq!(vessels[1].vessel_name, "MAERSK EDMONTON");
        assert_eq!(vessels[1].latest_eta, Some(eta_late));
    }
}
