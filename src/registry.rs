//! Identity resolution and the current-to-history archival transition.
//!
//! Both ingestion paths (streaming feed and the reconciliation job) funnel
//! through [`Registry`], which keeps the "read current, archive if needed,
//! write new" sequence identical on each side. The storage backend is a
//! [`PositionStore`] trait so tests can run against an in-memory fake.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    errors::TrackerError,
    models::{
        nav_status_label, ship_type_label, Mmsi, PositionReport, PositionSource, ProviderReport,
        ShipmentVoyage, StaticReport, VesselPosition, VesselPositionHistory,
    },
};

/// Thin persistence contract for the position registry.
///
/// Implementations hold no business logic; duplicate selection, name
/// overwrite rules and archival decisions all live in [`Registry`].
#[async_trait]
pub trait PositionStore: Send + Sync {
    /// All rows matching an MMSI. Duplicates are a known degraded state.
    async fn rows_by_mmsi(&self, mmsi: Mmsi) -> Result<Vec<VesselPosition>, TrackerError>;

    /// All rows matching an IMO number.
    async fn rows_by_imo(&self, imo: &str) -> Result<Vec<VesselPosition>, TrackerError>;

    /// Row with an exact display name, if any.
    async fn row_by_name(&self, name: &str) -> Result<Option<VesselPosition>, TrackerError>;

    /// MMSIs of all rows with an MMSI configured, for subscription scoping.
    async fn tracked_mmsis(&self) -> Result<Vec<Mmsi>, TrackerError>;

    /// Insert a new row, returning its id.
    async fn insert_row(&self, row: &VesselPosition) -> Result<i64, TrackerError>;

    /// Persist the full field set of an existing row.
    async fn save_row(&self, row: &VesselPosition) -> Result<(), TrackerError>;

    /// Append one history row. Never updates or deletes.
    async fn insert_history(&self, row: &VesselPositionHistory) -> Result<(), TrackerError>;

    /// Vessel references of shipments that are not cancelled, not deleted
    /// and whose ETA is unknown or still in the future.
    async fn active_voyages(&self, now: DateTime<Utc>)
        -> Result<Vec<ShipmentVoyage>, TrackerError>;
}

/// Vessel identifiers carried by an incoming report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityQuery {
    pub mmsi: Option<Mmsi>,
    pub imo: Option<String>,
}

/// Shared ingestion pipeline over a [`PositionStore`].
pub struct Registry<S> {
    store: Arc<S>,
}

impl<S> Clone for Registry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: PositionStore> Registry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Find the matching position row for a set of identifiers.
    ///
    /// MMSI is authoritative when present; IMO is advisory and only
    /// consulted on its own. Never creates a row: `None` means the vessel
    /// is not tracked and the caller decides the policy (ignore on the
    /// streaming path, placeholder creation on the reconciliation path).
    pub async fn resolve(
        &self,
        query: &IdentityQuery,
    ) -> Result<Option<VesselPosition>, TrackerError> {
        let rows = if let Some(mmsi) = query.mmsi {
            self.store.rows_by_mmsi(mmsi).await?
        } else if let Some(imo) = &query.imo {
            self.store.rows_by_imo(imo).await?
        } else {
            return Err(TrackerError::MissingIdentifiers(
                "identity query carries neither MMSI nor IMO".to_string(),
            ));
        };

        Ok(select_authoritative(rows))
    }

    /// Snapshot the current state into history before it is overwritten.
    ///
    /// Skipped when the row has never been positioned, so uninitialized
    /// placeholders generate no history noise. A failed history write is
    /// logged and swallowed; current-state correctness takes priority.
    pub async fn archive_if_needed(&self, current: &VesselPosition, source: PositionSource) {
        let Some(snapshot) = history_snapshot(current, source, Utc::now()) else {
            return;
        };

        if let Err(e) = self.store.insert_history(&snapshot).await {
            warn!(
                vessel_name = %current.vessel_name,
                "failed to archive previous position, continuing: {e}"
            );
        }
    }

    /// Apply one streaming position report.
    ///
    /// Returns `Ok(false)` when no row matches the report's MMSI; unsolicited
    /// feed traffic never creates vessels. When `record_history` is set the
    /// new fix is also appended to history (the feed client samples these to
    /// keep history volume bounded).
    pub async fn apply_position_report(
        &self,
        report: &PositionReport,
        now: DateTime<Utc>,
        record_history: bool,
    ) -> Result<bool, TrackerError> {
        let mmsi = Mmsi::try_from(report.mmsi)?;
        let query = IdentityQuery {
            mmsi: Some(mmsi),
            imo: None,
        };
        let Some(current) = self.resolve(&query).await? else {
            return Ok(false);
        };

        self.archive_if_needed(&current, PositionSource::Stream).await;

        let mut row = current;
        row.mmsi = Some(mmsi);
        row.last_lat = Some(report.lat);
        row.last_lon = Some(report.lon);
        row.last_position_at = report.position_at().or(Some(now));
        row.speed = report.speed;
        row.course = report.course;
        row.heading = report.heading;
        row.navigational_status = report
            .nav_status
            .map(|code| nav_status_label(code).to_string());
        row.last_api_call_at = Some(now);
        row.data_source = Some(PositionSource::Stream.as_str().to_string());
        row.updated_at = Some(now);

        self.store.save_row(&row).await?;

        if record_history {
            let snapshot = VesselPositionHistory {
                vessel_name: row.vessel_name.clone(),
                lat: report.lat,
                lon: report.lon,
                position_at: row.last_position_at.unwrap_or(now),
                source: PositionSource::Stream,
                speed: row.speed,
                course: row.course,
                navigational_status: row.navigational_status.clone(),
                destination: row.destination.clone(),
            };
            if let Err(e) = self.store.insert_history(&snapshot).await {
                warn!(vessel_name = %row.vessel_name, "failed to record history sample: {e}");
            }
        }

        Ok(true)
    }

    /// Apply one streaming static-data report.
    ///
    /// Same tracked-MMSI gate as position reports. A resolved name only ever
    /// replaces an `MMSI-<digits>` placeholder, never another resolved name.
    pub async fn apply_static_report(
        &self,
        report: &StaticReport,
        now: DateTime<Utc>,
    ) -> Result<bool, TrackerError> {
        let mmsi = Mmsi::try_from(report.mmsi)?;
        let query = IdentityQuery {
            mmsi: Some(mmsi),
            imo: None,
        };
        let Some(current) = self.resolve(&query).await? else {
            return Ok(false);
        };

        let mut row = current;

        if let Some(name) = &report.name {
            if row.has_placeholder_name() {
                info!(
                    mmsi = %mmsi,
                    "resolving placeholder {} to vessel name {name}", row.vessel_name
                );
                row.vessel_name = name.clone();
            }
        }

        if let Some(imo) = report.imo {
            row.imo = Some(imo.to_string());
        }
        if let Some(callsign) = &report.callsign {
            row.callsign = Some(callsign.clone());
        }
        if let Some(code) = report.ship_type_code {
            row.ship_type = Some(ship_type_label(code).to_string());
        }
        if let Some(length) = report.length {
            row.length = Some(length.to_string());
        }
        if let Some(beam) = report.beam {
            row.beam = Some(beam.to_string());
        }
        if let Some(draught) = report.draught {
            row.draught = Some(draught.to_string());
        }
        if let Some(destination) = &report.destination {
            row.destination = Some(destination.clone());
        }
        row.updated_at = Some(now);

        self.store.save_row(&row).await?;
        Ok(true)
    }

    /// Create an unpositioned row for a shipment-referenced vessel.
    ///
    /// The reconciliation path is the only one permitted to create rows,
    /// since its input comes from trusted shipment data rather than
    /// unsolicited feed noise.
    pub async fn create_placeholder(
        &self,
        vessel_name: &str,
    ) -> Result<VesselPosition, TrackerError> {
        let mut row = VesselPosition::named(vessel_name);
        row.updated_at = Some(Utc::now());
        row.id = self.store.insert_row(&row).await?;
        Ok(row)
    }

    /// Apply one REST provider report to an existing row.
    ///
    /// The previous state is archived first, then the full field set is
    /// overwritten and the freshly fetched state is appended to history as
    /// well, so the trail stays continuous even when the streaming path was
    /// silent for this vessel.
    pub async fn apply_provider_report(
        &self,
        current: VesselPosition,
        report: &ProviderReport,
        now: DateTime<Utc>,
    ) -> Result<VesselPosition, TrackerError> {
        self.archive_if_needed(&current, PositionSource::Provider)
            .await;

        let mut row = current;

        if let Some(name) = &report.name {
            if row.has_placeholder_name() {
                row.vessel_name = name.clone();
            }
        }
        if let Some(raw) = report.mmsi {
            row.mmsi = Some(Mmsi::try_from(raw)?);
        }
        if report.imo.is_some() {
            row.imo = report.imo.clone();
        }

        row.last_lat = report.lat;
        row.last_lon = report.lon;
        row.last_position_at = report.position_timestamp.or(Some(now));
        row.speed = report.speed;
        row.course = report.course;
        row.heading = report.heading;
        row.navigational_status = report.navigational_status.clone();
        row.destination = report.destination.clone();
        row.eta_utc = report.eta_utc.clone();
        row.atd_utc = report.atd_utc.clone();
        row.last_port = report.last_port.clone();
        row.predicted_eta = report.predicted_eta.clone();
        row.distance = report.distance.clone();
        row.time_remaining = report.time_remaining.clone();
        row.ship_type = report.ship_type.clone();
        row.length = report.length.clone();
        row.beam = report.beam.clone();
        row.draught = report.draught.clone();
        row.gross_tonnage = report.gross_tonnage.clone();
        row.deadweight = report.deadweight.clone();
        row.year_of_built = report.year_of_built.clone();
        row.callsign = report.callsign.clone();
        row.country = report.country.clone();
        row.country_iso = report.country_iso.clone();
        row.engine = report.engine.clone();
        row.ports = report.ports.clone();
        row.management = report.management.clone();
        row.raw_payload = report.raw_payload.clone();
        row.data_source = Some(
            report
                .data_source
                .clone()
                .unwrap_or_else(|| PositionSource::Provider.as_str().to_string()),
        );
        row.last_api_call_at = Some(now);
        row.updated_at = Some(now);

        self.store.save_row(&row).await?;

        if let (Some(lat), Some(lon)) = (row.last_lat, row.last_lon) {
            let snapshot = VesselPositionHistory {
                vessel_name: row.vessel_name.clone(),
                lat,
                lon,
                position_at: row.last_position_at.unwrap_or(now),
                source: PositionSource::Provider,
                speed: row.speed,
                course: row.course,
                navigational_status: row.navigational_status.clone(),
                destination: row.destination.clone(),
            };
            if let Err(e) = self.store.insert_history(&snapshot).await {
                warn!(vessel_name = %row.vessel_name, "failed to record fetched position in history: {e}");
            }
        }

        Ok(row)
    }
}

/// Pick the authoritative row among duplicates for one MMSI.
///
/// Selection order: resolved (non-placeholder) name, then non-null
/// coordinates, then the first row found. Stable for a given input so
/// repeated lookups do not oscillate between duplicates.
pub(crate) fn select_authoritative(rows: Vec<VesselPosition>) -> Option<VesselPosition> {
    if rows.is_empty() {
        return None;
    }

    if let Some(row) = rows.iter().find(|r| !r.has_placeholder_name()) {
        return Some(row.clone());
    }
    if let Some(row) = rows.iter().find(|r| r.has_coordinates()) {
        return Some(row.clone());
    }
    rows.into_iter().next()
}

/// Build the pre-overwrite history snapshot, or `None` when the row has no
/// coordinates yet.
///
/// `position_at` falls back from the reported fix time to the last provider
/// call time to `now`.
pub(crate) fn history_snapshot(
    current: &VesselPosition,
    source: PositionSource,
    now: DateTime<Utc>,
) -> Option<VesselPositionHistory> {
    let (lat, lon) = match (current.last_lat, current.last_lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return None,
    };

    Some(VesselPositionHistory {
        vessel_name: current.vessel_name.clone(),
        lat,
        lon,
        position_at: current
            .last_position_at
            .or(current.last_api_call_at)
            .unwrap_or(now),
        source,
        speed: current.speed,
        course: current.course,
        navigational_status: current.navigational_status.clone(),
        destination: current.destination.clone(),
    })
}
