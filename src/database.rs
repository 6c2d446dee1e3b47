//! Postgres-backed position store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crate::{
    errors::TrackerError,
    models::{Mmsi, ShipmentVoyage, VesselPosition, VesselPositionHistory},
    registry::PositionStore,
};

const POSITION_COLUMNS: &str = "id, vessel_name, mmsi, imo, last_lat, last_lon, \
     last_position_at, speed, course, navigational_status, heading, destination, \
     eta_utc, atd_utc, last_port, predicted_eta, distance, time_remaining, \
     ship_type, length, beam, draught, gross_tonnage, deadweight, year_of_built, \
     callsign, country, country_iso, engine, ports, management, last_api_call_at, \
     data_source, raw_payload, updated_at";

/// Database access for vessel positions
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(pool: PgPool) -> Result<Self, TrackerError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Connect to the database and run pending migrations.
    pub async fn from_url(url: &str) -> Result<Self, TrackerError> {
        info!("Connecting to database");
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        Self::new(pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PositionRow {
    id: i64,
    vessel_name: String,
    mmsi: Option<i64>,
    imo: Option<String>,
    last_lat: Option<f64>,
    last_lon: Option<f64>,
    last_position_at: Option<DateTime<Utc>>,
    speed: Option<f64>,
    course: Option<f64>,
    navigational_status: Option<String>,
    heading: Option<i32>,
    destination: Option<String>,
    eta_utc: Option<String>,
    atd_utc: Option<String>,
    last_port: Option<String>,
    predicted_eta: Option<String>,
    distance: Option<String>,
    time_remaining: Option<String>,
    ship_type: Option<String>,
    length: Option<String>,
    beam: Option<String>,
    draught: Option<String>,
    gross_tonnage: Option<String>,
    deadweight: Option<String>,
    year_of_built: Option<String>,
    callsign: Option<String>,
    country: Option<String>,
    country_iso: Option<String>,
    engine: Option<Value>,
    ports: Option<Value>,
    management: Option<Value>,
    last_api_call_at: Option<DateTime<Utc>>,
    data_source: Option<String>,
    raw_payload: Option<Value>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<PositionRow> for VesselPosition {
    fn from(row: PositionRow) -> Self {
        VesselPosition {
            id: row.id,
            vessel_name: row.vessel_name,
            mmsi: row
                .mmsi
                .and_then(|v| u32::try_from(v).ok())
                .and_then(|v| Mmsi::try_from(v).ok()),
            imo: row.imo,
            last_lat: row.last_lat,
            last_lon: row.last_lon,
            last_position_at: row.last_position_at,
            speed: row.speed,
            course: row.course,
            navigational_status: row.navigational_status,
            heading: row.heading,
            destination: row.destination,
            eta_utc: row.eta_utc,
            atd_utc: row.atd_utc,
            last_port: row.last_port,
            predicted_eta: row.predicted_eta,
            distance: row.distance,
            time_remaining: row.time_remaining,
            ship_type: row.ship_type,
            length: row.length,
            beam: row.beam,
            draught: row.draught,
            gross_tonnage: row.gross_tonnage,
            deadweight: row.deadweight,
            year_of_built: row.year_of_built,
            callsign: row.callsign,
            country: row.country,
            country_iso: row.country_iso,
            engine: row.engine,
            ports: row.ports,
            management: row.management,
            last_api_call_at: row.last_api_call_at,
            data_source: row.data_source,
            raw_payload: row.raw_payload,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl PositionStore for Database {
    async fn rows_by_mmsi(&self, mmsi: Mmsi) -> Result<Vec<VesselPosition>, TrackerError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM vessel_positions WHERE mmsi = $1 ORDER BY id LIMIT 10"
        );
        let rows: Vec<PositionRow> = sqlx::query_as(&sql)
            .bind(i64::from(mmsi.value()))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(VesselPosition::from).collect())
    }

    async fn rows_by_imo(&self, imo: &str) -> Result<Vec<VesselPosition>, TrackerError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM vessel_positions WHERE imo = $1 ORDER BY id LIMIT 10"
        );
        let rows: Vec<PositionRow> = sqlx::query_as(&sql)
            .bind(imo)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(VesselPosition::from).collect())
    }

    async fn row_by_name(&self, name: &str) -> Result<Option<VesselPosition>, TrackerError> {
        let sql = format!(
            "SELECT {POSITION_COLUMNS} FROM vessel_positions WHERE vessel_name = $1 ORDER BY id LIMIT 1"
        );
        let row: Option<PositionRow> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(VesselPosition::from))
    }

    async fn tracked_mmsis(&self) -> Result<Vec<Mmsi>, TrackerError> {
        let rows =
            sqlx::query("SELECT DISTINCT mmsi FROM vessel_positions WHERE mmsi IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let value: i64 = row.get("mmsi");
                u32::try_from(value).ok().and_then(|v| Mmsi::try_from(v).ok())
            })
            .collect())
    }

    async fn insert_row(&self, row: &VesselPosition) -> Result<i64, TrackerError> {
        let record = sqlx::query(
            "INSERT INTO vessel_positions (
                vessel_name, mmsi, imo, last_lat, last_lon, last_position_at,
                speed, course, navigational_status, heading, destination,
                eta_utc, atd_utc, last_port, predicted_eta, distance,
                time_remaining, ship_type, length, beam, draught,
                gross_tonnage, deadweight, year_of_built, callsign, country,
                country_iso, engine, ports, management, last_api_call_at,
                data_source, raw_payload, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26,
                $27, $28, $29, $30, $31, $32, $33, $34
            ) RETURNING id",
        )
        .bind(&row.vessel_name)
        .bind(row.mmsi.map(|m| i64::from(m.value())))
        .bind(&row.imo)
        .bind(row.last_lat)
        .bind(row.last_lon)
        .bind(row.last_position_at)
        .bind(row.speed)
        .bind(row.course)
        .bind(&row.navigational_status)
        .bind(row.heading)
        .bind(&row.destination)
        .bind(&row.eta_utc)
        .bind(&row.atd_utc)
        .bind(&row.last_port)
        .bind(&row.predicted_eta)
        .bind(&row.distance)
        .bind(&row.time_remaining)
        .bind(&row.ship_type)
        .bind(&row.length)
        .bind(&row.beam)
        .bind(&row.draught)
        .bind(&row.gross_tonnage)
        .bind(&row.deadweight)
        .bind(&row.year_of_built)
        .bind(&row.callsign)
        .bind(&row.country)
        .bind(&row.country_iso)
        .bind(&row.engine)
        .bind(&row.ports)
        .bind(&row.management)
        .bind(row.last_api_call_at)
        .bind(&row.data_source)
        .bind(&row.raw_payload)
        .bind(row.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record.get("id"))
    }

    async fn save_row(&self, row: &VesselPosition) -> Result<(), TrackerError> {
        sqlx::query(
            "UPDATE vessel_positions SET
                vessel_name = $1, mmsi = $2, imo = $3, last_lat = $4,
                last_lon = $5, last_position_at = $6, speed = $7, course = $8,
                navigational_status = $9, heading = $10, destination = $11,
                eta_utc = $12, atd_utc = $13, last_port = $14,
                predicted_eta = $15, distance = $16, time_remaining = $17,
                ship_type = $18, length = $19, beam = $20, draught = $21,
                gross_tonnage = $22, deadweight = $23, year_of_built = $24,
                callsign = $25, country = $26, country_iso = $27, engine = $28,
                ports = $29, management = $30, last_api_call_at = $31,
                data_source = $32, raw_payload = $33, updated_at = $34
            WHERE id = $35",
        )
        .bind(&row.vessel_name)
        .bind(row.mmsi.map(|m| i64::from(m.value())))
        .bind(&row.imo)
        .bind(row.last_lat)
        .bind(row.last_lon)
        .bind(row.last_position_at)
        .bind(row.speed)
        .bind(row.course)
        .bind(&row.navigational_status)
        .bind(row.heading)
        .bind(&row.destination)
        .bind(&row.eta_utc)
        .bind(&row.atd_utc)
        .bind(&row.last_port)
        .bind(&row.predicted_eta)
        .bind(&row.distance)
        .bind(&row.time_remaining)
        .bind(&row.ship_type)
        .bind(&row.length)
        .bind(&row.beam)
        .bind(&row.draught)
        .bind(&row.gross_tonnage)
        .bind(&row.deadweight)
        .bind(&row.year_of_built)
        .bind(&row.callsign)
        .bind(&row.country)
        .bind(&row.country_iso)
        .bind(&row.engine)
        .bind(&row.ports)
        .bind(&row.management)
        .bind(row.last_api_call_at)
        .bind(&row.data_source)
        .bind(&row.raw_payload)
        .bind(row.updated_at)
        .bind(row.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_history(&self, row: &VesselPositionHistory) -> Result<(), TrackerError> {
        sqlx::query(
            "INSERT INTO vessel_position_history (
                vessel_name, lat, lon, position_at, source, speed, course,
                navigational_status, destination
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&row.vessel_name)
        .bind(row.lat)
        .bind(row.lon)
        .bind(row.position_at)
        .bind(row.source.as_str())
        .bind(row.speed)
        .bind(row.course)
        .bind(&row.navigational_status)
        .bind(&row.destination)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn active_voyages(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ShipmentVoyage>, TrackerError> {
        let rows = sqlx::query(
            "SELECT vessel_name, eta FROM shipments
             WHERE deleted_at IS NULL
               AND status <> 'CANCELLED'
               AND (eta IS NULL OR eta > $1)",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ShipmentVoyage {
                vessel_name: row.get("vessel_name"),
                eta: row.get("eta"),
            })
            .collect())
    }
}
