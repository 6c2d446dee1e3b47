//! Data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TrackerError;
use serde_helpers::*;

/// Maritime Mobile Service Identity (MMSI)
///
/// A unique nine-digit number for identifying vessels in AIS messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Mmsi(u32);

impl TryFrom<u32> for Mmsi {
    type Error = TrackerError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value > 999_999_999 {
            return Err(TrackerError::InvalidMmsi(value.to_string()));
        }
        Ok(Self(value))
    }
}

impl TryFrom<&str> for Mmsi {
    type Error = TrackerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parsed = value
            .parse::<u32>()
            .map_err(|_| TrackerError::InvalidMmsi(value.to_string()))?;
        Self::try_from(parsed)
    }
}

impl Mmsi {
    /// Get the raw MMSI value
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Mmsi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which ingestion path produced a position record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    /// Live streaming feed
    Stream,
    /// REST position provider, polled by the reconciliation job
    Provider,
}

impl PositionSource {
    /// Tag stored in the history `source` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSource::Stream => "AISStream",
            PositionSource::Provider => "AIS",
        }
    }
}

/// Current position record, one per known vessel.
///
/// A vessel's identity is established externally: an operator associates an
/// MMSI/IMO with a shipment-referenced vessel name before either ingestion
/// path will populate the row. The streaming path never creates rows.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct VesselPosition {
    pub id: i64,
    /// Display name; may start as an unresolved `MMSI-<digits>` placeholder
    pub vessel_name: String,
    pub mmsi: Option<Mmsi>,
    pub imo: Option<String>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    /// Timestamp of the reported fix, not of the write
    pub last_position_at: Option<DateTime<Utc>>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub navigational_status: Option<String>,
    pub heading: Option<i32>,
    pub destination: Option<String>,
    pub eta_utc: Option<String>,
    pub atd_utc: Option<String>,
    pub last_port: Option<String>,
    pub predicted_eta: Option<String>,
    pub distance: Option<String>,
    pub time_remaining: Option<String>,
    pub ship_type: Option<String>,
    pub length: Option<String>,
    pub beam: Option<String>,
    pub draught: Option<String>,
    pub gross_tonnage: Option<String>,
    pub deadweight: Option<String>,
    pub year_of_built: Option<String>,
    pub callsign: Option<String>,
    pub country: Option<String>,
    pub country_iso: Option<String>,
    /// Provider-specific static blobs, kept opaque so the schema stays
    /// stable as the provider's fields evolve
    pub engine: Option<Value>,
    pub ports: Option<Value>,
    pub management: Option<Value>,
    /// Most recent REST provider call for this vessel, independent of
    /// `last_position_at`
    pub last_api_call_at: Option<DateTime<Utc>>,
    pub data_source: Option<String>,
    pub raw_payload: Option<Value>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl VesselPosition {
    /// New unpositioned row carrying only a name.
    pub fn named(vessel_name: impl Into<String>) -> Self {
        Self {
            vessel_name: vessel_name.into(),
            ..Default::default()
        }
    }

    /// True when the display name is an auto-generated `MMSI-<digits>`
    /// placeholder rather than a resolved vessel name.
    pub fn has_placeholder_name(&self) -> bool {
        is_placeholder_name(&self.vessel_name)
    }

    pub fn has_coordinates(&self) -> bool {
        self.last_lat.is_some() && self.last_lon.is_some()
    }
}

/// Check a display name against the `MMSI-<digits>` placeholder pattern.
pub fn is_placeholder_name(name: &str) -> bool {
    name.strip_prefix("MMSI-")
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Append-only snapshot of a vessel position at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VesselPositionHistory {
    pub vessel_name: String,
    pub lat: f64,
    pub lon: f64,
    pub position_at: DateTime<Utc>,
    pub source: PositionSource,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub navigational_status: Option<String>,
    pub destination: Option<String>,
}

/// Vessel referenced by an in-transit shipment, derived per reconciliation
/// run and discarded afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveVessel {
    pub vessel_name: String,
    /// Latest known ETA across all shipments referencing this vessel
    pub latest_eta: Option<DateTime<Utc>>,
}

/// One non-cancelled shipment row as read from the shipment registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentVoyage {
    /// Raw vessel reference, possibly carrying a voyage suffix
    pub vessel_name: String,
    pub eta: Option<DateTime<Utc>>,
}

/// Strip a bracketed voyage suffix from a shipment vessel reference.
///
/// Shipments store the vessel together with a voyage code, e.g.
/// `"EVER GIVEN [V.123]"`. Grouping by physical vessel requires the bare
/// name. Returns `None` for empty input.
pub fn parse_vessel_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.ends_with(']') {
        if let Some(idx) = trimmed.find('[') {
            if idx > 0 && idx + 1 < trimmed.len() - 1 {
                let name = trimmed[..idx].trim_end();
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
    }

    Some(trimmed.to_string())
}

/// Position report from the streaming feed
///
/// Speed and course arrive in tenths; the usual AIS sentinels mark
/// unavailable values (speed 1023, course 3600, heading 511, status 15).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PositionReport {
    pub mmsi: u32,
    pub lat: f64,
    pub lon: f64,
    /// Speed over ground in knots, None if not available (=102.3)
    #[serde(
        rename = "speedTenths",
        default,
        deserialize_with = "deserialize_speed_tenths"
    )]
    pub speed: Option<f64>,
    /// Course over ground in degrees, None if not available (360)
    #[serde(
        rename = "courseTenths",
        default,
        deserialize_with = "deserialize_course_tenths"
    )]
    pub course: Option<f64>,
    /// Heading in degrees (0-359), None if 511 = not available
    #[serde(default, deserialize_with = "deserialize_heading")]
    pub heading: Option<i32>,
    /// Navigational status code, 0-14; 15 = not available
    #[serde(
        rename = "navStatusCode",
        default,
        deserialize_with = "deserialize_nav_status"
    )]
    pub nav_status: Option<u8>,
    /// Fix timestamp in seconds from Unix epoch
    #[serde(rename = "timestampEpochSeconds", default)]
    pub timestamp: Option<i64>,
}

impl PositionReport {
    pub fn position_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}

/// Static-data report from the streaming feed
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticReport {
    pub mmsi: u32,
    /// IMO number, None if not available (0)
    #[serde(default, deserialize_with = "deserialize_imo")]
    pub imo: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub callsign: Option<String>,
    /// AIS type-and-cargo code, None if undefined (0)
    #[serde(
        rename = "shipTypeCode",
        default,
        deserialize_with = "deserialize_ship_type"
    )]
    pub ship_type_code: Option<u16>,
    /// Length in metres, None if not available (0)
    #[serde(
        rename = "lengthTenths",
        default,
        deserialize_with = "deserialize_metre_tenths"
    )]
    pub length: Option<f64>,
    /// Beam in metres, None if not available (0)
    #[serde(
        rename = "beamTenths",
        default,
        deserialize_with = "deserialize_metre_tenths"
    )]
    pub beam: Option<f64>,
    /// Maximum present static draught in metres, None if not available (0)
    #[serde(
        rename = "draughtTenths",
        default,
        deserialize_with = "deserialize_metre_tenths"
    )]
    pub draught: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_trimmed_string")]
    pub destination: Option<String>,
}

/// One inbound frame from the streaming feed, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedFrame {
    Position(PositionReport),
    Static(StaticReport),
    /// Provider status frame, e.g. subscription confirmation
    Status(String),
    /// Provider error frame
    Error(String),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "messageType")]
enum DataFrame {
    PositionReport(PositionReport),
    StaticData(StaticReport),
}

/// Classify one raw feed payload.
///
/// Status and error frames carry no `messageType` tag; anything that is
/// neither those nor a known data frame is an [`TrackerError::UnknownFrame`].
pub fn parse_frame(payload: &str) -> Result<FeedFrame, TrackerError> {
    let value: Value = serde_json::from_str(payload)?;

    if let Some(error) = value.get("error") {
        return Ok(FeedFrame::Error(error.to_string()));
    }
    if let Some(status) = value.get("status").and_then(Value::as_str) {
        return Ok(FeedFrame::Status(status.to_string()));
    }

    if value.get("messageType").is_none() {
        return Err(TrackerError::UnknownFrame(truncate(payload, 120)));
    }

    match serde_json::from_value::<DataFrame>(value)? {
        DataFrame::PositionReport(report) => Ok(FeedFrame::Position(report)),
        DataFrame::StaticData(report) => Ok(FeedFrame::Static(report)),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

/// Subscription request sent after the feed connection opens.
///
/// The upstream feed filters position reports server-side but has no filter
/// for static data, so `filter_message_types` always names `PositionReport`
/// only and static frames are gated client-side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "Apikey")]
    pub api_key: String,
    #[serde(rename = "BoundingBoxes")]
    pub bounding_boxes: Vec<Vec<[f64; 2]>>,
    #[serde(rename = "FiltersShipMMSI", skip_serializing_if = "Option::is_none")]
    pub filters_ship_mmsi: Option<Vec<String>>,
    #[serde(rename = "FilterMessageTypes")]
    pub filter_message_types: Vec<String>,
}

impl SubscriptionRequest {
    /// Subscription scoped to `tracked` when non-empty, otherwise unscoped
    /// over the whole world.
    pub fn new(api_key: &str, tracked: &[Mmsi]) -> Self {
        let filters_ship_mmsi = if tracked.is_empty() {
            None
        } else {
            Some(tracked.iter().map(|m| m.to_string()).collect())
        };

        Self {
            api_key: api_key.to_string(),
            bounding_boxes: vec![vec![[-90.0, -180.0], [90.0, 180.0]]],
            filters_ship_mmsi,
            filter_message_types: vec!["PositionReport".to_string()],
        }
    }
}

/// Flat record returned by the REST position provider, already close to the
/// `VesselPosition` field set. Everything is optional; a report without
/// coordinates counts as "no data returned".
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderReport {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub position_timestamp: Option<DateTime<Utc>>,
    pub mmsi: Option<u32>,
    pub imo: Option<String>,
    pub name: Option<String>,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub heading: Option<i32>,
    pub navigational_status: Option<String>,
    pub destination: Option<String>,
    pub eta_utc: Option<String>,
    pub atd_utc: Option<String>,
    pub last_port: Option<String>,
    pub predicted_eta: Option<String>,
    pub distance: Option<String>,
    pub time_remaining: Option<String>,
    pub ship_type: Option<String>,
    pub length: Option<String>,
    pub beam: Option<String>,
    pub draught: Option<String>,
    pub gross_tonnage: Option<String>,
    pub deadweight: Option<String>,
    pub year_of_built: Option<String>,
    pub callsign: Option<String>,
    pub country: Option<String>,
    pub country_iso: Option<String>,
    pub engine: Option<Value>,
    pub ports: Option<Value>,
    pub management: Option<Value>,
    pub data_source: Option<String>,
    /// Raw provider response, attached by the client for provenance
    #[serde(skip)]
    pub raw_payload: Option<Value>,
}

impl ProviderReport {
    pub fn has_coordinates(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

/// Display text for an AIS navigational status code.
pub fn nav_status_label(code: u8) -> &'static str {
    match code {
        0 => "Under way using engine",
        1 => "At anchor",
        2 => "Not under command",
        3 => "Restricted manoeuvrability",
        4 => "Constrained by her draught",
        5 => "Moored",
        6 => "Aground",
        7 => "Engaged in fishing",
        8 => "Under way sailing",
        _ => "Unknown",
    }
}

/// Display text for an AIS type-and-cargo code.
pub fn ship_type_label(code: u16) -> &'static str {
    match code {
        30 => "Fishing",
        31 | 32 => "Towing",
        33 => "Dredging",
        34 => "Diving ops",
        35 => "Military ops",
        36 => "Sailing",
        37 => "Pleasure craft",
        40..=49 => "High-speed craft",
        50 => "Pilot vessel",
        52 => "Tug",
        60..=69 => "Passenger",
        70..=79 => "Cargo",
        80..=89 => "Tanker",
        _ => "Other",
    }
}

/// Custom deserializers
mod serde_helpers {
    use serde::{self, Deserialize, Deserializer};

    pub fn deserialize_speed_tenths<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<u32>::deserialize(deserializer)?;
        Ok(value.and_then(|v| match v {
            1023 => None,
            v => Some(f64::from(v) / 10.0),
        }))
    }

    pub fn deserialize_course_tenths<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<u32>::deserialize(deserializer)?;
        Ok(value.and_then(|v| match v {
            3600 => None,
            v => Some(f64::from(v) / 10.0),
        }))
    }

    pub fn deserialize_heading<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<i32>::deserialize(deserializer)?;
        Ok(value.filter(|v| *v != 511))
    }

    pub fn deserialize_nav_status<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<u8>::deserialize(deserializer)?;
        Ok(value.filter(|v| *v != 15))
    }

    pub fn deserialize_imo<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<u32>::deserialize(deserializer)?;
        Ok(value.filter(|v| *v != 0))
    }

    pub fn deserialize_ship_type<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<u16>::deserialize(deserializer)?;
        Ok(value.filter(|v| *v != 0))
    }

    pub fn deserialize_metre_tenths<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<u32>::deserialize(deserializer)?;
        Ok(value.and_then(|v| match v {
            0 => None,
            v => Some(f64::from(v) / 10.0),
        }))
    }

    pub fn deserialize_trimmed_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }))
    }
}
