//! In-memory test doubles for the position store and the REST provider.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use vessel_tracker::errors::TrackerError;
use vessel_tracker::models::{
    Mmsi, ProviderReport, ShipmentVoyage, VesselPosition, VesselPositionHistory,
};
use vessel_tracker::provider::{PositionProvider, ProviderQuery};
use vessel_tracker::registry::PositionStore;

/// In-memory [`PositionStore`].
#[derive(Default)]
pub struct MemoryStore {
    pub rows: Mutex<Vec<VesselPosition>>,
    pub history: Mutex<Vec<VesselPositionHistory>>,
    pub voyages: Mutex<Vec<ShipmentVoyage>>,
    pub fail_history: AtomicBool,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn seed_row(&self, mut row: VesselPosition) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        row.id = id;
        self.rows.lock().unwrap().push(row);
        id
    }

    pub fn seed_voyage(&self, vessel_name: &str, eta: Option<DateTime<Utc>>) {
        self.voyages.lock().unwrap().push(ShipmentVoyage {
            vessel_name: vessel_name.to_string(),
            eta,
        });
    }

    pub fn row_named(&self, name: &str) -> Option<VesselPosition> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.vessel_name == name)
            .cloned()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn rows_by_mmsi(&self, mmsi: Mmsi) -> Result<Vec<VesselPosition>, TrackerError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.mmsi == Some(mmsi))
            .cloned()
            .collect())
    }

    async fn rows_by_imo(&self, imo: &str) -> Result<Vec<VesselPosition>, TrackerError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.imo.as_deref() == Some(imo))
            .cloned()
            .collect())
    }

    async fn row_by_name(&self, name: &str) -> Result<Option<VesselPosition>, TrackerError> {
        Ok(self.row_named(name))
    }

    async fn tracked_mmsis(&self) -> Result<Vec<Mmsi>, TrackerError> {
        let mut mmsis: Vec<Mmsi> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.mmsi)
            .collect();
        mmsis.sort();
        mmsis.dedup();
        Ok(mmsis)
    }

    async fn insert_row(&self, row: &VesselPosition) -> Result<i64, TrackerError> {
        Ok(self.seed_row(row.clone()))
    }

    async fn save_row(&self, row: &VesselPosition) -> Result<(), TrackerError> {
        let mut rows = self.rows.lock().unwrap();
        let stored = rows
            .iter_mut()
            .find(|r| r.id == row.id)
            .ok_or_else(|| TrackerError::Io(std::io::Error::other("row not found")))?;
        *stored = row.clone();
        Ok(())
    }

    async fn insert_history(&self, row: &VesselPositionHistory) -> Result<(), TrackerError> {
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(TrackerError::Io(std::io::Error::other(
                "history writes disabled",
            )));
        }
        self.history.lock().unwrap().push(row.clone());
        Ok(())
    }

    async fn active_voyages(
        &self,
        _now: DateTime<Utc>,
    ) -> Result<Vec<ShipmentVoyage>, TrackerError> {
        Ok(self.voyages.lock().unwrap().clone())
    }
}

/// Scripted [`PositionProvider`] response.
pub enum StubResponse {
    Data(Box<ProviderReport>),
    NoData,
    NotConfigured,
}

pub struct StubProvider {
    pub response: StubResponse,
    pub calls: AtomicUsize,
}

impl StubProvider {
    pub fn returning(report: ProviderReport) -> Self {
        Self {
            response: StubResponse::Data(Box::new(report)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            response: StubResponse::NoData,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            response: StubResponse::NotConfigured,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PositionProvider for StubProvider {
    async fn fetch(&self, _query: &ProviderQuery) -> Result<Option<ProviderReport>, TrackerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            StubResponse::Data(report) => Ok(Some(report.as_ref().clone())),
            StubResponse::NoData => Ok(None),
            StubResponse::NotConfigured => Err(TrackerError::ProviderNotConfigured),
        }
    }
}
