//! Feed client tests against a scripted transport.

mod common;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use common::MemoryStore;
use vessel_tracker::config::FeedConfig;
use vessel_tracker::errors::TrackerError;
use vessel_tracker::feed::{FeedClient, FeedConnector, FeedTransport};
use vessel_tracker::models::{Mmsi, VesselPosition};
use vessel_tracker::registry::Registry;

enum Step {
    /// Deliver one inbound text frame.
    Recv(String),
    /// Block until the client drops the connection.
    Hold,
}

struct ScriptedTransport {
    steps: VecDeque<Step>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn send_text(&mut self, frame: String) -> Result<(), TrackerError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TrackerError>> {
        if matches!(self.steps.front(), Some(Step::Hold)) {
            futures_util::future::pending::<()>().await;
        }
        match self.steps.pop_front() {
            Some(Step::Recv(frame)) => Some(Ok(frame)),
            Some(Step::Hold) => unreachable!(),
            None => None, // peer closed
        }
    }
}

/// Hands out one scripted connection per connect call; further attempts fail.
struct ScriptedConnector {
    scripts: Mutex<VecDeque<VecDeque<Step>>>,
    sent: Arc<Mutex<Vec<String>>>,
    connects: AtomicU32,
}

impl ScriptedConnector {
    fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().map(VecDeque::from).collect()),
            sent: Arc::new(Mutex::new(Vec::new())),
            connects: AtomicU32::new(0),
        }
    }

    fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.sent)
    }
}

/// Shareable handle so tests keep a reference while the client owns one.
struct ConnectorHandle(Arc<ScriptedConnector>);

#[async_trait]
impl FeedConnector for ConnectorHandle {
    type Transport = ScriptedTransport;

    async fn connect(&self) -> Result<Self::Transport, TrackerError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .0
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TrackerError::Io(std::io::Error::other("connection refused")))?;
        Ok(ScriptedTransport {
            steps,
            sent: Arc::clone(&self.0.sent),
        })
    }
}

fn test_config(max_reconnect_attempts: u32) -> FeedConfig {
    FeedConfig {
        url: "wss://stream.example.com/v0/stream".to_string(),
        api_key: "feed-key".to_string(),
        reconnect_interval: Duration::from_millis(1),
        max_reconnect_attempts,
        heartbeat_interval: Duration::from_secs(60),
    }
}

fn seeded_store(name: &str, mmsi: u32, lat: Option<f64>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed_row(VesselPosition {
        vessel_name: name.to_string(),
        mmsi: Some(Mmsi::try_from(mmsi).unwrap()),
        last_lat: lat,
        last_lon: lat,
        ..Default::default()
    });
    store
}

fn position_frame(mmsi: u32, lat: f64, lon: f64) -> String {
    format!(
        r#"{{"messageType":"PositionReport","mmsi":{mmsi},"lat":{lat},"lon":{lon},"speedTenths":100,"courseTenths":900,"heading":90,"navStatusCode":0}}"#
    )
}

/// Drive a client over scripted connections until it gives up on its own.
async fn run_to_exhaustion(
    connector: Arc<ScriptedConnector>,
    store: Arc<MemoryStore>,
    tracked: Vec<Mmsi>,
    config: FeedConfig,
) -> Result<(), TrackerError> {
    let client = FeedClient::new(ConnectorHandle(connector), Registry::new(store), config);
    let (_tracked_tx, tracked_rx) = watch::channel(tracked);
    let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
    client.run(tracked_rx, shutdown_rx).await
}

#[tokio::test]
async fn subscribes_scoped_and_applies_tracked_report() {
    let store = seeded_store("EVER GIVEN", 123456, Some(1.0));
    let connector = Arc::new(ScriptedConnector::new(vec![vec![Step::Recv(
        position_frame(123456, 3.0, 4.0),
    )]]));
    let sent = connector.sent();

    let tracked = vec![Mmsi::try_from(123456u32).unwrap()];
    let result =
        run_to_exhaustion(connector, Arc::clone(&store), tracked, test_config(1)).await;
    assert!(matches!(result, Err(TrackerError::FeedReconnectExhausted(1))));

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let request: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(request["Apikey"], "feed-key");
    assert_eq!(request["FiltersShipMMSI"][0], "123456");
    assert_eq!(request["FilterMessageTypes"][0], "PositionReport");

    let row = store.row_named("EVER GIVEN").unwrap();
    assert_eq!(row.last_lat, Some(3.0));
    assert_eq!(row.last_lon, Some(4.0));

    // First message is not a sampled one, so only the archived fix remains.
    let history = store.history.lock().unwrap().clone();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].lat, 1.0);
}

#[tokio::test]
async fn untracked_traffic_is_discarded_without_row_creation() {
    let store = Arc::new(MemoryStore::new());
    let connector = Arc::new(ScriptedConnector::new(vec![vec![
        Step::Recv(position_frame(999999, 3.0, 4.0)),
        Step::Recv(r#"{"status":"subscribed"}"#.to_string()),
        Step::Recv("not json at all".to_string()),
    ]]));
    let sent = connector.sent();

    let result = run_to_exhaustion(connector, Arc::clone(&store), vec![], test_config(1)).await;
    assert!(matches!(result, Err(TrackerError::FeedReconnectExhausted(1))));

    // Unscoped subscription since no vessels are configured.
    let request: serde_json::Value =
        serde_json::from_str(&sent.lock().unwrap()[0]).unwrap();
    assert!(request.get("FiltersShipMMSI").is_none());

    assert!(store.rows.lock().unwrap().is_empty());
    assert!(store.history.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reconnects_until_consecutive_failures_exhaust_the_bound() {
    let store = Arc::new(MemoryStore::new());
    // Two connections dropped by the peer right away, then only refusals.
    let connector = Arc::new(ScriptedConnector::new(vec![vec![], vec![]]));

    let result = run_to_exhaustion(
        Arc::clone(&connector),
        store,
        vec![],
        test_config(3),
    )
    .await;

    // Each successful subscription restores the retry budget, so the two
    // short-lived connections each count as one failure before the refusals
    // run the bound down: lost, lost (reset in between), refused, refused.
    assert!(matches!(result, Err(TrackerError::FeedReconnectExhausted(3))));
    assert_eq!(connector.connects.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn tracked_update_resubscribes_on_live_connection() {
    let store = seeded_store("EVER GIVEN", 123456, None);
    let connector = Arc::new(ScriptedConnector::new(vec![vec![Step::Hold]]));
    let sent = connector.sent();

    let client = FeedClient::new(
        ConnectorHandle(Arc::clone(&connector)),
        Registry::new(store),
        test_config(1),
    );
    let handle = client.spawn(vec![Mmsi::try_from(123456u32).unwrap()]);

    // Let the initial subscription land first.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if !sent.lock().unwrap().is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no subscription seen");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    handle.update_tracked(vec![
        Mmsi::try_from(123456u32).unwrap(),
        Mmsi::try_from(654321u32).unwrap(),
    ]);

    // Wait for the re-subscription to land on the held connection.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if sent.lock().unwrap().len() >= 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no re-subscription seen");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let frames = sent.lock().unwrap().clone();
    let second: serde_json::Value = serde_json::from_str(&frames[1]).unwrap();
    assert_eq!(second["FiltersShipMMSI"][1], "654321");

    assert!(handle.disconnect().await.is_ok());
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disconnect_stops_client_without_error() {
    let store = Arc::new(MemoryStore::new());
    let connector = Arc::new(ScriptedConnector::new(vec![vec![Step::Hold]]));

    let client = FeedClient::new(ConnectorHandle(connector), Registry::new(store), test_config(1));
    let handle = client.spawn(vec![]);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(!handle.is_finished());
    assert!(handle.disconnect().await.is_ok());
}
