//! Streaming feed ingestion client.
//!
//! One long-lived websocket connection to the position feed. The transport
//! sits behind [`FeedConnector`]/[`FeedTransport`] so tests can script
//! connections and assert subscription and reconnection behaviour without a
//! network.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use async_trait::async_trait;

use crate::{
    config::FeedConfig,
    errors::TrackerError,
    models::{parse_frame, FeedFrame, Mmsi, SubscriptionRequest},
    registry::{PositionStore, Registry},
};

/// Every Nth applied position report is also sampled into history, so the
/// history table is not flooded by high-frequency feed traffic.
pub const HISTORY_SAMPLE_EVERY: u64 = 10;

/// Untracked-traffic discards are only logged once per this many discards.
const DISCARD_LOG_EVERY: u64 = 1000;

/// One established feed connection.
#[async_trait]
pub trait FeedTransport: Send {
    async fn send_text(&mut self, frame: String) -> Result<(), TrackerError>;

    /// Next text payload; `None` means the peer closed the connection.
    async fn next_text(&mut self) -> Option<Result<String, TrackerError>>;
}

/// Opens feed connections.
#[async_trait]
pub trait FeedConnector: Send + Sync + 'static {
    type Transport: FeedTransport;

    async fn connect(&self) -> Result<Self::Transport, TrackerError>;
}

/// Production websocket connector.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedConnector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self) -> Result<Self::Transport, TrackerError> {
        let (stream, _) = connect_async(&self.url).await?;
        Ok(WsTransport { stream })
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn send_text(&mut self, frame: String) -> Result<(), TrackerError> {
        self.stream.send(Message::Text(frame)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, TrackerError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        warn!("discarding non-UTF8 binary feed frame");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue, // ping/pong/raw frames
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

enum LoopExit {
    ConnectionLost,
    Shutdown,
}

/// Handle to a spawned feed client.
///
/// The client task owns the connection; the handle only carries the control
/// channels. Dropping the handle disconnects the client.
pub struct FeedHandle {
    tracked_tx: watch::Sender<Vec<Mmsi>>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<Result<(), TrackerError>>,
}

impl FeedHandle {
    /// Replace the tracked-MMSI set. If the connection is currently
    /// subscribed, a new subscription request is sent immediately without
    /// reconnecting.
    pub fn update_tracked(&self, mmsis: Vec<Mmsi>) {
        let _ = self.tracked_tx.send(mmsis);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear down the connection. Already-applied updates stay in effect.
    pub async fn disconnect(self) -> Result<(), TrackerError> {
        let _ = self.shutdown_tx.send(()).await;
        join_task(self.task).await
    }

    /// Wait for the client task to finish. Only returns on explicit
    /// disconnect or a fatal condition such as exhausted reconnects.
    pub async fn join(self) -> Result<(), TrackerError> {
        join_task(self.task).await
    }
}

async fn join_task(task: JoinHandle<Result<(), TrackerError>>) -> Result<(), TrackerError> {
    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Ok(()),
    }
}

/// Streaming ingestion client.
///
/// Owned, not global: `spawn` consumes the client, so a second concurrent
/// start of the same instance is unrepresentable.
pub struct FeedClient<C, S> {
    connector: C,
    registry: Registry<S>,
    config: FeedConfig,
    state: ConnectionState,
    tracked: Vec<Mmsi>,
    message_count: u64,
    discarded: u64,
}

impl<C, S> FeedClient<C, S>
where
    C: FeedConnector,
    S: PositionStore + 'static,
{
    pub fn new(connector: C, registry: Registry<S>, config: FeedConfig) -> Self {
        Self {
            connector,
            registry,
            config,
            state: ConnectionState::Disconnected,
            tracked: Vec::new(),
            message_count: 0,
            discarded: 0,
        }
    }

    /// Spawn the client on the runtime with an initial tracked-MMSI set.
    pub fn spawn(self, tracked: Vec<Mmsi>) -> FeedHandle {
        let (tracked_tx, tracked_rx) = watch::channel(tracked);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let task = tokio::spawn(self.run(tracked_rx, shutdown_rx));
        FeedHandle {
            tracked_tx,
            shutdown_tx,
            task,
        }
    }

    /// Connection lifecycle: connect, subscribe, process messages, and on
    /// loss retry with a fixed backoff up to the configured attempt bound.
    /// Exhausting the bound is fatal and surfaces to the operator.
    pub async fn run(
        mut self,
        mut tracked: watch::Receiver<Vec<Mmsi>>,
        mut shutdown: mpsc::Receiver<()>,
    ) -> Result<(), TrackerError> {
        self.config.validate()?;
        let mut attempts: u32 = 0;

        loop {
            self.state = ConnectionState::Connecting;
            info!(url = %self.config.url, "connecting to position feed");

            match self.connector.connect().await {
                Ok(mut transport) => {
                    let set = tracked.borrow_and_update().clone();
                    match self.send_subscription(&mut transport, set).await {
                        Ok(()) => {
                            self.state = ConnectionState::Subscribed;
                            attempts = 0;
                            match self
                                .message_loop(&mut transport, &mut tracked, &mut shutdown)
                                .await
                            {
                                LoopExit::Shutdown => {
                                    info!("feed client disconnected on request");
                                    return Ok(());
                                }
                                LoopExit::ConnectionLost => {}
                            }
                        }
                        Err(e) => warn!("feed subscription failed: {e}"),
                    }
                }
                Err(e) => warn!("feed connection failed: {e}"),
            }

            self.state = ConnectionState::Disconnected;
            attempts += 1;
            if attempts >= self.config.max_reconnect_attempts {
                error!(
                    attempts,
                    "feed reconnect attempts exhausted, giving up; restart required"
                );
                return Err(TrackerError::FeedReconnectExhausted(attempts));
            }

            info!(
                attempt = attempts,
                max = self.config.max_reconnect_attempts,
                "reconnecting to feed after backoff"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = shutdown.recv() => return Ok(()),
            }
        }
    }

    async fn send_subscription(
        &mut self,
        transport: &mut C::Transport,
        tracked: Vec<Mmsi>,
    ) -> Result<(), TrackerError> {
        let request = SubscriptionRequest::new(&self.config.api_key, &tracked);
        if tracked.is_empty() {
            info!("subscribing unscoped; reports will be filtered against the position store");
        } else {
            info!(mmsis = tracked.len(), "subscribing scoped to tracked MMSIs");
        }
        transport.send_text(serde_json::to_string(&request)?).await?;
        self.tracked = tracked;
        Ok(())
    }

    /// Sequential message loop: one message at a time in arrival order, so
    /// each resolve/archive/write sequence completes before the next report
    /// is looked at.
    async fn message_loop(
        &mut self,
        transport: &mut C::Transport,
        tracked: &mut watch::Receiver<Vec<Mmsi>>,
        shutdown: &mut mpsc::Receiver<()>,
    ) -> LoopExit {
        let period = self.config.heartbeat_interval;
        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                maybe = transport.next_text() => match maybe {
                    Some(Ok(payload)) => self.handle_payload(&payload).await,
                    Some(Err(e)) => {
                        error!("feed transport error: {e}");
                        return LoopExit::ConnectionLost;
                    }
                    None => {
                        info!(messages = self.message_count, "feed connection closed by peer");
                        return LoopExit::ConnectionLost;
                    }
                },
                changed = tracked.changed() => {
                    if changed.is_ok() {
                        let set = tracked.borrow_and_update().clone();
                        info!(mmsis = set.len(), "tracked set updated, re-subscribing");
                        if let Err(e) = self.send_subscription(transport, set).await {
                            error!("re-subscription failed: {e}");
                            return LoopExit::ConnectionLost;
                        }
                    }
                },
                _ = shutdown.recv() => return LoopExit::Shutdown,
                _ = heartbeat.tick() => {
                    // Absence of traffic alone is not a failure; the feed
                    // may simply be idle for the tracked set.
                    info!(
                        messages = self.message_count,
                        discarded = self.discarded,
                        "feed connection alive"
                    );
                }
            }
        }
    }

    async fn handle_payload(&mut self, payload: &str) {
        self.message_count += 1;

        match parse_frame(payload) {
            Ok(FeedFrame::Position(report)) => {
                if !self.is_tracked(report.mmsi) {
                    self.note_discard(report.mmsi);
                    return;
                }
                let record_history = self.message_count % HISTORY_SAMPLE_EVERY == 0;
                match self
                    .registry
                    .apply_position_report(&report, Utc::now(), record_history)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => self.note_discard(report.mmsi),
                    Err(e) => error!(mmsi = report.mmsi, "position report processing error: {e}"),
                }
            }
            Ok(FeedFrame::Static(report)) => {
                if !self.is_tracked(report.mmsi) {
                    self.note_discard(report.mmsi);
                    return;
                }
                match self.registry.apply_static_report(&report, Utc::now()).await {
                    Ok(true) => {}
                    Ok(false) => self.note_discard(report.mmsi),
                    Err(e) => error!(mmsi = report.mmsi, "static report processing error: {e}"),
                }
            }
            Ok(FeedFrame::Status(status)) => info!(%status, "feed status frame"),
            Ok(FeedFrame::Error(error)) => error!(%error, "feed error frame"),
            Err(e) => {
                if self.message_count % DISCARD_LOG_EVERY == 1 {
                    warn!("failed to interpret feed frame: {e}");
                }
            }
        }
    }

    /// Allow-list gate. With no configured set the report falls through to
    /// the store existence check inside the registry.
    fn is_tracked(&self, mmsi: u32) -> bool {
        if self.tracked.is_empty() {
            return true;
        }
        Mmsi::try_from(mmsi)
            .map(|m| self.tracked.contains(&m))
            .unwrap_or(false)
    }

    /// Rate-limited logging only; global feed traffic would flood the logs.
    fn note_discard(&mut self, mmsi: u32) {
        self.discarded += 1;
        if self.discarded % DISCARD_LOG_EVERY == 1 {
            debug!(
                mmsi,
                discarded = self.discarded,
                state = ?self.state,
                "discarding report for untracked vessel"
            );
        }
    }
}
