//! Live event stream from the backend.
//!
//! Holds one `GET /events` connection, decodes the named server-sent events
//! and forwards them as typed [`StreamEvent`]s to a single subscriber. On
//! transport failure it reconnects with a bounded linear backoff and gives up
//! into a terminal `Down` state once the attempt budget is exhausted. The
//! server re-sends a full `initial_data` snapshot on every connection, which
//! resynchronizes the engine after a drop.

use std::pin::pin;
use std::time::Duration;

use futures_lite::StreamExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::models::{AppRecord, ConnectionInfo, Delta, Heartbeat, InitialData};
use crate::sse::{SseDecoder, SseFrame};

/// Typed event forwarded to the reconciliation side
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Server acknowledged the subscription
    Connected(ConnectionInfo),
    /// Full snapshot, clears and redraws the card grid
    InitialData(InitialData),
    /// Incremental add/modify/delete
    Update(Delta),
    /// Liveness signal with a server timestamp
    Heartbeat(Heartbeat),
    /// Full listing from the polling transport, reconciled in place
    Resync(Vec<AppRecord>),
    /// Application-level error pushed by the server
    ServerError(String),
}

/// Connection state published on a watch channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    /// Terminal: the attempt budget is spent, a restart is required
    Down,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Bounded linear backoff: `base_delay * min(attempt, 5)`, terminal after
/// `max_attempts` consecutive failures.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    const DELAY_CAP_FACTOR: u32 = 5;

    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * attempt.clamp(1, Self::DELAY_CAP_FACTOR)
    }
}

enum StreamEnd {
    Shutdown,
    Disconnected,
}

/// Handle over the background connection task. Dropping it (or calling
/// [`disconnect`](Self::disconnect)) closes the connection.
pub struct StreamClient {
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: broadcast::Sender<()>,
}

impl StreamClient {
    /// Opens the event stream and starts forwarding events to `events`
    pub fn connect(
        endpoint: String,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(run(endpoint, policy, events, status_tx, shutdown_rx));

        Self {
            status_rx,
            shutdown_tx,
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Closes the connection. Safe to call more than once.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[instrument(name = "stream", skip_all)]
async fn run(
    endpoint: String,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<StreamEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let client = reqwest::Client::new();
    let mut attempt: u32 = 0;

    loop {
        let opened = tokio::select! {
            _ = shutdown_rx.recv() => return,
            res = open(&client, &endpoint) => res,
        };

        match opened {
            Ok(response) => {
                // A successful open resets the attempt counter
                attempt = 0;
                info!("connected to {endpoint}");
                let _ = status_tx.send(ConnectionStatus::Connected);

                match consume(response, &events, &mut shutdown_rx).await {
                    StreamEnd::Shutdown => return,
                    StreamEnd::Disconnected => {}
                }
            }
            Err(e) => warn!("connection failed: {e}"),
        }

        attempt += 1;
        if attempt > policy.max_attempts {
            warn!("giving up after {} attempts", policy.max_attempts);
            let _ = status_tx.send(ConnectionStatus::Down);
            return;
        }

        let delay = policy.delay(attempt);
        debug!(
            "reconnecting in {delay:?} (attempt {attempt}/{})",
            policy.max_attempts
        );
        let _ = status_tx.send(ConnectionStatus::Reconnecting {
            attempt,
            max_attempts: policy.max_attempts,
            delay_ms: delay.as_millis() as u64,
        });

        tokio::select! {
            _ = shutdown_rx.recv() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn open(client: &reqwest::Client, endpoint: &str) -> Result<reqwest::Response, String> {
    let response = client
        .get(endpoint)
        .header("Accept", "text/event-stream")
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("server responded with {status}"));
    }
    Ok(response)
}

async fn consume(
    response: reqwest::Response,
    events: &mpsc::UnboundedSender<StreamEvent>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> StreamEnd {
    let mut decoder = SseDecoder::new();
    let mut body = pin!(response.bytes_stream());

    loop {
        let chunk = tokio::select! {
            _ = shutdown_rx.recv() => return StreamEnd::Shutdown,
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for frame in decoder.feed(&bytes) {
                    dispatch(frame, events);
                }
            }
            Some(Err(e)) => {
                warn!("stream interrupted: {e}");
                return StreamEnd::Disconnected;
            }
            None => {
                info!("stream closed by server");
                return StreamEnd::Disconnected;
            }
        }
    }
}

/// Maps one decoded frame to a typed event. Frames that fail to parse are
/// logged and skipped so one bad payload cannot take the connection down.
fn dispatch(frame: SseFrame, events: &mpsc::UnboundedSender<StreamEvent>) {
    let event = match frame.event.as_str() {
        "connected" => parse(&frame.data).map(StreamEvent::Connected),
        // Unnamed messages carry the same payload as `initial_data` on the
        // older list_stream endpoint
        "initial_data" | "message" => parse(&frame.data).map(StreamEvent::InitialData),
        "deployment_update" => parse(&frame.data).map(StreamEvent::Update),
        "heartbeat" => parse(&frame.data).map(StreamEvent::Heartbeat),
        "error" => {
            let message = serde_json::from_str::<serde_json::Value>(&frame.data)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                .unwrap_or(frame.data);
            Ok(StreamEvent::ServerError(message))
        }
        other => {
            debug!("ignoring unknown event {other:?}");
            return;
        }
    };

    match event {
        Ok(event) => {
            let _ = events.send(event);
        }
        Err(e) => warn!("failed to parse {} payload: {e}", frame.event),
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(data)
}
