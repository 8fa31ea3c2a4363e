//! Polling transport over `GET /list`.
//!
//! Kept as a selectable alternative to the event stream for backends that do
//! not expose `/events`. The first successful fetch is emitted as a full
//! snapshot; later fetches are emitted as resyncs which the engine diffs in
//! place. Failures share the stream client's backoff policy and statuses.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, instrument, warn};

use crate::models::{AppRecord, InitialData};
use crate::stream::{ConnectionStatus, ReconnectPolicy, StreamEvent};

/// Handle over the background polling task. Dropping it stops the loop.
pub struct PollClient {
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PollClient {
    pub fn connect(
        endpoint: String,
        poll_interval: Duration,
        request_timeout: Duration,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        tokio::spawn(run(
            endpoint,
            poll_interval,
            request_timeout,
            policy,
            events,
            status_tx,
            shutdown_rx,
        ));

        Self {
            status_rx,
            shutdown_tx,
        }
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }
}

impl Drop for PollClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[instrument(name = "poll", skip_all)]
async fn run(
    endpoint: String,
    poll_interval: Duration,
    request_timeout: Duration,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<StreamEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let client = reqwest::Client::new();
    let mut attempt: u32 = 0;
    let mut first = true;

    loop {
        let fetched = tokio::select! {
            _ = shutdown_rx.recv() => return,
            res = fetch(&client, &endpoint, request_timeout) => res,
        };

        let delay = match fetched {
            Ok(records) => {
                attempt = 0;
                let _ = status_tx.send(ConnectionStatus::Connected);

                if first {
                    first = false;
                    let _ = events.send(StreamEvent::InitialData(InitialData {
                        status: "success".to_string(),
                        data: records,
                        message: None,
                    }));
                } else {
                    let _ = events.send(StreamEvent::Resync(records));
                }
                poll_interval
            }
            Err(e) => {
                warn!("list fetch failed: {e}");

                attempt += 1;
                if attempt > policy.max_attempts {
                    warn!("giving up after {} attempts", policy.max_attempts);
                    let _ = status_tx.send(ConnectionStatus::Down);
                    return;
                }

                let delay = policy.delay(attempt);
                debug!(
                    "retrying in {delay:?} (attempt {attempt}/{})",
                    policy.max_attempts
                );
                let _ = status_tx.send(ConnectionStatus::Reconnecting {
                    attempt,
                    max_attempts: policy.max_attempts,
                    delay_ms: delay.as_millis() as u64,
                });
                delay
            }
        };

        tokio::select! {
            _ = shutdown_rx.recv() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn fetch(
    client: &reqwest::Client,
    endpoint: &str,
    request_timeout: Duration,
) -> Result<Vec<AppRecord>, String> {
    let response = client
        .get(endpoint)
        .timeout(request_timeout)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("server responded with {status}"));
    }

    response
        .json::<Vec<AppRecord>>()
        .await
        .map_err(|e| e.to_string())
}
