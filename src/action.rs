//! Scale requests against the backend `/action` endpoint.
//!
//! A toggle looks up the record, optionally pre-renders the outcome, posts
//! the request and reconciles the result: success leaves the optimistic
//! guess in place for the stream to confirm, failure rolls it back and
//! surfaces the server's message.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::engine::Engine;
use crate::models::{ActionRequest, ActionResponse, AppKey};
use crate::status::{Severity, StatusBanner};

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("Deployment {0} not found")]
    NotFound(AppKey),

    /// Toggles are serialized per key by rejection: while a request is in
    /// flight, further toggles for the same key fail fast.
    #[error("A scale request for {0} is already in flight")]
    InFlight(AppKey),

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    /// The server answered but refused the action
    #[error("{0}")]
    Rejected(String),
}

pub struct ActionClient {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
    optimistic: bool,
    engine: Arc<RwLock<Engine>>,
    banner: StatusBanner,
}

impl ActionClient {
    pub fn new(
        endpoint: String,
        request_timeout: Duration,
        optimistic: bool,
        engine: Arc<RwLock<Engine>>,
        banner: StatusBanner,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            request_timeout,
            optimistic,
            engine,
            banner,
        }
    }

    /// Scales one app towards the other state's target. Returns the scale
    /// the server settled on.
    #[instrument(skip(self), fields(%key))]
    pub async fn toggle(&self, key: &AppKey, turn_on: bool) -> Result<u32, ToggleError> {
        let verb = if turn_on { "starting" } else { "stopping" };

        let (display_name, scale, guard) = {
            let mut engine = self.engine.write().await;

            let Some(record) = engine.get(key).cloned() else {
                let err = ToggleError::NotFound(key.clone());
                self.banner.show(err.to_string(), Severity::Error);
                return Err(err);
            };

            if engine.action_in_flight(key) {
                let err = ToggleError::InFlight(key.clone());
                self.banner.show(err.to_string(), Severity::Error);
                return Err(err);
            }

            let scale = if turn_on {
                record.replicas_on
            } else {
                record.replicas_off
            };

            engine.begin_action(key, turn_on);
            let guard = if self.optimistic {
                engine.apply_optimistic(key, scale)
            } else {
                None
            };

            (record.display_name().to_string(), scale, guard)
        };

        info!("{verb} {key} (scale to {scale})");
        let result = self.send(key, scale).await;

        let mut engine = self.engine.write().await;
        engine.finish_action(key);

        match result {
            Ok(response) => {
                let settled = response.scaled_to.unwrap_or(scale);
                info!("scaled {key} to {settled} replicas");
                self.banner.show(
                    format!(
                        "{display_name} {} successfully",
                        if turn_on { "started" } else { "stopped" }
                    ),
                    Severity::Success,
                );
                Ok(settled)
            }
            Err(e) => {
                warn!("scale request for {key} failed: {e}");
                if let Some(guard) = guard {
                    engine.rollback(guard);
                }
                self.banner.show(
                    format!("Failed to {verb} {display_name}: {e}"),
                    Severity::Error,
                );
                Err(e)
            }
        }
    }

    async fn send(&self, key: &AppKey, scale: u32) -> Result<ActionResponse, ToggleError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.request_timeout)
            .json(&ActionRequest {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                scale,
            })
            .send()
            .await?;

        let status = response.status();
        let body: ActionResponse = match response.json().await {
            Ok(body) => body,
            // A non-JSON error page still needs a readable message
            Err(_) if !status.is_success() => {
                return Err(ToggleError::Rejected(format!(
                    "server responded with {status}"
                )));
            }
            Err(e) => return Err(ToggleError::Request(e)),
        };

        if body.is_success() {
            Ok(body)
        } else {
            Err(ToggleError::Rejected(body.message.unwrap_or_else(|| {
                format!("server responded with {status}")
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn setup(
        endpoint: String,
        optimistic: bool,
        records: Vec<crate::models::AppRecord>,
    ) -> (ActionClient, Arc<RwLock<Engine>>, StatusBanner) {
        let mut engine = Engine::new();
        engine.apply_snapshot(records);
        let engine = Arc::new(RwLock::new(engine));
        let banner = StatusBanner::new(Duration::from_secs(5));

        let client = ActionClient::new(
            endpoint,
            Duration::from_secs(5),
            optimistic,
            Arc::clone(&engine),
            banner.clone(),
        );
        (client, engine, banner)
    }

    #[tokio::test]
    async fn turning_on_requests_replicas_on() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/action")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(
                json!({"namespace": "ns", "name": "app", "scale": 3}),
            ))
            .with_status(200)
            .with_body(r#"{"status": "success", "scaled_to": 3}"#)
            .create_async()
            .await;

        let (client, engine, banner) = setup(
            format!("{}/action", server.url()),
            true,
            vec![test_record("ns", "app", 0)],
        );
        let key = AppKey::new("ns", "app");

        let scaled = client.toggle(&key, true).await.unwrap();
        assert_eq!(scaled, 3);

        // Optimistic guess stays until the stream confirms it
        let engine = engine.read().await;
        assert_eq!(engine.get(&key).unwrap().replicas_current, 3);
        assert!(!engine.action_in_flight(&key));

        let current = banner.current().unwrap();
        assert_eq!(current.severity, Severity::Success);
        assert!(current.text.contains("started successfully"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn turning_off_requests_replicas_off() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/action")
            .match_body(Matcher::Json(
                json!({"namespace": "ns", "name": "app", "scale": 0}),
            ))
            .with_status(200)
            .with_body(r#"{"status": "success", "scaled_to": 0}"#)
            .create_async()
            .await;

        let (client, _engine, _banner) = setup(
            format!("{}/action", server.url()),
            true,
            vec![test_record("ns", "app", 3)],
        );

        let scaled = client.toggle(&AppKey::new("ns", "app"), false).await.unwrap();
        assert_eq!(scaled, 0);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_request_rolls_back_and_reports_server_message() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/action")
            .with_status(500)
            .with_body(r#"{"status": "error", "message": "scale denied"}"#)
            .create_async()
            .await;

        let (client, engine, banner) = setup(
            format!("{}/action", server.url()),
            true,
            vec![test_record("ns", "app", 0)],
        );
        let key = AppKey::new("ns", "app");

        let err = client.toggle(&key, true).await.unwrap_err();
        assert!(matches!(err, ToggleError::Rejected(ref msg) if msg == "scale denied"));

        // Rollback restored the pre-toggle replica count
        let engine = engine.read().await;
        assert_eq!(engine.get(&key).unwrap().replicas_current, 0);
        assert!(engine.grid_html().contains("Current replicas: 0"));

        let current = banner.current().unwrap();
        assert_eq!(current.severity, Severity::Error);
        assert!(current.text.contains("scale denied"));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_json_error_response_gets_status_message() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/action")
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;

        let (client, _engine, _banner) = setup(
            format!("{}/action", server.url()),
            true,
            vec![test_record("ns", "app", 0)],
        );

        let err = client.toggle(&AppKey::new("ns", "app"), true).await.unwrap_err();
        assert!(matches!(err, ToggleError::Rejected(ref msg) if msg.contains("502")));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unknown_key_fails_without_a_request() {
        let (client, _engine, banner) =
            setup("http://127.0.0.1:9/action".to_string(), true, vec![]);

        let err = client
            .toggle(&AppKey::new("ns", "ghost"), true)
            .await
            .unwrap_err();

        assert!(matches!(err, ToggleError::NotFound(_)));
        assert!(banner.current().unwrap().text.contains("not found"));
    }

    #[tokio::test]
    async fn concurrent_toggle_for_same_key_is_rejected() {
        let (client, engine, _banner) = setup(
            "http://127.0.0.1:9/action".to_string(),
            true,
            vec![test_record("ns", "app", 0)],
        );
        let key = AppKey::new("ns", "app");

        engine.write().await.begin_action(&key, true);

        let err = client.toggle(&key, true).await.unwrap_err();
        assert!(matches!(err, ToggleError::InFlight(_)));
    }

    #[tokio::test]
    async fn non_optimistic_mode_waits_for_the_stream() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/action")
            .with_status(200)
            .with_body(r#"{"status": "success", "scaled_to": 3}"#)
            .create_async()
            .await;

        let (client, engine, _banner) = setup(
            format!("{}/action", server.url()),
            false,
            vec![test_record("ns", "app", 0)],
        );
        let key = AppKey::new("ns", "app");

        client.toggle(&key, true).await.unwrap();

        // Displayed state is untouched until an authoritative update lands
        assert_eq!(
            engine.read().await.get(&key).unwrap().replicas_current,
            0
        );

        mock.assert_async().await;
    }
}
