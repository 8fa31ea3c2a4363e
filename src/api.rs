//! Local HTTP surface serving the dashboard page and its endpoints.
//!
//! `GET /` renders the whole page from engine state, `GET /status` exposes
//! the same state as JSON, `POST /toggle` forwards a scale request and
//! `POST /theme` persists the light/dark preference.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::action::{ActionClient, ToggleError};
use crate::engine::Engine;
use crate::models::{AppKey, ConnectionInfo};
use crate::render::{render_page, PageContext};
use crate::status::{Banner, StatusBanner};
use crate::stream::ConnectionStatus;
use crate::theme::{Theme, ThemeStore};

/// Connection metadata pushed over the stream, kept for the status endpoint
#[derive(Debug, Default)]
pub struct Telemetry {
    pub server_node: Option<ConnectionInfo>,
    pub last_heartbeat: Option<f64>,
}

#[derive(Clone)]
pub struct ConsoleState {
    pub engine: Arc<RwLock<Engine>>,
    pub banner: StatusBanner,
    pub actions: Arc<ActionClient>,
    pub theme: Arc<ThemeStore>,
    pub connection: watch::Receiver<ConnectionStatus>,
    pub telemetry: Arc<RwLock<Telemetry>>,
}

pub fn router(state: ConsoleState) -> Router {
    Router::new()
        .route("/", get(page))
        .route("/status", get(status))
        .route("/toggle", post(toggle))
        .route("/theme", post(set_theme))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listen_address: SocketAddr, state: ConsoleState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    info!("console listening on {listen_address}");
    axum::serve(listener, router(state)).await
}

async fn page(State(state): State<ConsoleState>) -> Html<String> {
    let grid = state.engine.read().await.grid_html();
    let banner = state.banner.current();
    let telemetry = state.telemetry.read().await;
    let connection = state.connection.borrow().clone();

    let ctx = PageContext {
        theme: state.theme.current().await,
        connection: &connection,
        server_node: telemetry.server_node.as_ref(),
        banner: banner.as_ref(),
    };

    Html(render_page(&ctx, &grid))
}

#[derive(Serialize)]
struct StatusBody {
    connection: ConnectionStatus,
    apps: usize,
    last_heartbeat: Option<f64>,
    server_node: Option<ConnectionInfo>,
    banner: Option<Banner>,
}

async fn status(State(state): State<ConsoleState>) -> Json<StatusBody> {
    // The watch ref must not be held across an await point
    let connection = state.connection.borrow().clone();
    let telemetry = state.telemetry.read().await;

    Json(StatusBody {
        connection,
        apps: state.engine.read().await.len(),
        last_heartbeat: telemetry.last_heartbeat,
        server_node: telemetry.server_node.clone(),
        banner: state.banner.current(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleBody {
    namespace: String,
    name: String,
    turn_on: bool,
}

#[derive(Serialize)]
struct ToggleOutcome {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scaled_to: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn toggle(
    State(state): State<ConsoleState>,
    Json(body): Json<ToggleBody>,
) -> impl IntoResponse {
    let key = AppKey::new(body.namespace, body.name);

    match state.actions.toggle(&key, body.turn_on).await {
        Ok(scaled_to) => (
            StatusCode::OK,
            Json(ToggleOutcome {
                status: "success",
                scaled_to: Some(scaled_to),
                message: None,
            }),
        ),
        Err(e) => {
            let code = match e {
                ToggleError::NotFound(_) => StatusCode::NOT_FOUND,
                ToggleError::InFlight(_) => StatusCode::CONFLICT,
                ToggleError::Request(_) | ToggleError::Rejected(_) => StatusCode::BAD_GATEWAY,
            };
            (
                code,
                Json(ToggleOutcome {
                    status: "error",
                    scaled_to: None,
                    message: Some(e.to_string()),
                }),
            )
        }
    }
}

#[derive(Deserialize)]
struct ThemeBody {
    theme: Theme,
}

async fn set_theme(
    State(state): State<ConsoleState>,
    Json(body): Json<ThemeBody>,
) -> StatusCode {
    match state.theme.set(body.theme).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            error!("failed to persist theme: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record;
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn test_state(
        action_endpoint: String,
        records: Vec<crate::models::AppRecord>,
        state_dir: &std::path::Path,
    ) -> ConsoleState {
        let mut engine = Engine::new();
        engine.apply_snapshot(records);
        let engine = Arc::new(RwLock::new(engine));
        let banner = StatusBanner::new(Duration::from_secs(5));
        // The receiver keeps serving the last value after the sender drops
        let (_tx, connection) = watch::channel(ConnectionStatus::Connected);

        let actions = Arc::new(ActionClient::new(
            action_endpoint,
            Duration::from_secs(5),
            true,
            Arc::clone(&engine),
            banner.clone(),
        ));

        ConsoleState {
            engine,
            banner,
            actions,
            theme: Arc::new(ThemeStore::load(state_dir).await),
            connection,
            telemetry: Arc::new(RwLock::new(Telemetry::default())),
        }
    }

    async fn spawn(state: ConsoleState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn page_renders_cards_and_theme() {
        let dir = tempdir().unwrap();
        let state = test_state(
            "http://127.0.0.1:9/action".to_string(),
            vec![test_record("ns", "web", 3)],
            dir.path(),
        )
        .await;
        let base = spawn(state).await;

        let body = reqwest::get(format!("{base}/"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert!(body.contains(r#"data-theme="light""#));
        assert!(body.contains("card-ns-web"));
        assert!(body.contains("Turn Off"));
    }

    #[tokio::test]
    async fn status_reports_connection_and_app_count() {
        let dir = tempdir().unwrap();
        let state = test_state(
            "http://127.0.0.1:9/action".to_string(),
            vec![test_record("ns", "a", 0), test_record("ns", "b", 1)],
            dir.path(),
        )
        .await;
        let base = spawn(state).await;

        let body: Value = reqwest::get(format!("{base}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["apps"], 2);
        assert_eq!(body["connection"]["state"], "connected");
        assert_eq!(body["banner"], Value::Null);
    }

    #[tokio::test]
    async fn toggle_forwards_to_the_backend() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/action")
            .match_body(Matcher::Json(
                json!({"namespace": "ns", "name": "web", "scale": 3}),
            ))
            .with_status(200)
            .with_body(r#"{"status": "success", "scaled_to": 3}"#)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let state = test_state(
            format!("{}/action", server.url()),
            vec![test_record("ns", "web", 0)],
            dir.path(),
        )
        .await;
        let base = spawn(state).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{base}/toggle"))
            .json(&json!({"namespace": "ns", "name": "web", "turnOn": true}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["scaled_to"], 3);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn toggle_for_unknown_app_is_not_found() {
        let dir = tempdir().unwrap();
        let state = test_state("http://127.0.0.1:9/action".to_string(), vec![], dir.path()).await;
        let base = spawn(state).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{base}/toggle"))
            .json(&json!({"namespace": "ns", "name": "ghost", "turnOn": true}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn theme_change_persists_and_shows_on_the_page() {
        let dir = tempdir().unwrap();
        let state = test_state("http://127.0.0.1:9/action".to_string(), vec![], dir.path()).await;
        let base = spawn(state).await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("{base}/theme"))
            .json(&json!({"theme": "dark"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        let page = client
            .get(format!("{base}/"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(page.contains(r#"data-theme="dark""#));

        assert!(dir.path().join("theme.json").exists());
    }
}
