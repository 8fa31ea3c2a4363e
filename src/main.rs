mod action;
mod api;
mod config;
mod engine;
mod models;
mod poll;
mod render;
mod sse;
mod status;
mod stream;
mod theme;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use action::ActionClient;
use api::{ConsoleState, Telemetry};
use config::{Config, Transport};
use engine::Engine;
use poll::PollClient;
use status::{Severity, StatusBanner};
use stream::{ConnectionStatus, StreamClient, StreamEvent};
use theme::ThemeStore;

/// Keeps whichever transport is active alive for the process lifetime
enum TransportHandle {
    Stream(StreamClient),
    Poll(PollClient),
}

impl TransportHandle {
    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        match self {
            Self::Stream(client) => client.status(),
            Self::Poll(client) => client.status(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("info".parse()?)
                    .add_directive("hyper=error".parse()?),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();

    let config = Config::parse();
    info!("Configuration loaded successfully");
    debug!("{:#?}", config);

    let banner = StatusBanner::new(config.banner_auto_hide);
    let engine = Arc::new(RwLock::new(Engine::new()));
    let theme = Arc::new(ThemeStore::load(&config.state_dir).await);
    let telemetry = Arc::new(RwLock::new(Telemetry::default()));

    let actions = Arc::new(ActionClient::new(
        config.backend_url("/action"),
        config.request_timeout,
        !config.no_optimistic,
        Arc::clone(&engine),
        banner.clone(),
    ));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = match config.transport {
        Transport::Sse => {
            info!("Subscribing to {}", config.backend_url("/events"));
            TransportHandle::Stream(StreamClient::connect(
                config.backend_url("/events"),
                config.policy(),
                tx,
            ))
        }
        Transport::Poll => {
            info!("Polling {}", config.backend_url("/list"));
            TransportHandle::Poll(PollClient::connect(
                config.backend_url("/list"),
                config.poll_interval,
                config.request_timeout,
                config.policy(),
                tx,
            ))
        }
    };
    let connection = transport.status();

    // Apply stream events to the engine as they arrive
    {
        let engine = Arc::clone(&engine);
        let telemetry = Arc::clone(&telemetry);
        let banner = banner.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Connected(node) => {
                        info!(
                            "connected to {} ({})",
                            node.server_node_name, node.server_node_ip
                        );
                        telemetry.write().await.server_node = Some(node);
                        banner.hide();
                    }
                    StreamEvent::InitialData(initial) => {
                        if initial.is_success() {
                            engine.write().await.apply_snapshot(initial.data);
                        } else {
                            banner.show(
                                initial
                                    .message
                                    .unwrap_or_else(|| "Failed to load deployments".to_string()),
                                Severity::Error,
                            );
                        }
                    }
                    StreamEvent::Update(delta) => engine.write().await.apply_delta(delta),
                    StreamEvent::Resync(records) => engine.write().await.reconcile(records),
                    StreamEvent::Heartbeat(heartbeat) => {
                        telemetry.write().await.last_heartbeat = Some(heartbeat.timestamp);
                    }
                    StreamEvent::ServerError(message) => banner.show(message, Severity::Error),
                }
            }
        });
    }

    // Mirror connection state transitions into the status banner
    {
        let mut connection = connection.clone();
        let banner = banner.clone();
        tokio::spawn(async move {
            loop {
                let status = connection.borrow_and_update().clone();
                match status {
                    ConnectionStatus::Connecting => {
                        banner.show("Connecting to server...", Severity::Info)
                    }
                    ConnectionStatus::Connected => banner.hide(),
                    ConnectionStatus::Reconnecting {
                        attempt,
                        max_attempts,
                        delay_ms,
                    } => banner.show(
                        format!(
                            "Connection lost. Reconnecting in {}s (attempt {attempt}/{max_attempts})",
                            Duration::from_millis(delay_ms).as_secs()
                        ),
                        Severity::Error,
                    ),
                    ConnectionStatus::Down => {
                        banner.show(
                            "Connection lost. Please restart kuyala-console.",
                            Severity::Error,
                        );
                        return;
                    }
                }
                if connection.changed().await.is_err() {
                    return;
                }
            }
        });
    }

    api::serve(
        config.listen_address,
        ConsoleState {
            engine,
            banner,
            actions,
            theme,
            connection,
            telemetry,
        },
    )
    .await?;

    Ok(())
}
