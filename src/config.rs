//! Runtime configuration, from flags or `KUYALA_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::stream::ReconnectPolicy;

fn parse_duration(arg: &str) -> Result<Duration, std::num::ParseIntError> {
    let ms = arg.parse()?;
    Ok(Duration::from_millis(ms))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// Server-sent events from `/events`
    Sse,
    /// Periodic full fetches of `/list`
    Poll,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "kuyala-console", version, about = "Cluster dashboard console")]
pub struct Config {
    /// Base URL of the kuyala backend
    #[arg(
        long,
        env = "KUYALA_BACKEND_ENDPOINT",
        default_value = "http://127.0.0.1:5000"
    )]
    pub backend_endpoint: String,

    /// How updates are pulled from the backend
    #[arg(long, env = "KUYALA_TRANSPORT", value_enum, default_value = "sse")]
    pub transport: Transport,

    /// Address the dashboard page is served on
    #[arg(
        long,
        env = "KUYALA_LISTEN_ADDRESS",
        default_value = "127.0.0.1:8484"
    )]
    pub listen_address: SocketAddr,

    /// Base reconnect delay in milliseconds, grows linearly per attempt
    #[arg(
        long,
        env = "KUYALA_RECONNECT_BASE_DELAY",
        value_parser = parse_duration,
        default_value = "3000"
    )]
    pub reconnect_base_delay: Duration,

    /// Consecutive failures tolerated before giving up
    #[arg(long, env = "KUYALA_MAX_RECONNECT_ATTEMPTS", default_value_t = 10)]
    pub max_reconnect_attempts: u32,

    /// Interval between fetches when using the polling transport
    #[arg(
        long,
        env = "KUYALA_POLL_INTERVAL",
        value_parser = parse_duration,
        default_value = "10000"
    )]
    pub poll_interval: Duration,

    /// Timeout for individual backend requests in milliseconds
    #[arg(
        long,
        env = "KUYALA_REQUEST_TIMEOUT",
        value_parser = parse_duration,
        default_value = "10000"
    )]
    pub request_timeout: Duration,

    /// How long info/success messages stay visible in milliseconds
    #[arg(
        long,
        env = "KUYALA_BANNER_AUTO_HIDE",
        value_parser = parse_duration,
        default_value = "5000"
    )]
    pub banner_auto_hide: Duration,

    /// Directory for persisted console state
    #[arg(long, env = "KUYALA_STATE_DIR", default_value = ".kuyala")]
    pub state_dir: PathBuf,

    /// Wait for the stream to confirm scale changes instead of pre-rendering
    /// the expected outcome
    #[arg(long, env = "KUYALA_NO_OPTIMISTIC")]
    pub no_optimistic: bool,
}

impl Config {
    /// Joins a path onto the backend endpoint, tolerating a trailing slash
    pub fn backend_url(&self, path: &str) -> String {
        format!("{}{path}", self.backend_endpoint.trim_end_matches('/'))
    }

    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::parse_from(["kuyala-console"]);

        assert_eq!(config.backend_endpoint, "http://127.0.0.1:5000");
        assert_eq!(config.transport, Transport::Sse);
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert!(!config.no_optimistic);
    }

    #[test]
    fn backend_url_handles_trailing_slash() {
        let mut config = Config::parse_from(["kuyala-console"]);
        config.backend_endpoint = "http://host:5000/".to_string();

        assert_eq!(config.backend_url("/events"), "http://host:5000/events");
    }

    #[test]
    fn durations_parse_from_milliseconds() {
        let config = Config::parse_from([
            "kuyala-console",
            "--poll-interval",
            "2500",
            "--transport",
            "poll",
        ]);

        assert_eq!(config.poll_interval, Duration::from_millis(2500));
        assert_eq!(config.transport, Transport::Poll);
    }
}
