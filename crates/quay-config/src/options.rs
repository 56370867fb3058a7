use std::time::Duration;

use clap::Parser;

use crate::defaults::{DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL, default_endpoint};
use crate::logging::LogFormat;
use crate::socket::BusEndpoint;

/// Command line options accepted by the broker daemon.
///
/// The daemon's whole control surface is the argument vector: there is no
/// configuration file and no runtime administration protocol.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "quayd",
    version,
    about = "Local inter-process message bus broker"
)]
pub struct DaemonOptions {
    /// Listening endpoint override (unix:///path/to.sock or tcp://host:port).
    #[arg(short = 's', long = "socket", value_name = "URL")]
    pub socket: Option<BusEndpoint>,

    /// Tracing filter expression (e.g. "info", "quayd=debug").
    #[arg(long = "log-filter", value_name = "FILTER")]
    pub log_filter: Option<String>,

    /// Log output format.
    #[arg(long = "log-format", value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Reactor readiness poll interval in milliseconds.
    #[arg(long = "poll-interval-ms", value_name = "MS")]
    pub poll_interval_ms: Option<u64>,
}

impl DaemonOptions {
    /// Resolves the options against built-in defaults.
    #[must_use]
    pub fn into_config(self) -> Config {
        Config {
            socket: self.socket.unwrap_or_else(default_endpoint),
            log_filter: self
                .log_filter
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned()),
            log_format: self.log_format.unwrap_or_default(),
            poll_interval: self
                .poll_interval_ms
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_millis),
        }
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint the broker listens on.
    pub socket: BusEndpoint,
    /// Tracing filter expression.
    pub log_filter: String,
    /// Log output format.
    pub log_format: LogFormat,
    /// Bounded wait for the reactor's readiness poll.
    pub poll_interval: Duration,
}

impl Config {
    /// Parses the process arguments and resolves them into a configuration.
    #[must_use]
    pub fn from_args() -> Self {
        DaemonOptions::parse().into_config()
    }

    /// Listening endpoint.
    #[must_use]
    pub fn socket(&self) -> &BusEndpoint {
        &self.socket
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Reactor poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for Config {
    fn default() -> Self {
        DaemonOptions {
            socket: None,
            log_filter: None,
            log_format: None,
            poll_interval_ms: None,
        }
        .into_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> DaemonOptions {
        DaemonOptions::try_parse_from(argv.iter().copied()).expect("options should parse")
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = parse(&["quayd"]).into_config();
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format(), LogFormat::Compact);
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn socket_override_wins() {
        let config = parse(&["quayd", "--socket", "tcp://127.0.0.1:9000"]).into_config();
        assert_eq!(config.socket(), &BusEndpoint::tcp("127.0.0.1", 9000));
    }

    #[test]
    fn poll_interval_override_wins() {
        let config = parse(&["quayd", "--poll-interval-ms", "20"]).into_config();
        assert_eq!(config.poll_interval(), Duration::from_millis(20));
    }

    #[test]
    fn rejects_malformed_socket_url() {
        let result = DaemonOptions::try_parse_from(["quayd", "--socket", "ftp://nope"]);
        assert!(result.is_err());
    }

    #[test]
    fn log_format_parses_from_flag() {
        let config = parse(&["quayd", "--log-format", "json"]).into_config();
        assert_eq!(config.log_format(), LogFormat::Json);
    }
}
