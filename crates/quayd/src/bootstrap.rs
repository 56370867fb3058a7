//! Daemon bootstrap orchestration.
//!
//! Bootstrap runs the fatal-error stages in order: telemetry, socket
//! filesystem preparation, endpoint bind, built-in method installation.
//! Any failure here exits the process; nothing after bootstrap is
//! allowed to be fatal except the readiness poll itself.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use thiserror::Error;
use tracing::info;

use quay_config::{Config, EndpointPrepareError};

use crate::broker::{Broker, MethodPathError};
use crate::builtins;
use crate::telemetry::{self, TelemetryError};
use crate::transport::{Listener, ListenerError};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        #[source]
        source: TelemetryError,
    },
    /// Socket filesystem preparation failed.
    #[error("failed to prepare socket filesystem: {source}")]
    Socket {
        #[source]
        source: EndpointPrepareError,
    },
    /// Binding the listening endpoint failed.
    #[error("failed to bind listening endpoint: {source}")]
    Listen {
        #[source]
        source: ListenerError,
    },
    /// A built-in method path was rejected.
    #[error("failed to install built-in methods: {source}")]
    Builtins {
        #[source]
        source: MethodPathError,
    },
}

/// Bootstraps a broker ready to run.
///
/// `shutdown` is the flag the reactor polls at iteration boundaries;
/// the caller decides what sets it (the signal path in production, the
/// test harness in tests).
pub fn bootstrap(config: &Config, shutdown: Arc<AtomicBool>) -> Result<Broker, BootstrapError> {
    telemetry::initialise(config).map_err(|source| BootstrapError::Telemetry { source })?;

    config
        .socket()
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })?;

    let listener =
        Listener::bind(config.socket()).map_err(|source| BootstrapError::Listen { source })?;

    let mut broker = Broker::new(listener, shutdown, config.poll_interval());
    builtins::install(&mut broker).map_err(|source| BootstrapError::Builtins { source })?;

    info!(
        target: BOOTSTRAP_TARGET,
        endpoint = %broker.endpoint(),
        poll_interval_ms = config.poll_interval().as_millis() as u64,
        "bootstrap complete"
    );
    Ok(broker)
}

#[cfg(test)]
mod tests {
    use quay_config::BusEndpoint;

    use super::*;

    fn test_config(socket: BusEndpoint) -> Config {
        Config {
            socket,
            ..Config::default()
        }
    }

    #[test]
    fn bootstrap_binds_and_installs_builtins() {
        let config = test_config(BusEndpoint::tcp("127.0.0.1", 0));
        let broker = bootstrap(&config, Arc::new(AtomicBool::new(false)))
            .expect("bootstrap should succeed");
        assert!(broker.local_addr().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn bootstrap_fails_when_endpoint_is_taken() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("quayd.sock");
        let _existing = std::os::unix::net::UnixListener::bind(&path).expect("bind");

        let config = test_config(BusEndpoint::unix(path.to_str().expect("utf8 path")));
        let error = bootstrap(&config, Arc::new(AtomicBool::new(false)))
            .expect_err("bootstrap should fail");
        assert!(matches!(error, BootstrapError::Listen { .. }));
    }
}
