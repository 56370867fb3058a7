//! Daemon launch sequencing.

use thiserror::Error;
use tracing::info;

use quay_config::Config;

use crate::bootstrap::{BootstrapError, bootstrap};
use crate::broker::ReactorError;

use super::PROCESS_TARGET;
use super::shutdown::{ShutdownError, install_shutdown_flag};

/// Errors that abort the daemon.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Signal handler installation failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The reactor hit a fatal error.
    #[error(transparent)]
    Reactor(#[from] ReactorError),
}

/// Runs the daemon to completion: bootstrap, reactor loop, drain.
pub fn run_daemon(config: &Config) -> Result<(), LaunchError> {
    let shutdown = install_shutdown_flag()?;
    let broker = bootstrap(config, shutdown)?;
    broker.run()?;
    info!(target: PROCESS_TARGET, "daemon exited cleanly");
    Ok(())
}
