//! Termination signal handling.
//!
//! The handler installed here does exactly one thing: store `true` into
//! a shared flag. All teardown runs on the reactor's own control flow
//! once it observes the flag at an iteration boundary, so no unsafe work
//! ever happens in signal context.

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::signal::{SIGINT, SIGTERM};
use thiserror::Error;
use tracing::debug;

use super::PROCESS_TARGET;

/// Errors reported while installing signal handlers.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Registering a signal handler failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        #[source]
        source: io::Error,
    },
}

/// Installs SIGTERM/SIGINT handlers that set the returned flag.
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>, ShutdownError> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT] {
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .map_err(|source| ShutdownError::Install { source })?;
    }
    debug!(target: PROCESS_TARGET, "shutdown signal handlers installed");
    Ok(flag)
}
