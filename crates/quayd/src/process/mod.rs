//! Process-level control: shutdown signals and daemon launch.

mod launch;
mod shutdown;

pub use launch::{LaunchError, run_daemon};
pub use shutdown::{ShutdownError, install_shutdown_flag};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
