#[cfg(unix)]
use std::env;
use std::time::Duration;

#[cfg(unix)]
use camino::Utf8PathBuf;

#[cfg(unix)]
use dirs::runtime_dir;
#[cfg(unix)]
use libc::geteuid;

use crate::socket::BusEndpoint;

/// Default TCP port used when Unix domain sockets are not available.
pub const DEFAULT_TCP_PORT: u16 = 7810;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Bounded wait used by the reactor's readiness poll.
///
/// Shutdown requests are only observed at iteration boundaries, so this
/// also bounds how long a quiescent daemon takes to notice a signal.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Computes the default listening endpoint for the daemon.
#[must_use]
pub fn default_endpoint() -> BusEndpoint {
    default_endpoint_inner()
}

#[cfg(unix)]
fn default_endpoint_inner() -> BusEndpoint {
    let base = runtime_base_directory().unwrap_or_else(fallback_base_directory);
    BusEndpoint::unix(base.join("quay").join("quayd.sock"))
}

#[cfg(unix)]
fn runtime_base_directory() -> Option<Utf8PathBuf> {
    runtime_dir().and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
}

#[cfg(unix)]
fn fallback_base_directory() -> Utf8PathBuf {
    let mut base = Utf8PathBuf::from_path_buf(env::temp_dir())
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"));
    let uid = unsafe { geteuid() };
    base.push(format!("uid-{uid}"));
    base
}

#[cfg(not(unix))]
fn default_endpoint_inner() -> BusEndpoint {
    BusEndpoint::tcp("127.0.0.1", DEFAULT_TCP_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_is_well_formed() {
        let endpoint = default_endpoint();
        let reparsed: BusEndpoint = endpoint
            .to_string()
            .parse()
            .expect("default endpoint should round trip");
        assert_eq!(reparsed, endpoint);
    }
}
