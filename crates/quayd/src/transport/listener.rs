//! Listening endpoint for the broker.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};

use tracing::warn;

use quay_config::BusEndpoint;

use super::TRANSPORT_TARGET;
use super::conn::PeerStream;
use super::errors::ListenerError;

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};
#[cfg(unix)]
use std::path::Path;

/// Non-blocking listener bound to the configured endpoint.
///
/// Dropping the listener removes a Unix socket file left behind by the
/// bind.
#[derive(Debug)]
pub struct Listener {
    endpoint: BusEndpoint,
    kind: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl Listener {
    /// Binds the endpoint and switches the listener to non-blocking mode.
    ///
    /// For Unix endpoints a stale socket file (one no daemon answers on)
    /// is removed first; a live one refuses the bind.
    pub fn bind(endpoint: &BusEndpoint) -> Result<Self, ListenerError> {
        let kind = match endpoint {
            BusEndpoint::Tcp { host, port } => ListenerKind::Tcp(bind_tcp(host, *port)?),
            BusEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    ListenerKind::Unix(bind_unix(path.as_std_path())?)
                }
                #[cfg(not(unix))]
                {
                    return Err(ListenerError::UnsupportedUnix {
                        endpoint: endpoint.to_string(),
                    });
                }
            }
        };
        let listener = Self {
            endpoint: endpoint.clone(),
            kind,
        };
        listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        Ok(listener)
    }

    /// The endpoint this listener is bound to.
    pub fn endpoint(&self) -> &BusEndpoint {
        &self.endpoint
    }

    /// The bound address for TCP listeners; used when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.kind {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            ListenerKind::Unix(_) => None,
        }
    }

    /// Accepts one pending connection, already switched to non-blocking
    /// mode; `None` when no connection is waiting.
    pub fn accept_one(&self) -> io::Result<Option<PeerStream>> {
        let stream = match &self.kind {
            ListenerKind::Tcp(listener) => match listener.accept() {
                Ok((stream, _)) => PeerStream::Tcp(stream),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(error) => return Err(error),
            },
            #[cfg(unix)]
            ListenerKind::Unix(listener) => match listener.accept() {
                Ok((stream, _)) => PeerStream::Unix(stream),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(error) => return Err(error),
            },
        };
        stream.set_nonblocking(true)?;
        Ok(Some(stream))
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match &self.kind {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(nonblocking),
            #[cfg(unix)]
            ListenerKind::Unix(listener) => listener.set_nonblocking(nonblocking),
        }
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.kind {
            ListenerKind::Tcp(listener) => listener.as_fd(),
            #[cfg(unix)]
            ListenerKind::Unix(listener) => listener.as_fd(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(path) = self.endpoint.unix_path()
            && let Err(error) = fs::remove_file(path.as_std_path())
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target: TRANSPORT_TARGET,
                error = %error,
                path = %path,
                "failed to remove unix socket file"
            );
        }
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<UnixListener, ListenerError> {
    if path.exists() {
        reclaim_stale_socket(path)?;
    }
    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

/// Removes a leftover socket file after proving no daemon answers on it.
#[cfg(unix)]
fn reclaim_stale_socket(path: &Path) -> Result<(), ListenerError> {
    let display = || path.display().to_string();
    let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
        path: display(),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::UnixNotSocket { path: display() });
    }
    match UnixStream::connect(path) {
        Ok(_stream) => Err(ListenerError::UnixInUse { path: display() }),
        Err(error)
            if error.kind() == io::ErrorKind::ConnectionRefused
                || error.kind() == io::ErrorKind::NotFound =>
        {
            fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                path: display(),
                source,
            })
        }
        Err(source) => Err(ListenerError::UnixProbe {
            path: display(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_for_accept(listener: &Listener) -> PeerStream {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(stream) = listener.accept_one().expect("accept") {
                return stream;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("no connection accepted before deadline");
    }

    #[test]
    fn tcp_listener_accepts_without_blocking() {
        let endpoint = BusEndpoint::tcp("127.0.0.1", 0);
        let listener = Listener::bind(&endpoint).expect("bind");
        assert!(listener.accept_one().expect("accept").is_none());

        let addr = listener.local_addr().expect("tcp listener address");
        let _client = TcpStream::connect(addr).expect("connect");
        let _peer = wait_for_accept(&listener);
    }

    #[cfg(unix)]
    #[test]
    fn unix_listener_reclaims_stale_socket_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("quayd.sock");
        {
            let _stale = UnixListener::bind(&path).expect("bind stale listener");
        }
        assert!(path.exists(), "stale socket should remain on disk");

        let endpoint = BusEndpoint::unix(path.to_str().expect("utf8 path"));
        let listener = Listener::bind(&endpoint).expect("bind over stale socket");
        let _client = UnixStream::connect(&path).expect("connect");
        let _peer = wait_for_accept(&listener);

        drop(listener);
        assert!(!path.exists(), "socket file should be removed on close");
    }

    #[cfg(unix)]
    #[test]
    fn unix_listener_refuses_live_socket() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("quayd.sock");
        let _existing = UnixListener::bind(&path).expect("bind existing listener");

        let endpoint = BusEndpoint::unix(path.to_str().expect("utf8 path"));
        let error = Listener::bind(&endpoint).expect_err("bind should fail");
        assert!(matches!(error, ListenerError::UnixInUse { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn unix_listener_refuses_non_socket_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("quayd.sock");
        std::fs::write(&path, b"not a socket").expect("write file");

        let endpoint = BusEndpoint::unix(path.to_str().expect("utf8 path"));
        let error = Listener::bind(&endpoint).expect_err("bind should fail");
        assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
    }
}
