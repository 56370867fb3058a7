use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use quay_wire::WireError;

/// Errors raised while binding or accepting on the listening endpoint.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Host name resolution failed.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    /// Host name resolved to no usable address.
    #[error("no addresses resolved for {host}:{port}")]
    ResolveEmpty { host: String, port: u16 },
    /// Binding the TCP listener failed.
    #[error("failed to bind tcp listener on {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// Binding the Unix listener failed.
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Inspecting an existing file at the socket path failed.
    #[error("failed to inspect socket path {path}: {source}")]
    UnixMetadata {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The socket path is occupied by something that is not a socket.
    #[error("socket path {path} exists and is not a socket")]
    UnixNotSocket { path: String },
    /// Another live daemon is already accepting on the socket path.
    #[error("socket path {path} is in use by a running daemon")]
    UnixInUse { path: String },
    /// Probing a stale socket file failed.
    #[error("failed to probe existing socket {path}: {source}")]
    UnixProbe {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Removing a stale socket file failed.
    #[error("failed to remove stale socket {path}: {source}")]
    UnixCleanup {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Switching the listener to non-blocking mode failed.
    #[error("failed to configure non-blocking listener: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
    /// Unix endpoints are not available on this platform.
    #[error("unix socket endpoint {endpoint} is not supported on this platform")]
    UnsupportedUnix { endpoint: String },
}

/// Errors raised on a single peer connection.
///
/// Every variant is connection-fatal: the broker tears the offending
/// connection down and keeps running.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Stream read or write failed.
    #[error("peer i/o failure: {0}")]
    Io(#[from] io::Error),
    /// Framing or message-size violation.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The peer stopped draining its socket and the bounded send wait
    /// expired.
    #[error("peer send stalled past the writability deadline")]
    SendTimeout,
    /// The peer closed the connection before completing the handshake.
    #[error("peer closed the connection during the role handshake")]
    HandshakeClosed,
    /// The peer sent nothing within the handshake deadline.
    #[error("role handshake timed out")]
    HandshakeTimeout,
    /// The peer's first message was not a hello.
    #[error("expected hello during handshake, got '{kind}'")]
    HandshakeUnexpected { kind: &'static str },
}
