//! Socket transport for the broker.
//!
//! The transport owns everything byte-shaped: binding the listening
//! endpoint, draining pending accepts, the per-peer non-blocking streams
//! with their frame buffers, and the role handshake a fresh connection
//! must complete before the broker will register it.

mod conn;
mod errors;
mod listener;

pub use self::conn::{PeerChannel, PeerStream, ReadStatus, await_hello};
pub(crate) use self::conn::HANDSHAKE_TIMEOUT;
pub use self::errors::{ListenerError, PeerError};
pub use self::listener::Listener;

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
