//! The quay message bus broker.
//!
//! `quayd` routes call and reply traffic between two kinds of local
//! peers: *callers*, which invoke named methods, and *services*, which
//! register and execute them. A single-threaded reactor polls the
//! listening endpoint and every peer connection, accepts new peers after
//! a role handshake, resolves dotted method paths through a namespace
//! registry, and correlates service replies back to the issuing caller
//! via per-connection tokens.
//!
//! Routing state lives in memory only; a restart starts from an empty
//! bus. The daemon's control surface is its command line plus SIGTERM/
//! SIGINT for graceful drain.

mod bootstrap;
mod broker;
mod builtins;
mod process;
mod telemetry;
mod transport;

pub use bootstrap::{BootstrapError, bootstrap};
pub use broker::{
    Broker, BrokerState, Connection, ConnectionId, ConnectionTable, Correlator, Liveness,
    LocalHandler, MethodEntry, MethodPathError, MethodRegistry, ReactorError,
};
pub use process::{LaunchError, ShutdownError, install_shutdown_flag, run_daemon};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::{Listener, ListenerError, PeerChannel, PeerError, PeerStream, ReadStatus};
