//! Shared configuration for the quay message bus.
//!
//! The daemon's control surface is deliberately small: a listening
//! endpoint override, logging options, and the reactor poll interval, all
//! supplied on the command line and resolved against built-in defaults
//! before the event loop starts.

mod defaults;
mod logging;
mod options;
mod socket;

pub use defaults::{DEFAULT_LOG_FILTER, DEFAULT_POLL_INTERVAL, DEFAULT_TCP_PORT, default_endpoint};
pub use logging::{LogFormat, LogFormatParseError};
pub use options::{Config, DaemonOptions};
pub use socket::{BusEndpoint, EndpointParseError, EndpointPrepareError};
