//! Wire protocol for the quay message bus.
//!
//! Peers and the broker exchange newline-delimited JSON messages over a
//! byte stream. This crate defines the message envelope, the peer roles,
//! and the framing helpers with their size bound; it performs no I/O.

mod error;
mod frame;
mod message;

pub use error::WireError;
pub use frame::{FrameBuffer, MAX_FRAME_BYTES, decode, encode};
pub use message::{Message, NO_TOKEN, Role};
