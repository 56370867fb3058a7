//! Registry of live peer connections.
//!
//! Connections are held in an owned map keyed by a monotonically
//! increasing id, so enumeration order is registration order and removal
//! is by key rather than pointer surgery.

use std::collections::BTreeMap;
use std::fmt;

use quay_wire::{NO_TOKEN, Role};

use crate::transport::PeerChannel;

/// Unique identifier of a peer connection; never reused within a
/// process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

#[cfg(test)]
impl ConnectionId {
    /// Mints an arbitrary id for registry tests that have no live table.
    pub(crate) fn stub(value: u64) -> Self {
        Self(value)
    }
}

/// Liveness of a connection within the current reactor iteration.
///
/// `Closing` marks a connection whose transport failed mid-round; the
/// reactor sweeps and unregisters it at the iteration boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Closing,
}

/// One registered peer connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    role: Role,
    token: u32,
    liveness: Liveness,
    channel: PeerChannel,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The correlation token for callers, [`NO_TOKEN`] for services.
    pub fn token(&self) -> u32 {
        self.token
    }

    pub(crate) fn set_token(&mut self, token: u32) {
        self.token = token;
    }

    pub fn is_active(&self) -> bool {
        self.liveness == Liveness::Active
    }

    /// Marks the connection for teardown at the iteration boundary.
    pub fn mark_closing(&mut self) {
        self.liveness = Liveness::Closing;
    }

    pub fn channel(&self) -> &PeerChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut PeerChannel {
        &mut self.channel
    }
}

/// Owned table of live connections.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: BTreeMap<ConnectionId, Connection>,
    next_id: u64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under a fresh id; callers start without a
    /// token until the correlator assigns one.
    pub fn insert(&mut self, channel: PeerChannel, role: Role) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        self.connections.insert(
            id,
            Connection {
                id,
                role,
                token: NO_TOKEN,
                liveness: Liveness::Active,
                channel,
            },
        );
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Removes a connection; `None` when it was already removed, making
    /// repeated unregistration a no-op.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Snapshot of live ids in registration order (oldest first).
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Ids of connections marked `Closing` during the current round.
    pub fn closing_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|connection| !connection.is_active())
            .map(Connection::id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
