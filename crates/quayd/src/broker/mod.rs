//! The broker core: connection registry, method registry, call/reply
//! correlator, and the single-threaded reactor that drives them.
//!
//! One logical thread of control owns every piece of routing state, so
//! no locking is needed anywhere in this module. The only suspension
//! point is the bounded readiness poll; everything else runs to
//! completion within one iteration. The shutdown flag is the single
//! asynchronous input: the signal path stores it, the loop reads it at
//! iteration boundaries.

mod connections;
mod correlator;
mod methods;

pub use connections::{Connection, ConnectionId, ConnectionTable, Liveness};
pub use correlator::Correlator;
pub use methods::{LocalHandler, MethodEntry, MethodPathError, MethodRegistry};

use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use quay_config::BusEndpoint;
use quay_wire::{Message, NO_TOKEN, Role, decode, encode};

use crate::transport::{
    HANDSHAKE_TIMEOUT, Listener, PeerChannel, PeerStream, ReadStatus, await_hello,
};

pub(crate) const BROKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::broker");

/// Lifecycle states of the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Not yet started, or finished.
    Stopped,
    /// Polling and routing traffic.
    Running,
    /// Shutdown observed; tearing down connections.
    Draining,
}

/// Fatal reactor failures; everything less severe is handled inside the
/// iteration that detected it.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The readiness poll itself failed.
    #[error("readiness poll failed: {source}")]
    Poll {
        #[source]
        source: Errno,
    },
}

/// Result of one readiness poll round.
struct Readiness {
    accept: bool,
    peers: Vec<ConnectionId>,
}

impl Readiness {
    fn idle() -> Self {
        Self {
            accept: false,
            peers: Vec::new(),
        }
    }
}

/// Outcome of one announced method withdrawal.
enum Withdrawal {
    Remove,
    NotOwner,
    Unknown,
}

/// The broker context: every piece of daemon state, owned in one place
/// and handed to the reactor.
#[derive(Debug)]
pub struct Broker {
    listener: Listener,
    connections: ConnectionTable,
    methods: MethodRegistry,
    correlator: Correlator,
    shutdown: Arc<AtomicBool>,
    poll_interval: Duration,
    state: BrokerState,
}

impl Broker {
    /// Builds a broker around a bound listener.
    ///
    /// `shutdown` is read at every iteration boundary; setting it from
    /// any thread stops the loop within one poll interval.
    pub fn new(listener: Listener, shutdown: Arc<AtomicBool>, poll_interval: Duration) -> Self {
        Self {
            listener,
            connections: ConnectionTable::new(),
            methods: MethodRegistry::new(),
            correlator: Correlator::new(),
            shutdown,
            poll_interval,
            state: BrokerState::Stopped,
        }
    }

    /// The endpoint the broker listens on.
    pub fn endpoint(&self) -> &BusEndpoint {
        self.listener.endpoint()
    }

    /// The bound TCP address, when listening on TCP (port 0 binds).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BrokerState {
        self.state
    }

    /// A handle on the shutdown flag, for the signal path and tests.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Installs a daemon-internal method before the loop starts.
    pub fn register_local(
        &mut self,
        path: &str,
        handler: LocalHandler,
    ) -> Result<(), MethodPathError> {
        self.methods.register_local(path, handler).map(|_| ())
    }

    /// Runs the reactor until a shutdown request, then drains.
    ///
    /// Consumes the broker: when this returns, every connection has been
    /// unregistered and the listening endpoint is released.
    pub fn run(mut self) -> Result<(), ReactorError> {
        self.state = BrokerState::Running;
        info!(
            target: BROKER_TARGET,
            endpoint = %self.listener.endpoint(),
            "broker running"
        );
        while !self.shutdown.load(Ordering::SeqCst) {
            let readiness = self.poll_ready()?;
            if readiness.accept {
                self.accept_peers();
            }
            for id in readiness.peers {
                self.service_connection(id);
            }
            self.sweep_closing();
        }
        self.state = BrokerState::Draining;
        info!(
            target: BROKER_TARGET,
            connections = self.connections.len(),
            "shutdown requested; draining"
        );
        self.drain();
        self.state = BrokerState::Stopped;
        info!(target: BROKER_TARGET, "broker stopped");
        Ok(())
    }

    /// One bounded poll over the listener and every live connection.
    ///
    /// A timeout or an interrupting signal yields an idle round so the
    /// loop can re-check the shutdown flag.
    fn poll_ready(&self) -> Result<Readiness, ReactorError> {
        let mut entries = Vec::with_capacity(self.connections.len());
        let mut fds = Vec::with_capacity(self.connections.len() + 1);
        fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for connection in self.connections.iter() {
            entries.push(connection.id());
            fds.push(PollFd::new(connection.channel().as_fd(), PollFlags::POLLIN));
        }

        let timeout = PollTimeout::try_from(self.poll_interval).unwrap_or(PollTimeout::MAX);
        match poll(&mut fds, timeout) {
            Ok(0) => Ok(Readiness::idle()),
            Ok(_) => {
                let accept = fds.first().is_some_and(ready);
                let peers = entries
                    .iter()
                    .zip(fds.iter().skip(1))
                    .filter(|(_, fd)| ready(fd))
                    .map(|(id, _)| *id)
                    .collect();
                Ok(Readiness { accept, peers })
            }
            Err(Errno::EINTR) => Ok(Readiness::idle()),
            Err(source) => {
                error!(target: BROKER_TARGET, error = %source, "readiness poll failed");
                Err(ReactorError::Poll { source })
            }
        }
    }

    /// Drains every pending accept on the listening endpoint.
    fn accept_peers(&mut self) {
        loop {
            match self.listener.accept_one() {
                Ok(Some(stream)) => self.admit_peer(stream),
                Ok(None) => break,
                Err(error) => {
                    warn!(
                        target: BROKER_TARGET,
                        error = %error,
                        "error accepting incoming connection"
                    );
                    break;
                }
            }
        }
    }

    /// Handshakes and registers one accepted connection.
    ///
    /// Failures here drop that one connection attempt; the loop keeps
    /// going.
    fn admit_peer(&mut self, stream: PeerStream) {
        let mut channel = PeerChannel::new(stream);
        let role = match await_hello(&mut channel, HANDSHAKE_TIMEOUT) {
            Ok(role) => role,
            Err(error) => {
                warn!(
                    target: BROKER_TARGET,
                    error = %error,
                    "rejecting connection: role handshake failed"
                );
                return;
            }
        };

        let id = self.connections.insert(channel, role);
        let token = match role {
            Role::Caller => match self.correlator.assign(id) {
                Some(token) => token,
                None => {
                    warn!(
                        target: BROKER_TARGET,
                        connection = %id,
                        "no correlation token available; dropping caller"
                    );
                    self.unregister_peer(id);
                    return;
                }
            },
            Role::Service => NO_TOKEN,
        };
        if let Some(connection) = self.connections.get_mut(id) {
            connection.set_token(token);
        }

        if self.send_message(id, &Message::hello_ack(token)) {
            info!(
                target: BROKER_TARGET,
                connection = %id,
                role = role.as_str(),
                token,
                "peer registered"
            );
        }
    }

    /// Reads a ready connection and dispatches every complete frame it
    /// has buffered.
    fn service_connection(&mut self, id: ConnectionId) {
        let status = {
            let Some(connection) = self.connections.get_mut(id) else {
                return;
            };
            match connection.channel_mut().fill() {
                Ok(status) => status,
                Err(error) => {
                    warn!(
                        target: BROKER_TARGET,
                        connection = %id,
                        error = %error,
                        "receive failed; closing connection"
                    );
                    connection.mark_closing();
                    return;
                }
            }
        };

        // The socket only polls readable again on new bytes, so every
        // frame already complete in the buffer is dispatched now.
        loop {
            let frame = {
                let Some(connection) = self.connections.get_mut(id) else {
                    return;
                };
                if !connection.is_active() {
                    break;
                }
                match connection.channel_mut().next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(error) => {
                        warn!(
                            target: BROKER_TARGET,
                            connection = %id,
                            error = %error,
                            "framing violation; closing connection"
                        );
                        connection.mark_closing();
                        break;
                    }
                }
            };
            self.dispatch_frame(id, &frame);
        }

        if status == ReadStatus::Eof
            && let Some(connection) = self.connections.get_mut(id)
        {
            debug!(target: BROKER_TARGET, connection = %id, "peer closed the stream");
            connection.mark_closing();
        }
    }

    /// Routes one inbound frame by sender role and message kind.
    fn dispatch_frame(&mut self, id: ConnectionId, frame: &[u8]) {
        let message = match decode(frame) {
            Ok(message) => message,
            Err(error) => {
                // Schema violation on a well-framed line: drop the
                // message, keep the connection.
                warn!(
                    target: BROKER_TARGET,
                    connection = %id,
                    error = %error,
                    "dropping invalid message"
                );
                return;
            }
        };
        let Some(role) = self.connections.get(id).map(Connection::role) else {
            return;
        };

        match (role, message) {
            (Role::Caller, Message::Call { token, path, payload }) => {
                self.handle_call(id, token, &path, &payload, frame);
            }
            (Role::Service, Message::Reply { token, .. }) => {
                self.relay_reply(id, token, frame);
            }
            (Role::Service, Message::ServiceRegister { paths }) => {
                self.install_service_methods(id, &paths);
            }
            (Role::Service, Message::ServiceUnregister { paths }) => {
                self.withdraw_service_methods(id, &paths);
            }
            (_, other) => {
                warn!(
                    target: BROKER_TARGET,
                    connection = %id,
                    role = role.as_str(),
                    kind = other.kind(),
                    "message kind not valid for this peer; dropping"
                );
            }
        }
    }

    /// Resolves and executes or forwards a caller's method call.
    fn handle_call(
        &mut self,
        id: ConnectionId,
        token: u32,
        path: &str,
        payload: &Value,
        frame: &[u8],
    ) {
        match self.methods.resolve(path).cloned() {
            None => {
                debug!(target: BROKER_TARGET, connection = %id, path, "no such method");
                self.send_message(id, &Message::error_reply(token, format!("no such method: {path}")));
            }
            Some(MethodEntry::Local(handler)) => {
                let reply = match handler(&self.methods, payload) {
                    Ok(result) => Message::reply(token, result),
                    Err(error) => Message::error_reply(token, error),
                };
                self.send_message(id, &reply);
            }
            Some(MethodEntry::Remote { owner }) => {
                debug!(
                    target: BROKER_TARGET,
                    connection = %id,
                    path,
                    owner = %owner,
                    token,
                    "forwarding call"
                );
                if !self.forward_frame(owner, frame) {
                    warn!(
                        target: BROKER_TARGET,
                        path,
                        owner = %owner,
                        "failed to forward call to owning service"
                    );
                }
            }
        }
    }

    /// Routes a service's reply back to the caller its token names.
    fn relay_reply(&mut self, id: ConnectionId, token: u32, frame: &[u8]) {
        match self.correlator.lookup(token) {
            Some(caller) => {
                self.forward_frame(caller, frame);
            }
            None => {
                // The caller raced a disconnect; expected, not an error.
                debug!(
                    target: BROKER_TARGET,
                    connection = %id,
                    token,
                    "caller gone; discarding reply"
                );
            }
        }
    }

    /// Installs the methods a service announced.
    fn install_service_methods(&mut self, id: ConnectionId, paths: &[String]) {
        for path in paths {
            match self.methods.register_remote(path, id) {
                Ok(Some(MethodEntry::Remote { owner })) if owner != id => {
                    info!(
                        target: BROKER_TARGET,
                        path,
                        from = %owner,
                        to = %id,
                        "method ownership transferred"
                    );
                }
                Ok(_) => {
                    debug!(target: BROKER_TARGET, connection = %id, path, "method registered");
                }
                Err(error) => {
                    warn!(
                        target: BROKER_TARGET,
                        connection = %id,
                        error = %error,
                        "ignoring invalid method path"
                    );
                }
            }
        }
    }

    /// Removes the methods a service withdrew; only the owner may
    /// withdraw an entry.
    fn withdraw_service_methods(&mut self, id: ConnectionId, paths: &[String]) {
        for path in paths {
            let decision = match self.methods.resolve(path) {
                Some(MethodEntry::Remote { owner }) if *owner == id => Withdrawal::Remove,
                Some(_) => Withdrawal::NotOwner,
                None => Withdrawal::Unknown,
            };
            match decision {
                Withdrawal::Remove => {
                    self.methods.unregister(path);
                    debug!(target: BROKER_TARGET, connection = %id, path, "method withdrawn");
                }
                Withdrawal::NotOwner => {
                    warn!(
                        target: BROKER_TARGET,
                        connection = %id,
                        path,
                        "peer does not own this method; ignoring withdrawal"
                    );
                }
                Withdrawal::Unknown => {
                    debug!(
                        target: BROKER_TARGET,
                        connection = %id,
                        path,
                        "withdrawal of unknown method; ignoring"
                    );
                }
            }
        }
    }

    /// Relays a raw inbound frame (sans delimiter) to another peer.
    fn forward_frame(&mut self, target: ConnectionId, frame: &[u8]) -> bool {
        let mut line = Vec::with_capacity(frame.len() + 1);
        line.extend_from_slice(frame);
        line.push(b'\n');
        self.send_bytes(target, &line)
    }

    /// Serializes and sends a broker-originated message.
    fn send_message(&mut self, id: ConnectionId, message: &Message) -> bool {
        match encode(message) {
            Ok(frame) => self.send_bytes(id, &frame),
            Err(error) => {
                error!(
                    target: BROKER_TARGET,
                    error = %error,
                    "failed to serialize outbound message"
                );
                false
            }
        }
    }

    /// Sends raw bytes; a failed send marks the target for teardown.
    fn send_bytes(&mut self, id: ConnectionId, bytes: &[u8]) -> bool {
        let Some(connection) = self.connections.get_mut(id) else {
            return false;
        };
        match connection.channel_mut().send_bytes(bytes) {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    target: BROKER_TARGET,
                    connection = %id,
                    error = %error,
                    "send failed; closing connection"
                );
                connection.mark_closing();
                false
            }
        }
    }

    /// Unregisters every connection marked `Closing` this round.
    fn sweep_closing(&mut self) {
        for id in self.connections.closing_ids() {
            self.unregister_peer(id);
        }
    }

    /// Removes one connection and every registry entry that references
    /// it, then releases the stream. Idempotent.
    fn unregister_peer(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.remove(id) else {
            return;
        };
        if connection.token() != NO_TOKEN {
            self.correlator.remove(connection.token());
        }
        if connection.role() == Role::Service {
            let removed = self.methods.unregister_owned_by(id);
            if removed > 0 {
                debug!(
                    target: BROKER_TARGET,
                    connection = %id,
                    methods = removed,
                    "withdrew methods of departed service"
                );
            }
        }
        info!(
            target: BROKER_TARGET,
            connection = %id,
            role = connection.role().as_str(),
            "peer unregistered"
        );
        // `connection` drops here, releasing the stream only after the
        // registries no longer reference it.
    }

    /// Closes every live connection during shutdown.
    fn drain(&mut self) {
        for id in self.connections.ids() {
            self.unregister_peer(id);
        }
    }
}

fn ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|revents| {
        revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn test_broker() -> Broker {
        let listener =
            Listener::bind(&BusEndpoint::tcp("127.0.0.1", 0)).expect("bind test listener");
        Broker::new(
            listener,
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(25),
        )
    }

    #[test]
    fn starts_in_stopped_state() {
        let broker = test_broker();
        assert_eq!(broker.state(), BrokerState::Stopped);
        assert!(broker.local_addr().is_some());
    }

    #[test]
    fn local_methods_install_before_the_loop() {
        let mut broker = test_broker();
        broker
            .register_local("quay.ping", Arc::new(|_, payload| Ok(payload.clone())))
            .expect("register builtin");
        assert!(broker.methods.resolve("quay.ping").is_some());
    }

    #[test]
    fn run_returns_promptly_once_shutdown_is_set() {
        let broker = test_broker();
        let flag = broker.shutdown_flag();
        flag.store(true, Ordering::SeqCst);
        broker.run().expect("run should exit cleanly");
    }
}
