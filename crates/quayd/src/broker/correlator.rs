//! Call/reply correlation.
//!
//! Each caller connection gets one token for its lifetime; services echo
//! the token from a call into their reply and the table here routes that
//! reply back to the issuing connection. Entries are per-connection, not
//! per-call: a reply's token names which connection to deliver to, never
//! which outstanding invocation it answers.

use std::collections::HashMap;

use quay_wire::NO_TOKEN;

use super::connections::ConnectionId;

/// Token issuance plus the token → caller routing table.
#[derive(Debug, Default)]
pub struct Correlator {
    callers: HashMap<u32, ConnectionId>,
    last_token: u32,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next free token to a caller connection.
    ///
    /// Issuance is monotonic and wraps past `u32::MAX` back to 1, with
    /// [`NO_TOKEN`] reserved. A candidate still held by a live caller is
    /// skipped so concurrently assigned tokens never collide, even after
    /// wraparound. Returns `None` only in the pathological case where
    /// every representable token is live at once.
    pub fn assign(&mut self, caller: ConnectionId) -> Option<u32> {
        if self.callers.len() >= (u32::MAX as usize) {
            return None;
        }
        loop {
            self.last_token = match self.last_token {
                u32::MAX => 1,
                current => current + 1,
            };
            debug_assert_ne!(self.last_token, NO_TOKEN);
            if !self.callers.contains_key(&self.last_token) {
                self.callers.insert(self.last_token, caller);
                return Some(self.last_token);
            }
        }
    }

    /// Looks up the caller a reply token routes to.
    ///
    /// `None` means the caller disconnected between issuing the call and
    /// the reply arriving; an expected race, not an error.
    pub fn lookup(&self, token: u32) -> Option<ConnectionId> {
        self.callers.get(&token).copied()
    }

    /// Drops a caller's entry at disconnect time.
    pub fn remove(&mut self, token: u32) -> Option<ConnectionId> {
        self.callers.remove(&token)
    }

    pub fn len(&self) -> usize {
        self.callers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn with_last_token(last_token: u32) -> Self {
        Self {
            callers: HashMap::new(),
            last_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn tokens_are_unique_across_live_callers() {
        let mut correlator = Correlator::new();
        let mut seen = HashSet::new();
        for n in 1..=100 {
            let token = correlator
                .assign(ConnectionId::stub(n))
                .expect("token available");
            assert_ne!(token, NO_TOKEN);
            assert!(seen.insert(token), "token {token} issued twice");
        }
        assert_eq!(correlator.len(), 100);
    }

    #[test]
    fn lookup_routes_to_the_issuing_connection() {
        let mut correlator = Correlator::new();
        let a = ConnectionId::stub(1);
        let b = ConnectionId::stub(2);
        let token_a = correlator.assign(a).expect("token");
        let token_b = correlator.assign(b).expect("token");
        assert_eq!(correlator.lookup(token_a), Some(a));
        assert_eq!(correlator.lookup(token_b), Some(b));
    }

    #[test]
    fn removed_tokens_stop_resolving() {
        let mut correlator = Correlator::new();
        let caller = ConnectionId::stub(1);
        let token = correlator.assign(caller).expect("token");
        assert_eq!(correlator.remove(token), Some(caller));
        assert_eq!(correlator.lookup(token), None);
        assert_eq!(correlator.remove(token), None);
    }

    #[test]
    fn issuance_wraps_past_max_and_reserves_zero() {
        let mut correlator = Correlator::with_last_token(u32::MAX - 1);
        let near_max = correlator.assign(ConnectionId::stub(1)).expect("token");
        assert_eq!(near_max, u32::MAX);
        let wrapped = correlator.assign(ConnectionId::stub(2)).expect("token");
        assert_eq!(wrapped, 1);
    }

    #[test]
    fn wraparound_skips_tokens_still_live() {
        let mut correlator = Correlator::with_last_token(u32::MAX);
        // Tokens 1 and 2 are still held by long-lived callers.
        let one = correlator.assign(ConnectionId::stub(1)).expect("token");
        let two = correlator.assign(ConnectionId::stub(2)).expect("token");
        assert_eq!((one, two), (1, 2));

        let mut wrapped = Correlator::with_last_token(u32::MAX);
        wrapped.callers.insert(1, ConnectionId::stub(1));
        wrapped.callers.insert(2, ConnectionId::stub(2));
        let next = wrapped.assign(ConnectionId::stub(3)).expect("token");
        assert_eq!(next, 3, "live tokens must be skipped after wraparound");
    }
}
