//! Session <-> channel bookkeeping and read-side demultiplexing.
//!
//! Every map named in the data model lives behind a single mutex. A finer-grained scheme
//! (per-channel, per-session locks) would cut contention under heavy fan-out, but the loop
//! thread only ever touches this state at channel setup/teardown and workers touch it once per
//! I/O event, so a single short critical section is simpler and, for the traffic this service
//! is built for, not the bottleneck.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Instant,
};

use mio::Token;
use tracing::{debug, trace, warn};

use crate::{
    package::{Action, NetPackage, PackageStatus},
    session::{NetSession, SessionKey},
};

#[derive(Default)]
struct RegistryState {
    channels: HashMap<SessionKey, Token>,
    sessions_by_channel: HashMap<Token, HashSet<SessionKey>>,
    output_queue: HashMap<Token, VecDeque<NetPackage>>,
    last_write: HashMap<Token, Instant>,
    addresses: HashMap<SessionKey, SocketAddr>,
    sessions_by_address: HashMap<(Token, SocketAddr), SessionKey>,
    port_multi_session: HashMap<u16, bool>,
    sessions: HashMap<SessionKey, Arc<NetSession>>,
}

/// Outcome of demultiplexing a read: which session the bytes belong to, plus whether the
/// channel the bytes arrived on needs to be swapped in for an older one (reconnect).
pub struct Demuxed {
    pub session: Arc<NetSession>,
    pub migrated_from: Option<Token>,
}

/// The session/channel registry described in the data model.
#[derive(Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `port` accepts more than one session per channel.
    pub fn set_multi_session(&self, port: u16, multi_session: bool) {
        self.lock().port_multi_session.insert(port, multi_session);
    }

    fn is_multi_session(state: &RegistryState, port: u16) -> bool {
        state.port_multi_session.get(&port).copied().unwrap_or(false)
    }

    /// Prepares bookkeeping for a freshly accepted/connected channel.
    pub fn register_channel(&self, token: Token) {
        let mut state = self.lock();
        state.output_queue.entry(token).or_default();
        state.last_write.insert(token, Instant::now());
        state.sessions_by_channel.entry(token).or_default();
    }

    /// Binds `session` to `token`, recording channel migration if it was previously bound
    /// elsewhere. Returns the old token when a migration occurred.
    fn attach(&self, state: &mut RegistryState, token: Token, session: Arc<NetSession>) -> Option<Token> {
        let key = session.key();
        state.sessions.entry(key).or_insert_with(|| session.clone());
        let previous = state.channels.insert(key, token);
        state.sessions_by_channel.entry(token).or_default().insert(key);

        match previous {
            Some(old) if old != token => {
                if let Some(set) = state.sessions_by_channel.get_mut(&old) {
                    set.remove(&key);
                }
                self.migrate_locked(state, old, token);
                Some(old)
            }
            _ => None,
        }
    }

    /// Moves `outputQueue`/`lastWrite` from `old` to `new` and clears `old`'s entries, per the
    /// migration invariant in §4.3.
    fn migrate_locked(&self, state: &mut RegistryState, old: Token, new: Token) {
        if let Some(queue) = state.output_queue.remove(&old) {
            state.output_queue.entry(new).or_default().extend(queue);
        }
        if let Some(last) = state.last_write.remove(&old) {
            state.last_write.insert(new, last);
        }
        debug!(?old, ?new, "migrated channel state on session reconnect");
    }

    /// TCP demultiplexing: reuse the channel's singleton session unless the port is
    /// multi-session, in which case fall back to `create_session`.
    pub fn demux_tcp(
        &self,
        token: Token,
        local_port: u16,
        remote: SocketAddr,
        create: impl FnOnce() -> Option<Arc<NetSession>>,
    ) -> Option<Demuxed> {
        let mut state = self.lock();
        let multi = Self::is_multi_session(&state, local_port);

        let existing = (!multi)
            .then(|| state.sessions_by_channel.get(&token))
            .flatten()
            .and_then(|set| set.iter().next().copied())
            .and_then(|key| state.sessions.get(&key).cloned());

        let session = match existing {
            Some(s) => s,
            None => {
                drop(state);
                let session = create()?;
                state = self.lock();
                session
            }
        };

        let migrated_from = self.attach(&mut state, token, session.clone());
        state.addresses.insert(session.key(), remote);
        trace!(session = %session.key(), ?token, "tcp session demultiplexed");
        Some(Demuxed { session, migrated_from })
    }

    /// UDP demultiplexing: sessions are keyed by peer address on a given socket.
    pub fn demux_udp(
        &self,
        token: Token,
        local_port: u16,
        peer: SocketAddr,
        create: impl FnOnce() -> Option<Arc<NetSession>>,
    ) -> Option<Demuxed> {
        let mut state = self.lock();
        let existing = state.sessions_by_address.get(&(token, peer)).copied().and_then(|key| state.sessions.get(&key).cloned());

        let session = match existing {
            Some(s) => s,
            None => {
                drop(state);
                let session = create()?;
                state = self.lock();
                session
            }
        };

        state.sessions_by_address.insert((token, peer), session.key());
        state.addresses.insert(session.key(), peer);
        let migrated_from = self.attach(&mut state, token, session.clone());
        trace!(session = %session.key(), ?token, %peer, "udp session demultiplexed");
        Some(Demuxed { session, migrated_from })
    }

    /// Looks up the address a UDP session last sent from, verifying it still owns that
    /// address (guards against stale writes after rebind, §4.4 step 3).
    pub fn udp_address_for(&self, token: Token, session: SessionKey) -> Option<SocketAddr> {
        let state = self.lock();
        let addr = *state.addresses.get(&session)?;
        let owner = state.sessions_by_address.get(&(token, addr))?;
        (*owner == session).then_some(addr)
    }

    /// The channel currently backing `session`, if any.
    pub fn channel_for(&self, session: SessionKey) -> Option<Token> {
        self.lock().channels.get(&session).copied()
    }

    /// Every session currently bound to `token`.
    pub fn sessions_on_channel(&self, token: Token) -> Vec<Arc<NetSession>> {
        let state = self.lock();
        state
            .sessions_by_channel
            .get(&token)
            .into_iter()
            .flatten()
            .filter_map(|key| state.sessions.get(key).cloned())
            .collect()
    }

    /// Tears down every map entry for `token` (idempotent). Returns the sessions that were on
    /// it, so the caller can invoke `destroy_session` if configured to.
    pub fn destroy_channel(&self, token: Token) -> Vec<Arc<NetSession>> {
        let mut state = self.lock();
        let Some(keys) = state.sessions_by_channel.remove(&token) else {
            return Vec::new();
        };
        state.output_queue.remove(&token);
        state.last_write.remove(&token);
        state.sessions_by_address.retain(|(t, _), _| *t != token);

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            state.channels.remove(&key);
            state.addresses.remove(&key);
            if let Some(session) = state.sessions.get(&key).cloned() {
                removed.push(session);
            }
        }
        if !removed.is_empty() {
            debug!(?token, count = removed.len(), "channel destroyed");
        }
        removed
    }

    /// Fully forgets a session (used when `net.disconnect.and.remove` is set).
    pub fn forget_session(&self, key: SessionKey) {
        self.lock().sessions.remove(&key);
    }

    /// Appends `package` to the channel's outbound FIFO.
    pub fn enqueue_write(&self, token: Token, package: NetPackage) {
        self.lock().output_queue.entry(token).or_default().push_back(package);
    }

    /// Drains up to `max` packages, or fewer if a DISCONNECT is encountered (it is left as the
    /// last item returned and the rest of the queue is preserved for the next flush).
    pub fn drain_writes(&self, token: Token, max: usize) -> Vec<NetPackage> {
        let mut state = self.lock();
        state.last_write.insert(token, Instant::now());
        let Some(queue) = state.output_queue.get_mut(&token) else {
            return Vec::new();
        };
        let mut drained = Vec::with_capacity(max.min(queue.len()));
        while drained.len() < max {
            match queue.pop_front() {
                Some(pkg) => {
                    let is_disconnect = pkg.action() == Action::Disconnect;
                    drained.push(pkg);
                    if is_disconnect {
                        break;
                    }
                }
                None => break,
            }
        }
        drained
    }

    /// The last known remote address for `session`, if any was recorded.
    pub fn address_of(&self, session: SessionKey) -> Option<SocketAddr> {
        self.lock().addresses.get(&session).copied()
    }

    /// Whether `token`'s outbound FIFO still has packages waiting.
    pub fn has_pending_writes(&self, token: Token) -> bool {
        self.lock().output_queue.get(&token).is_some_and(|q| !q.is_empty())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poison| {
            warn!("registry mutex poisoned, recovering");
            poison.into_inner()
        })
    }
}

/// Marks `package` rejected because its session is mid-stream, per §4.4 step 3.
pub(crate) fn reject_for_lock(package: &mut NetPackage) {
    package.set_status(PackageStatus::RejectedSessionLock);
}

#[cfg(test)]
mod test {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::consumer::ConsumerHandle;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    struct Mute;

    impl crate::consumer::Consumer for Mute {
        fn create_session(&self, _: &crate::service::NetService, _: SocketAddr, _: u16) -> Option<Arc<NetSession>> {
            None
        }
        fn on_read(&self, _: &crate::service::NetService, _: SessionKey, _: NetPackage) {}
        fn on_write(&self, _: &crate::service::NetService, _: SessionKey, _: NetPackage) {}
        fn destroy_session(&self, _: &crate::service::NetService, _: SessionKey) {}
    }

    fn session() -> Arc<NetSession> {
        Arc::new(NetSession::new(ConsumerHandle::new(Arc::new(Mute))))
    }

    #[test]
    fn destroy_channel_is_idempotent() {
        let registry = Registry::new();
        let token = Token(1);
        registry.register_channel(token);
        let session = session();
        registry.demux_tcp(token, 80, addr(1), || Some(session.clone()));

        let first = registry.destroy_channel(token);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].key(), session.key());

        let second = registry.destroy_channel(token);
        assert!(second.is_empty(), "tearing down an already-dead channel should be a no-op");
    }

    #[test]
    fn migration_carries_the_output_queue_to_the_new_token() {
        let registry = Registry::new();
        let old = Token(1);
        let new = Token(2);
        registry.register_channel(old);
        registry.register_channel(new);

        let session = session();
        registry.demux_tcp(old, 80, addr(1), || Some(session.clone()));
        registry.enqueue_write(old, NetPackage::new(addr(1).ip(), 1, 80, b"queued".to_vec(), Action::Write));

        let demuxed = registry.demux_tcp(new, 80, addr(2), || Some(session.clone())).expect("reconnect demux");
        assert_eq!(demuxed.migrated_from, Some(old));

        assert!(!registry.has_pending_writes(old));
        assert!(registry.has_pending_writes(new));
        let drained = registry.drain_writes(new, 10);
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn udp_address_for_refuses_a_session_whose_peer_has_rebound() {
        let registry = Registry::new();
        let token = Token(1);
        registry.register_channel(token);

        let a = session();
        let b = session();
        registry.demux_udp(token, 80, addr(1), || Some(a.clone()));
        assert_eq!(registry.udp_address_for(token, a.key()), Some(addr(1)));

        // a different session claims the same peer address (NAT rebind)
        registry.demux_udp(token, 80, addr(1), || Some(b.clone()));
        assert_eq!(registry.udp_address_for(token, a.key()), None, "stale owner must not be handed the address anymore");
        assert_eq!(registry.udp_address_for(token, b.key()), Some(addr(1)));
    }

    #[test]
    fn drain_writes_stops_at_a_disconnect_and_preserves_the_rest() {
        let registry = Registry::new();
        let token = Token(1);
        registry.register_channel(token);
        registry.enqueue_write(token, NetPackage::new(addr(1).ip(), 1, 80, b"a".to_vec(), Action::Write));
        registry.enqueue_write(token, NetPackage::new(addr(1).ip(), 1, 80, Vec::new(), Action::Disconnect));
        registry.enqueue_write(token, NetPackage::new(addr(1).ip(), 1, 80, b"b".to_vec(), Action::Write));

        let drained = registry.drain_writes(token, 10);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].action(), Action::Disconnect);
        assert!(registry.has_pending_writes(token), "the package after the disconnect stays queued");
    }
}
