//! Consumer-facing traits.

use std::{fmt, net::SocketAddr, sync::Arc};

use crate::{
    package::NetPackage,
    service::NetService,
    session::{NetSession, SessionKey},
};

/// Transport a listener/connector is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Per-socket options a consumer can request at accept/connect time.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// `TCP_NODELAY`; ignored for UDP sockets.
    pub nodelay: bool,
    /// `IP_TTL`/`IP_MULTICAST_TTL` equivalent; `None` leaves the platform default in place.
    pub ttl: Option<u32>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self { nodelay: true, ttl: None }
    }
}

/// Whether a registered socket accepts inbound channels or originates outbound ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Callbacks invoked by the multiplexer as channel/session lifecycle events occur.
///
/// Every method is called from a worker thread (never the loop thread), and may block; the
/// multiplexer guarantees in-order, non-overlapping delivery per `(session, direction)` pair
/// but does not serialize across sessions.
pub trait Consumer: Send + Sync {
    /// Transport this consumer's channels are registered on. Defaults to TCP.
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    /// Socket options to apply to each accepted/connected channel before it is registered for
    /// READ. Defaults to [`SocketOptions::default`].
    fn socket_options(&self) -> SocketOptions {
        SocketOptions::default()
    }

    /// A new channel came up; decide which session it belongs to, creating one if needed.
    /// Returning `None` means "tear the channel down".
    fn create_session(
        &self,
        service: &NetService,
        remote: SocketAddr,
        local_port: u16,
    ) -> Option<Arc<NetSession>>;

    /// A channel finished connecting (clients only; servers see their first event via
    /// `on_read`).
    fn on_connect(&self, service: &NetService, session: SessionKey, package: NetPackage) {
        let _ = (service, session, package);
    }

    /// Data was demultiplexed to `session`.
    fn on_read(&self, service: &NetService, session: SessionKey, package: NetPackage);

    /// A write to `session` completed or failed (`package.status()` reports which).
    fn on_write(&self, service: &NetService, session: SessionKey, package: NetPackage);

    /// The channel carrying `session` is going away; `package` carries any farewell bytes.
    fn on_disconnect(&self, service: &NetService, session: SessionKey, package: NetPackage) {
        let _ = (service, session, package);
    }

    /// `session`'s channel went away; called at most once per session, and only when
    /// `net.disconnect.and.remove` is set.
    fn destroy_session(&self, service: &NetService, session: SessionKey);
}

/// Type-erased handle to whichever consumer owns a session or listening socket.
#[derive(Clone)]
pub struct ConsumerHandle(pub(crate) Arc<dyn Consumer>);

impl ConsumerHandle {
    pub fn new(consumer: Arc<dyn Consumer>) -> Self {
        Self(consumer)
    }
}

impl std::ops::Deref for ConsumerHandle {
    type Target = dyn Consumer;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConsumerHandle(..)")
    }
}
