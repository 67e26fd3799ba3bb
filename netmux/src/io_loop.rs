//! The single-threaded multiplexer.
//!
//! Registration, accept, and connect all run on this thread. Readiness for READ/WRITE is
//! handed off to [`crate::worker::WorkerPool`]; the loop thread never touches application code.
//! Each channel carries its own clone of the `mio::Registry`, so workers can reregister
//! interest or deregister a closing socket without routing back through this thread — the only
//! thing only this thread does is `Poll::poll` itself and slab bookkeeping.

use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use mio::{
    net::{TcpListener, TcpStream, UdpSocket},
    Events, Interest, Poll, Registry as MioRegistry, Token, Waker,
};
use slab::Slab;
use tracing::{error, info, trace, warn};

use crate::{
    config::NetConfig,
    consumer::{ConsumerHandle, Role, SocketOptions},
    error::{NetError, NetResult},
    registry::Registry,
    service::NetService,
};

pub(crate) const WAKE_TOKEN: Token = Token(usize::MAX);

/// Applies a consumer's requested socket options to a freshly accepted/connected TCP stream.
/// Failures are logged, not propagated: an unsupported option shouldn't tear down the channel.
fn apply_socket_options(socket: &TcpStream, options: &SocketOptions) {
    if let Err(err) = socket.set_nodelay(options.nodelay) {
        warn!(%err, "failed to set TCP_NODELAY");
    }
    if let Some(ttl) = options.ttl {
        if let Err(err) = socket.set_ttl(ttl) {
            warn!(%err, "failed to set socket TTL");
        }
    }
}

/// The transport backing a registered channel.
pub enum Transport {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// Everything the loop and the worker pools need to know about one registered channel.
pub struct ChannelState {
    pub token: Token,
    pub local_port: u16,
    pub transport: Transport,
    pub role: Role,
    pub consumer: ConsumerHandle,
    pub multi_session: bool,
    pub creation_deadline: Option<Instant>,
    pub has_session: bool,
    pub closed: bool,
    registry: MioRegistry,
}

pub type SharedChannel = Arc<Mutex<ChannelState>>;

impl ChannelState {
    /// Flips this channel's registered interest. Safe to call from any thread.
    pub(crate) fn reregister(&mut self, readable: bool, writable: bool) {
        if self.closed {
            return;
        }
        let interest = match (readable, writable) {
            (true, true) => Interest::READABLE.add(Interest::WRITABLE),
            (false, true) => Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        let result = match &mut self.transport {
            Transport::Tcp(stream) => self.registry.reregister(stream, self.token, interest),
            Transport::Udp(socket) => self.registry.reregister(socket, self.token, interest),
        };
        if let Err(err) = result {
            warn!(%err, token = ?self.token, "reregister failed");
        }
    }

    /// Deregisters the socket, idempotently. The slab entry itself is reaped lazily by the
    /// loop thread the next time it observes this token.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = match &mut self.transport {
            Transport::Tcp(stream) => self.registry.deregister(stream),
            Transport::Udp(socket) => self.registry.deregister(socket),
        };
    }
}

struct Listener {
    socket: TcpListener,
    local_port: u16,
    multi_session: bool,
    consumer: ConsumerHandle,
}

type ChannelTable = Arc<Mutex<Slab<SharedChannel>>>;
type PendingConnects = Arc<Mutex<Vec<(SocketAddr, u16, ConsumerHandle)>>>;

/// Owns the `mio::Poll` instance and the accept-side listener table. The channel slab and the
/// pending-connect queue are `Arc`-shared so [`NetService`] can still reach them (to look up a
/// channel, or queue an outbound connect) once this struct itself has been moved onto its own
/// thread by [`IoLoop::run`].
pub struct IoLoop {
    poll: Poll,
    channels: ChannelTable,
    listeners: HashMap<Token, Listener>,
    registry: Arc<Registry>,
    config: NetConfig,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    pending: PendingConnects,
}

impl IoLoop {
    pub fn new(config: NetConfig, registry: Arc<Registry>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            channels: Arc::new(Mutex::new(Slab::with_capacity(1024))),
            listeners: HashMap::new(),
            registry,
            config,
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// A handle usable from any thread to look up channels and queue outbound connects, even
    /// after this `IoLoop` has been moved into its own thread by `run`.
    pub fn handle(&self) -> IoLoopHandle {
        IoLoopHandle { channels: self.channels.clone(), pending: self.pending.clone(), waker: self.waker.clone() }
    }

    /// Binds a listening TCP socket and registers it for ACCEPT, per the server role in §6.
    pub fn bind_server(&mut self, addr: SocketAddr, multi_session: bool, consumer: ConsumerHandle) -> NetResult<u16> {
        let mut socket = TcpListener::bind(addr).map_err(|e| NetError::Registration(e.to_string()))?;
        let local_port = socket.local_addr().map(|a| a.port()).unwrap_or(addr.port());
        let mut channels = self.channels.lock().expect("channel table poisoned");
        let entry = channels.vacant_entry();
        let token = Token(entry.key());
        self.poll
            .registry()
            .register(&mut socket, token, Interest::READABLE)
            .map_err(|e| NetError::Registration(e.to_string()))?;
        drop(channels);
        self.listeners.insert(token, Listener { socket, local_port, multi_session, consumer });
        self.registry.set_multi_session(local_port, multi_session);
        info!(%addr, local_port, "server socket bound");
        Ok(local_port)
    }

    /// Binds a UDP socket, which behaves as both listener and channel simultaneously.
    pub fn bind_udp(&mut self, addr: SocketAddr, multi_session: bool, consumer: ConsumerHandle) -> NetResult<(Token, u16)> {
        let mut socket = UdpSocket::bind(addr).map_err(|e| NetError::Registration(e.to_string()))?;
        let local_port = socket.local_addr().map(|a| a.port()).unwrap_or(addr.port());
        let mio_registry = self.poll.registry().try_clone().map_err(|e| NetError::Registration(e.to_string()))?;
        let mut channels = self.channels.lock().expect("channel table poisoned");
        let entry = channels.vacant_entry();
        let token = Token(entry.key());
        self.poll
            .registry()
            .register(&mut socket, token, Interest::READABLE)
            .map_err(|e| NetError::Registration(e.to_string()))?;
        entry.insert(Arc::new(Mutex::new(ChannelState {
            token,
            local_port,
            transport: Transport::Udp(socket),
            role: Role::Server,
            consumer,
            multi_session,
            creation_deadline: None,
            has_session: true,
            closed: false,
            registry: mio_registry,
        })));
        drop(channels);
        self.registry.set_multi_session(local_port, multi_session);
        self.registry.register_channel(token);
        info!(%addr, local_port, "udp socket bound");
        Ok((token, local_port))
    }

    fn drain_pending_connects(&mut self) {
        let pending = std::mem::take(&mut *self.pending.lock().expect("io_loop pending mutex poisoned"));
        for (remote, local_port, consumer) in pending {
            if let Err(err) = self.start_connect(remote, local_port, consumer) {
                warn!(%remote, %err, "outbound connect failed");
            }
        }
    }

    fn start_connect(&mut self, remote: SocketAddr, local_port: u16, consumer: ConsumerHandle) -> io::Result<()> {
        let mut socket = TcpStream::connect(remote)?;
        apply_socket_options(&socket, &consumer.socket_options());
        let mio_registry = self.poll.registry().try_clone()?;
        let mut channels = self.channels.lock().expect("channel table poisoned");
        let entry = channels.vacant_entry();
        let token = Token(entry.key());
        self.poll.registry().register(&mut socket, token, Interest::WRITABLE)?;
        entry.insert(Arc::new(Mutex::new(ChannelState {
            token,
            local_port,
            transport: Transport::Tcp(socket),
            role: Role::Client,
            consumer,
            multi_session: false,
            creation_deadline: None,
            has_session: false,
            closed: false,
            registry: mio_registry,
        })));
        drop(channels);
        self.registry.register_channel(token);
        Ok(())
    }

    /// Runs until `shutdown()` is observed. `dispatch` receives the ready token and whether the
    /// readiness was for the read or the write direction.
    pub fn run(mut self, service: NetService, mut dispatch: impl FnMut(&NetService, Token, bool)) {
        let mut events = Events::with_capacity(1024);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                self.run_shutdown_sequence(&service);
                return;
            }

            if let Err(err) = self.poll.poll(&mut events, Some(Duration::from_millis(250))) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(%err, "poll failed");
                return;
            }

            self.reap_closed();
            self.drain_pending_connects();
            self.expire_handshake_timeouts(&service);

            for event in events.iter() {
                let token = event.token();
                if token == WAKE_TOKEN {
                    continue;
                }
                if let Some(listener) = self.listeners.get(&token) {
                    self.accept_all(token, listener.local_port, listener.multi_session, listener.consumer.clone());
                    continue;
                }
                let Some(channel) = self.channels.lock().expect("channel table poisoned").get(token.0).cloned() else { continue };
                if channel.lock().expect("channel mutex poisoned").closed {
                    continue;
                }
                if event.is_writable() && self.finish_connect_if_pending(&service, token) {
                    continue;
                }
                if event.is_readable() || event.is_writable() {
                    dispatch(&service, token, event.is_readable());
                }
            }
        }
    }

    fn reap_closed(&mut self) {
        let mut channels = self.channels.lock().expect("channel table poisoned");
        let dead: Vec<usize> = channels
            .iter()
            .filter(|(_, c)| c.lock().expect("channel mutex poisoned").closed)
            .map(|(k, _)| k)
            .collect();
        for key in dead {
            channels.try_remove(key);
        }
    }

    fn accept_all(&mut self, listener_token: Token, local_port: u16, multi_session: bool, consumer: ConsumerHandle) {
        loop {
            let accepted = {
                let Some(listener) = self.listeners.get_mut(&listener_token) else { return };
                listener.socket.accept()
            };
            let (mut socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) => {
                    warn!(%err, "accept failed");
                    return;
                }
            };
            apply_socket_options(&socket, &consumer.socket_options());

            let mio_registry = match self.poll.registry().try_clone() {
                Ok(r) => r,
                Err(err) => {
                    warn!(%err, "failed to clone registry for accepted socket");
                    continue;
                }
            };
            let mut channels = self.channels.lock().expect("channel table poisoned");
            let entry = channels.vacant_entry();
            let token = Token(entry.key());
            if let Err(err) = self.poll.registry().register(&mut socket, token, Interest::READABLE) {
                warn!(%err, "failed to register accepted socket");
                continue;
            }
            let deadline = self.config.connection_timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
            entry.insert(Arc::new(Mutex::new(ChannelState {
                token,
                local_port,
                transport: Transport::Tcp(socket),
                role: Role::Server,
                consumer: consumer.clone(),
                multi_session,
                creation_deadline: deadline,
                has_session: false,
                closed: false,
                registry: mio_registry,
            })));
            drop(channels);
            self.registry.register_channel(token);
            trace!(%peer, ?token, "accepted channel");
        }
    }

    fn finish_connect_if_pending(&mut self, service: &NetService, token: Token) -> bool {
        let Some(channel) = self.channels.lock().expect("channel table poisoned").get(token.0).cloned() else { return false };
        let mut guard = channel.lock().expect("channel mutex poisoned");
        if guard.has_session || guard.closed {
            return false;
        }
        let Transport::Tcp(stream) = &guard.transport else { return false };
        let error = stream.take_error();
        match error {
            Ok(None) => {}
            Ok(Some(err)) | Err(err) => {
                warn!(%err, ?token, "connect failed");
                guard.close();
                drop(guard);
                service.finish_channel_teardown(token);
                return true;
            }
        }
        guard.has_session = true;
        guard.reregister(true, false);
        drop(guard);
        service.on_channel_connected(token);
        true
    }

    fn expire_handshake_timeouts(&mut self, service: &NetService) {
        let now = Instant::now();
        let channels = self.channels.lock().expect("channel table poisoned");
        let expired: Vec<Token> = channels
            .iter()
            .filter_map(|(key, channel)| {
                let guard = channel.lock().expect("channel mutex poisoned");
                let expired = !guard.closed && !guard.has_session && guard.creation_deadline.is_some_and(|d| now >= d);
                expired.then_some(Token(key))
            })
            .collect();
        drop(channels);
        for token in expired {
            warn!(?token, "handshake timeout, destroying channel");
            if let Some(channel) = self.channels.lock().expect("channel table poisoned").get(token.0).cloned() {
                crate::pipeline::destroy_with_disconnect(service, token, &channel, Vec::new());
            }
        }
    }

    fn run_shutdown_sequence(&mut self, service: &NetService) {
        info!("multiplexer shutting down");
        let channels: Vec<(Token, SharedChannel)> = {
            let table = self.channels.lock().expect("channel table poisoned");
            table.iter().map(|(k, c)| (Token(k), c.clone())).collect()
        };
        for (token, channel) in channels {
            crate::pipeline::destroy_with_disconnect(service, token, &channel, Vec::new());
        }
        self.channels.lock().expect("channel table poisoned").clear();
        self.listeners.clear();
    }
}

/// Cross-thread handle for looking up channels and queuing outbound connects.
#[derive(Clone)]
pub struct IoLoopHandle {
    channels: ChannelTable,
    pending: PendingConnects,
    waker: Arc<Waker>,
}

impl IoLoopHandle {
    pub fn channel(&self, token: Token) -> Option<SharedChannel> {
        self.channels.lock().expect("channel table poisoned").get(token.0).cloned()
    }

    /// Queues an outbound TCP connect; performed on the loop thread's next iteration so the
    /// caller never blocks it doing DNS/connect work.
    pub fn queue_connect(&self, remote: SocketAddr, local_port: u16, consumer: ConsumerHandle) {
        self.pending.lock().expect("io_loop pending mutex poisoned").push((remote, local_port, consumer));
        let _ = self.waker.wake();
    }
}
