//! The public handle API.

use std::{
    net::SocketAddr,
    sync::{
        atomic::Ordering,
        Arc,
    },
    thread,
};

use mio::Token;
use tracing::info;

use crate::{
    config::NetConfig,
    consumer::{Consumer, ConsumerHandle},
    dispatcher::Dispatcher,
    error::{NetError, NetResult},
    io_loop::{IoLoop, IoLoopHandle},
    package::{Action, NetPackage, PackageStatus, StreamSource},
    pipeline,
    registry::Registry,
    session::{NetSession, SessionKey},
    worker::WorkerPool,
};

struct Inner {
    config: NetConfig,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    io_workers: Arc<WorkerPool>,
    service_workers: Arc<WorkerPool>,
    io_handle: IoLoopHandle,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    waker: Arc<mio::Waker>,
}

/// Assembles listeners before the multiplexer thread starts.
///
/// Binding sockets requires exclusive access to the loop; once [`NetServiceBuilder::start`] is
/// called, further channels are only ever created by accept/connect, not by direct binding.
pub struct NetServiceBuilder {
    io_loop: IoLoop,
    registry: Arc<Registry>,
    config: NetConfig,
}

impl NetServiceBuilder {
    pub fn new(config: NetConfig) -> NetResult<Self> {
        config.validate().map_err(|e| NetError::Config(e.to_string()))?;
        let registry = Arc::new(Registry::new());
        let io_loop = IoLoop::new(config.clone(), registry.clone()).map_err(|e| NetError::Registration(e.to_string()))?;
        Ok(Self { io_loop, registry, config })
    }

    /// Binds a TCP server socket.
    pub fn register_server(&mut self, addr: SocketAddr, multi_session: bool, consumer: Arc<dyn Consumer>) -> NetResult<u16> {
        self.io_loop.bind_server(addr, multi_session, ConsumerHandle::new(consumer))
    }

    /// Binds a UDP socket. UDP has no separate accept step, so `multi_session` here controls
    /// whether distinct peer addresses get distinct sessions.
    pub fn register_udp(&mut self, addr: SocketAddr, multi_session: bool, consumer: Arc<dyn Consumer>) -> NetResult<u16> {
        self.io_loop.bind_udp(addr, multi_session, ConsumerHandle::new(consumer)).map(|(_, port)| port)
    }

    /// Spawns the multiplexer thread and the I/O/service worker pools, returning the running
    /// handle.
    pub fn start(self) -> NetService {
        let io_handle = self.io_loop.handle();
        let waker = self.io_loop.waker();
        let shutdown = self.io_loop.shutdown_flag();
        let io_workers = Arc::new(WorkerPool::new("netmux-io", self.config.io_pool_size, self.config.input_buffer_size, 4096));
        let service_workers =
            Arc::new(WorkerPool::new("netmux-service", self.config.service_pool_size, self.config.output_buffer_size, 4096));
        let dispatcher = Arc::new(Dispatcher::new(service_workers.clone()));

        let service = NetService {
            inner: Arc::new(Inner {
                config: self.config,
                registry: self.registry,
                dispatcher,
                io_workers: io_workers.clone(),
                service_workers,
                io_handle,
                shutdown,
                waker,
            }),
        };

        let loop_service = service.clone();
        thread::Builder::new()
            .name("netmux-loop".into())
            .spawn(move || {
                self.io_loop.run(loop_service, move |svc, token, readable| {
                    let svc = svc.clone();
                    if let Err(err) = io_workers.try_spawn(move || pipeline::run_ready(&svc, token, readable)) {
                        tracing::trace!(?token, %err, "io task rejected, will retry next tick");
                    }
                });
            })
            .expect("failed to spawn multiplexer thread");

        info!("net service started");
        service
    }
}

/// A running multiplexer: the handle application code calls into to register outbound
/// connections, write data, and shut down.
#[derive(Clone)]
pub struct NetService {
    inner: Arc<Inner>,
}

impl NetService {
    pub fn config(&self) -> &NetConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn service_workers(&self) -> &WorkerPool {
        &self.inner.service_workers
    }

    pub(crate) fn io_loop_channel(&self, token: Token) -> Option<crate::io_loop::SharedChannel> {
        self.inner.io_handle.channel(token)
    }

    pub fn session(&self, key: SessionKey) -> Option<Arc<NetSession>> {
        let token = self.inner.registry.channel_for(key)?;
        self.inner
            .registry
            .sessions_on_channel(token)
            .into_iter()
            .find(|s| s.key() == key)
    }

    /// Queues an outbound TCP connect whose resulting channel is bound to `session` once it
    /// completes.
    pub fn register_client(&self, remote: SocketAddr, local_port: u16, consumer: Arc<dyn Consumer>) {
        self.inner.io_handle.queue_connect(remote, local_port, ConsumerHandle::new(consumer));
    }

    /// Enqueues `bytes` for `session`.
    pub fn write_data(&self, session: SessionKey, bytes: Vec<u8>) -> NetResult<()> {
        let token = self
            .inner
            .registry
            .channel_for(session)
            .ok_or_else(|| NetError::Protocol(format!("write to unknown session {session}")))?;
        let peer = self.peer_of(session);
        let mut package = NetPackage::new(peer.ip(), peer.port(), 0, bytes, Action::Write).with_session(session);
        package.set_status(PackageStatus::New);
        self.inner.registry.enqueue_write(token, package);
        self.wake_channel(token);
        Ok(())
    }

    /// Enqueues a streaming write: `source` will be driven on the service pool once its turn
    /// in the channel's FIFO arrives.
    pub fn write_data_streaming(&self, session: SessionKey, source: Box<dyn StreamSource>) -> NetResult<()> {
        let token = self
            .inner
            .registry
            .channel_for(session)
            .ok_or_else(|| NetError::Protocol(format!("stream to unknown session {session}")))?;
        let peer = self.peer_of(session);
        let mut package = NetPackage::streaming(peer.ip(), peer.port(), 0, source).with_session(session);
        package.set_status(PackageStatus::New);
        self.inner.registry.enqueue_write(token, package);
        self.wake_channel(token);
        Ok(())
    }

    /// Enqueues a disconnect with an optional farewell payload.
    pub fn disconnect(&self, session: SessionKey, farewell: Vec<u8>) -> NetResult<()> {
        let token = self
            .inner
            .registry
            .channel_for(session)
            .ok_or_else(|| NetError::Protocol(format!("disconnect of unknown session {session}")))?;
        let peer = self.peer_of(session);
        let mut package = NetPackage::new(peer.ip(), peer.port(), 0, farewell, Action::Disconnect).with_session(session);
        package.set_status(PackageStatus::New);
        self.inner.registry.enqueue_write(token, package);
        self.wake_channel(token);
        Ok(())
    }

    fn peer_of(&self, session: SessionKey) -> SocketAddr {
        self.inner.registry.address_of(session).unwrap_or_else(unspecified_addr)
    }

    fn wake_channel(&self, token: Token) {
        if let Some(channel) = self.inner.io_handle.channel(token) {
            channel.lock().expect("channel mutex poisoned").reregister(true, true);
        }
        let _ = self.inner.waker.wake();
    }

    /// Starts a queued [`Action::Streaming`] package: locks the session, runs `init`
    /// synchronously, then schedules `run` on the service pool.
    pub(crate) fn begin_streaming(&self, _token: Token, mut package: NetPackage) {
        let Some(session_key) = package.session() else { return };
        let Some(session) = self.session(session_key) else { return };
        if !session.try_lock() {
            crate::registry::reject_for_lock(&mut package);
            return;
        }
        let Some(mut source) = package.take_source() else {
            session.unlock();
            return;
        };
        let service = self.clone();
        if let Err(err) = source.init(&service, session_key) {
            tracing::warn!(%err, %session_key, "stream init failed");
            session.unlock();
            return;
        }
        self.inner.service_workers.spawn(move || source.run(service, session_key));
    }

    /// Called by a [`StreamSource`] when it has nothing left to write.
    pub fn streaming_done(&self, session: SessionKey) {
        if let Some(s) = self.session(session) {
            s.unlock();
        }
        if let Some(token) = self.inner.registry.channel_for(session) {
            let peer = self.peer_of(session);
            let mut package = NetPackage::new(peer.ip(), peer.port(), 0, Vec::new(), Action::Write).with_session(session);
            package.set_status(PackageStatus::Ok);
            if let Some(channel) = self.inner.io_handle.channel(token) {
                let consumer = channel.lock().expect("channel mutex poisoned").consumer.clone();
                self.inner.dispatcher.dispatch(self.clone(), session, consumer.0.clone(), package);
                return;
            }
            let _ = package;
        }
    }

    pub(crate) fn on_channel_connected(&self, token: Token) {
        let Some(channel) = self.inner.io_handle.channel(token) else { return };
        let (consumer, local_port, peer) = {
            let guard = channel.lock().expect("channel mutex poisoned");
            let peer = match &guard.transport {
                crate::io_loop::Transport::Tcp(stream) => stream.peer_addr().unwrap_or_else(|_| unspecified_addr()),
                crate::io_loop::Transport::Udp(_) => unspecified_addr(),
            };
            (guard.consumer.clone(), guard.local_port, peer)
        };
        // Clients attach their pre-existing session via `create_session`, reusing the same
        // contract servers use on first read.
        if let Some(session) = consumer.create_session(self, peer, local_port) {
            self.inner.registry.demux_tcp(token, local_port, peer, || Some(session.clone())).expect("session was just supplied");
            let package = NetPackage::new(peer.ip(), peer.port(), local_port, Vec::new(), Action::Connect).with_session(session.key());
            self.inner.dispatcher.dispatch(self.clone(), session.key(), consumer.0.clone(), package);
        } else {
            pipeline::destroy_with_disconnect(self, token, &channel, Vec::new());
        }
    }

    pub(crate) fn finish_channel_teardown(&self, token: Token) {
        tracing::trace!(?token, "channel teardown complete");
    }

    /// Initiates graceful shutdown: flags the loop, wakes it, and lets
    /// it drain in-flight disconnects before closing every channel.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let _ = self.inner.waker.wake();
    }
}

fn unspecified_ip() -> std::net::IpAddr {
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

fn unspecified_addr() -> SocketAddr {
    SocketAddr::new(unspecified_ip(), 0)
}
