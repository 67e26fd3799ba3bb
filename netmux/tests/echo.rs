//! End-to-end scenarios from the component design notes: single-session TCP echo, a boundary
//! case around empty-payload disconnects, multi-session demultiplexing, UDP rebind, and the
//! handshake timeout.

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpStream, UdpSocket},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
    thread,
    time::Duration,
};

use netmux::{Consumer, ConsumerHandle, NetConfig, NetPackage, NetService, NetServiceBuilder, NetSession, SessionKey};

struct EchoConsumer {
    self_handle: Weak<EchoConsumer>,
    reads: Mutex<Vec<Vec<u8>>>,
}

impl EchoConsumer {
    fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self { self_handle: weak.clone(), reads: Mutex::new(Vec::new()) })
    }
}

impl Consumer for EchoConsumer {
    fn create_session(&self, _service: &NetService, _remote: SocketAddr, _local_port: u16) -> Option<Arc<NetSession>> {
        let handle = ConsumerHandle::new(self.self_handle.upgrade()?);
        Some(Arc::new(NetSession::new(handle)))
    }

    fn on_read(&self, service: &NetService, session: SessionKey, mut package: NetPackage) {
        let payload = package.take_payload();
        self.reads.lock().unwrap().push(payload.clone());
        let _ = service.write_data(session, payload);
    }

    fn on_write(&self, _service: &NetService, _session: SessionKey, _package: NetPackage) {}

    fn destroy_session(&self, _service: &NetService, _session: SessionKey) {}
}

#[test]
fn tcp_echo_single_session() {
    let consumer = EchoConsumer::new();
    let mut builder = NetServiceBuilder::new(NetConfig::default()).expect("builder");
    let port = builder
        .register_server("127.0.0.1:0".parse().unwrap(), false, consumer.clone())
        .expect("bind");
    let _service = builder.start();

    thread::sleep(Duration::from_millis(50));
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream.write_all(b"ping").expect("write");

    let mut buf = [0u8; 4];
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.read_exact(&mut buf).expect("read echo");
    assert_eq!(&buf, b"ping");
    assert_eq!(consumer.reads.lock().unwrap().as_slice(), &[b"ping".to_vec()]);
}

struct HangUpOnRead {
    self_handle: Weak<HangUpOnRead>,
    created: Arc<AtomicUsize>,
}

impl Consumer for HangUpOnRead {
    fn create_session(&self, _service: &NetService, _remote: SocketAddr, _local_port: u16) -> Option<Arc<NetSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let handle = ConsumerHandle::new(self.self_handle.upgrade()?);
        Some(Arc::new(NetSession::new(handle)))
    }

    fn on_read(&self, service: &NetService, session: SessionKey, _package: NetPackage) {
        let _ = service.disconnect(session, Vec::new());
    }

    fn on_write(&self, _service: &NetService, _session: SessionKey, _package: NetPackage) {}

    fn destroy_session(&self, _service: &NetService, _session: SessionKey) {}
}

#[test]
fn empty_disconnect_closes_the_channel_without_error() {
    let created = Arc::new(AtomicUsize::new(0));
    let consumer = Arc::new_cyclic(|weak| HangUpOnRead { self_handle: weak.clone(), created: created.clone() });
    let mut builder = NetServiceBuilder::new(NetConfig::default()).expect("builder");
    let port = builder.register_server("127.0.0.1:0".parse().unwrap(), false, consumer).expect("bind");
    let _service = builder.start();

    thread::sleep(Duration::from_millis(50));
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream.write_all(b"x").expect("write");

    let mut buf = [0u8; 8];
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let n = stream.read(&mut buf).unwrap_or(0);
    assert_eq!(n, 0, "expected the peer to close the connection after an empty-farewell disconnect");
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

struct MultiSessionConsumer {
    self_handle: Weak<MultiSessionConsumer>,
    created: Mutex<Vec<SessionKey>>,
}

impl Consumer for MultiSessionConsumer {
    fn create_session(&self, _service: &NetService, _remote: SocketAddr, _local_port: u16) -> Option<Arc<NetSession>> {
        let handle = ConsumerHandle::new(self.self_handle.upgrade()?);
        let session = Arc::new(NetSession::new(handle));
        self.created.lock().unwrap().push(session.key());
        Some(session)
    }

    fn on_read(&self, _service: &NetService, _session: SessionKey, _package: NetPackage) {}

    fn on_write(&self, _service: &NetService, _session: SessionKey, _package: NetPackage) {}

    fn destroy_session(&self, _service: &NetService, _session: SessionKey) {}
}

#[test]
fn multi_session_channel_demultiplexes_each_write_into_its_own_session() {
    let consumer = Arc::new_cyclic(|weak| MultiSessionConsumer { self_handle: weak.clone(), created: Mutex::new(Vec::new()) });
    let mut builder = NetServiceBuilder::new(NetConfig::default()).expect("builder");
    let port = builder
        .register_server("127.0.0.1:0".parse().unwrap(), true, consumer.clone())
        .expect("bind");
    let service = builder.start();

    thread::sleep(Duration::from_millis(50));
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    for payload in [b"one".as_slice(), b"two".as_slice(), b"three".as_slice()] {
        stream.write_all(payload).expect("write");
        thread::sleep(Duration::from_millis(80));
    }

    let first_session = *consumer.created.lock().unwrap().first().expect("at least one session created");
    let token = service.registry().channel_for(first_session).expect("channel for session");
    assert_eq!(service.registry().sessions_on_channel(token).len(), 3, "one channel should carry three demultiplexed sessions");
    assert_eq!(consumer.created.lock().unwrap().len(), 3);
}

struct UdpEchoConsumer {
    self_handle: Weak<UdpEchoConsumer>,
    created: Mutex<Vec<SessionKey>>,
}

impl Consumer for UdpEchoConsumer {
    fn create_session(&self, _service: &NetService, _remote: SocketAddr, _local_port: u16) -> Option<Arc<NetSession>> {
        let handle = ConsumerHandle::new(self.self_handle.upgrade()?);
        let session = Arc::new(NetSession::new(handle));
        self.created.lock().unwrap().push(session.key());
        Some(session)
    }

    fn on_read(&self, service: &NetService, session: SessionKey, mut package: NetPackage) {
        let _ = service.write_data(session, package.take_payload());
    }

    fn on_write(&self, _service: &NetService, _session: SessionKey, _package: NetPackage) {}

    fn destroy_session(&self, _service: &NetService, _session: SessionKey) {}
}

#[test]
fn udp_rebind_guards_stale_writes_to_the_superseded_session() {
    let consumer = Arc::new_cyclic(|weak| UdpEchoConsumer { self_handle: weak.clone(), created: Mutex::new(Vec::new()) });
    let mut builder = NetServiceBuilder::new(NetConfig::default()).expect("builder");
    let port = builder
        .register_udp("127.0.0.1:0".parse().unwrap(), true, consumer.clone())
        .expect("bind");
    let service = builder.start();

    thread::sleep(Duration::from_millis(50));
    let client_a = UdpSocket::bind("127.0.0.1:0").expect("bind client a");
    client_a.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    client_a.send_to(b"hello", ("127.0.0.1", port)).expect("send");

    let mut buf = [0u8; 16];
    let n = client_a.recv(&mut buf).expect("echo back from freshly demultiplexed session");
    assert_eq!(&buf[..n], b"hello");

    let peer_a = client_a.local_addr().unwrap();
    let session_a = *consumer.created.lock().unwrap().first().expect("session created on first datagram");
    let token = service.registry().channel_for(session_a).expect("channel for session");

    // Simulate a NAT rebind: a second session claims `peer_a`'s address on the same socket,
    // the way a client reappearing under the same external address/port would.
    let session_b = Arc::new(NetSession::new(ConsumerHandle::new(consumer.clone())));
    service
        .registry()
        .demux_udp(token, port, peer_a, || Some(session_b.clone()))
        .expect("second session claims the rebound address");

    service.write_data(session_a, b"stale".to_vec()).expect("enqueue stale write");
    client_a.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    assert!(client_a.recv(&mut buf).is_err(), "a write addressed to the superseded session must not reach the peer");

    service.write_data(session_b.key(), b"fresh".to_vec()).expect("enqueue fresh write");
    client_a.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let n = client_a.recv(&mut buf).expect("write addressed to the current owner must reach the peer");
    assert_eq!(&buf[..n], b"fresh");
}

struct NeverAttachingConsumer;

impl Consumer for NeverAttachingConsumer {
    fn create_session(&self, _service: &NetService, _remote: SocketAddr, _local_port: u16) -> Option<Arc<NetSession>> {
        None
    }

    fn on_read(&self, _service: &NetService, _session: SessionKey, _package: NetPackage) {}

    fn on_write(&self, _service: &NetService, _session: SessionKey, _package: NetPackage) {}

    fn destroy_session(&self, _service: &NetService, _session: SessionKey) {}
}

#[test]
fn handshake_timeout_closes_a_channel_that_never_attaches_a_session() {
    let config = NetConfig { connection_timeout_ms: Some(100), ..NetConfig::default() };
    let consumer = Arc::new(NeverAttachingConsumer);
    let mut builder = NetServiceBuilder::new(config).expect("builder");
    let port = builder.register_server("127.0.0.1:0".parse().unwrap(), false, consumer).expect("bind");
    let _service = builder.start();

    thread::sleep(Duration::from_millis(50));
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let mut buf = [0u8; 8];
    let n = stream.read(&mut buf).expect("peer should close the channel once the handshake deadline elapses");
    assert_eq!(n, 0, "no session was ever attached, so the channel must be torn down at the deadline");
}
