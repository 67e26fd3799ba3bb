//! Read-side demultiplexing and the write pipeline.
//!
//! Both run inside a single I/O worker task per ready channel: read whatever is available,
//! demultiplex it to sessions, then drain and flush the channel's outbound queue. Interest is
//! then rearmed READABLE always, WRITABLE only if the queue is still non-empty — the open
//! question in the design notes about which direction to arm by default is resolved in favor
//! of READ, since a channel with nothing queued has no reason to wake on writability.

use std::{
    io::{self, ErrorKind, Read, Write},
    net::SocketAddr,
};

use mio::Token;
use tracing::{trace, warn};

use crate::{
    io_loop::{SharedChannel, Transport},
    package::{Action, NetPackage, PackageStatus},
    service::NetService,
};

/// Handles one ready I/O event for `token`: reads if `readable`, then always attempts to
/// flush the outbound queue (a writable-only event arrives with nothing new to read).
pub(crate) fn run_ready(service: &NetService, token: Token, readable: bool) {
    let Some(channel) = service.io_loop_channel(token) else { return };

    if readable {
        match read_channel(service, token, &channel) {
            Ok(()) => {}
            Err(err) => {
                warn!(%err, ?token, "read failed, destroying channel");
                destroy_with_disconnect(service, token, &channel, Vec::new());
                return;
            }
        }
    }

    if let Err(err) = flush(service, token, &channel) {
        warn!(%err, ?token, "write failed, destroying channel");
        destroy_with_disconnect(service, token, &channel, Vec::new());
        return;
    }

    let queue_nonempty = service.registry().has_pending_writes(token);
    let mut guard = channel.lock().expect("channel mutex poisoned");
    if !guard.closed {
        guard.reregister(true, queue_nonempty);
    }
}

fn read_channel(service: &NetService, token: Token, channel: &SharedChannel) -> io::Result<()> {
    let config = service.config();
    let mut buf = vec![0u8; config.input_buffer_size];
    let mut accumulated: Vec<u8> = Vec::new();
    let (local_port, peer_for_demux, is_tcp) = {
        let guard = channel.lock().expect("channel mutex poisoned");
        (guard.local_port, None::<SocketAddr>, matches!(guard.transport, Transport::Tcp(_)))
    };
    let _ = peer_for_demux;

    if is_tcp {
        loop {
            let read = {
                let mut guard = channel.lock().expect("channel mutex poisoned");
                let Transport::Tcp(stream) = &mut guard.transport else { unreachable!() };
                stream.read(&mut buf)
            };
            match read {
                Ok(0) => return Err(io::Error::new(ErrorKind::UnexpectedEof, "peer closed connection")),
                Ok(n) => accumulated.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
        if accumulated.is_empty() {
            return Ok(());
        }
        let peer = {
            let guard = channel.lock().expect("channel mutex poisoned");
            let Transport::Tcp(stream) = &guard.transport else { unreachable!() };
            stream.peer_addr()?
        };
        demux_and_emit_tcp(service, token, local_port, peer, accumulated);
    } else {
        loop {
            let received = {
                let mut guard = channel.lock().expect("channel mutex poisoned");
                let Transport::Udp(socket) = &mut guard.transport else { unreachable!() };
                socket.recv_from(&mut buf)
            };
            match received {
                Ok((n, peer)) => demux_and_emit_udp(service, token, local_port, peer, buf[..n].to_vec()),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => return Err(err),
            }
        }
    }
    Ok(())
}

fn demux_and_emit_tcp(service: &NetService, token: Token, local_port: u16, peer: SocketAddr, payload: Vec<u8>) {
    let consumer = {
        let Some(channel) = service.io_loop_channel(token) else { return };
        let consumer = channel.lock().expect("channel mutex poisoned").consumer.clone();
        consumer
    };
    let demuxed = service.registry().demux_tcp(token, local_port, peer, || consumer.create_session(service, peer, local_port));
    let Some(demuxed) = demuxed else {
        trace!(?token, "no session, destroying channel");
        if let Some(channel) = service.io_loop_channel(token) {
            destroy_with_disconnect(service, token, &channel, Vec::new());
        }
        return;
    };
    emit_read(service, token, peer, local_port, consumer, demuxed.session.key(), payload);
}

fn demux_and_emit_udp(service: &NetService, token: Token, local_port: u16, peer: SocketAddr, payload: Vec<u8>) {
    let consumer = {
        let Some(channel) = service.io_loop_channel(token) else { return };
        let consumer = channel.lock().expect("channel mutex poisoned").consumer.clone();
        consumer
    };
    let demuxed = service.registry().demux_udp(token, local_port, peer, || consumer.create_session(service, peer, local_port));
    let Some(demuxed) = demuxed else {
        trace!(?token, %peer, "udp datagram with no resolvable session, dropping");
        return;
    };
    emit_read(service, token, peer, local_port, consumer, demuxed.session.key(), payload);
}

fn emit_read(
    service: &NetService,
    _token: Token,
    peer: SocketAddr,
    local_port: u16,
    consumer: crate::consumer::ConsumerHandle,
    session: crate::session::SessionKey,
    payload: Vec<u8>,
) {
    let mut package = NetPackage::new(peer.ip(), peer.port(), local_port, payload, Action::Read).with_session(session);
    package.set_status(PackageStatus::Ok);
    service.dispatcher().dispatch(service.clone(), session, consumer.0.clone(), package);
}

/// Drains and flushes up to `max_writes_per_flush` queued packages for `token`, per §4.4.
fn flush(service: &NetService, token: Token, channel: &SharedChannel) -> io::Result<()> {
    let max = service.config().max_writes_per_flush;
    let packages = service.registry().drain_writes(token, max);
    for mut package in packages {
        if package.action() == Action::Disconnect {
            finish_disconnect(service, token, channel, package);
            continue;
        }

        let session = package.session();
        let locked = session.and_then(|s| service.session(s)).map(|s| s.is_locked()).unwrap_or(false);
        if locked {
            crate::registry::reject_for_lock(&mut package);
            emit_write(service, session, &channel_consumer(channel), package);
            continue;
        }

        if package.action() == Action::Streaming {
            service.begin_streaming(token, package);
            continue;
        }

        write_payload(channel, token, service, &mut package)?;
        package.set_status(PackageStatus::Ok);
        emit_write(service, session, &channel_consumer(channel), package);
    }
    Ok(())
}

fn channel_consumer(channel: &SharedChannel) -> crate::consumer::ConsumerHandle {
    channel.lock().expect("channel mutex poisoned").consumer.clone()
}

fn write_payload(channel: &SharedChannel, token: Token, service: &NetService, package: &mut NetPackage) -> io::Result<()> {
    let chunk_size = service.config().output_buffer_size;
    let payload = package.take_payload();
    if payload.is_empty() {
        return Ok(());
    }

    let mut guard = channel.lock().expect("channel mutex poisoned");
    match &mut guard.transport {
        Transport::Tcp(stream) => {
            for chunk in payload.chunks(chunk_size) {
                write_all_blocking_retry(stream, chunk)?;
            }
        }
        Transport::Udp(socket) => {
            let Some(session) = package.session() else { return Ok(()) };
            drop(guard);
            let Some(addr) = service.registry().udp_address_for(token, session) else {
                trace!(?token, %session, "dropping stale udp write after rebind");
                return Ok(());
            };
            let mut guard = channel.lock().expect("channel mutex poisoned");
            let Transport::Udp(socket) = &mut guard.transport else { unreachable!() };
            for chunk in payload.chunks(chunk_size) {
                socket.send_to(chunk, addr)?;
            }
            let _ = socket;
        }
    }
    Ok(())
}

fn write_all_blocking_retry(stream: &mut mio::net::TcpStream, mut chunk: &[u8]) -> io::Result<()> {
    while !chunk.is_empty() {
        match stream.write(chunk) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "failed to write whole chunk")),
            Ok(n) => chunk = &chunk[n..],
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn emit_write(
    service: &NetService,
    session: Option<crate::session::SessionKey>,
    consumer: &crate::consumer::ConsumerHandle,
    package: NetPackage,
) {
    let Some(session) = session else { return };
    service.dispatcher().dispatch(service.clone(), session, consumer.0.clone(), package);
}

fn finish_disconnect(service: &NetService, token: Token, channel: &SharedChannel, mut package: NetPackage) {
    let farewell = package.take_payload();
    destroy_with_disconnect(service, token, channel, farewell);
    let _ = package;
}

/// Tears down the channel and, if configured, evicts and notifies for each session it carried.
pub(crate) fn destroy_with_disconnect(service: &NetService, token: Token, channel: &SharedChannel, farewell: Vec<u8>) {
    let local_port = {
        let mut guard = channel.lock().expect("channel mutex poisoned");
        guard.close();
        guard.local_port
    };
    let consumer = channel_consumer(channel);
    let sessions = service.registry().destroy_channel(token);
    let disconnect_and_remove = service.config().disconnect_and_remove;

    for session in sessions {
        let peer = service.registry().address_of(session.key());
        let (ip, port) = peer.map(|a| (a.ip(), a.port())).unwrap_or((std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0));
        let mut package = NetPackage::new(ip, port, local_port, farewell.clone(), Action::Disconnect).with_session(session.key());
        package.set_status(PackageStatus::Ok);
        service.dispatcher().dispatch(service.clone(), session.key(), consumer.0.clone(), package);

        if disconnect_and_remove {
            service.registry().forget_session(session.key());
            consumer.destroy_session(service, session.key());
        }
    }
    service.finish_channel_teardown(token);
}
