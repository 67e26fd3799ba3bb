//! Wire-level package data.

use std::{fmt, net::IpAddr};

use crate::{service::NetService, session::SessionKey};

/// The action a [`NetPackage`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// A new channel/session came into being.
    Connect,
    /// A channel/session went away.
    Disconnect,
    /// Inbound data was demultiplexed to a session.
    Read,
    /// Outbound data was (or was rejected from being) flushed to a session.
    Write,
    /// Outbound data is produced incrementally by a [`StreamSource`] rather than supplied
    /// up front.
    Streaming,
}

/// Outcome of handling a [`NetPackage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    /// Freshly constructed, not yet processed.
    New,
    /// Processed successfully.
    Ok,
    /// Rejected because the session's outbound channel is held by an in-flight stream.
    RejectedSessionLock,
    /// A socket read/write/close failed.
    IoError,
}

/// Immutable (after construction, except `status`/`session`) unit of network traffic.
///
/// Everything but `status` and `session` is fixed at construction time.
#[derive(Debug)]
pub struct NetPackage {
    remote_host: Option<String>,
    remote_address: IpAddr,
    remote_port: u16,
    local_port: u16,
    payload: Vec<u8>,
    action: Action,
    status: PackageStatus,
    session: Option<SessionKey>,
    source: Option<Box<dyn StreamSource>>,
}

impl NetPackage {
    /// Builds a new package in the [`PackageStatus::New`] state.
    pub fn new(
        remote_address: IpAddr,
        remote_port: u16,
        local_port: u16,
        payload: Vec<u8>,
        action: Action,
    ) -> Self {
        Self {
            remote_host: None,
            remote_address,
            remote_port,
            local_port,
            payload,
            action,
            status: PackageStatus::New,
            session: None,
            source: None,
        }
    }

    /// Builds a [`Action::Streaming`] package carrying `source` as its chunk producer.
    pub fn streaming(
        remote_address: IpAddr,
        remote_port: u16,
        local_port: u16,
        source: Box<dyn StreamSource>,
    ) -> Self {
        Self {
            remote_host: None,
            remote_address,
            remote_port,
            local_port,
            payload: Vec::new(),
            action: Action::Streaming,
            status: PackageStatus::New,
            session: None,
            source: Some(source),
        }
    }

    /// Takes ownership of the streaming source, if this package carries one.
    pub fn take_source(&mut self) -> Option<Box<dyn StreamSource>> {
        self.source.take()
    }

    /// Attaches a reverse-DNS hostname, if one was resolved for `remote_address`.
    pub fn with_remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = Some(host.into());
        self
    }

    /// Attaches the session this package belongs to.
    pub fn with_session(mut self, session: SessionKey) -> Self {
        self.session = Some(session);
        self
    }

    /// Overrides the package's status; the only other field allowed to change post-construction.
    pub fn set_status(&mut self, status: PackageStatus) {
        self.status = status;
    }

    /// Hostname of the remote peer, if resolved.
    pub fn remote_host(&self) -> Option<&str> {
        self.remote_host.as_deref()
    }

    /// Address of the remote peer.
    pub fn remote_address(&self) -> IpAddr {
        self.remote_address
    }

    /// Port of the remote peer.
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Local listen/connect port this package arrived on or is destined for.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Application payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Takes ownership of the payload, leaving an empty one behind.
    pub fn take_payload(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.payload)
    }

    /// The action this package represents.
    pub fn action(&self) -> Action {
        self.action
    }

    /// Current processing status.
    pub fn status(&self) -> PackageStatus {
        self.status
    }

    /// The session this package is bound to, if attached.
    pub fn session(&self) -> Option<SessionKey> {
        self.session
    }
}

/// A source of successive byte chunks for a streaming write.
///
/// `init` is called once, synchronously, while the session lock is held, to let the source
/// record whatever it needs (the channel, an output handle, ...). `run` is then scheduled onto
/// the service worker pool and writes directly to the channel at its own pace; `streaming_done`
/// must be called exactly once when the source has nothing left to write.
pub trait StreamSource: Send {
    /// Called synchronously before `run` is scheduled. The session is already locked.
    fn init(&mut self, service: &NetService, session: SessionKey) -> std::io::Result<()>;

    /// Runs to completion on a service worker thread, writing to `session` via `service`.
    /// Must call [`NetService::streaming_done`] exactly once before returning.
    fn run(self: Box<Self>, service: NetService, session: SessionKey);
}

impl fmt::Debug for dyn StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<dyn StreamSource>")
    }
}
