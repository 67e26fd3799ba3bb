//! Single-multiplexer TCP/UDP session service.
//!
//! One thread owns a `mio::Poll` loop (see [`io_loop`]); inbound bytes are demultiplexed to
//! long-lived [`session::NetSession`]s (see [`registry`]), outbound bytes are queued per channel
//! and flushed in order (see [`pipeline`]), and consumer callbacks are delivered one at a time
//! per `(session, direction)` pair (see [`dispatcher`]). [`service::NetServiceBuilder`] is the
//! entry point: bind listeners, then `start()` to get a running [`service::NetService`] handle.

mod config;
mod consumer;
mod dispatcher;
mod error;
mod io_loop;
mod package;
mod pipeline;
mod registry;
mod service;
mod session;
mod worker;

pub use config::NetConfig;
pub use consumer::{Consumer, ConsumerHandle, Protocol, Role, SocketOptions};
pub use error::{NetError, NetResult};
pub use package::{Action, NetPackage, PackageStatus, StreamSource};
pub use service::{NetService, NetServiceBuilder};
pub use session::{Extensions, NetSession, SessionKey};
