//! Loads configuration, initializes logging, and starts a `netmux` server whose sessions run
//! queries through `queryengine` against an in-memory resource.

mod config;
mod memory;
mod query_consumer;

use std::{sync::Arc, thread};

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::{config::XsvcConfig, memory::MemoryStore, query_consumer::QueryConsumer};

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => XsvcConfig::load_from_file(&path).with_context(|| format!("loading config from {path}"))?,
        None => XsvcConfig::default(),
    };

    let addr = cfg.listen_addr.parse().with_context(|| format!("invalid listen address {:?}", cfg.listen_addr))?;
    let store = Arc::new(MemoryStore::seeded());
    let consumer = QueryConsumer::new(store, cfg.query.clone());

    let mut builder = netmux::NetServiceBuilder::new(cfg.net).context("building net service")?;
    let port = builder.register_server(addr, false, consumer).context("binding query server")?;
    let service = builder.start();

    tracing::info!(port, "xsvc listening");

    // The multiplexer runs on its own thread; the main thread just keeps the process alive.
    let _ = service;
    loop {
        thread::park();
    }
}
