//! Bridges netmux sessions to the query engine: each connection sends newline-delimited query
//! text and gets back one line of pipe-separated fields per result row.

use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
};

use netmux::{Consumer, ConsumerHandle, NetPackage, NetService, NetSession, SessionKey};
use queryengine::{parser, Evaluator, FunctionRegistry, Query, QueryConfig};
use tracing::{debug, warn};

use crate::memory::MemoryStore;

struct LineBuffer(String);

pub struct QueryConsumer {
    self_handle: Weak<QueryConsumer>,
    store: Arc<MemoryStore>,
    functions: FunctionRegistry,
    config: QueryConfig,
}

impl QueryConsumer {
    pub fn new(store: Arc<MemoryStore>, config: QueryConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self { self_handle: weak.clone(), store, functions: FunctionRegistry::default(), config })
    }

    fn run_query(&self, text: &str) -> String {
        let query: Query = match parser::parse(text, &self.config) {
            Ok(q) => q,
            Err(err) => return format!("error: {err}"),
        };
        debug!(resource = %query.resource, joins = query.joins.len(), "parsed query");

        let evaluator = Evaluator::new(&self.functions);
        match evaluator.evaluate(&query, self.store.as_ref(), &[]) {
            Ok(rows) => rows
                .iter()
                .map(|row| row.fields().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("|"))
                .collect::<Vec<_>>()
                .join("\n"),
            Err(err) => {
                warn!(%err, "query evaluation failed");
                format!("error: {err}")
            }
        }
    }
}

impl Consumer for QueryConsumer {
    fn create_session(&self, _service: &NetService, _remote: SocketAddr, _local_port: u16) -> Option<Arc<NetSession>> {
        let handle = ConsumerHandle::new(self.self_handle.upgrade()?);
        Some(Arc::new(NetSession::new(handle)))
    }

    fn on_read(&self, service: &NetService, session: SessionKey, mut package: NetPackage) {
        let Some(net_session) = service.session(session) else { return };
        let chunk = String::from_utf8_lossy(&package.take_payload()).into_owned();

        let complete_lines = net_session.with_attributes(|ext| {
            let buffer = ext.get_mut::<LineBuffer>();
            let buffer = match buffer {
                Some(b) => b,
                None => {
                    ext.insert(LineBuffer(String::new()));
                    ext.get_mut::<LineBuffer>().unwrap()
                }
            };
            buffer.0.push_str(&chunk);
            let mut lines = Vec::new();
            while let Some(pos) = buffer.0.find('\n') {
                lines.push(buffer.0[..pos].trim().to_string());
                buffer.0.drain(..=pos);
            }
            lines
        });

        for line in complete_lines {
            if line.is_empty() {
                continue;
            }
            let response = format!("{}\n", self.run_query(&line));
            let _ = service.write_data(session, response.into_bytes());
        }
    }

    fn on_write(&self, _service: &NetService, _session: SessionKey, _package: NetPackage) {}

    fn destroy_session(&self, _service: &NetService, session: SessionKey) {
        debug!(%session, "query session closed");
    }
}
