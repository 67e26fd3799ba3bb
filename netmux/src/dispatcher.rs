//! Per-`(session, direction)` ordered delivery to consumer callbacks.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use tracing::trace;

use crate::{
    package::{Action, NetPackage},
    service::NetService,
    session::SessionKey,
    worker::WorkerPool,
};

/// Which per-session FIFO a package belongs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn of(action: Action) -> Self {
        match action {
            Action::Connect | Action::Read => Direction::Read,
            Action::Write | Action::Disconnect | Action::Streaming => Direction::Write,
        }
    }
}

type Key = (SessionKey, Direction);

#[derive(Default)]
struct QueueState {
    queues: HashMap<Key, VecDeque<(NetPackage, Arc<dyn crate::consumer::Consumer>)>>,
}

/// Schedules consumer callbacks so that, per `(session, direction)`, exactly one task is ever
/// delivering and delivery order matches enqueue order.
pub struct Dispatcher {
    state: Mutex<QueueState>,
    workers: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(workers: Arc<WorkerPool>) -> Self {
        Self { state: Mutex::new(QueueState::default()), workers }
    }

    /// Enqueues `package` for `session` and, if no delivery task is already running for this
    /// `(session, direction)`, spawns one.
    pub fn dispatch(
        &self,
        service: NetService,
        session: SessionKey,
        consumer: Arc<dyn crate::consumer::Consumer>,
        package: NetPackage,
    ) {
        let direction = Direction::of(package.action());
        let key = (session, direction);
        let mut state = self.state.lock().expect("dispatcher mutex poisoned");
        // The map entry's existence, not its emptiness, is the "a drain task is active" signal:
        // a task keeps its entry alive (possibly empty) until it re-observes an empty queue under
        // this same lock, so a concurrent enqueue here can never race a second task into existence.
        let existed = state.queues.contains_key(&key);
        state.queues.entry(key).or_default().push_back((package, consumer));
        drop(state);

        if !existed {
            self.spawn_drain(service, key);
        }
    }

    fn spawn_drain(&self, service: NetService, key: Key) {
        self.workers.spawn(move || Self::drain(service, key));
    }

    fn drain(service: NetService, key: Key) {
        let dispatcher = service.dispatcher();
        loop {
            let next = {
                let mut state = dispatcher.state.lock().expect("dispatcher mutex poisoned");
                match state.queues.get_mut(&key) {
                    Some(queue) => match queue.pop_front() {
                        Some(item) => Some(item),
                        None => {
                            state.queues.remove(&key);
                            None
                        }
                    },
                    None => None,
                }
            };

            let Some((package, consumer)) = next else { break };
            trace!(session = %key.0, channel = ?key.1, action = ?package.action(), "delivering event");
            deliver(&service, key.0, consumer.as_ref(), package);
        }
    }
}

fn deliver(service: &NetService, session: SessionKey, consumer: &dyn crate::consumer::Consumer, package: NetPackage) {
    match package.action() {
        Action::Connect => consumer.on_connect(service, session, package),
        Action::Read => consumer.on_read(service, session, package),
        Action::Write | Action::Streaming => consumer.on_write(service, session, package),
        Action::Disconnect => consumer.on_disconnect(service, session, package),
    }
}
