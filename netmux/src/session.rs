//! Session identity and the consumer-defined attribute bag.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};

use crate::consumer::ConsumerHandle;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Stable, orderable session identity.
///
/// Ordering exists so sessions can live in ordered containers keyed on a stable, monotonic
/// identity; it is simply creation order here, which is monotonic and therefore a valid total
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey(u64);

impl SessionKey {
    pub(crate) fn fresh() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// A small type-keyed attribute bag, standing in for "consumer-defined attributes".
#[derive(Default)]
pub struct Extensions(HashMap<TypeId, Box<dyn Any + Send + Sync>>);

impl Extensions {
    /// Inserts a value, returning the previous one of the same type, if any.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.0
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Retrieves a reference to a previously-inserted value of type `T`.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref())
    }

    /// Retrieves a mutable reference to a previously-inserted value of type `T`.
    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.0.get_mut(&TypeId::of::<T>()).and_then(|v| v.downcast_mut())
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions").field("len", &self.0.len()).finish()
    }
}

/// A logical conversation rooted in a consumer.
///
/// Created by a consumer's `create_session`/`session` callback; destroyed when its channel
/// closes (if `disconnect_and_remove` is set) or explicitly via the application.
#[derive(Debug)]
pub struct NetSession {
    key: SessionKey,
    consumer: ConsumerHandle,
    /// Set while a [`crate::package::StreamSource`] owns the outbound channel.
    locked: AtomicBool,
    attributes: Mutex<Extensions>,
}

impl NetSession {
    /// Creates a new session bound to `consumer`, with a freshly minted key.
    pub fn new(consumer: ConsumerHandle) -> Self {
        Self {
            key: SessionKey::fresh(),
            consumer,
            locked: AtomicBool::new(false),
            attributes: Mutex::new(Extensions::default()),
        }
    }

    /// This session's stable key.
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// The consumer this session belongs to.
    pub fn consumer(&self) -> &ConsumerHandle {
        &self.consumer
    }

    /// Whether a streaming source currently owns this session's outbound channel.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Attempts to acquire the streaming lock; returns `false` if already held.
    pub(crate) fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the streaming lock.
    pub(crate) fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Runs `f` with mutable access to this session's attribute bag.
    pub fn with_attributes<R>(&self, f: impl FnOnce(&mut Extensions) -> R) -> R {
        let mut guard = self.attributes.lock().expect("session attribute lock poisoned");
        f(&mut guard)
    }
}
