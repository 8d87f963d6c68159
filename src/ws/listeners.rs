//! Application subscribers, grouped by event kind.
//!
//! Lists are append-only. Dispatch iterates a snapshot taken under a short read lock, so a
//! listener may register further listeners without deadlocking; those run from the next
//! dispatch on.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use super::transport::{Handshake, Payload};

type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// The four notifications applications can subscribe to.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Open,
    Message,
    Error,
    Close,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Message => write!(f, "message"),
            Self::Error => write!(f, "error"),
            Self::Close => write!(f, "close"),
        }
    }
}

struct Listeners<A: ?Sized> {
    kind: EventKind,
    callbacks: RwLock<Vec<Listener<A>>>,
}

impl<A: ?Sized> Listeners<A> {
    fn new(kind: EventKind) -> Self {
        Self {
            kind,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    // A panicking listener never runs while the lock is held, so a poisoned lock still
    // guards a consistent list.
    fn push(&self, listener: Listener<A>) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn snapshot(&self) -> Vec<Listener<A>> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns how many listeners panicked.
    fn dispatch(&self, arg: &A) -> usize {
        let mut panicked = 0;

        for (index, listener) in self.snapshot().iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| listener(arg))).is_err() {
                panicked += 1;

                #[cfg(feature = "tracing")]
                tracing::warn!(event = %self.kind, index, "Listener panicked, continuing dispatch");
                #[cfg(not(feature = "tracing"))]
                let _ = (index, self.kind);
            }
        }

        panicked
    }
}

/// Ordered callback lists for open, message, error and close notifications.
pub struct ListenerRegistry {
    open: Listeners<Handshake>,
    message: Listeners<Payload>,
    error: Listeners<()>,
    close: Listeners<()>,
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("open", &self.open.len())
            .field("message", &self.message.len())
            .field("error", &self.error.len())
            .field("close", &self.close.len())
            .finish()
    }
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: Listeners::new(EventKind::Open),
            message: Listeners::new(EventKind::Message),
            error: Listeners::new(EventKind::Error),
            close: Listeners::new(EventKind::Close),
        }
    }

    pub fn on_open<F>(&self, listener: F)
    where
        F: Fn(&Handshake) + Send + Sync + 'static,
    {
        self.open.push(Arc::new(listener));
    }

    pub fn on_message<F>(&self, listener: F)
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.message.push(Arc::new(listener));
    }

    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.error.push(Arc::new(move |(): &()| listener()));
    }

    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.close.push(Arc::new(move |(): &()| listener()));
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn len(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Open => self.open.len(),
            EventKind::Message => self.message.len(),
            EventKind::Error => self.error.len(),
            EventKind::Close => self.close.len(),
        }
    }

    pub(crate) fn dispatch_open(&self, handshake: &Handshake) -> usize {
        self.open.dispatch(handshake)
    }

    pub(crate) fn dispatch_message(&self, payload: &Payload) -> usize {
        self.message.dispatch(payload)
    }

    pub(crate) fn dispatch_error(&self) -> usize {
        self.error.dispatch(&())
    }

    pub(crate) fn dispatch_close(&self) -> usize {
        self.close.dispatch(&())
    }
}
