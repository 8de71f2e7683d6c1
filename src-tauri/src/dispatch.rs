//! Delivery of session outcomes to caller-supplied sinks.
//!
//! The dispatcher lives on the coordinator thread and is only ever driven from
//! there, so every sink runs on that one context no matter which worker
//! produced the value.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, ThreadId};

use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ModelError;
use crate::models::SessionEvent;

/// Receiver of the events of one request
pub trait ResponseSink: Send + 'static {
    fn deliver(&mut self, event: SessionEvent);
}

impl<F> ResponseSink for F
where
    F: FnMut(SessionEvent) + Send + 'static,
{
    fn deliver(&mut self, event: SessionEvent) {
        self(event)
    }
}

/// Opaque correlation id of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Liveness of the host environment the sinks call into.
///
/// The host revokes it on teardown; after that every pending and future
/// delivery is dropped.
#[derive(Debug, Clone, Default)]
pub struct HostHandle {
    token: CancellationToken,
}

impl HostHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revoke(&self) {
        self.token.cancel();
    }

    pub fn is_revoked(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Pending-request table keyed by [`RequestId`]
pub struct CallbackDispatcher {
    host: HostHandle,
    pending: HashMap<RequestId, Box<dyn ResponseSink>>,
    owner: Option<ThreadId>,
}

impl CallbackDispatcher {
    pub fn new(host: HostHandle) -> Self {
        Self {
            host,
            pending: HashMap::new(),
            owner: None,
        }
    }

    /// Pin delivery to the calling thread.
    pub fn bind_to_current_thread(&mut self) {
        self.owner = Some(thread::current().id());
    }

    pub fn register(&mut self, id: RequestId, sink: Box<dyn ResponseSink>) {
        if self.host.is_revoked() {
            debug!("Host revoked, not registering request {}", id);
            return;
        }
        self.pending.insert(id, sink);
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Deliver `event` to the sink of `id`. A terminal event retires the request.
    pub fn dispatch(&mut self, id: RequestId, event: SessionEvent) {
        debug_assert!(
            self.owner.map_or(true, |owner| owner == thread::current().id()),
            "callbacks must be delivered on the coordinator thread"
        );

        if self.host.is_revoked() {
            if !self.pending.is_empty() {
                debug!("Host revoked, dropping {} pending requests", self.pending.len());
                self.pending.clear();
            }
            return;
        }

        if event.is_terminal() {
            match self.pending.remove(&id) {
                Some(mut sink) => {
                    if !deliver_guarded(sink.as_mut(), event) {
                        error!("Sink for request {} panicked on its terminal event", id);
                    }
                }
                None => warn!("Dropping terminal event for unknown request {}", id),
            }
            return;
        }

        let panicked = match self.pending.get_mut(&id) {
            Some(sink) => !deliver_guarded(sink.as_mut(), event),
            None => {
                warn!("Dropping event for unknown request {}", id);
                false
            }
        };
        if panicked {
            error!("Sink for request {} panicked, abandoning request", id);
            self.pending.remove(&id);
        }
    }

    /// Resolve every pending request with `err`.
    pub fn fail_all(&mut self, err: ModelError) {
        let ids: Vec<RequestId> = self.pending.keys().copied().collect();
        for id in ids {
            self.dispatch(id, SessionEvent::Failed(err.clone()));
        }
    }
}

fn deliver_guarded(sink: &mut dyn ResponseSink, event: SessionEvent) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(event))).is_ok()
}
