//! Correlator: matches replies to the requests that caused them.
//!
//! DESIGN
//! ======
//! The wire carries no request id, so a reply resolves the OLDEST pending
//! request whose action equals the reply's `Action` (FIFO per action). This is
//! a best-effort approximation: two overlapping requests with the same action
//! are ambiguous upstream, and the session serializes commands by default for
//! that reason.
//!
//! Each pending request owns a `oneshot` sender, so it resolves at most once.
//! Removal and resolution happen under the same lock: a timeout that fails to
//! remove its ticket knows the reply has already been delivered.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;
use wire::{Action, Command, Reply};

use crate::error::SessionError;

pub type ReplyResult = Result<Reply, SessionError>;

/// Local handle for one pending request. Never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(Uuid);

struct PendingRequest {
    ticket: Ticket,
    action: Action,
    target_mac: String,
    property_id: Option<u32>,
    created_at: Instant,
    slot: oneshot::Sender<ReplyResult>,
}

/// Caller side of a registered request.
pub struct Waiter {
    pub ticket: Ticket,
    pub action: Action,
    pub created_at: Instant,
    pub rx: oneshot::Receiver<ReplyResult>,
}

/// What happened to an inbound reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Delivered to the oldest matching request.
    Resolved { ticket: Ticket, waited: Duration },
    /// Matched a request whose caller had gone away; the request is removed.
    Abandoned { ticket: Ticket },
    /// No pending request has this action.
    Unmatched,
}

/// Snapshot of a pending request, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub ticket: Ticket,
    pub action: Action,
    pub target_mac: String,
    pub property_id: Option<u32>,
}

#[derive(Default)]
pub struct Correlator {
    pending: Mutex<VecDeque<PendingRequest>>,
}

impl Correlator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request for `command` and return its waiter.
    pub fn register(&self, command: &Command) -> Waiter {
        let (slot, rx) = oneshot::channel();
        let ticket = Ticket(Uuid::new_v4());
        let created_at = Instant::now();
        self.lock().push_back(PendingRequest {
            ticket,
            action: command.action(),
            target_mac: command.mac().to_owned(),
            property_id: command.property_id(),
            created_at,
            slot,
        });
        Waiter { ticket, action: command.action(), created_at, rx }
    }

    /// Resolve the oldest pending request with the reply's action.
    ///
    /// Requests whose caller has stopped waiting are removed on the way and
    /// never claim the reply while a live request with the same action exists.
    pub fn route(&self, reply: Reply) -> Routed {
        let mut pending = self.lock();
        let mut abandoned = None;
        while let Some(index) = pending.iter().position(|p| p.action.as_str() == reply.action()) {
            let Some(request) = pending.remove(index) else {
                break;
            };
            if request.slot.is_closed() {
                abandoned = Some(request.ticket);
                continue;
            }
            let ticket = request.ticket;
            let waited = request.created_at.elapsed();
            return match request.slot.send(Ok(reply)) {
                Ok(()) => Routed::Resolved { ticket, waited },
                Err(_) => Routed::Abandoned { ticket },
            };
        }
        abandoned.map_or(Routed::Unmatched, |ticket| Routed::Abandoned { ticket })
    }

    /// Remove a request without resolving it. Returns false if it was already
    /// resolved or removed.
    pub fn cancel(&self, ticket: Ticket) -> bool {
        let mut pending = self.lock();
        let Some(index) = pending.iter().position(|p| p.ticket == ticket) else {
            return false;
        };
        pending.remove(index).is_some()
    }

    /// Resolve every pending request with the error `make_error` builds for it.
    /// Returns how many were resolved.
    pub fn fail_all(&self, make_error: impl Fn(Action, Duration) -> SessionError) -> usize {
        let drained = self.lock().drain(..).collect::<Vec<_>>();
        let count = drained.len();
        for request in drained {
            let error = make_error(request.action, request.created_at.elapsed());
            // Dropped waiters need no error.
            let _ = request.slot.send(Err(error));
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pending requests, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingInfo> {
        self.lock()
            .iter()
            .map(|p| PendingInfo {
                ticket: p.ticket,
                action: p.action,
                target_mac: p.target_mac.clone(),
                property_id: p.property_id,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
