//! Request/acknowledgement correlation.
//!
//! Every request that expects a reply gets a fresh monotonically increasing
//! id. Exactly one of resolve, reject, expiry or bulk rejection settles a
//! pending entry; later settlements for the same id are no-ops.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{RealtimeLinkError, Result};
use crate::timeouts::RealtimeTimeouts;

/// What a pending request was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    Publish,
    TopicSubmission,
}

/// Reply channel of a caller awaiting an acknowledgement.
pub type Responder = oneshot::Sender<Result<JsonValue>>;

#[derive(Debug)]
struct PendingRequest {
    purpose: RequestPurpose,
    responder: Option<Responder>,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl PendingRequest {
    fn settle(self, outcome: Result<JsonValue>) -> RequestPurpose {
        if let Some(tx) = self.responder {
            // Caller may have stopped waiting.
            let _ = tx.send(outcome);
        }
        self.purpose
    }
}

#[derive(Debug, Default)]
pub struct RequestCorrelator {
    next_id: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return its correlation id.
    ///
    /// A zero `timeout` means the request never expires on its own.
    pub fn register(
        &mut self,
        purpose: RequestPurpose,
        timeout: Duration,
        responder: Option<Responder>,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let deadline = if RealtimeTimeouts::is_no_timeout(timeout) {
            None
        } else {
            Some(Instant::now() + timeout)
        };
        self.pending.insert(
            id,
            PendingRequest {
                purpose,
                responder,
                deadline,
                timeout,
            },
        );
        id
    }

    /// Settle request `id` with the server's answer.
    ///
    /// Returns `None` for unknown or already settled ids.
    pub fn resolve(&mut self, id: u64, outcome: Result<JsonValue>) -> Option<RequestPurpose> {
        self.pending.remove(&id).map(|req| req.settle(outcome))
    }

    pub fn reject(&mut self, id: u64, error: RealtimeLinkError) -> Option<RequestPurpose> {
        self.resolve(id, Err(error))
    }

    /// Reject everything still pending, e.g. on connection loss.
    pub fn reject_all(&mut self, error: RealtimeLinkError) -> Vec<(u64, RequestPurpose)> {
        let mut settled: Vec<(u64, RequestPurpose)> = self
            .pending
            .drain()
            .map(|(id, req)| (id, req.settle(Err(error.clone()))))
            .collect();
        settled.sort_by_key(|(id, _)| *id);
        settled
    }

    /// Reject every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(u64, RequestPurpose)> {
        let mut due: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, req)| req.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        due.sort_unstable();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if let Some(req) = self.pending.remove(&id) {
                let timeout = req.timeout;
                let purpose = req.settle(Err(RealtimeLinkError::AckTimeout {
                    request_id: id,
                    timeout,
                }));
                log::debug!("[realtime-link] Request {} timed out after {:?}", id, timeout);
                expired.push((id, purpose));
            }
        }
        expired
    }

    /// Earliest deadline among pending requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|req| req.deadline).min()
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
