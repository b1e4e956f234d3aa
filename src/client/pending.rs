//! Requests this client sent and is still waiting on

use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::time::{DelayQueue, delay_queue};

use crate::control::OutboundRequest;
use crate::error::{AgentError, Result};
use crate::types::RequestId;

pub(crate) struct PendingRequest {
    pub(crate) request: OutboundRequest,
    pub(crate) issued_at: Instant,
    pub(crate) timeout: Duration,
    timer: delay_queue::Key,
    waiter: oneshot::Sender<Result<Value>>,
}

impl PendingRequest {
    /// Hand the outcome to whoever is waiting; a gone waiter is fine
    pub(crate) fn resolve(self, outcome: Result<Value>) {
        let _ = self.waiter.send(outcome);
    }

    pub(crate) fn subtype(&self) -> &'static str {
        self.request.subtype()
    }
}

/// Pending table plus one timer per entry
///
/// Removing an entry always removes its timer, so a timer that fires refers
/// to a request that is still waiting.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
    timers: DelayQueue<RequestId>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &mut self,
        request_id: RequestId,
        request: OutboundRequest,
        timeout: Duration,
        waiter: oneshot::Sender<Result<Value>>,
    ) {
        let timer = self.timers.insert(request_id.clone(), timeout);
        self.entries.insert(
            request_id,
            PendingRequest {
                request,
                issued_at: Instant::now(),
                timeout,
                timer,
                waiter,
            },
        );
    }

    /// Remove an entry and its timer
    pub(crate) fn take(&mut self, request_id: &RequestId) -> Option<PendingRequest> {
        let entry = self.entries.remove(request_id)?;
        self.timers.remove(&entry.timer);
        Some(entry)
    }

    /// Wait for the next timer; cancel-safe
    pub(crate) async fn next_expired(&mut self) -> Option<(RequestId, PendingRequest)> {
        let expired = self.timers.next().await?;
        let request_id = expired.into_inner();
        let entry = self.entries.remove(&request_id)?;
        Some((request_id, entry))
    }

    /// Fail every entry with errors built by `error`
    pub(crate) fn fail_all(&mut self, error: impl Fn() -> AgentError) {
        self.timers.clear();
        for (request_id, entry) in self.entries.drain() {
            tracing::debug!(request_id = %request_id, subtype = entry.subtype(), "Failing pending request");
            entry.resolve(Err(error()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
