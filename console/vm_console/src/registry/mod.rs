use std::collections::HashMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::{oneshot, Mutex};
use status_engine::{Action, StatusPayload};

use crate::error::{MonitorError, Result};
use crate::request::RequestId;


/// Terminal result of one monitored operation.
pub type Outcome = std::result::Result<StatusPayload, MonitorError>;

// One operation awaiting a terminal status
#[derive(Debug)]
struct PendingEntry {
    action: Action,
    registered_at: DateTime<Utc>,
    settle_tx: oneshot::Sender<Outcome>,
}

/// An entry that was still pending when the registry was torn down.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingInfo {
    pub request_id: RequestId,
    pub action: Action,
    pub registered_at: DateTime<Utc>,
}

/// Handle returned to the caller of [`CorrelationRegistry::register`].
#[derive(Debug)]
pub struct PendingOperation {
    request_id: RequestId,
    action: Action,
    outcome_rx: oneshot::Receiver<Outcome>,
}

impl PendingOperation {
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    // Wait for the terminal outcome
    pub async fn wait(self) -> Outcome {
        match self.outcome_rx.await {
            Ok(outcome) => outcome,
            // Entry dropped without settlement (registry torn down)
            Err(_) => Err(MonitorError::Cancelled),
        }
    }
}

/// Table of operations awaiting a terminal status, keyed by request id.
///
/// Settlement removes the entry under the lock before the outcome is sent,
/// so each entry is resolved or rejected at most once even when two
/// deliveries race for it.
#[derive(Debug, Clone, Default)]
pub struct CorrelationRegistry {
    entries: Arc<Mutex<HashMap<RequestId, PendingEntry>>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Record a pending entry and hand back the awaitable side
    pub async fn register(&self, request_id: &RequestId, action: Action) -> Result<PendingOperation> {
        let mut entries = self.entries.lock().await;

        if entries.contains_key(request_id) {
            warn!("Refusing duplicate registration for request {}", request_id);
            return Err(MonitorError::DuplicateRequest(request_id.to_string()));
        }

        let (settle_tx, outcome_rx) = oneshot::channel();
        entries.insert(request_id.clone(), PendingEntry {
            action,
            registered_at: Utc::now(),
            settle_tx,
        });

        debug!("Registered pending {} for request {}", action, request_id);

        Ok(PendingOperation {
            request_id: request_id.clone(),
            action,
            outcome_rx,
        })
    }

    /// Settle the entry for `request_id`. Returns `false` when there was
    /// nothing to settle (unknown id, or already settled).
    pub async fn settle(&self, request_id: &str, outcome: Outcome) -> bool {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.remove(request_id)
        };

        let entry = match entry {
            Some(entry) => entry,
            None => {
                debug!("No pending entry for request {}, ignoring settlement", request_id);
                return false;
            }
        };

        match &outcome {
            Ok(_) => debug!("Resolving {} for request {}", entry.action, request_id),
            Err(e) => debug!("Rejecting {} for request {}: {}", entry.action, request_id, e),
        }

        // Caller may have stopped waiting; the entry is retired either way
        if entry.settle_tx.send(outcome).is_err() {
            debug!("Waiter for request {} already gone", request_id);
        }

        true
    }

    pub async fn contains(&self, request_id: &str) -> bool {
        let entries = self.entries.lock().await;
        entries.contains_key(request_id)
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.lock().await;
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Reject everything still pending, e.g. when the session ends, and
    /// report what was rejected, oldest first.
    pub async fn reject_all(&self, error: MonitorError) -> Vec<PendingInfo> {
        let drained: Vec<(RequestId, PendingEntry)> = {
            let mut entries = self.entries.lock().await;
            entries.drain().collect()
        };

        let mut rejected = Vec::with_capacity(drained.len());
        for (request_id, entry) in drained {
            debug!("Rejecting request {} on teardown", request_id);
            let _ = entry.settle_tx.send(Err(error.clone()));

            rejected.push(PendingInfo {
                request_id,
                action: entry.action,
                registered_at: entry.registered_at,
            });
        }

        rejected.sort_by_key(|info| info.registered_at);
        rejected
    }
}
