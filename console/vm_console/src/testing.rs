// Shared fixtures for unit tests across modules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use status_engine::{Action, StatusPayload};

use crate::presenter::PresentationSink;
use crate::realtime::{ChangeFeed, FeedError, FeedSubscription};
use crate::request::RequestId;

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Progress(Option<String>, Action),
    Success(Option<String>, Action),
    Failure(String, Action),
    LoadingFinished,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl PresentationSink for RecordingSink {
    fn progress(&self, payload: &StatusPayload, action: Action) {
        self.push(SinkEvent::Progress(payload.request_status.clone(), action));
    }

    fn success(&self, payload: &StatusPayload, action: Action) {
        self.push(SinkEvent::Success(payload.request_status.clone(), action));
    }

    fn failure(&self, message: &str, action: Action) {
        self.push(SinkEvent::Failure(message.to_string(), action));
    }

    fn loading_finished(&self) {
        self.push(SinkEvent::LoadingFinished);
    }
}

// In-memory change feed. Tests push rows by request id.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    inner: Arc<Mutex<MemoryFeedState>>,
}

#[derive(Debug, Default)]
struct MemoryFeedState {
    senders: HashMap<String, (mpsc::UnboundedSender<StatusPayload>, CancellationToken)>,
    opened: Vec<(String, CancellationToken)>,
    fail_next: Option<String>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a row to the subscription for `request_id`. Returns false
    /// when nobody is listening any more.
    pub fn push(&self, request_id: &str, payload: StatusPayload) -> bool {
        let state = self.inner.lock().unwrap();
        match state.senders.get(request_id) {
            Some((tx, cancel)) if !cancel.is_cancelled() => tx.send(payload).is_ok(),
            _ => false,
        }
    }

    pub fn opened(&self) -> Vec<String> {
        let state = self.inner.lock().unwrap();
        state.opened.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn live(&self) -> Vec<String> {
        let state = self.inner.lock().unwrap();
        state.opened.iter()
            .filter(|(_, token)| !token.is_cancelled())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn fail_next_open(&self, reason: &str) {
        self.inner.lock().unwrap().fail_next = Some(reason.to_string());
    }
}

impl ChangeFeed for MemoryFeed {
    async fn open(&self, request_id: &RequestId) -> Result<FeedSubscription, FeedError> {
        let mut state = self.inner.lock().unwrap();

        if let Some(reason) = state.fail_next.take() {
            return Err(FeedError::JoinRejected(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        state.senders.insert(request_id.to_string(), (tx, cancel.clone()));
        state.opened.push((request_id.to_string(), cancel.clone()));

        Ok(FeedSubscription::new(rx, cancel))
    }
}

pub fn row(id: Option<&str>, status: &str) -> StatusPayload {
    StatusPayload {
        request_status: Some(status.to_string()),
        form_submission_unique_id: id.map(|s| s.to_string()),
        ..Default::default()
    }
}
