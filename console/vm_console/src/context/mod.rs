use std::sync::Arc;
use std::time::Duration;
use log::{info, warn, error, debug};
use serde_json::Value;
use status_engine::{Action, Classification, StatusPayload};

use crate::config::Config;
use crate::dispatcher::ActionDispatcher;
use crate::error::{MonitorError, Result};
use crate::poller::StatusPoller;
use crate::presenter::PresentationSink;
use crate::realtime::{ChangeFeed, RealtimeFeed};
use crate::registry::{CorrelationRegistry, Outcome, PendingInfo, PendingOperation};
use crate::request::RequestId;
use crate::resolver::StatusResolver;
use crate::subscriber::ChangeFeedSubscriber;


/// One console session: dispatcher, pending table, the single change-feed
/// subscription and the optional polling fallback, wired together.
pub struct MonitorContext<F: ChangeFeed> {
    dispatcher: ActionDispatcher,
    registry: CorrelationRegistry,
    resolver: StatusResolver,
    subscriber: ChangeFeedSubscriber<F>,
    poller: Option<StatusPoller>,
}

impl MonitorContext<RealtimeFeed> {
    pub fn from_config(config: &Config, sink: Arc<dyn PresentationSink>) -> Self {
        let poller = if config.store.url.trim().is_empty() {
            None
        } else {
            Some(StatusPoller::new(config.poller_config()))
        };

        Self::new(
            ActionDispatcher::new(config.dispatcher_config()),
            RealtimeFeed::new(config.realtime_config()),
            poller,
            sink,
            config.monitor_timeout(),
        )
    }
}

impl<F: ChangeFeed> MonitorContext<F> {
    pub fn new(
        dispatcher: ActionDispatcher,
        feed: F,
        poller: Option<StatusPoller>,
        sink: Arc<dyn PresentationSink>,
        timeout: Duration,
    ) -> Self {
        let registry = CorrelationRegistry::new();
        let resolver = StatusResolver::new(registry.clone(), sink);
        let subscriber = ChangeFeedSubscriber::new(feed, registry.clone(), resolver.clone(), timeout);

        Self {
            dispatcher,
            registry,
            resolver,
            subscriber,
            poller,
        }
    }

    pub fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn subscriber(&self) -> &ChangeFeedSubscriber<F> {
        &self.subscriber
    }

    /// Dispatch `action` and wait for its terminal status.
    ///
    /// Actions without a success status on the feed complete with the
    /// webhook response itself.
    pub async fn run(&self, action: Action, request_id: &RequestId) -> Outcome {
        if action.is_control() && action.terminal_success().is_none() {
            let outcome = match self.dispatcher.trigger(action, request_id).await {
                Ok(data) => response_payload(data),
                Err(e) => Err(MonitorError::from(e)),
            };

            match &outcome {
                Ok(payload) => self.resolver.sink().success(payload, action),
                Err(e) => self.resolver.sink().failure(&e.to_string(), action),
            }
            return outcome;
        }

        self.start(action, request_id).await?.wait().await
    }

    /// Register, subscribe and dispatch. The returned handle resolves once
    /// the backend reports a terminal status for `request_id`.
    ///
    /// The subscription is acknowledged before the webhook fires so the
    /// first status change cannot be missed.
    pub async fn start(&self, action: Action, request_id: &RequestId) -> Result<PendingOperation> {
        if !action.is_control() || action.terminal_success().is_none() {
            return Err(MonitorError::Validation(format!("{} is not a monitored action", action)));
        }

        let operation = self.registry.register(request_id, action).await?;

        if let Err(e) = self.subscriber.subscribe(request_id, action).await {
            error!("Could not subscribe for request {}: {}", request_id, e);
            self.registry.settle(request_id.as_str(), Err(e.clone())).await;
            return Err(e);
        }

        if let Err(e) = self.dispatcher.trigger(action, request_id).await {
            let e = MonitorError::from(e);
            error!("Dispatch of {} for request {} failed: {}", action, request_id, e);

            self.registry.settle(request_id.as_str(), Err(e.clone())).await;
            self.subscriber.release(request_id).await;
            self.resolver.sink().failure(&e.to_string(), action);
            return Err(e);
        }

        info!("Waiting for {} on request {}", action, request_id);
        Ok(operation)
    }

    /// Monitor a request that was dispatched elsewhere, e.g. after a restart.
    ///
    /// The current row is polled once after subscribing, so a status
    /// reached before the subscription existed still settles the handle.
    pub async fn watch(&self, action: Action, request_id: &RequestId) -> Result<PendingOperation> {
        if action.terminal_success().is_none() {
            return Err(MonitorError::Validation(format!("{} has no terminal status to watch for", action)));
        }

        let operation = self.registry.register(request_id, action).await?;

        if let Err(e) = self.subscriber.subscribe(request_id, action).await {
            self.registry.settle(request_id.as_str(), Err(e.clone())).await;
            return Err(e);
        }

        if self.poller.is_some() {
            if let Err(e) = self.reconcile(request_id, action).await {
                warn!("Initial status poll for request {} failed: {}", request_id, e);
            }
        }

        Ok(operation)
    }

    /// Poll the store once and feed the row through the resolver.
    pub async fn reconcile(&self, request_id: &RequestId, action: Action) -> Result<Option<Classification>> {
        let payload = match self.poll_status(request_id).await? {
            Some(payload) => payload,
            None => return Ok(None),
        };

        let classification = self.resolver.handle(&payload, action).await;
        debug!("Reconciled request {} as {:?}", request_id, classification);

        if classification.is_terminal() && !self.registry.contains(request_id.as_str()).await {
            self.subscriber.release(request_id).await;
        }

        Ok(Some(classification))
    }

    pub async fn poll_status(&self, request_id: &RequestId) -> Result<Option<StatusPayload>> {
        let poller = self.poller.as_ref()
            .ok_or_else(|| MonitorError::Poll("No status store configured".to_string()))?;

        Ok(poller.poll(request_id).await?)
    }

    /// Session teardown: drop the subscription and fail whatever is left.
    /// Returns the operations that were cancelled.
    pub async fn shutdown(&self) -> Vec<PendingInfo> {
        if let Some(request_id) = self.subscriber.release_active().await {
            info!("Released subscription for request {} on shutdown", request_id);
        }

        let cancelled = self.registry.reject_all(MonitorError::Cancelled).await;
        for info in &cancelled {
            info!("Cancelled {} for request {} (pending since {})", info.action, info.request_id, info.registered_at);
        }

        cancelled
    }
}

// A webhook acknowledgement as a row; non-object bodies land in `extra`
fn response_payload(data: Value) -> Outcome {
    match data {
        Value::Object(_) => Ok(StatusPayload::from_value(data)?),
        other => {
            let mut payload = StatusPayload::default();
            payload.extra.insert("response".to_string(), other);
            Ok(payload)
        }
    }
}
