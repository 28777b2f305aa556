use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use log::{info, warn, debug};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use status_engine::{Action, StatusPayload};

use crate::error::{MonitorError, Result};
use crate::realtime::ChangeFeed;
use crate::registry::CorrelationRegistry;
use crate::request::RequestId;
use crate::resolver::StatusResolver;


/// Default window after which an unfinished subscription is abandoned.
pub const MONITOR_TIMEOUT: Duration = Duration::from_secs(30 * 60);

// The one live subscription
#[derive(Debug)]
struct ActiveSubscription {
    generation: u64,
    request_id: RequestId,
    action: Action,
    cancel: CancellationToken,
    monitor: Option<JoinHandle<()>>,
}

// State shared between the subscriber and its monitor task
struct Shared {
    slot: Mutex<Option<ActiveSubscription>>,
    registry: CorrelationRegistry,
    resolver: StatusResolver,
    generations: AtomicU64,
}

impl Shared {
    // Tear down `sub`. The caller already removed it from the slot.
    async fn release(&self, mut sub: ActiveSubscription, superseded_by: Option<&RequestId>) {
        sub.cancel.cancel();
        if let Some(monitor) = sub.monitor.take() {
            monitor.abort();
        }

        debug!("Released subscription for request {}", sub.request_id);

        if let Some(next) = superseded_by {
            if next != &sub.request_id {
                let error = MonitorError::Superseded(sub.request_id.to_string());
                if self.registry.settle(sub.request_id.as_str(), Err(error)).await {
                    info!("Request {} superseded by {}", sub.request_id, next);
                }
            }
        }
    }
}

/// Keeps at most one change-feed subscription alive.
///
/// Each subscription gets a monitor task that waits for either a row or
/// the timeout. Rows are handed to the resolver while holding the slot lock,
/// so once `subscribe` has swapped the slot no row for the old request can
/// reach the resolver.
pub struct ChangeFeedSubscriber<F: ChangeFeed> {
    feed: F,
    shared: Arc<Shared>,
    timeout: Duration,
}

impl<F: ChangeFeed> ChangeFeedSubscriber<F> {
    pub fn new(feed: F, registry: CorrelationRegistry, resolver: StatusResolver, timeout: Duration) -> Self {
        Self {
            feed,
            shared: Arc::new(Shared {
                slot: Mutex::new(None),
                registry,
                resolver,
                generations: AtomicU64::new(0),
            }),
            timeout,
        }
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Replace any active subscription with one for `request_id` and
    /// return once the feed acknowledged it.
    pub async fn subscribe(&self, request_id: &RequestId, action: Action) -> Result<()> {
        let mut slot = self.shared.slot.lock().await;

        if let Some(previous) = slot.take() {
            self.shared.release(previous, Some(request_id)).await;
        }

        info!("Subscribing to updates for request {}", request_id);

        let subscription = self.feed.open(request_id).await?;
        let (updates, cancel) = subscription.into_parts();
        let generation = self.shared.generations.fetch_add(1, Ordering::Relaxed) + 1;

        let monitor = tokio::spawn(monitor(
            self.shared.clone(),
            generation,
            request_id.clone(),
            action,
            updates,
            cancel.clone(),
            self.timeout,
        ));

        *slot = Some(ActiveSubscription {
            generation,
            request_id: request_id.clone(),
            action,
            cancel,
            monitor: Some(monitor),
        });

        Ok(())
    }

    /// Release the active subscription if it is for `request_id`.
    pub async fn release(&self, request_id: &RequestId) -> bool {
        let mut slot = self.shared.slot.lock().await;

        let matches = slot.as_ref().map_or(false, |sub| &sub.request_id == request_id);
        if !matches {
            return false;
        }

        if let Some(sub) = slot.take() {
            self.shared.release(sub, None).await;
        }
        true
    }

    pub async fn release_active(&self) -> Option<RequestId> {
        let mut slot = self.shared.slot.lock().await;
        let sub = slot.take()?;
        let request_id = sub.request_id.clone();
        self.shared.release(sub, None).await;
        Some(request_id)
    }

    pub async fn active(&self) -> Option<(RequestId, Action)> {
        let slot = self.shared.slot.lock().await;
        slot.as_ref().map(|sub| (sub.request_id.clone(), sub.action))
    }
}

// Per-subscription task: deliver rows until terminal, released, or timed out
async fn monitor(
    shared: Arc<Shared>,
    generation: u64,
    request_id: RequestId,
    action: Action,
    mut updates: mpsc::UnboundedReceiver<StatusPayload>,
    cancel: CancellationToken,
    window: Duration,
) {
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    let mut feed_open = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = &mut deadline => {
                let mut slot = shared.slot.lock().await;
                if !is_current(&slot, generation) {
                    break;
                }

                slot.take();
                drop(slot);
                cancel.cancel();

                warn!("Unsubscribed from request {} after timeout", request_id);
                shared.registry.settle(request_id.as_str(), Err(MonitorError::Timeout)).await;
                shared.resolver.sink().loading_finished();
                break;
            }

            update = updates.recv(), if feed_open => {
                let payload = match update {
                    Some(payload) => payload,
                    None => {
                        // Socket gone; only the timeout or a release ends us now
                        warn!("Change feed for request {} closed", request_id);
                        feed_open = false;
                        continue;
                    }
                };

                let mut slot = shared.slot.lock().await;
                if !is_current(&slot, generation) {
                    break;
                }

                let classification = shared.resolver.handle(&payload, action).await;

                if classification.is_terminal() && !shared.registry.contains(request_id.as_str()).await {
                    slot.take();
                    drop(slot);
                    cancel.cancel();
                    debug!("Monitoring for request {} finished ({:?})", request_id, classification);
                    break;
                }
            }
        }
    }
}

fn is_current(slot: &Option<ActiveSubscription>, generation: u64) -> bool {
    slot.as_ref().map_or(false, |sub| sub.generation == generation)
}
