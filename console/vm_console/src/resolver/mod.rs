use std::sync::Arc;
use log::{info, warn, debug};
use status_engine::{classify, failure_message, Action, Classification, StatusPayload};

use crate::error::MonitorError;
use crate::presenter::PresentationSink;
use crate::registry::CorrelationRegistry;


/// Turns delivered rows into settlements.
///
/// Every row goes to the sink as progress. A terminal row settles the
/// registry entry named by the row's own `form_submission_unique_id`, never
/// the id of whatever subscription carried it.
#[derive(Clone)]
pub struct StatusResolver {
    registry: CorrelationRegistry,
    sink: Arc<dyn PresentationSink>,
}

impl StatusResolver {
    pub fn new(registry: CorrelationRegistry, sink: Arc<dyn PresentationSink>) -> Self {
        Self { registry, sink }
    }

    pub fn sink(&self) -> &Arc<dyn PresentationSink> {
        &self.sink
    }

    pub async fn handle(&self, payload: &StatusPayload, action: Action) -> Classification {
        debug!("Status update for {}: {:?}", action, payload.status());
        self.sink.progress(payload, action);

        let classification = classify(payload, action);
        if !classification.is_terminal() {
            return classification;
        }

        let request_id = match payload.request_id() {
            Some(id) => id,
            None => {
                warn!("Terminal status {:?} without a request id, nothing to settle", payload.status());
                return classification;
            }
        };

        match classification {
            Classification::Success => {
                if self.registry.settle(request_id, Ok(payload.clone())).await {
                    info!("{} for request {} completed", action, request_id);
                    self.sink.success(payload, action);
                }
            },
            Classification::Failure => {
                let message = failure_message(payload);
                let outcome = Err(MonitorError::Failed { message: message.clone() });

                if self.registry.settle(request_id, outcome).await {
                    warn!("{} for request {} failed: {}", action, request_id, message);
                    self.sink.failure(&message, action);
                }
            },
            Classification::Pending => {}
        }

        classification
    }
}
