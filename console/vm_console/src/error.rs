use thiserror::Error;
use status_engine::EngineError;

use crate::dispatcher::DispatchError;
use crate::poller::PollError;
use crate::realtime::FeedError;

// Outcome error for a monitored operation. Clone so a single outcome can
// travel through the registry's oneshot and still be logged by the sender.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Change feed error: {0}")]
    Feed(String),

    #[error("Status poll error: {0}")]
    Poll(String),

    #[error("{message}")]
    Failed { message: String },

    #[error("Subscription timed out")]
    Timeout,

    #[error("Request {0} was superseded by a newer subscription")]
    Superseded(String),

    #[error("Request {0} is already pending")]
    DuplicateRequest(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl From<DispatchError> for MonitorError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Validation(msg) => MonitorError::Validation(msg),
            other => MonitorError::Dispatch(other.to_string()),
        }
    }
}

impl From<FeedError> for MonitorError {
    fn from(e: FeedError) -> Self {
        MonitorError::Feed(e.to_string())
    }
}

impl From<PollError> for MonitorError {
    fn from(e: PollError) -> Self {
        MonitorError::Poll(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
