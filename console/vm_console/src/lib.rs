// File: console/vm_console/src/lib.rs

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod poller;
pub mod presenter;
pub mod realtime;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod subscriber;

#[cfg(test)]
mod testing;

pub use config::{Config, ConfigError};
pub use context::MonitorContext;
pub use dispatcher::{ActionDispatcher, DispatchError, DispatcherConfig};
pub use error::{MonitorError, Result};
pub use poller::{PollError, StatusPoller};
pub use presenter::{ConsolePresenter, PresentationSink};
pub use realtime::{ChangeFeed, FeedError, RealtimeConfig, RealtimeFeed};
pub use registry::{CorrelationRegistry, Outcome, PendingOperation};
pub use request::RequestId;
pub use resolver::StatusResolver;
pub use subscriber::{ChangeFeedSubscriber, MONITOR_TIMEOUT};

pub use status_engine::{Action, Classification, StatusPayload};
