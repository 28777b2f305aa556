use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid status payload: {0}")]
    InvalidPayload(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
