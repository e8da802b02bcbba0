use autoreply_core::{AutomationId, CoreError};
use thiserror::Error;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Automation not found: {0}")]
    NotFound(AutomationId),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
