//! Error types shared across Inspectra crates

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SharedError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid subscription status: {0}")]
    InvalidStatus(String),

    #[error("Invalid support level: {0}")]
    InvalidSupportLevel(String),
}
