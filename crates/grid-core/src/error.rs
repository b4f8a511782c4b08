//! Error types for grid-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid record id: {0}")]
    InvalidRecordId(String),

    #[error("Invalid config: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },
}
