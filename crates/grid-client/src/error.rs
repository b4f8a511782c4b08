//! Error types for grid-client

use alloy_primitives::B256;
use thiserror::Error;

/// Failures reported by a [`crate::LedgerClient`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("No signer account configured")]
    NotConnected,

    #[error("Transaction rejected by signer")]
    Rejected,

    #[error("Record already verified")]
    AlreadyVerified,

    #[error("Transaction reverted: {reason}")]
    Reverted { reason: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Transaction did not reach finality: {0}")]
    Finality(String),

    #[error("Failed to decode contract response: {0}")]
    Decode(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failures reported by an [`crate::EncryptionGateway`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Co-processor session not initialized")]
    Unavailable,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Co-processor returned no clear value for handle {0}")]
    MissingClearValue(B256),

    #[error("Proof submission failed: {0}")]
    Submission(LedgerError),

    #[error("Relayer transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// Why a verification round-trip failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionFailure {
    #[error("ciphertext handle lookup failed: {0}")]
    Handle(LedgerError),

    #[error("{0}")]
    Gateway(GatewayError),
}

/// Outcome of a failed store operation
///
/// "Already verified" is not represented here: it resolves as
/// [`crate::VerificationOutcome::AlreadyVerified`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("No active account")]
    NotConnected,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encryption unavailable: {0}")]
    EncryptionUnavailable(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Transaction rejected by user")]
    TransactionRejected,

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(DecryptionFailure),
}

impl OperationError {
    /// Map a write-path ledger failure into the operation taxonomy
    pub fn from_ledger_write(err: LedgerError) -> Self {
        match err {
            LedgerError::NotConnected => OperationError::NotConnected,
            LedgerError::Rejected => OperationError::TransactionRejected,
            other => OperationError::Ledger(other),
        }
    }

    /// Map an encryption-path gateway failure into the operation taxonomy
    pub fn from_encryption(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable => {
                OperationError::EncryptionUnavailable(GatewayError::Unavailable.to_string())
            }
            other => OperationError::EncryptionFailed(other.to_string()),
        }
    }

    /// Short machine-readable kind, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            OperationError::NotConnected => "not_connected",
            OperationError::InvalidInput(_) => "invalid_input",
            OperationError::EncryptionUnavailable(_) => "encryption_unavailable",
            OperationError::EncryptionFailed(_) => "encryption_failed",
            OperationError::TransactionRejected => "transaction_rejected",
            OperationError::Ledger(_) => "ledger_error",
            OperationError::DecryptionFailed(_) => "decryption_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;
