//! grid-client: Ledger and co-processor plumbing for confidential grid records
//!
//! This crate provides:
//! 1. A [`RecordStore`] holding the session's view of the grid records
//! 2. Record creation with FHE-encrypted load values
//! 3. Self-relayed decryption, verified by the ledger contract
//! 4. Alloy and HTTP implementations of the ledger and co-processor seams
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use grid_client::{signer_from_env, AlloyLedger, CreateRequest, RecordStore, RelayerGateway};
//! use grid_core::GridConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GridConfig::load("grid.json")?;
//!     let signer = signer_from_env(&config.private_key_env)?;
//!     let ledger = Arc::new(AlloyLedger::connect(&config, signer).await?);
//!     let gateway = Arc::new(RelayerGateway::new(config.relayer_url.clone())?);
//!
//!     let store = RecordStore::new(&config, ledger, gateway);
//!     store.initialize().await?;
//!     let id = store.create(CreateRequest::new("Plant A", 600, 1000)).await?;
//!     store.request_verification(&id).await?;
//!     Ok(())
//! }
//! ```

mod coordinator;
mod error;
mod gateway;
mod ledger;
pub mod metrics;
mod relayer;
mod rpc;
mod status;
mod store;
pub mod testing;
mod ticker;

pub use coordinator::{DecryptionCoordinator, LedgerProofSubmitter, VerificationOutcome};
pub use error::{DecryptionFailure, GatewayError, LedgerError, OperationError, Result};
pub use gateway::{
    DecryptionProof, DecryptionRequest, DecryptionResult, EncryptedInput, EncryptionGateway,
    ProofSubmitter,
};
pub use ledger::{CreateRecordRequest, FinalizedTx, LedgerClient};
pub use relayer::{DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, RelayerGateway};
pub use rpc::{signer_from_env, AlloyLedger};
pub use status::StatusSlot;
pub use store::{CreateRequest, LocalDecryption, RecordStore};
pub use ticker::{LoadTicker, MAX_SAMPLE, MIN_SAMPLE};
