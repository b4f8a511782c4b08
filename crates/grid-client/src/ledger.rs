//! Ledger contract surface consumed by the client

use alloy_primitives::{Address, Bytes, TxHash, B256};
use async_trait::async_trait;

use grid_core::{Record, RecordId};

use crate::error::LedgerError;
use crate::gateway::{DecryptionProof, EncryptedInput};

/// Arguments of the contract's record creation entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRecordRequest {
    pub id: RecordId,
    pub name: String,
    pub encrypted_load: B256,
    pub input_proof: Bytes,
    pub capacity: u64,
    pub aux_public: u64,
    pub tag: String,
}

impl CreateRecordRequest {
    pub fn new(id: RecordId, name: String, encrypted: EncryptedInput, capacity: u64) -> Self {
        Self {
            id,
            name,
            encrypted_load: encrypted.handle,
            input_proof: encrypted.proof,
            capacity,
            aux_public: grid_core::constants::AUX_PUBLIC_DEFAULT,
            tag: grid_core::constants::RECORD_TAG.to_string(),
        }
    }
}

/// A transaction that reached finality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizedTx {
    pub hash: TxHash,
    pub block_number: Option<u64>,
}

/// Read and write views over the authoritative grid contract
///
/// Reads may be served from a slightly stale view. Writes return as soon as
/// the transaction is submitted; callers must pass the hash to
/// [`LedgerClient::wait_for_finality`] before treating the effect as durable.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Address of the grid contract
    fn contract_address(&self) -> Address;

    /// Signer identity, `None` when no account is connected
    fn account(&self) -> Option<Address>;

    async fn list_ids(&self) -> Result<Vec<RecordId>, LedgerError>;

    async fn get_record(&self, id: &RecordId) -> Result<Record, LedgerError>;

    async fn get_ciphertext_handle(&self, id: &RecordId) -> Result<B256, LedgerError>;

    async fn submit_create(&self, request: &CreateRecordRequest) -> Result<TxHash, LedgerError>;

    async fn submit_verify(
        &self,
        id: &RecordId,
        proof: &DecryptionProof,
    ) -> Result<TxHash, LedgerError>;

    async fn wait_for_finality(&self, tx: TxHash) -> Result<FinalizedTx, LedgerError>;
}
