//! FHE co-processor surface consumed by the client
//!
//! Decryption is a two-phase protocol. The co-processor decrypts the
//! requested handles and produces a proof; before the gateway hands the
//! clear values back, it passes that proof to the request's
//! [`ProofSubmitter`], which relays it to the ledger. The gateway only
//! returns clear values once the submitter has accepted the proof.

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::{GatewayError, LedgerError};

/// Ciphertext handle and input proof bound to a contract and requester
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    pub handle: B256,
    pub proof: Bytes,
}

/// Co-processor output to be authenticated on-chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionProof {
    /// ABI-encoded clear values, one 32-byte word per handle in request order
    pub abi_encoded_clear_values: Bytes,
    /// Co-processor signatures over the clear values
    pub proof: Bytes,
}

impl DecryptionProof {
    /// ABI-encode clear values as consecutive `uint256` words
    pub fn encode_clear_values(values: &[u64]) -> Bytes {
        let mut out = Vec::with_capacity(values.len() * 32);
        for value in values {
            out.extend_from_slice(&U256::from(*value).to_be_bytes::<32>());
        }
        out.into()
    }

    /// Decode the clear value at `index`
    pub fn clear_value_at(&self, index: usize) -> Option<U256> {
        let start = index.checked_mul(32)?;
        let word = self.abi_encoded_clear_values.get(start..start + 32)?;
        Some(U256::from_be_slice(word))
    }
}

/// Second phase of a decryption: relays the proof to the ledger
#[async_trait]
pub trait ProofSubmitter: Send + Sync {
    async fn submit(&self, proof: &DecryptionProof) -> Result<(), LedgerError>;
}

/// A decryption request carrying its own proof relay
pub struct DecryptionRequest<'a> {
    pub handles: Vec<B256>,
    pub contract: Address,
    pub on_proof: &'a dyn ProofSubmitter,
}

impl<'a> DecryptionRequest<'a> {
    pub fn new(handles: Vec<B256>, contract: Address, on_proof: &'a dyn ProofSubmitter) -> Self {
        Self {
            handles,
            contract,
            on_proof,
        }
    }

    /// Run phase two
    pub async fn relay(&self, proof: &DecryptionProof) -> Result<(), GatewayError> {
        self.on_proof
            .submit(proof)
            .await
            .map_err(GatewayError::Submission)
    }

    /// Check that every requested handle has a clear value
    pub fn ensure_complete(&self, clear_values: &BTreeMap<B256, u64>) -> Result<(), GatewayError> {
        match self.handles.iter().find(|h| !clear_values.contains_key(*h)) {
            Some(missing) => Err(GatewayError::MissingClearValue(*missing)),
            None => Ok(()),
        }
    }
}

/// Clear values accepted by the ledger, with the proof that carried them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionResult {
    pub clear_values: BTreeMap<B256, u64>,
    pub proof: DecryptionProof,
}

#[async_trait]
pub trait EncryptionGateway: Send + Sync {
    /// Start the co-processor session
    async fn initialize(&self) -> Result<(), GatewayError>;

    fn is_ready(&self) -> bool;

    /// Encrypt `value` for `contract`, on behalf of `requester`
    ///
    /// Fails with [`GatewayError::Unavailable`] before [`Self::initialize`].
    async fn encrypt(
        &self,
        contract: Address,
        requester: Address,
        value: u64,
    ) -> Result<EncryptedInput, GatewayError>;

    /// Decrypt the request's handles and relay the proof through it
    async fn decrypt(
        &self,
        request: DecryptionRequest<'_>,
    ) -> Result<DecryptionResult, GatewayError>;
}
