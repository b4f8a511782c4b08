//! Self-relayed decryption
//!
//! The client asks the co-processor to decrypt a record's load handle, then
//! relays the co-processor's proof to the ledger itself. The ledger checks
//! the proof before it accepts the cleartext; the coordinator never treats
//! co-processor output as confirmed on its own.

use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use grid_core::RecordId;

use crate::error::{DecryptionFailure, GatewayError, LedgerError, OperationError, Result};
use crate::gateway::{DecryptionProof, DecryptionRequest, EncryptionGateway, ProofSubmitter};
use crate::ledger::LedgerClient;

/// Successful result of a verification request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The ledger accepted our proof. The value is provisional until a
    /// refresh observes `verified = true`.
    Verified { clear_load: u64 },
    /// The record was verified before us (or concurrently).
    /// `clear_load` is the ledger's value when it could be read back.
    AlreadyVerified { clear_load: Option<u64> },
}

impl VerificationOutcome {
    pub fn clear_load(&self) -> Option<u64> {
        match self {
            VerificationOutcome::Verified { clear_load } => Some(*clear_load),
            VerificationOutcome::AlreadyVerified { clear_load } => *clear_load,
        }
    }
}

/// Relays a decryption proof to the ledger's verification entry point
pub struct LedgerProofSubmitter<'a> {
    ledger: &'a dyn LedgerClient,
    id: &'a RecordId,
}

impl<'a> LedgerProofSubmitter<'a> {
    pub fn new(ledger: &'a dyn LedgerClient, id: &'a RecordId) -> Self {
        Self { ledger, id }
    }
}

#[async_trait]
impl ProofSubmitter for LedgerProofSubmitter<'_> {
    async fn submit(&self, proof: &DecryptionProof) -> std::result::Result<(), LedgerError> {
        let tx = self.ledger.submit_verify(self.id, proof).await?;
        let finalized = self.ledger.wait_for_finality(tx).await?;
        debug!(
            id = %self.id,
            tx = %finalized.hash,
            block = ?finalized.block_number,
            "Verification transaction final"
        );
        Ok(())
    }
}

/// Drives decryption requests for single records
pub struct DecryptionCoordinator {
    ledger: Arc<dyn LedgerClient>,
    gateway: Arc<dyn EncryptionGateway>,
}

impl DecryptionCoordinator {
    pub fn new(ledger: Arc<dyn LedgerClient>, gateway: Arc<dyn EncryptionGateway>) -> Self {
        Self { ledger, gateway }
    }

    /// Decrypt a record's load and have the ledger authenticate it
    pub async fn verify(&self, id: &RecordId) -> Result<VerificationOutcome> {
        let record = self.ledger.get_record(id).await.map_err(OperationError::Ledger)?;
        if record.verified {
            info!(id = %id, "Record already verified on-chain, skipping decryption");
            return Ok(VerificationOutcome::AlreadyVerified {
                clear_load: Some(record.clear_load),
            });
        }

        let handle = self
            .ledger
            .get_ciphertext_handle(&record.ciphertext_ref)
            .await
            .map_err(|e| OperationError::DecryptionFailed(DecryptionFailure::Handle(e)))?;

        let submitter = LedgerProofSubmitter::new(self.ledger.as_ref(), id);
        let request = DecryptionRequest::new(vec![handle], self.ledger.contract_address(), &submitter);

        match self.gateway.decrypt(request).await {
            Ok(result) => {
                // The ledger authenticated the ABI words, not the decoded map
                let clear_load = result
                    .proof
                    .clear_value_at(0)
                    .map(|word| word.saturating_to::<u64>())
                    .ok_or(OperationError::DecryptionFailed(DecryptionFailure::Gateway(
                        GatewayError::MissingClearValue(handle),
                    )))?;
                info!(id = %id, handle = %handle, "Decryption verified on-chain");
                Ok(VerificationOutcome::Verified { clear_load })
            }
            Err(GatewayError::Submission(err)) => self.resolve_submission_failure(id, handle, err).await,
            Err(err) => Err(OperationError::DecryptionFailed(DecryptionFailure::Gateway(err))),
        }
    }

    /// A rejected proof submission may just mean someone else verified first
    async fn resolve_submission_failure(
        &self,
        id: &RecordId,
        handle: B256,
        err: LedgerError,
    ) -> Result<VerificationOutcome> {
        match self.ledger.get_record(id).await {
            Ok(record) if record.verified => {
                info!(id = %id, error = %err, "Verification raced with another submitter");
                Ok(VerificationOutcome::AlreadyVerified {
                    clear_load: Some(record.clear_load),
                })
            }
            _ if err == LedgerError::AlreadyVerified => {
                info!(id = %id, "Ledger reports record already verified");
                Ok(VerificationOutcome::AlreadyVerified { clear_load: None })
            }
            _ => {
                warn!(id = %id, handle = %handle, error = %err, "Proof submission failed");
                Err(OperationError::DecryptionFailed(DecryptionFailure::Gateway(
                    GatewayError::Submission(err),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryGateway, MemoryLedger};
    use alloy_primitives::Address;

    async fn seeded(load: u64) -> (Arc<MemoryLedger>, Arc<MemoryGateway>, RecordId) {
        let ledger = Arc::new(MemoryLedger::new(Address::repeat_byte(0xc0)).with_account(Address::repeat_byte(0x01)));
        let gateway = Arc::new(MemoryGateway::ready());
        let id = RecordId::from_millis(1);
        let input = gateway
            .encrypt(ledger.contract_address(), Address::repeat_byte(0x01), load)
            .await
            .unwrap();
        ledger.insert_record(&id, "Plant A", 1000, input.handle).await;
        (ledger, gateway, id)
    }

    #[tokio::test]
    async fn test_verify_happy_path() {
        let (ledger, gateway, id) = seeded(600).await;
        let coordinator = DecryptionCoordinator::new(ledger.clone(), gateway.clone());

        let outcome = coordinator.verify(&id).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Verified { clear_load: 600 });

        let record = ledger.get_record(&id).await.unwrap();
        assert!(record.verified);
        assert_eq!(record.clear_load, 600);
        assert_eq!(gateway.decrypt_calls(), 1);
    }

    #[tokio::test]
    async fn test_verified_record_short_circuits() {
        let (ledger, gateway, id) = seeded(600).await;
        ledger.mark_verified(&id, 600).await;
        let writes_before = ledger.write_calls();

        let coordinator = DecryptionCoordinator::new(ledger.clone(), gateway.clone());
        let outcome = coordinator.verify(&id).await.unwrap();

        assert_eq!(outcome, VerificationOutcome::AlreadyVerified { clear_load: Some(600) });
        assert_eq!(gateway.decrypt_calls(), 0);
        assert_eq!(ledger.write_calls(), writes_before);
    }

    #[tokio::test]
    async fn test_race_resolves_as_already_verified() {
        let (ledger, gateway, id) = seeded(600).await;
        // Another actor lands its verification between our read and our submit
        ledger.race_next_verify();

        let coordinator = DecryptionCoordinator::new(ledger.clone(), gateway.clone());
        let outcome = coordinator.verify(&id).await.unwrap();

        assert_eq!(outcome, VerificationOutcome::AlreadyVerified { clear_load: Some(600) });
    }

    #[tokio::test]
    async fn test_ledger_already_verified_with_stale_reread() {
        let (ledger, gateway, id) = seeded(600).await;
        ledger.fail_next_submit(LedgerError::AlreadyVerified).await;
        ledger.serve_stale(&id, true).await;

        let coordinator = DecryptionCoordinator::new(ledger.clone(), gateway.clone());
        let outcome = coordinator.verify(&id).await.unwrap();

        assert_eq!(outcome, VerificationOutcome::AlreadyVerified { clear_load: None });
        assert_eq!(gateway.decrypt_calls(), 1);
    }

    /// Reports a different decoded value than the ABI words it relayed
    struct MisreportingGateway(Arc<MemoryGateway>);

    #[async_trait]
    impl EncryptionGateway for MisreportingGateway {
        async fn initialize(&self) -> std::result::Result<(), GatewayError> {
            self.0.initialize().await
        }

        fn is_ready(&self) -> bool {
            self.0.is_ready()
        }

        async fn encrypt(
            &self,
            contract: Address,
            requester: Address,
            value: u64,
        ) -> std::result::Result<crate::gateway::EncryptedInput, GatewayError> {
            self.0.encrypt(contract, requester, value).await
        }

        async fn decrypt(
            &self,
            request: DecryptionRequest<'_>,
        ) -> std::result::Result<crate::gateway::DecryptionResult, GatewayError> {
            let mut result = self.0.decrypt(request).await?;
            for value in result.clear_values.values_mut() {
                *value = 999;
            }
            Ok(result)
        }
    }

    #[tokio::test]
    async fn test_outcome_uses_authenticated_value() {
        let (ledger, gateway, id) = seeded(600).await;
        let coordinator =
            DecryptionCoordinator::new(ledger.clone(), Arc::new(MisreportingGateway(gateway)));

        let outcome = coordinator.verify(&id).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Verified { clear_load: 600 });
        assert_eq!(ledger.get_record(&id).await.unwrap().clear_load, 600);
    }

    #[tokio::test]
    async fn test_bad_proof_is_decryption_failure() {
        let (ledger, gateway, id) = seeded(600).await;
        gateway.corrupt_proofs(true);

        let coordinator = DecryptionCoordinator::new(ledger.clone(), gateway.clone());
        let err = coordinator.verify(&id).await.unwrap_err();

        assert!(matches!(
            err,
            OperationError::DecryptionFailed(DecryptionFailure::Gateway(GatewayError::Submission(
                LedgerError::Reverted { .. }
            )))
        ));
        assert!(!ledger.get_record(&id).await.unwrap().verified);
    }

    #[tokio::test]
    async fn test_missing_record_is_ledger_error() {
        let (ledger, gateway, _) = seeded(600).await;
        let coordinator = DecryptionCoordinator::new(ledger, gateway.clone());

        let err = coordinator.verify(&RecordId::from_millis(999)).await.unwrap_err();
        assert!(matches!(err, OperationError::Ledger(LedgerError::NotFound(_))));
        assert_eq!(gateway.decrypt_calls(), 0);
    }
}
