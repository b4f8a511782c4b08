use std::time::Duration;

use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use alloy_provider::network::{EthereumWallet, ReceiptResponse};
use alloy_provider::{DynProvider, PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy_rpc_types::{TransactionInput, TransactionRequest};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{sol, Revert, SolCall, SolError};
use alloy_transport::TransportError;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use grid_core::{GridConfig, Record, RecordId};

use crate::error::LedgerError;
use crate::gateway::DecryptionProof;
use crate::ledger::{CreateRecordRequest, FinalizedTx, LedgerClient};

sol! {
    interface IGridLedger {
        error AlreadyVerified(string businessId);

        function getAllBusinessIds() external view returns (string[] memory);

        function getBusinessData(string businessId) external view returns (
            string memory name,
            uint256 publicValue1,
            uint256 publicValue2,
            string memory description,
            address creator,
            uint256 timestamp,
            bool isVerified,
            uint32 decryptedValue
        );

        function getEncryptedValue(string businessId) external view returns (bytes32);

        function createBusinessData(
            string businessId,
            string name,
            bytes32 encryptedValue,
            bytes inputProof,
            uint256 publicValue1,
            uint256 publicValue2,
            string description
        ) external;

        function verifyDecryption(
            string businessId,
            bytes abiEncodedClearValues,
            bytes decryptionProof
        ) external;
    }
}

/// EIP-1193 "user rejected request"
const USER_REJECTED_CODE: i64 = 4001;

/// How long to wait for a receipt before giving up
const FINALITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Load the signing key named by `var`, if it is set
pub fn signer_from_env(var: &str) -> anyhow::Result<Option<PrivateKeySigner>> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => {
            let signer: PrivateKeySigner = key.trim().parse()?;
            Ok(Some(signer))
        }
        _ => Ok(None),
    }
}

/// Grid contract client over JSON-RPC
pub struct AlloyLedger {
    provider: DynProvider,
    contract: Address,
    account: Option<Address>,
    confirmations: u64,
}

impl AlloyLedger {
    /// Connect to `config.rpc_url`, signing with `signer` when one is given
    ///
    /// Without a signer the client is read-only and every write fails with
    /// [`LedgerError::NotConnected`].
    pub async fn connect(config: &GridConfig, signer: Option<PrivateKeySigner>) -> anyhow::Result<Self> {
        let account = signer.as_ref().map(|s| s.address());
        let provider = match signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect(&config.rpc_url)
                .await?
                .erased(),
            None => ProviderBuilder::new().connect(&config.rpc_url).await?.erased(),
        };

        let chain_id = provider.get_chain_id().await?;
        if chain_id != config.chain_id {
            warn!(
                expected = config.chain_id,
                actual = chain_id,
                "Connected to unexpected chain"
            );
        }
        info!(
            rpc = %config.rpc_url,
            contract = %config.contract_address,
            account = ?account,
            chain_id,
            "Connected to ledger"
        );

        Ok(Self {
            provider,
            contract: config.contract_address,
            account,
            confirmations: config.confirmations.max(1),
        })
    }

    async fn call<C: SolCall>(&self, call: C) -> Result<C::Return, LedgerError> {
        let tx = TransactionRequest::default()
            .to(self.contract)
            .input(TransactionInput::new(call.abi_encode().into()));
        let output = self.provider.call(tx).await.map_err(map_transport_error)?;
        C::abi_decode_returns(&output).map_err(|e| LedgerError::Decode(e.to_string()))
    }

    async fn send<C: SolCall>(&self, call: C) -> Result<TxHash, LedgerError> {
        let from = self.account.ok_or(LedgerError::NotConnected)?;
        let tx = TransactionRequest::default()
            .from(from)
            .to(self.contract)
            .input(TransactionInput::new(call.abi_encode().into()));
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(map_transport_error)?;
        let hash = *pending.tx_hash();
        debug!(tx = %hash, "Transaction submitted");
        Ok(hash)
    }
}

#[async_trait]
impl LedgerClient for AlloyLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }

    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn list_ids(&self) -> Result<Vec<RecordId>, LedgerError> {
        let ids = self.call(IGridLedger::getAllBusinessIdsCall {}).await?;
        Ok(ids.into_iter().map(RecordId::from).collect())
    }

    async fn get_record(&self, id: &RecordId) -> Result<Record, LedgerError> {
        let data = self
            .call(IGridLedger::getBusinessDataCall {
                businessId: id.to_string(),
            })
            .await?;
        // Unknown ids come back zeroed rather than reverting
        if data.creator == Address::ZERO {
            return Err(LedgerError::NotFound(id.to_string()));
        }
        Ok(Record {
            id: id.clone(),
            name: data.name,
            creator: data.creator,
            created_at: saturating_u64(data.timestamp),
            capacity: saturating_u64(data.publicValue1),
            aux_public: saturating_u64(data.publicValue2),
            ciphertext_ref: id.clone(),
            verified: data.isVerified,
            clear_load: u64::from(data.decryptedValue),
        })
    }

    async fn get_ciphertext_handle(&self, id: &RecordId) -> Result<B256, LedgerError> {
        self.call(IGridLedger::getEncryptedValueCall {
            businessId: id.to_string(),
        })
        .await
    }

    async fn submit_create(&self, request: &CreateRecordRequest) -> Result<TxHash, LedgerError> {
        self.send(IGridLedger::createBusinessDataCall {
            businessId: request.id.to_string(),
            name: request.name.clone(),
            encryptedValue: request.encrypted_load,
            inputProof: request.input_proof.clone(),
            publicValue1: U256::from(request.capacity),
            publicValue2: U256::from(request.aux_public),
            description: request.tag.clone(),
        })
        .await
    }

    async fn submit_verify(&self, id: &RecordId, proof: &DecryptionProof) -> Result<TxHash, LedgerError> {
        self.send(IGridLedger::verifyDecryptionCall {
            businessId: id.to_string(),
            abiEncodedClearValues: proof.abi_encoded_clear_values.clone(),
            decryptionProof: proof.proof.clone(),
        })
        .await
    }

    async fn wait_for_finality(&self, tx: TxHash) -> Result<FinalizedTx, LedgerError> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx)
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(FINALITY_TIMEOUT))
            .get_receipt()
            .await
            .map_err(|e| LedgerError::Finality(e.to_string()))?;

        if !receipt.status() {
            return Err(LedgerError::Reverted {
                reason: format!("transaction {tx} reverted"),
            });
        }
        Ok(FinalizedTx {
            hash: tx,
            block_number: receipt.block_number(),
        })
    }
}

fn saturating_u64(value: U256) -> u64 {
    value.saturating_to()
}

/// Classify a JSON-RPC failure without looking at message text
fn map_transport_error(err: TransportError) -> LedgerError {
    let Some(payload) = err.as_error_resp() else {
        return LedgerError::Transport(err.to_string());
    };
    if payload.code == USER_REJECTED_CODE {
        return LedgerError::Rejected;
    }
    match payload.as_revert_data() {
        Some(data) => decode_revert(&data),
        None => LedgerError::Transport(err.to_string()),
    }
}

fn decode_revert(data: &Bytes) -> LedgerError {
    if IGridLedger::AlreadyVerified::abi_decode(data).is_ok() {
        return LedgerError::AlreadyVerified;
    }
    let reason = match Revert::abi_decode(data) {
        Ok(revert) => revert.reason,
        Err(_) => format!("custom error 0x{}", alloy_primitives::hex::encode(data)),
    };
    LedgerError::Reverted { reason }
}
