//! In-memory ledger and co-processor for tests and local development
//!
//! `MemoryLedger` behaves like the grid contract: writes stay pending until
//! [`LedgerClient::wait_for_finality`] is called, and verification checks the
//! decryption proof before accepting the cleartext. `MemoryGateway` plays the
//! co-processor: it remembers the plaintext behind each handle it issued.
//! Both count calls and accept injected failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use alloy_primitives::{keccak256, Address, Bytes, TxHash, B256};
use async_trait::async_trait;
use tokio::sync::Mutex;

use grid_core::{Record, RecordId};

use crate::error::{GatewayError, LedgerError};
use crate::gateway::{
    DecryptionProof, DecryptionRequest, DecryptionResult, EncryptedInput, EncryptionGateway,
};
use crate::ledger::{CreateRecordRequest, FinalizedTx, LedgerClient};

/// Timestamp assigned to the first record created on a `MemoryLedger`
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

/// Signature the fake co-processor attaches to a decryption
pub fn decryption_signature(handles: &[B256], abi_encoded_clear_values: &[u8]) -> Bytes {
    let mut preimage = Vec::with_capacity(handles.len() * 32 + abi_encoded_clear_values.len());
    for handle in handles {
        preimage.extend_from_slice(handle.as_slice());
    }
    preimage.extend_from_slice(abi_encoded_clear_values);
    Bytes::copy_from_slice(keccak256(&preimage).as_slice())
}

struct StoredRecord {
    record: Record,
    handle: B256,
}

enum PendingWrite {
    Create(CreateRecordRequest, Address),
    Verify(RecordId, u64),
}

#[derive(Default)]
struct LedgerState {
    records: BTreeMap<RecordId, StoredRecord>,
    order: Vec<RecordId>,
    pending: HashMap<TxHash, PendingWrite>,
    next_tx: u64,
    clock: u64,
    fail_next_submit: Option<LedgerError>,
    fail_next_finality: Option<LedgerError>,
    fail_list: bool,
    broken_records: Vec<RecordId>,
    stale_records: Vec<RecordId>,
}

/// In-memory stand-in for the grid contract
pub struct MemoryLedger {
    contract: Address,
    account: Option<Address>,
    latency: Duration,
    state: Mutex<LedgerState>,
    race_next_verify: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            account: None,
            latency: Duration::ZERO,
            state: Mutex::new(LedgerState::default()),
            race_next_verify: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Connect a signer account
    pub fn with_account(mut self, account: Address) -> Self {
        self.account = Some(account);
        self
    }

    /// Delay every call, so concurrent operations interleave
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn read_calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Insert a record directly, as if created by another client
    pub async fn insert_record(&self, id: &RecordId, name: &str, capacity: u64, handle: B256) {
        let mut state = self.state.lock().await;
        let created_at = GENESIS_TIMESTAMP + state.clock;
        state.clock += 1;
        let record = Record {
            id: id.clone(),
            name: name.to_string(),
            creator: self.account.unwrap_or(Address::ZERO),
            created_at,
            capacity,
            aux_public: 0,
            ciphertext_ref: id.clone(),
            verified: false,
            clear_load: 0,
        };
        state.order.push(id.clone());
        state.records.insert(id.clone(), StoredRecord { record, handle });
    }

    /// Verify a record out of band, as another actor would
    pub async fn mark_verified(&self, id: &RecordId, clear_load: u64) {
        let mut state = self.state.lock().await;
        if let Some(stored) = state.records.get_mut(id) {
            stored.record.verified = true;
            stored.record.clear_load = clear_load;
        }
    }

    /// The next verification submission loses a race against another actor
    pub fn race_next_verify(&self) {
        self.race_next_verify.store(true, Ordering::SeqCst);
    }

    pub async fn fail_next_submit(&self, err: LedgerError) {
        self.state.lock().await.fail_next_submit = Some(err);
    }

    pub async fn fail_next_finality(&self, err: LedgerError) {
        self.state.lock().await.fail_next_finality = Some(err);
    }

    pub async fn fail_list(&self, fail: bool) {
        self.state.lock().await.fail_list = fail;
    }

    /// Make `get_record` fail for one id
    pub async fn break_record(&self, id: &RecordId) {
        self.state.lock().await.broken_records.push(id.clone());
    }

    /// Undo [`Self::break_record`]
    pub async fn repair_record(&self, id: &RecordId) {
        self.state.lock().await.broken_records.retain(|r| r != id);
    }

    /// Serve an outdated, unverified view of one record
    pub async fn serve_stale(&self, id: &RecordId, stale: bool) {
        let mut state = self.state.lock().await;
        state.stale_records.retain(|r| r != id);
        if stale {
            state.stale_records.push(id.clone());
        }
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn next_hash(state: &mut LedgerState) -> TxHash {
        state.next_tx += 1;
        keccak256(state.next_tx.to_be_bytes())
    }

    fn check_verification(
        stored: &StoredRecord,
        proof: &DecryptionProof,
    ) -> Result<u64, LedgerError> {
        if stored.record.verified {
            return Err(LedgerError::AlreadyVerified);
        }
        let expected = decryption_signature(&[stored.handle], &proof.abi_encoded_clear_values);
        if proof.proof != expected {
            return Err(LedgerError::Reverted {
                reason: "invalid decryption proof".into(),
            });
        }
        proof
            .clear_value_at(0)
            .map(|v| v.saturating_to::<u64>())
            .ok_or_else(|| LedgerError::Reverted {
                reason: "malformed clear values".into(),
            })
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    fn contract_address(&self) -> Address {
        self.contract
    }

    fn account(&self) -> Option<Address> {
        self.account
    }

    async fn list_ids(&self) -> Result<Vec<RecordId>, LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let state = self.state.lock().await;
        if state.fail_list {
            return Err(LedgerError::Transport("connection refused".into()));
        }
        Ok(state.order.clone())
    }

    async fn get_record(&self, id: &RecordId) -> Result<Record, LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let state = self.state.lock().await;
        if state.broken_records.contains(id) {
            return Err(LedgerError::Transport(format!("read of {id} failed")));
        }
        let stored = state
            .records
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        let mut record = stored.record.clone();
        if state.stale_records.contains(id) {
            record.verified = false;
            record.clear_load = 0;
        }
        Ok(record)
    }

    async fn get_ciphertext_handle(&self, id: &RecordId) -> Result<B256, LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let state = self.state.lock().await;
        state
            .records
            .get(id)
            .map(|s| s.handle)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))
    }

    async fn submit_create(&self, request: &CreateRecordRequest) -> Result<TxHash, LedgerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let creator = self.account.ok_or(LedgerError::NotConnected)?;
        self.delay().await;
        let mut state = self.state.lock().await;
        if let Some(err) = state.fail_next_submit.take() {
            return Err(err);
        }
        if state.records.contains_key(&request.id) {
            return Err(LedgerError::Reverted {
                reason: format!("record {} already exists", request.id),
            });
        }
        let hash = Self::next_hash(&mut state);
        state
            .pending
            .insert(hash, PendingWrite::Create(request.clone(), creator));
        Ok(hash)
    }

    async fn submit_verify(
        &self,
        id: &RecordId,
        proof: &DecryptionProof,
    ) -> Result<TxHash, LedgerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.account.ok_or(LedgerError::NotConnected)?;
        self.delay().await;
        let mut state = self.state.lock().await;
        if let Some(err) = state.fail_next_submit.take() {
            return Err(err);
        }
        if self.race_next_verify.swap(false, Ordering::SeqCst) {
            if let Some(stored) = state.records.get_mut(id) {
                let value = proof.clear_value_at(0).map(|v| v.saturating_to::<u64>());
                stored.record.verified = true;
                stored.record.clear_load = value.unwrap_or_default();
            }
        }
        let stored = state
            .records
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        let clear_load = Self::check_verification(stored, proof)?;
        let hash = Self::next_hash(&mut state);
        state
            .pending
            .insert(hash, PendingWrite::Verify(id.clone(), clear_load));
        Ok(hash)
    }

    async fn wait_for_finality(&self, tx: TxHash) -> Result<FinalizedTx, LedgerError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        let write = state
            .pending
            .remove(&tx)
            .ok_or_else(|| LedgerError::Finality(format!("unknown transaction {tx}")))?;
        if let Some(err) = state.fail_next_finality.take() {
            return Err(err);
        }

        match write {
            PendingWrite::Create(request, creator) => {
                if state.records.contains_key(&request.id) {
                    return Err(LedgerError::Reverted {
                        reason: format!("record {} already exists", request.id),
                    });
                }
                let created_at = GENESIS_TIMESTAMP + state.clock;
                state.clock += 1;
                let record = Record {
                    id: request.id.clone(),
                    name: request.name,
                    creator,
                    created_at,
                    capacity: request.capacity,
                    aux_public: request.aux_public,
                    ciphertext_ref: request.id.clone(),
                    verified: false,
                    clear_load: 0,
                };
                state.order.push(request.id.clone());
                state.records.insert(
                    request.id,
                    StoredRecord {
                        record,
                        handle: request.encrypted_load,
                    },
                );
            }
            PendingWrite::Verify(id, clear_load) => {
                let stored = state
                    .records
                    .get_mut(&id)
                    .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
                if stored.record.verified {
                    return Err(LedgerError::AlreadyVerified);
                }
                stored.record.verified = true;
                stored.record.clear_load = clear_load;
            }
        }

        let block_number = Some(state.next_tx);
        Ok(FinalizedTx {
            hash: tx,
            block_number,
        })
    }
}

#[derive(Default)]
struct GatewayState {
    plaintexts: HashMap<B256, u64>,
    nonce: u64,
}

/// In-memory stand-in for the FHE co-processor
pub struct MemoryGateway {
    ready: AtomicBool,
    fail_init: AtomicBool,
    fail_encrypt: AtomicBool,
    corrupt_proofs: AtomicBool,
    state: Mutex<GatewayState>,
    encrypt_calls: AtomicUsize,
    decrypt_calls: AtomicUsize,
    init_calls: AtomicU64,
}

impl MemoryGateway {
    /// A gateway whose session still needs `initialize`
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            fail_init: AtomicBool::new(false),
            fail_encrypt: AtomicBool::new(false),
            corrupt_proofs: AtomicBool::new(false),
            state: Mutex::new(GatewayState::default()),
            encrypt_calls: AtomicUsize::new(0),
            decrypt_calls: AtomicUsize::new(0),
            init_calls: AtomicU64::new(0),
        }
    }

    /// A gateway with an initialized session
    pub fn ready() -> Self {
        let gateway = Self::new();
        gateway.ready.store(true, Ordering::SeqCst);
        gateway
    }

    pub fn encrypt_calls(&self) -> usize {
        self.encrypt_calls.load(Ordering::SeqCst)
    }

    pub fn decrypt_calls(&self) -> usize {
        self.decrypt_calls.load(Ordering::SeqCst)
    }

    pub fn init_calls(&self) -> u64 {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    pub fn fail_encrypt(&self, fail: bool) {
        self.fail_encrypt.store(fail, Ordering::SeqCst);
    }

    /// Sign decryptions with a proof the ledger will reject
    pub fn corrupt_proofs(&self, corrupt: bool) {
        self.corrupt_proofs.store(corrupt, Ordering::SeqCst);
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EncryptionGateway for MemoryGateway {
    async fn initialize(&self) -> Result<(), GatewayError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("relayer unreachable".into()));
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn encrypt(
        &self,
        contract: Address,
        requester: Address,
        value: u64,
    ) -> Result<EncryptedInput, GatewayError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_ready() {
            return Err(GatewayError::Unavailable);
        }
        if self.fail_encrypt.load(Ordering::SeqCst) {
            return Err(GatewayError::Encryption("input verification failed".into()));
        }

        let mut state = self.state.lock().await;
        state.nonce += 1;
        let mut preimage = Vec::with_capacity(20 + 20 + 16);
        preimage.extend_from_slice(contract.as_slice());
        preimage.extend_from_slice(requester.as_slice());
        preimage.extend_from_slice(&value.to_be_bytes());
        preimage.extend_from_slice(&state.nonce.to_be_bytes());
        let handle = keccak256(&preimage);
        state.plaintexts.insert(handle, value);

        Ok(EncryptedInput {
            handle,
            proof: Bytes::copy_from_slice(keccak256(handle).as_slice()),
        })
    }

    async fn decrypt(
        &self,
        request: DecryptionRequest<'_>,
    ) -> Result<DecryptionResult, GatewayError> {
        self.decrypt_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_ready() {
            return Err(GatewayError::Unavailable);
        }

        let clear_values = {
            let state = self.state.lock().await;
            let mut values = BTreeMap::new();
            for handle in &request.handles {
                let value = state.plaintexts.get(handle).copied().ok_or_else(|| {
                    GatewayError::Decryption(format!("unknown handle {handle}"))
                })?;
                values.insert(*handle, value);
            }
            values
        };
        request.ensure_complete(&clear_values)?;

        let ordered: Vec<u64> = request.handles.iter().map(|h| clear_values[h]).collect();
        let abi_encoded_clear_values = DecryptionProof::encode_clear_values(&ordered);
        let proof = if self.corrupt_proofs.load(Ordering::SeqCst) {
            Bytes::from_static(b"forged")
        } else {
            decryption_signature(&request.handles, &abi_encoded_clear_values)
        };
        let proof = DecryptionProof {
            abi_encoded_clear_values,
            proof,
        };

        request.relay(&proof).await?;
        Ok(DecryptionResult {
            clear_values,
            proof,
        })
    }
}
