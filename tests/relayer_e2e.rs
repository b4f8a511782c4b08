//! End-to-end tests against an HTTP relayer
//!
//! Spins up a mock co-processor relayer with axum and drives the full
//! create -> verify flow through `RelayerGateway`, with proofs checked by
//! the in-memory ledger.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_primitives::{keccak256, Address, Bytes, B256};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use grid_client::testing::{decryption_signature, MemoryLedger};
use grid_client::{
    CreateRequest, DecryptRequest, DecryptResponse, DecryptionProof, EncryptRequest,
    EncryptResponse, EncryptionGateway, OperationError, RecordStore, RelayerGateway,
    VerificationOutcome,
};
use grid_core::{GridConfig, LoadReading, StatusKind};
use tokio::net::TcpListener;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(19400);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

const CONTRACT: Address = Address::repeat_byte(0xc0);
const ACCOUNT: Address = Address::repeat_byte(0x01);

#[derive(Default)]
struct MockRelayer {
    plaintexts: Mutex<HashMap<B256, u64>>,
    nonce: AtomicU64,
    fail_encrypt: AtomicBool,
    decrypt_requests: AtomicU64,
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn encrypt(
    State(relayer): State<Arc<MockRelayer>>,
    Json(request): Json<EncryptRequest>,
) -> Result<Json<EncryptResponse>, (StatusCode, String)> {
    if relayer.fail_encrypt.load(Ordering::SeqCst) {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "input proof generation failed".into()));
    }
    let nonce = relayer.nonce.fetch_add(1, Ordering::SeqCst);
    let mut preimage = Vec::new();
    preimage.extend_from_slice(request.contract_address.as_slice());
    preimage.extend_from_slice(request.user_address.as_slice());
    preimage.extend_from_slice(&request.value.to_be_bytes());
    preimage.extend_from_slice(&nonce.to_be_bytes());
    let handle = keccak256(&preimage);

    relayer
        .plaintexts
        .lock()
        .unwrap()
        .insert(handle, request.value);

    Ok(Json(EncryptResponse {
        handle,
        input_proof: Bytes::copy_from_slice(keccak256(handle).as_slice()),
    }))
}

async fn decrypt(
    State(relayer): State<Arc<MockRelayer>>,
    Json(request): Json<DecryptRequest>,
) -> Result<Json<DecryptResponse>, (StatusCode, String)> {
    relayer.decrypt_requests.fetch_add(1, Ordering::SeqCst);
    let plaintexts = relayer.plaintexts.lock().unwrap();
    let clear_values = request
        .handles
        .iter()
        .map(|h| plaintexts.get(h).copied())
        .collect::<Option<Vec<u64>>>()
        .ok_or((StatusCode::NOT_FOUND, "unknown handle".to_string()))?;

    let abi_encoded_clear_values = DecryptionProof::encode_clear_values(&clear_values);
    let decryption_proof = decryption_signature(&request.handles, &abi_encoded_clear_values);
    Ok(Json(DecryptResponse {
        clear_values,
        abi_encoded_clear_values,
        decryption_proof,
    }))
}

/// Mock relayer bound to a local port
struct RelayerHarness {
    url: String,
    relayer: Arc<MockRelayer>,
    _shutdown: tokio::sync::oneshot::Sender<()>,
}

impl RelayerHarness {
    async fn start() -> Self {
        let relayer = Arc::new(MockRelayer::default());
        let router = Router::new()
            .route("/health", get(health))
            .route("/v1/encrypt", post(encrypt))
            .route("/v1/decrypt", post(decrypt))
            .with_state(relayer.clone());

        let port = next_port();
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let listener = TcpListener::bind(addr).await.expect("Bind should succeed");
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        let url = format!("http://127.0.0.1:{}", port);
        for _ in 0..10 {
            if reqwest::get(format!("{url}/health")).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Self {
            url,
            relayer,
            _shutdown: shutdown_tx,
        }
    }

    fn store(&self, ledger: Arc<MemoryLedger>) -> RecordStore {
        let config = GridConfig::new("http://unused", self.url.clone(), CONTRACT);
        let gateway = Arc::new(RelayerGateway::new(self.url.clone()).unwrap());
        RecordStore::new(&config, ledger, gateway)
    }
}

fn ledger() -> Arc<MemoryLedger> {
    Arc::new(MemoryLedger::new(CONTRACT).with_account(ACCOUNT))
}

#[tokio::test]
async fn test_relayer_health_and_session() {
    let harness = RelayerHarness::start().await;
    let gateway = RelayerGateway::new(harness.url.clone()).unwrap();

    assert!(gateway.health().await.unwrap());
    assert!(!gateway.is_ready());
    gateway.initialize().await.unwrap();
    assert!(gateway.is_ready());
}

#[tokio::test]
async fn test_create_and_verify_through_relayer() {
    let harness = RelayerHarness::start().await;
    let ledger = ledger();
    let store = harness.store(ledger.clone());
    store.initialize().await.unwrap();

    let id = store
        .create(CreateRequest::new("Plant A", 600, 1000))
        .await
        .unwrap();
    assert_eq!(store.load_reading(&id).await, Some(LoadReading::Encrypted));

    let outcome = store.request_verification(&id).await.unwrap();
    assert_eq!(outcome, VerificationOutcome::Verified { clear_load: 600 });
    assert_eq!(store.load_reading(&id).await, Some(LoadReading::Confirmed(600)));

    // Second request is answered from the ledger without a relayer round-trip
    let again = store.request_verification(&id).await.unwrap();
    assert_eq!(again, VerificationOutcome::AlreadyVerified { clear_load: Some(600) });
    assert_eq!(harness.relayer.decrypt_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_relayer_error_is_encryption_failure() {
    let harness = RelayerHarness::start().await;
    let ledger = ledger();
    let store = harness.store(ledger.clone());
    store.initialize().await.unwrap();
    harness.relayer.fail_encrypt.store(true, Ordering::SeqCst);

    let err = store
        .create(CreateRequest::new("Plant A", 600, 1000))
        .await
        .unwrap_err();
    match err {
        OperationError::EncryptionFailed(message) => {
            assert!(message.contains("input proof generation failed"), "{message}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(ledger.write_calls(), 0);
    assert!(store.records().await.is_empty());
}

#[tokio::test]
async fn test_unreachable_relayer_fails_initialize() {
    // Nothing listens on this port
    let url = format!("http://127.0.0.1:{}", next_port());
    let config = GridConfig::new("http://unused", url.clone(), CONTRACT);
    let gateway = Arc::new(RelayerGateway::new(url).unwrap());
    let store = RecordStore::new(&config, ledger(), gateway);

    let err = store.initialize().await.unwrap_err();
    assert!(matches!(err, OperationError::EncryptionUnavailable(_)));
    assert_eq!(store.status().map(|s| s.kind), Some(StatusKind::Error));
    assert!(!store.is_loading());
}
