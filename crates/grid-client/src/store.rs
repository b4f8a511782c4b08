//! Client-side view of the grid records
//!
//! `records` is only ever replaced by a complete refresh from the ledger.
//! `create` and `request_verification` never insert or patch entries
//! themselves; they write to the ledger and then resync, so the local view
//! cannot drift from what the contract actually holds.
//!
//! Mutating operations are queued: both acquire the same operation lane and
//! run one at a time in arrival order. Refreshes are not queued, but each
//! takes a ticket and a snapshot is only applied if no newer refresh has
//! landed first.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use grid_core::constants::{MAX_ENCRYPTED_LOAD, MIN_CAPACITY};
use grid_core::{
    analyze, GridAnalysis, GridConfig, GridStatistics, LoadReading, OperationStatus, Record,
    RecordId,
};

use crate::coordinator::{DecryptionCoordinator, VerificationOutcome};
use crate::error::{OperationError, Result};
use crate::gateway::EncryptionGateway;
use crate::ledger::{CreateRecordRequest, LedgerClient};
use crate::metrics;
use crate::status::StatusSlot;

/// User input for a new record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub load_value: i64,
    pub capacity: i64,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>, load_value: i64, capacity: i64) -> Self {
        Self {
            name: name.into(),
            load_value,
            capacity,
        }
    }

    /// Check preconditions, returning `(name, load, capacity)`
    fn validate(&self) -> Result<(String, u64, u64)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(OperationError::InvalidInput("name must not be empty".into()));
        }
        let load = u64::try_from(self.load_value)
            .map_err(|_| OperationError::InvalidInput("load value must be non-negative".into()))?;
        if load > MAX_ENCRYPTED_LOAD {
            return Err(OperationError::InvalidInput(format!(
                "load value exceeds {MAX_ENCRYPTED_LOAD}"
            )));
        }
        let capacity = u64::try_from(self.capacity).unwrap_or(0);
        if capacity < MIN_CAPACITY {
            return Err(OperationError::InvalidInput(format!(
                "capacity must be at least {MIN_CAPACITY}"
            )));
        }
        Ok((name.to_string(), load, capacity))
    }
}

/// Cleartext obtained from the co-processor but not yet confirmed on-chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDecryption {
    pub value: u64,
    pub obtained_at: Instant,
}

#[derive(Default)]
struct Snapshot {
    applied_ticket: u64,
    records: BTreeMap<RecordId, Record>,
    /// Every cleartext the ledger has confirmed this session, kept even
    /// while the record drops out of `records` after a failed fetch
    confirmed: HashMap<RecordId, u64>,
}

/// Decrements an in-flight counter when dropped
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    op: &'static str,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, op: &'static str) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        metrics::record_operation_start(op);
        Self { counter, op }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        metrics::record_operation_end(self.op);
    }
}

/// Session-scoped record store
pub struct RecordStore {
    ledger: Arc<dyn LedgerClient>,
    gateway: Arc<dyn EncryptionGateway>,
    coordinator: DecryptionCoordinator,
    refresh_concurrency: usize,
    snapshot: RwLock<Snapshot>,
    provisional: Mutex<HashMap<RecordId, LocalDecryption>>,
    status: StatusSlot,
    op_lane: Mutex<()>,
    loading: AtomicBool,
    refreshing: AtomicUsize,
    creating: AtomicUsize,
    decrypting: AtomicUsize,
    refresh_tickets: AtomicU64,
    last_issued_millis: AtomicU64,
}

impl RecordStore {
    pub fn new(
        config: &GridConfig,
        ledger: Arc<dyn LedgerClient>,
        gateway: Arc<dyn EncryptionGateway>,
    ) -> Self {
        let coordinator = DecryptionCoordinator::new(ledger.clone(), gateway.clone());
        Self {
            ledger,
            gateway,
            coordinator,
            refresh_concurrency: config.refresh_concurrency.max(1),
            snapshot: RwLock::new(Snapshot::default()),
            provisional: Mutex::new(HashMap::new()),
            status: StatusSlot::new(config.success_display(), config.error_display()),
            op_lane: Mutex::new(()),
            loading: AtomicBool::new(true),
            refreshing: AtomicUsize::new(0),
            creating: AtomicUsize::new(0),
            decrypting: AtomicUsize::new(0),
            refresh_tickets: AtomicU64::new(0),
            last_issued_millis: AtomicU64::new(0),
        }
    }

    /// Start the co-processor session and load the initial view
    pub async fn initialize(&self) -> Result<usize> {
        let started = Instant::now();
        let result = self.initialize_inner().await;
        self.loading.store(false, Ordering::SeqCst);
        match &result {
            Ok(_) => metrics::record_operation(metrics::OP_INITIALIZE, metrics::OUTCOME_OK, started.elapsed()),
            Err(err) => {
                metrics::record_operation(metrics::OP_INITIALIZE, err.kind(), started.elapsed());
                let message = match err {
                    OperationError::EncryptionUnavailable(_) => "FHE initialization failed".to_string(),
                    other => user_message("Failed to load data", other),
                };
                self.status.set(OperationStatus::error(message));
            }
        }
        result
    }

    async fn initialize_inner(&self) -> Result<usize> {
        self.ledger.account().ok_or(OperationError::NotConnected)?;
        if !self.gateway.is_ready() {
            self.gateway
                .initialize()
                .await
                .map_err(|e| OperationError::EncryptionUnavailable(e.to_string()))?;
            info!("Co-processor session initialized");
        }
        self.resync().await
    }

    /// Reload every record from the ledger
    pub async fn refresh(&self) -> Result<usize> {
        let started = Instant::now();
        self.status.set(OperationStatus::pending("Refreshing grid data..."));
        let result = self.resync().await;
        self.report(metrics::OP_REFRESH, started, &result, "Failed to load data", |count| {
            format!("Loaded {count} grid records")
        });
        result
    }

    /// Encrypt the load, submit the record and resync
    pub async fn create(&self, request: CreateRequest) -> Result<RecordId> {
        let started = Instant::now();
        self.status.set(OperationStatus::pending("Creating grid data with FHE..."));
        let result = self.create_inner(request).await;
        self.report(metrics::OP_CREATE, started, &result, "Submission failed", |_| {
            "Grid data created successfully!".to_string()
        });
        result
    }

    async fn create_inner(&self, request: CreateRequest) -> Result<RecordId> {
        let account = self.ledger.account().ok_or(OperationError::NotConnected)?;
        let (name, load, capacity) = request.validate()?;

        let _lane = self.op_lane.lock().await;
        let _creating = InFlight::enter(&self.creating, metrics::OP_CREATE);

        let contract = self.ledger.contract_address();
        let encrypted = self
            .gateway
            .encrypt(contract, account, load)
            .await
            .map_err(OperationError::from_encryption)?;

        let id = self.next_record_id();
        let call = CreateRecordRequest::new(id.clone(), name, encrypted, capacity);
        let tx = self
            .ledger
            .submit_create(&call)
            .await
            .map_err(OperationError::from_ledger_write)?;

        self.status
            .set(OperationStatus::pending("Waiting for transaction confirmation..."));
        let finalized = self
            .ledger
            .wait_for_finality(tx)
            .await
            .map_err(OperationError::from_ledger_write)?;
        info!(id = %id, tx = %finalized.hash, capacity, "Grid record created");

        if let Err(e) = self.resync().await {
            warn!(id = %id, error = %e, "Record created but refresh failed");
        }
        Ok(id)
    }

    /// Decrypt a record's load and have the ledger verify it
    ///
    /// On success the store resyncs, so `verified`/`clear_load` come from the
    /// ledger rather than from the returned outcome.
    pub async fn request_verification(&self, id: &RecordId) -> Result<VerificationOutcome> {
        let started = Instant::now();
        self.status
            .set(OperationStatus::pending("Verifying decryption on-chain..."));
        let result = self.verify_inner(id).await;

        match &result {
            Ok(outcome) => {
                let (outcome_label, message) = match outcome {
                    VerificationOutcome::Verified { .. } => {
                        (metrics::OUTCOME_OK, "Data decrypted and verified successfully!")
                    }
                    VerificationOutcome::AlreadyVerified { .. } => {
                        (metrics::OUTCOME_ALREADY_VERIFIED, "Data already verified on-chain")
                    }
                };
                metrics::record_operation(metrics::OP_VERIFY, outcome_label, started.elapsed());
                self.status.set(OperationStatus::success(message));
            }
            Err(err) => {
                metrics::record_operation(metrics::OP_VERIFY, err.kind(), started.elapsed());
                self.status
                    .set(OperationStatus::error(user_message("Decryption failed", err)));
            }
        }
        result
    }

    async fn verify_inner(&self, id: &RecordId) -> Result<VerificationOutcome> {
        self.ledger.account().ok_or(OperationError::NotConnected)?;

        let _lane = self.op_lane.lock().await;
        let _decrypting = InFlight::enter(&self.decrypting, metrics::OP_VERIFY);

        let outcome = self.coordinator.verify(id).await?;
        if let VerificationOutcome::Verified { clear_load } = outcome {
            self.provisional.lock().await.insert(
                id.clone(),
                LocalDecryption {
                    value: clear_load,
                    obtained_at: Instant::now(),
                },
            );
        }

        if let Err(e) = self.resync().await {
            warn!(id = %id, error = %e, "Verification finished but refresh failed");
        }
        Ok(outcome)
    }

    /// Fetch ids and records, then atomically replace the local view
    ///
    /// Records that fail to load are logged and left out.
    async fn resync(&self) -> Result<usize> {
        let ticket = self.refresh_tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let _refreshing = InFlight::enter(&self.refreshing, metrics::OP_REFRESH);

        let ids = self.ledger.list_ids().await.map_err(OperationError::Ledger)?;
        let ledger = &self.ledger;
        let fetched: Vec<Record> = stream::iter(ids)
            .map(|id| async move {
                let result = ledger.get_record(&id).await;
                (id, result)
            })
            .buffered(self.refresh_concurrency)
            .filter_map(|(id, result)| async move {
                match result {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(id = %id, error = %e, "Skipping record that failed to load");
                        metrics::record_skipped_record();
                        None
                    }
                }
            })
            .collect()
            .await;

        let mut snapshot = self.snapshot.write().await;
        if ticket <= snapshot.applied_ticket {
            debug!(ticket, applied = snapshot.applied_ticket, "Discarding superseded refresh");
            return Ok(snapshot.records.len());
        }

        let mut records = BTreeMap::new();
        for record in fetched {
            let confirmed = snapshot.confirmed.get(&record.id).copied();
            if confirmed.is_some() && !record.verified {
                warn!(id = %record.id, "Ledger read reported a verified record as unverified");
            }
            let record = record.reconcile(confirmed);
            if let Some(clear_load) = record.confirmed_load() {
                snapshot.confirmed.insert(record.id.clone(), clear_load);
            }
            records.insert(record.id.clone(), record);
        }

        snapshot.records = records;
        snapshot.applied_ticket = ticket;

        let verified = snapshot.records.values().filter(|r| r.verified).count();
        metrics::set_records_loaded(snapshot.records.len(), verified);

        // Ledger cleartext supersedes local decryptions
        self.provisional
            .lock()
            .await
            .retain(|id, _| !snapshot.records.get(id).is_some_and(|r| r.verified));

        debug!(records = snapshot.records.len(), verified, "Refresh applied");
        Ok(snapshot.records.len())
    }

    /// Records ordered by creation time
    pub async fn records(&self) -> Vec<Record> {
        let snapshot = self.snapshot.read().await;
        let mut records: Vec<Record> = snapshot.records.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub async fn get(&self, id: &RecordId) -> Option<Record> {
        self.snapshot.read().await.records.get(id).cloned()
    }

    /// Records whose name or creator contains `term`
    pub async fn search(&self, term: &str) -> Vec<Record> {
        self.records()
            .await
            .into_iter()
            .filter(|r| r.matches(term))
            .collect()
    }

    pub async fn statistics(&self) -> GridStatistics {
        let snapshot = self.snapshot.read().await;
        GridStatistics::from_records(snapshot.records.values())
    }

    pub async fn provisional_load(&self, id: &RecordId) -> Option<LocalDecryption> {
        self.provisional.lock().await.get(id).copied()
    }

    /// What is currently known about a record's load
    pub async fn load_reading(&self, id: &RecordId) -> Option<LoadReading> {
        let snapshot = self.snapshot.read().await;
        let record = snapshot.records.get(id)?;
        let provisional = self.provisional.lock().await.get(id).map(|d| d.value);
        Some(record.load_reading(provisional))
    }

    /// Display scores for a record, if its load is known
    pub async fn analysis(&self, id: &RecordId) -> Option<GridAnalysis> {
        let snapshot = self.snapshot.read().await;
        let record = snapshot.records.get(id)?;
        let provisional = self.provisional.lock().await.get(id).map(|d| d.value);
        analyze(record, provisional)
    }

    /// Forget a local decryption (toggle-off in the detail view)
    pub async fn hide_decryption(&self, id: &RecordId) -> bool {
        self.provisional.lock().await.remove(id).is_some()
    }

    /// The detail view for `id` closed; local decryptions do not outlive it
    pub async fn close_detail(&self, id: &RecordId) {
        self.hide_decryption(id).await;
    }

    pub fn status(&self) -> Option<OperationStatus> {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Option<OperationStatus>> {
        self.status.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst) > 0
    }

    pub fn is_creating(&self) -> bool {
        self.creating.load(Ordering::SeqCst) > 0
    }

    pub fn is_decrypting(&self) -> bool {
        self.decrypting.load(Ordering::SeqCst) > 0
    }

    /// Next `grid-<millis>` id, strictly increasing within this session
    fn next_record_id(&self) -> RecordId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let mut last = self.last_issued_millis.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_issued_millis.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return RecordId::from_millis(next),
                Err(actual) => last = actual,
            }
        }
    }

    fn report<T>(
        &self,
        op: &'static str,
        started: Instant,
        result: &Result<T>,
        error_prefix: &str,
        success: impl FnOnce(&T) -> String,
    ) {
        match result {
            Ok(value) => {
                metrics::record_operation(op, metrics::OUTCOME_OK, started.elapsed());
                self.status.set(OperationStatus::success(success(value)));
            }
            Err(err) => {
                metrics::record_operation(op, err.kind(), started.elapsed());
                warn!(op, error = %err, "Operation failed");
                self.status
                    .set(OperationStatus::error(user_message(error_prefix, err)));
            }
        }
    }
}

fn user_message(prefix: &str, err: &OperationError) -> String {
    match err {
        OperationError::NotConnected => "Please connect wallet first".to_string(),
        OperationError::TransactionRejected => "Transaction rejected by user".to_string(),
        OperationError::DecryptionFailed(failure) => format!("{prefix}: {failure}"),
        other => format!("{prefix}: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryGateway, MemoryLedger};
    use alloy_primitives::Address;
    use grid_core::StatusKind;

    fn store_with(ledger: MemoryLedger, gateway: MemoryGateway) -> (RecordStore, Arc<MemoryLedger>, Arc<MemoryGateway>) {
        let ledger = Arc::new(ledger);
        let gateway = Arc::new(gateway);
        let store = RecordStore::new(&GridConfig::default(), ledger.clone(), gateway.clone());
        (store, ledger, gateway)
    }

    fn connected() -> MemoryLedger {
        MemoryLedger::new(Address::repeat_byte(0xc0)).with_account(Address::repeat_byte(0x01))
    }

    #[test]
    fn test_validation() {
        assert!(CreateRequest::new("Plant A", 600, 1000).validate().is_ok());
        for bad in [
            CreateRequest::new("  ", 600, 1000),
            CreateRequest::new("Plant A", -1, 1000),
            CreateRequest::new("Plant A", 600, 0),
            CreateRequest::new("Plant A", 600, -5),
            CreateRequest::new("Plant A", i64::from(u32::MAX) + 1, 1000),
        ] {
            assert!(matches!(bad.validate(), Err(OperationError::InvalidInput(_))), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_record_ids_strictly_increase() {
        let (store, _, _) = store_with(connected(), MemoryGateway::ready());
        let a = store.next_record_id().sequence().unwrap();
        let b = store.next_record_id().sequence().unwrap();
        let c = store.next_record_id().sequence().unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_initialize_requires_account() {
        let (store, _, gateway) =
            store_with(MemoryLedger::new(Address::ZERO), MemoryGateway::new());
        assert_eq!(store.initialize().await, Err(OperationError::NotConnected));
        assert_eq!(gateway.init_calls(), 0);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn test_initialize_reports_unavailable_coprocessor() {
        let gateway = MemoryGateway::new();
        gateway.fail_init(true);
        let (store, _, _) = store_with(connected(), gateway);

        let err = store.initialize().await.unwrap_err();
        assert!(matches!(err, OperationError::EncryptionUnavailable(_)));
        let status = store.status().unwrap();
        assert_eq!(status.kind, StatusKind::Error);
        assert_eq!(status.message, "FHE initialization failed");
    }

    #[tokio::test]
    async fn test_create_then_verify() {
        let (store, _, _) = store_with(connected(), MemoryGateway::new());
        assert_eq!(store.initialize().await, Ok(0));

        let id = store.create(CreateRequest::new("Plant A", 600, 1000)).await.unwrap();
        assert_eq!(store.load_reading(&id).await, Some(LoadReading::Encrypted));
        assert!(store.analysis(&id).await.is_none());

        let outcome = store.request_verification(&id).await.unwrap();
        assert_eq!(outcome, VerificationOutcome::Verified { clear_load: 600 });
        assert_eq!(store.load_reading(&id).await, Some(LoadReading::Confirmed(600)));
        assert!(store.provisional_load(&id).await.is_none());
        assert_eq!(store.analysis(&id).await, Some(GridAnalysis::compute(600, 1000)));
        assert_eq!(
            store.status().map(|s| s.message),
            Some("Data decrypted and verified successfully!".to_string())
        );
    }

    #[tokio::test]
    async fn test_stale_refresh_keeps_provisional_value() {
        let (store, ledger, _) = store_with(connected(), MemoryGateway::new());
        store.initialize().await.unwrap();
        let id = store.create(CreateRequest::new("Plant B", 321, 500)).await.unwrap();

        ledger.serve_stale(&id, true).await;
        store.request_verification(&id).await.unwrap();

        // The ledger accepted the proof but our read lags behind
        assert_eq!(store.load_reading(&id).await, Some(LoadReading::Provisional(321)));
        store.close_detail(&id).await;
        assert_eq!(store.load_reading(&id).await, Some(LoadReading::Encrypted));

        ledger.serve_stale(&id, false).await;
        store.refresh().await.unwrap();
        assert_eq!(store.load_reading(&id).await, Some(LoadReading::Confirmed(321)));
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_records() {
        let (store, ledger, _) = store_with(connected(), MemoryGateway::new());
        store.initialize().await.unwrap();
        store.create(CreateRequest::new("Plant A", 1, 10)).await.unwrap();

        ledger.fail_list(true).await;
        assert!(matches!(store.refresh().await, Err(OperationError::Ledger(_))));
        assert_eq!(store.records().await.len(), 1);
        assert_eq!(store.status().map(|s| s.kind), Some(StatusKind::Error));
        assert!(!store.is_refreshing());
    }

    #[tokio::test]
    async fn test_search_and_statistics() {
        let (store, _, _) = store_with(connected(), MemoryGateway::new());
        store.initialize().await.unwrap();
        store.create(CreateRequest::new("North Substation", 100, 1000)).await.unwrap();
        let south = store.create(CreateRequest::new("South Plant", 200, 3000)).await.unwrap();
        store.request_verification(&south).await.unwrap();

        assert_eq!(store.search("north").await.len(), 1);
        assert_eq!(store.search("").await.len(), 2);
        assert_eq!(store.search("0x0101").await.len(), 2);

        let stats = store.statistics().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.verified, 1);
        assert_eq!(stats.avg_capacity, 2000.0);
    }
}
