//! Single-slot operation status with timed auto-clear

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use grid_core::{OperationStatus, StatusKind};
use tokio::sync::watch;

/// Holds the status of the most recent operation
///
/// Setting a status replaces the previous one immediately. Success and error
/// statuses clear themselves after their display interval unless a newer
/// status was set in the meantime; pending statuses stay until replaced.
pub struct StatusSlot {
    tx: Arc<watch::Sender<Option<OperationStatus>>>,
    generation: Arc<AtomicU64>,
    success_display: Duration,
    error_display: Duration,
}

impl StatusSlot {
    pub fn new(success_display: Duration, error_display: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
            success_display,
            error_display,
        }
    }

    pub fn set(&self, status: OperationStatus) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let hold = match status.kind {
            StatusKind::Pending => None,
            StatusKind::Success => Some(self.success_display),
            StatusKind::Error => Some(self.error_display),
        };
        self.tx.send_replace(Some(status));

        let Some(hold) = hold else {
            return;
        };
        // Without a runtime the status simply stays until replaced
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let tx = self.tx.clone();
        let current = self.generation.clone();
        handle.spawn(async move {
            tokio::time::sleep(hold).await;
            tx.send_if_modified(|slot| {
                if current.load(Ordering::SeqCst) == generation {
                    *slot = None;
                    true
                } else {
                    false
                }
            });
        });
    }

    pub fn current(&self) -> Option<OperationStatus> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<OperationStatus>> {
        self.tx.subscribe()
    }
}
