//! Derived display metrics
//!
//! Pure functions over numbers that are already known. Nothing here is
//! authoritative or persisted.

use serde::Serialize;

use crate::Record;

/// Display scores for one record, each in `[0, 100]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GridAnalysis {
    pub balance: u8,
    pub efficiency: u8,
    pub stability: u8,
    pub risk: u8,
    pub optimization: u8,
}

impl GridAnalysis {
    /// Compute scores from a load and a capacity
    ///
    /// Zero capacity has no meaningful ratio and yields all zeros.
    pub fn compute(load: u64, capacity: u64) -> Self {
        if capacity == 0 {
            return Self::default();
        }

        let load = load as f64;
        let capacity = capacity as f64;
        let ratio = load / capacity;

        let balance = (ratio * 100.0).round().min(100.0);
        let efficiency = (ratio * 100.0).round().min(95.0);
        let stability = (100.0 - (load - capacity / 2.0).abs() / capacity * 100.0).max(60.0);
        let risk = if load > capacity * 0.9 {
            85.0
        } else if load > capacity * 0.7 {
            60.0
        } else {
            30.0
        };
        let optimization = ((capacity - load) / capacity * 100.0).round().min(90.0);

        Self {
            balance: clamp_score(balance),
            efficiency: clamp_score(efficiency),
            stability: clamp_score(stability),
            risk: clamp_score(risk),
            optimization: clamp_score(optimization),
        }
    }
}

fn clamp_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Analyze a record using the best load currently known
///
/// Ledger cleartext is used when verified, otherwise the provisional value.
/// Returns `None` while the load is still encrypted.
pub fn analyze(record: &Record, provisional: Option<u64>) -> Option<GridAnalysis> {
    let load = record.load_reading(provisional).value()?;
    Some(GridAnalysis::compute(load, record.capacity))
}

/// Aggregate counters over the loaded records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GridStatistics {
    pub total: usize,
    pub verified: usize,
    pub active: usize,
    pub avg_capacity: f64,
}

impl GridStatistics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut stats = Self::default();
        let mut capacity_sum: u128 = 0;

        for record in records {
            stats.total += 1;
            stats.active += 1;
            if record.verified {
                stats.verified += 1;
            }
            capacity_sum += record.capacity as u128;
        }

        if stats.total > 0 {
            stats.avg_capacity = capacity_sum as f64 / stats.total as f64;
        }
        stats
    }
}
