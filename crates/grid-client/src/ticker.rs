//! Simulated real-time load feed for the dashboard chart
//!
//! Purely cosmetic: samples are random, never touch the ledger and never
//! feed into analysis.

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Lower bound (inclusive) of a simulated sample
pub const MIN_SAMPLE: u64 = 500;
/// Upper bound (exclusive) of a simulated sample
pub const MAX_SAMPLE: u64 = 1500;

/// Background task producing a bounded window of random load samples
pub struct LoadTicker {
    window: watch::Receiver<VecDeque<u64>>,
    task: JoinHandle<()>,
}

impl LoadTicker {
    pub fn spawn(period: Duration, capacity: usize) -> Self {
        Self::spawn_with_rng(period, capacity, StdRng::from_entropy())
    }

    /// Deterministic feed, for tests and demos
    pub fn spawn_seeded(period: Duration, capacity: usize, seed: u64) -> Self {
        Self::spawn_with_rng(period, capacity, StdRng::seed_from_u64(seed))
    }

    fn spawn_with_rng(period: Duration, capacity: usize, mut rng: StdRng) -> Self {
        let capacity = capacity.max(1);
        let (tx, window) = watch::channel(VecDeque::with_capacity(capacity));

        let task = tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let sample = rng.gen_range(MIN_SAMPLE..MAX_SAMPLE);
                tx.send_modify(|window| {
                    if window.len() == capacity {
                        window.pop_front();
                    }
                    window.push_back(sample);
                });
            }
        });

        Self { window, task }
    }

    /// Samples currently in the window, oldest first
    pub fn samples(&self) -> Vec<u64> {
        self.window.borrow().iter().copied().collect()
    }

    pub fn latest(&self) -> Option<u64> {
        self.window.borrow().back().copied()
    }

    pub fn subscribe(&self) -> watch::Receiver<VecDeque<u64>> {
        self.window.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for LoadTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
