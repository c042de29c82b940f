//! Request rate governor
//!
//! Keeps a ring of recent completion timestamps to measure the achieved
//! rate and paces dispatch with a tokio interval when a target is set.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::time::{Interval, MissedTickBehavior};

pub struct RateThrottle {
    /// Target requests per second, 0 = unthrottled
    rate: AtomicUsize,
    threads: usize,
    samples: Mutex<VecDeque<Instant>>,
    capacity: AtomicUsize,
    /// Bumped by every rate change; a waiter holding an older interval rebuilds it
    generation: AtomicU64,
    /// Created on first wait so construction needs no runtime
    ticker: tokio::sync::Mutex<Option<(u64, Interval)>>,
}

impl RateThrottle {
    pub fn new(rate: usize, threads: usize) -> Self {
        let capacity = ring_capacity(rate, threads);
        Self {
            rate: AtomicUsize::new(rate),
            threads: threads.max(1),
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: AtomicUsize::new(capacity),
            generation: AtomicU64::new(0),
            ticker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn rate(&self) -> usize {
        self.rate.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Wait for the next dispatch slot
    pub async fn wait(&self) {
        let rate = self.rate();
        if rate == 0 {
            return;
        }
        let mut ticker = self.ticker.lock().await;
        let generation = self.generation.load(Ordering::Acquire);
        let stale = !matches!(&*ticker, Some((built, _)) if *built == generation);
        if stale {
            let mut interval = tokio::time::interval(tick_period(rate));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            *ticker = Some((generation, interval));
        }
        if let Some((_, interval)) = ticker.as_mut() {
            interval.tick().await;
        }
    }

    /// Record a finished request
    pub fn tick(&self, _start: Instant, end: Instant) {
        let capacity = self.capacity();
        let mut samples = self.samples.lock();
        samples.push_back(end);
        while samples.len() > capacity {
            samples.pop_front();
        }
    }

    /// Requests per second over the samples in the ring
    pub fn current_rate(&self) -> u64 {
        let samples = self.samples.lock();
        let n = samples.len();
        if n < 2 {
            return 0;
        }
        let (Some(oldest), Some(newest)) = (samples.front(), samples.back()) else {
            return 0;
        };
        let elapsed_ms = newest.saturating_duration_since(*oldest).as_millis();
        if elapsed_ms < 1 {
            return 0;
        }
        (1000 * n as u128 / elapsed_ms) as u64
    }

    /// Switch to a new target rate, resizing the ring. Never waits for
    /// pending dispatch slots; the next waiter picks up the new period.
    pub fn change_rate(&self, rate: usize) {
        let capacity = ring_capacity(rate, self.threads);
        self.rate.store(rate, Ordering::Relaxed);
        self.capacity.store(capacity, Ordering::Relaxed);
        {
            let mut samples = self.samples.lock();
            while samples.len() > capacity {
                samples.pop_front();
            }
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::info!(rate, "Request rate changed");
    }
}

fn ring_capacity(rate: usize, threads: usize) -> usize {
    if rate == 0 {
        5 * threads.max(1)
    } else {
        5 * rate
    }
}

fn tick_period(rate: usize) -> Duration {
    Duration::from_micros((1_000_000 / rate as u64).max(1))
}
