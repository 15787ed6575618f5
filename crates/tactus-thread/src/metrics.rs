//! Tic timing against the buffer period.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tactus_core::AtomicDouble;

/// Tic metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicMetrics {
    pub tics: u64,
    /// Load of the last tic, in percent of the buffer period.
    pub current: f64,
    pub peak: f64,
    pub average: f64,
    pub overruns: u64,
    pub failures: u64,
    pub period_us: f64,
    pub actual_time_us: f64,
}

/// Lock-free tic meter, written by the audio loop and read anywhere.
pub struct TicMeter {
    current: AtomicDouble,
    peak: AtomicDouble,
    average: AtomicDouble,
    tics: AtomicU64,
    overruns: AtomicU64,
    failures: AtomicU64,
    samples: AtomicU32,
    period: f64,
    enabled: AtomicBool,
}

impl TicMeter {
    /// `period` is the duration of one tic in seconds.
    pub fn new(period: f64) -> Self {
        Self {
            current: AtomicDouble::new(0.0),
            peak: AtomicDouble::new(0.0),
            average: AtomicDouble::new(0.0),
            tics: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            samples: AtomicU32::new(0),
            period: period.max(f64::EPSILON),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn record(&self, elapsed: Duration, failures: usize) {
        self.tics.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(failures as u64, Ordering::Relaxed);
        if !self.is_enabled() {
            return;
        }

        let load = elapsed.as_secs_f64() / self.period;
        self.current.set(load);
        self.peak.fetch_max(load);

        // Exponential moving average
        let count = self.samples.fetch_add(1, Ordering::Relaxed);
        let alpha = 1.0 / (count.min(100) + 1) as f64;
        let avg = self.average.get();
        self.average.set(avg * (1.0 - alpha) + load * alpha);

        if load > 1.0 {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn metrics(&self) -> TicMetrics {
        let period_us = self.period * 1_000_000.0;
        TicMetrics {
            tics: self.tics.load(Ordering::Relaxed),
            current: self.current.get() * 100.0,
            peak: self.peak.get() * 100.0,
            average: self.average.get() * 100.0,
            overruns: self.overruns.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            period_us,
            actual_time_us: self.current.get() * period_us,
        }
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.current.set(0.0);
        self.peak.set(0.0);
        self.average.set(0.0);
        self.overruns.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
    }
}
