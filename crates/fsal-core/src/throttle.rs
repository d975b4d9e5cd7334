// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bound on the number of concurrent calls into the underlying filesystem.

use std::sync::{Condvar, Mutex, MutexGuard};

/// Shared permit pool. A capacity of zero disables throttling.
#[derive(Debug)]
pub struct CallThrottle {
    capacity: usize,
    in_flight: Mutex<usize>,
    available: Condvar,
}

/// Held permit; returned to the pool when dropped.
#[must_use = "dropping the permit releases it immediately"]
#[derive(Debug)]
pub struct ThrottlePermit<'a> {
    throttle: Option<&'a CallThrottle>,
}

impl CallThrottle {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_flight: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Number of permits currently held. Always zero when disabled.
    pub fn in_flight(&self) -> usize {
        *self.lock()
    }

    /// Take a permit, waiting on the condition variable until one is free.
    pub fn acquire(&self) -> ThrottlePermit<'_> {
        if !self.is_enabled() {
            return ThrottlePermit { throttle: None };
        }
        let mut in_flight = self.lock();
        while *in_flight >= self.capacity {
            in_flight = self
                .available
                .wait(in_flight)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *in_flight += 1;
        ThrottlePermit {
            throttle: Some(self),
        }
    }

    /// Take a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<ThrottlePermit<'_>> {
        if !self.is_enabled() {
            return Some(ThrottlePermit { throttle: None });
        }
        let mut in_flight = self.lock();
        if *in_flight >= self.capacity {
            return None;
        }
        *in_flight += 1;
        Some(ThrottlePermit {
            throttle: Some(self),
        })
    }

    fn release(&self) {
        let mut in_flight = self.lock();
        *in_flight = in_flight.saturating_sub(1);
        drop(in_flight);
        self.available.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // The counter stays valid even if a holder panicked.
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CallThrottle {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl Drop for ThrottlePermit<'_> {
    fn drop(&mut self) {
        if let Some(throttle) = self.throttle.take() {
            throttle.release();
        }
    }
}
