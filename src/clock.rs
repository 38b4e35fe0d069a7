//! Wall clock abstraction
//!
//! The reconciler reads time only through [`Clock`] so tests can pin "now".

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::types::UnixSeconds;

pub trait Clock: Send + Sync {
    /// Current time in unix seconds
    fn now(&self) -> UnixSeconds;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixSeconds {
        Utc::now().timestamp()
    }
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct FixedClock {
    current: AtomicI64,
}

impl FixedClock {
    pub fn new(start: UnixSeconds) -> Self {
        Self {
            current: AtomicI64::new(start),
        }
    }

    pub fn set(&self, t: UnixSeconds) {
        self.current.store(t, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.current.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> UnixSeconds {
        self.current.load(Ordering::SeqCst)
    }
}
