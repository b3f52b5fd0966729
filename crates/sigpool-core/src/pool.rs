//! Pool sizing rules.
//!
//! The pool is never stored; it is derived from a fresh live-instance count
//! and compared against the configured concurrency limit.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub live: usize,
    pub limit: u32,
}

impl PoolState {
    pub fn new(live: usize, limit: u32) -> Self {
        Self { live, limit }
    }

    /// On-demand growth is only allowed while the pool is below its limit.
    pub fn allows_growth(&self) -> bool {
        self.live < self.limit as usize
    }

    pub fn headroom(&self) -> usize {
        (self.limit as usize).saturating_sub(self.live)
    }
}
