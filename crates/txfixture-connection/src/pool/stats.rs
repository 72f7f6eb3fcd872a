//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Snapshot of a pool's connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Idle plus checked out
    total: usize,
    idle: usize,
    /// Checked out right now
    active: usize,
    /// Callers blocked waiting for a checkout
    waiting: usize,
    /// Connections created over the pool's lifetime
    opened: usize,
    /// Connections dropped on return (closed or still inside a transaction)
    discarded: usize,
}

impl PoolStats {
    pub fn new(idle: usize, active: usize, waiting: usize, opened: usize, discarded: usize) -> Self {
        Self {
            total: idle + active,
            idle,
            active,
            waiting,
            opened,
            discarded,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn opened(&self) -> usize {
        self.opened
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Whether nothing is checked out or waiting
    pub fn is_quiescent(&self) -> bool {
        self.active == 0 && self.waiting == 0
    }
}
