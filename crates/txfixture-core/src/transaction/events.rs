//! Transaction lifecycle events
//!
//! Connections emit `SavepointEnded` whenever a savepoint is released or
//! rolled back. Sessions emit `EntityDetached` when an entity leaves their
//! identity map. Observers run inline, before the call that triggered the
//! event returns.

use crate::{EntityRef, EntityState, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// A savepoint was released or rolled back
    SavepointEnded {
        name: String,
        depth: usize,
        /// The savepoint's parent is the outer transaction
        top_level: bool,
        committed: bool,
    },
    /// An entity left the session
    EntityDetached {
        entity: EntityRef,
        previous: EntityState,
    },
}

/// Receives transaction events
#[async_trait]
pub trait TransactionObserver: Send + Sync {
    async fn on_event(&self, event: &TransactionEvent) -> Result<()>;
}

/// A list of observers that are notified in registration order
#[derive(Default, Clone)]
pub struct ObserverList {
    observers: Arc<RwLock<Vec<Arc<dyn TransactionObserver>>>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn TransactionObserver>) {
        self.observers.write().push(observer);
    }

    pub fn clear(&self) {
        self.observers.write().clear();
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every observer, stopping at the first error
    pub async fn emit(&self, event: &TransactionEvent) -> Result<()> {
        // Snapshot so the lock is not held across observer awaits
        let observers: Vec<_> = self.observers.read().clone();
        for observer in observers {
            observer.on_event(event).await?;
        }
        Ok(())
    }
}
