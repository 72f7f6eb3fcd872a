//! Session bookkeeping: the identity map and the transaction frames

use std::collections::HashMap;
use std::sync::Arc;

use txfixture_core::{EntityRef, Transaction, Value};

/// `(table, primary key)` of a persistent row
pub(crate) type IdentityKey = (String, String);

pub(crate) fn identity_key(table: &str, pk: &Value) -> IdentityKey {
    (table.to_string(), pk.to_string())
}

/// Entities a session knows about, by state
#[derive(Default)]
pub(crate) struct IdentityMap {
    /// Flushed rows, one instance per key
    pub persistent: HashMap<IdentityKey, EntityRef>,
    /// Added, waiting for the next flush
    pub pending: Vec<EntityRef>,
    /// Marked for deletion, waiting for the next flush
    pub to_delete: Vec<EntityRef>,
}

impl IdentityMap {
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.persistent.values().any(|e| Arc::ptr_eq(e, entity))
            || self.pending.iter().any(|e| Arc::ptr_eq(e, entity))
    }

    pub fn key_of(&self, entity: &EntityRef) -> Option<IdentityKey> {
        self.persistent
            .iter()
            .find(|(_, e)| Arc::ptr_eq(e, entity))
            .map(|(k, _)| k.clone())
    }

    /// Forget an entity in every state, returning whether it was known
    pub fn remove(&mut self, entity: &EntityRef) -> bool {
        let mut found = false;
        if let Some(key) = self.key_of(entity) {
            self.persistent.remove(&key);
            found = true;
        }
        let before = self.pending.len() + self.to_delete.len();
        self.pending.retain(|e| !Arc::ptr_eq(e, entity));
        self.to_delete.retain(|e| !Arc::ptr_eq(e, entity));
        found || before != self.pending.len() + self.to_delete.len()
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
            || !self.to_delete.is_empty()
            || self.persistent.values().any(|e| e.is_dirty())
    }
}

/// One open transaction of a session.
///
/// `tx` is `None` when the session joined a transaction its connection
/// already had open. Such a frame never commits or rolls back anything itself.
pub(crate) struct Frame {
    pub tx: Option<Box<dyn Transaction>>,
    /// Rows inserted by flushes inside this frame
    pub inserted: Vec<EntityRef>,
    /// Rows deleted by flushes inside this frame
    pub deleted: Vec<EntityRef>,
}

impl Frame {
    pub fn new(tx: Option<Box<dyn Transaction>>) -> Self {
        Self {
            tx,
            inserted: Vec::new(),
            deleted: Vec::new(),
        }
    }
}
