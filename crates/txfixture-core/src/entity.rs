//! Mapped entities tracked by sessions
//!
//! An entity is a row of a mapped table held in memory. Sessions move it
//! through the states below as it is added, flushed, deleted and expunged.

use crate::{Row, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Shared handle to an entity
pub type EntityRef = Arc<Entity>;

/// Where an entity stands relative to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Not known to any session
    Transient,
    /// Added, not yet flushed
    Pending,
    /// Flushed and tracked in the identity map
    Persistent,
    /// Delete flushed, awaiting commit
    Deleted,
    /// Was persistent, no longer tracked
    Detached,
}

/// A mapped table: name plus primary-key column
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Model {
    table: String,
    primary_key: String,
}

impl Model {
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Start a new transient entity of this model
    pub fn entity(&self) -> Entity {
        Entity::new(self.clone())
    }
}

/// A row held in memory by a session
pub struct Entity {
    id: Uuid,
    model: Model,
    fields: RwLock<BTreeMap<String, Value>>,
    state: Mutex<EntityState>,
    /// Columns changed since the last flush
    dirty: Mutex<Vec<String>>,
    expired: AtomicBool,
}

impl Entity {
    pub fn new(model: Model) -> Self {
        Self {
            id: Uuid::new_v4(),
            model,
            fields: RwLock::new(BTreeMap::new()),
            state: Mutex::new(EntityState::Transient),
            dirty: Mutex::new(Vec::new()),
            expired: AtomicBool::new(false),
        }
    }

    /// Builder-style field assignment for transient entities
    pub fn with(self, column: &str, value: impl Into<Value>) -> Self {
        self.fields.write().insert(column.to_string(), value.into());
        self
    }

    pub fn into_ref(self) -> EntityRef {
        Arc::new(self)
    }

    /// Identity of this in-memory object, not of the row
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn table(&self) -> &str {
        self.model.table()
    }

    pub fn get(&self, column: &str) -> Option<Value> {
        self.fields.read().get(column).cloned()
    }

    /// Set a field, marking it for the next flush
    pub fn set(&self, column: &str, value: impl Into<Value>) {
        self.fields.write().insert(column.to_string(), value.into());
        let mut dirty = self.dirty.lock();
        if !dirty.iter().any(|c| c == column) {
            dirty.push(column.to_string());
        }
    }

    pub fn primary_key_value(&self) -> Option<Value> {
        self.get(self.model.primary_key()).filter(|v| !v.is_null())
    }

    pub fn fields(&self) -> BTreeMap<String, Value> {
        self.fields.read().clone()
    }

    pub fn state(&self) -> EntityState {
        *self.state.lock()
    }

    /// Move the entity to a new state, returning the old one.
    ///
    /// Only sessions should call this.
    pub fn transition(&self, next: EntityState) -> EntityState {
        std::mem::replace(&mut *self.state.lock(), next)
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    pub fn expire(&self) {
        self.expired.store(true, Ordering::SeqCst);
    }

    /// Columns changed since the last flush, clearing the record
    pub fn take_dirty(&self) -> Vec<String> {
        std::mem::take(&mut *self.dirty.lock())
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.lock().is_empty()
    }

    /// Replace all fields with a freshly loaded row
    pub fn load_row(&self, row: &Row) {
        let mut fields = self.fields.write();
        fields.clear();
        for (column, value) in row.columns().iter().zip(row.values.iter()) {
            fields.insert(column.clone(), value.clone());
        }
        self.dirty.lock().clear();
        self.expired.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("table", &self.model.table)
            .field("pk", &self.primary_key_value())
            .field("state", &self.state())
            .field("expired", &self.is_expired())
            .finish()
    }
}
