//! The unit-of-work session

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use txfixture_core::{
    Connection, EntityRef, EntityState, Model, ObserverList, QueryResult, Result, Row, Session,
    SessionOptions, StatementResult, TransactionEvent, TransactionObserver, TxFixtureError, Value,
};

use crate::identity::{Frame, IdentityMap, identity_key};

/// Behaviour switches for an `OrmSession`
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Flush pending changes before every query
    pub autoflush: bool,
    /// Expire every entity when the outermost transaction commits
    pub expire_on_commit: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autoflush: true,
            expire_on_commit: true,
        }
    }
}

/// A session over one bound connection.
///
/// The first statement begins a transaction, unless the connection is already
/// inside one, in which case the session joins it and never ends it.
/// `begin_nested` stacks savepoints on top; `commit` and `rollback` always act
/// on the innermost level.
pub struct OrmSession {
    bind: Arc<dyn Connection>,
    binds: HashMap<String, Arc<dyn Connection>>,
    config: SessionConfig,
    map: Mutex<IdentityMap>,
    frames: Mutex<Vec<Frame>>,
    observers: ObserverList,
}

impl OrmSession {
    pub fn new(options: SessionOptions) -> Self {
        Self::with_config(options, SessionConfig::default())
    }

    pub fn with_config(options: SessionOptions, config: SessionConfig) -> Self {
        Self {
            bind: options.bind,
            binds: options.binds,
            config,
            map: Mutex::new(IdentityMap::default()),
            frames: Mutex::new(Vec::new()),
            observers: ObserverList::new(),
        }
    }

    fn bind_for(&self, table: &str) -> &Arc<dyn Connection> {
        self.binds.get(table).unwrap_or(&self.bind)
    }

    fn quote(&self, ident: &str) -> String {
        self.bind.dialect().quote_identifier(ident)
    }

    async fn ensure_begun(&self) -> Result<()> {
        if !self.frames.lock().is_empty() {
            return Ok(());
        }
        let frame = if self.bind.in_transaction() {
            tracing::debug!("session joining the connection's open transaction");
            Frame::new(None)
        } else {
            Frame::new(Some(self.bind.begin_transaction().await?))
        };
        self.frames.lock().push(frame);
        Ok(())
    }

    async fn autoflush(&self) -> Result<()> {
        if self.config.autoflush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Track a loaded row, reusing the instance already in the identity map
    fn merge_row(&self, model: &Model, row: &Row) -> Result<EntityRef> {
        let pk = row.get_by_name(model.primary_key()).cloned().ok_or_else(|| {
            TxFixtureError::Query(format!(
                "rows of '{}' have no '{}' column",
                model.table(),
                model.primary_key()
            ))
        })?;
        let key = identity_key(model.table(), &pk);

        let mut map = self.map.lock();
        if let Some(existing) = map.persistent.get(&key) {
            if existing.is_expired() {
                existing.load_row(row);
            }
            return Ok(Arc::clone(existing));
        }
        let entity = model.entity().into_ref();
        entity.load_row(row);
        entity.transition(EntityState::Persistent);
        map.persistent.insert(key, Arc::clone(&entity));
        Ok(entity)
    }

    async fn emit_detached(&self, detached: Vec<(EntityRef, EntityState)>) -> Result<()> {
        for (entity, previous) in detached {
            tracing::trace!(?entity, ?previous, "entity detached");
            self.observers
                .emit(&TransactionEvent::EntityDetached { entity, previous })
                .await?;
        }
        Ok(())
    }

    async fn flush_delete(&self, entity: &EntityRef) -> Result<()> {
        let pk = entity.primary_key_value().ok_or_else(|| {
            TxFixtureError::Query(format!(
                "cannot delete a row of '{}' without a primary key",
                entity.table()
            ))
        })?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.quote(entity.table()),
            self.quote(entity.model().primary_key())
        );
        self.bind_for(entity.table()).execute(&sql, &[pk]).await?;

        {
            let mut map = self.map.lock();
            map.remove(entity);
        }
        entity.transition(EntityState::Deleted);
        if let Some(frame) = self.frames.lock().last_mut() {
            frame.deleted.push(Arc::clone(entity));
        }
        Ok(())
    }

    async fn flush_insert(&self, entity: &EntityRef) -> Result<()> {
        let fields = entity.fields();
        let sql = if fields.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.quote(entity.table()))
        } else {
            let columns: Vec<_> = fields.keys().map(|c| self.quote(c)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote(entity.table()),
                columns.join(", "),
                vec!["?"; columns.len()].join(", ")
            )
        };
        let params: Vec<Value> = fields.into_values().collect();
        let result = self.bind_for(entity.table()).execute(&sql, &params).await?;

        entity.take_dirty();
        if entity.primary_key_value().is_none()
            && let Some(id) = result.last_insert_id
        {
            entity.set(entity.model().primary_key(), id);
            entity.take_dirty();
        }
        let pk = entity.primary_key_value().ok_or_else(|| {
            TxFixtureError::Query(format!(
                "no primary key value for the row inserted into '{}'",
                entity.table()
            ))
        })?;

        {
            let mut map = self.map.lock();
            map.pending.retain(|e| !Arc::ptr_eq(e, entity));
            map.persistent
                .insert(identity_key(entity.table(), &pk), Arc::clone(entity));
        }
        entity.transition(EntityState::Persistent);
        if let Some(frame) = self.frames.lock().last_mut() {
            frame.inserted.push(Arc::clone(entity));
        }
        Ok(())
    }

    async fn flush_update(&self, entity: &EntityRef) -> Result<()> {
        let columns = entity.take_dirty();
        let Some(pk) = entity.primary_key_value() else {
            return Ok(());
        };
        if columns.is_empty() {
            return Ok(());
        }
        let assignments: Vec<_> = columns
            .iter()
            .map(|c| format!("{} = ?", self.quote(c)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.quote(entity.table()),
            assignments.join(", "),
            self.quote(entity.model().primary_key())
        );
        let mut params: Vec<Value> = columns
            .iter()
            .map(|c| entity.get(c).unwrap_or(Value::Null))
            .collect();
        params.push(pk);

        if let Err(e) = self.bind_for(entity.table()).execute(&sql, &params).await {
            // Keep the changes for the next flush
            for column in &columns {
                entity.set(column, entity.get(column).unwrap_or(Value::Null));
            }
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Session for OrmSession {
    async fn add(&self, entity: EntityRef) -> Result<()> {
        let mut map = self.map.lock();
        if map.contains(&entity) {
            return Ok(());
        }
        match entity.state() {
            EntityState::Deleted => {
                return Err(TxFixtureError::Query(format!(
                    "cannot add a row of '{}' whose delete has been flushed",
                    entity.table()
                )));
            }
            EntityState::Detached | EntityState::Persistent => {
                if let Some(pk) = entity.primary_key_value() {
                    // Re-attached rows reload on next access
                    entity.expire();
                    entity.transition(EntityState::Persistent);
                    map.persistent
                        .insert(identity_key(entity.table(), &pk), entity);
                    return Ok(());
                }
                entity.transition(EntityState::Pending);
            }
            EntityState::Transient | EntityState::Pending => {
                entity.transition(EntityState::Pending);
            }
        }
        map.pending.push(entity);
        Ok(())
    }

    async fn delete(&self, entity: &EntityRef) -> Result<()> {
        let mut map = self.map.lock();
        match entity.state() {
            EntityState::Pending if map.contains(entity) => {
                map.remove(entity);
                entity.transition(EntityState::Transient);
                Ok(())
            }
            EntityState::Persistent if map.contains(entity) => {
                if !map.to_delete.iter().any(|e| Arc::ptr_eq(e, entity)) {
                    map.to_delete.push(Arc::clone(entity));
                }
                Ok(())
            }
            state => Err(TxFixtureError::Query(format!(
                "cannot delete a {:?} row of '{}' that this session does not track",
                state,
                entity.table()
            ))),
        }
    }

    async fn expunge(&self, entity: &EntityRef) -> Result<()> {
        if !self.map.lock().remove(entity) {
            return Err(TxFixtureError::NotFound(format!(
                "row of '{}' is not present in this session",
                entity.table()
            )));
        }
        match entity.state() {
            EntityState::Pending | EntityState::Transient => {
                entity.transition(EntityState::Transient);
                Ok(())
            }
            _ => {
                let previous = entity.transition(EntityState::Detached);
                self.emit_detached(vec![(Arc::clone(entity), previous)]).await
            }
        }
    }

    fn contains(&self, entity: &EntityRef) -> bool {
        self.map.lock().contains(entity)
    }

    async fn get(&self, model: &Model, pk: Value) -> Result<Option<EntityRef>> {
        self.autoflush().await?;
        let key = identity_key(model.table(), &pk);
        let tracked = self.map.lock().persistent.get(&key).cloned();
        if let Some(entity) = &tracked
            && !entity.is_expired()
        {
            return Ok(tracked);
        }

        self.ensure_begun().await?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            self.quote(model.table()),
            self.quote(model.primary_key())
        );
        let result = self.bind_for(model.table()).query(&sql, &[pk]).await?;
        match result.first() {
            Some(row) => self.merge_row(model, row).map(Some),
            None => {
                // Deleted behind the session's back
                if let Some(entity) = tracked {
                    self.map.lock().remove(&entity);
                    entity.transition(EntityState::Detached);
                }
                Ok(None)
            }
        }
    }

    async fn all(&self, model: &Model) -> Result<Vec<EntityRef>> {
        self.autoflush().await?;
        self.ensure_begun().await?;
        let sql = format!("SELECT * FROM {}", self.quote(model.table()));
        let result = self.bind_for(model.table()).query(&sql, &[]).await?;
        result
            .rows
            .iter()
            .map(|row| self.merge_row(model, row))
            .collect()
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.autoflush().await?;
        self.ensure_begun().await?;
        self.bind.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.autoflush().await?;
        self.ensure_begun().await?;
        self.bind.execute(sql, params).await
    }

    #[tracing::instrument(skip(self))]
    async fn flush(&self) -> Result<()> {
        let (deletes, inserts, updates) = {
            let map = self.map.lock();
            if !map.is_dirty() {
                return Ok(());
            }
            let updates: Vec<_> = map
                .persistent
                .values()
                .filter(|e| e.is_dirty())
                .cloned()
                .collect();
            (map.to_delete.clone(), map.pending.clone(), updates)
        };
        self.ensure_begun().await?;
        tracing::debug!(
            deletes = deletes.len(),
            inserts = inserts.len(),
            updates = updates.len(),
            "flushing session"
        );

        for entity in &updates {
            self.flush_update(entity).await?;
        }
        for entity in &inserts {
            self.flush_insert(entity).await?;
        }
        for entity in &deletes {
            self.flush_delete(entity).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn commit(&self) -> Result<()> {
        self.flush().await?;
        let (index, frame) = {
            let mut frames = self.frames.lock();
            match frames.pop() {
                Some(frame) => (frames.len(), frame),
                None => return Ok(()),
            }
        };
        let Frame {
            tx,
            inserted,
            deleted,
        } = frame;
        if let Some(tx) = tx {
            tx.commit().await?;
        }
        tracing::debug!(depth = index + 1, "session transaction committed");

        // Rows inserted in a released savepoint now belong to its parent
        if index > 0
            && let Some(parent) = self.frames.lock().get_mut(index - 1)
        {
            parent.inserted.extend(inserted);
        }
        if index == 0 && self.config.expire_on_commit {
            self.expire_all();
        }
        let detached = deleted
            .into_iter()
            .map(|entity| {
                let previous = entity.transition(EntityState::Detached);
                (entity, previous)
            })
            .collect();
        self.emit_detached(detached).await
    }

    #[tracing::instrument(skip(self))]
    async fn rollback(&self) -> Result<()> {
        let (index, frame) = {
            let mut frames = self.frames.lock();
            match frames.pop() {
                Some(frame) => (frames.len(), frame),
                None => return Ok(()),
            }
        };
        let Frame {
            tx,
            inserted,
            deleted,
        } = frame;

        // Unflushed changes go first; ending the savepoint may start a new
        // one, which would flush whatever is still queued
        {
            let mut map = self.map.lock();
            for entity in map.pending.drain(..) {
                entity.transition(EntityState::Transient);
            }
            map.to_delete.clear();
            for entity in map.persistent.values() {
                entity.take_dirty();
            }
        }

        let result = match tx {
            Some(tx) => tx.rollback().await,
            None => Ok(()),
        };
        tracing::debug!(depth = index + 1, "session transaction rolled back");

        {
            let mut map = self.map.lock();
            for entity in inserted {
                map.remove(&entity);
                entity.transition(EntityState::Transient);
            }
            for entity in deleted {
                if let Some(pk) = entity.primary_key_value() {
                    entity.transition(EntityState::Persistent);
                    map.persistent
                        .insert(identity_key(entity.table(), &pk), entity);
                }
            }
        }
        self.expire_all();
        result
    }

    #[tracing::instrument(skip(self))]
    async fn begin_nested(&self) -> Result<()> {
        self.flush().await?;
        self.ensure_begun().await?;
        let tx = self.bind.begin_nested().await?;
        let depth = {
            let mut frames = self.frames.lock();
            frames.push(Frame::new(Some(tx)));
            frames.len()
        };
        tracing::debug!(depth, "session savepoint opened");
        Ok(())
    }

    fn expire_all(&self) {
        for entity in self.map.lock().persistent.values() {
            entity.expire();
        }
    }

    #[tracing::instrument(skip(self))]
    async fn close(&self) -> Result<()> {
        let frames = std::mem::take(&mut *self.frames.lock());
        let mut first_error = None;
        for frame in frames.into_iter().rev() {
            if let Some(tx) = frame.tx
                && let Err(e) = tx.rollback().await
            {
                tracing::warn!(error = %e, "rollback on session close failed");
                first_error.get_or_insert(e);
            }
        }

        let map = std::mem::take(&mut *self.map.lock());
        for entity in map.persistent.into_values() {
            entity.transition(EntityState::Detached);
        }
        for entity in map.pending {
            entity.transition(EntityState::Transient);
        }
        first_error.map_or(Ok(()), Err)
    }

    fn transaction_depth(&self) -> usize {
        self.frames.lock().len()
    }

    fn bind(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.bind)
    }

    fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.observers.register(observer);
    }
}
