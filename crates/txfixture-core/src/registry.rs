//! Process-wide registry of named engines, sessions and session factories
//!
//! Application code resolves its database handles by name through this
//! registry (`registry::engine("app.db.engine")`). The harness rebinds those
//! names for the duration of a test and puts the originals back afterwards.

use crate::{Engine, Result, Session, SessionFactory, TxFixtureError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Kind of object bound under a name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Engine,
    Session,
    SessionFactory,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Engine => write!(f, "engine"),
            ObjectKind::Session => write!(f, "session"),
            ObjectKind::SessionFactory => write!(f, "sessionmaker"),
        }
    }
}

/// An object bound under a name
#[derive(Clone)]
pub enum GlobalObject {
    Engine(Arc<dyn Engine>),
    Session(Arc<dyn Session>),
    SessionFactory(Arc<dyn SessionFactory>),
}

impl GlobalObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            GlobalObject::Engine(_) => ObjectKind::Engine,
            GlobalObject::Session(_) => ObjectKind::Session,
            GlobalObject::SessionFactory(_) => ObjectKind::SessionFactory,
        }
    }
}

impl std::fmt::Debug for GlobalObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GlobalObject({})", self.kind())
    }
}

static REGISTRY: LazyLock<RwLock<HashMap<String, GlobalObject>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Bind an object under a name, returning what was bound before
pub fn register(name: impl Into<String>, object: GlobalObject) -> Option<GlobalObject> {
    let name = name.into();
    tracing::debug!(name = %name, kind = %object.kind(), "registering global object");
    REGISTRY.write().insert(name, object)
}

pub fn unregister(name: &str) -> Option<GlobalObject> {
    REGISTRY.write().remove(name)
}

pub fn lookup(name: &str) -> Option<GlobalObject> {
    REGISTRY.read().get(name).cloned()
}

pub fn is_registered(name: &str) -> bool {
    REGISTRY.read().contains_key(name)
}

/// Rebind an existing name, returning the previous object.
///
/// The name must already be bound to an object of the same kind.
pub fn replace(name: &str, object: GlobalObject) -> Result<GlobalObject> {
    let mut registry = REGISTRY.write();
    let Some(current) = registry.get_mut(name) else {
        return Err(TxFixtureError::Configuration(format!(
            "cannot substitute '{}': no {} is registered under that name",
            name,
            object.kind()
        )));
    };
    if current.kind() != object.kind() {
        return Err(TxFixtureError::Configuration(format!(
            "cannot substitute '{}': it is registered as a {}, not a {}",
            name,
            current.kind(),
            object.kind()
        )));
    }
    Ok(std::mem::replace(current, object))
}

fn missing(name: &str, kind: ObjectKind) -> TxFixtureError {
    TxFixtureError::NotFound(format!("no {} registered under '{}'", kind, name))
}

pub fn engine(name: &str) -> Result<Arc<dyn Engine>> {
    match lookup(name) {
        Some(GlobalObject::Engine(engine)) => Ok(engine),
        _ => Err(missing(name, ObjectKind::Engine)),
    }
}

pub fn session(name: &str) -> Result<Arc<dyn Session>> {
    match lookup(name) {
        Some(GlobalObject::Session(session)) => Ok(session),
        _ => Err(missing(name, ObjectKind::Session)),
    }
}

pub fn session_factory(name: &str) -> Result<Arc<dyn SessionFactory>> {
    match lookup(name) {
        Some(GlobalObject::SessionFactory(factory)) => Ok(factory),
        _ => Err(missing(name, ObjectKind::SessionFactory)),
    }
}
