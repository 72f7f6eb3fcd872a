//! Rebinding named global objects to the transactional facades

use std::sync::{Arc, LazyLock};

use tokio::sync::{Mutex, OwnedMutexGuard};
use txfixture_core::registry::{self, GlobalObject};
use txfixture_core::{Engine, Result, Session, SessionFactory};

use crate::settings::Settings;

/// Which facade replaces a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Engine,
    Session,
    SessionFactory,
}

/// A name in the global registry to rebind for the duration of a test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionTarget {
    pub kind: TargetKind,
    pub path: String,
}

impl SubstitutionTarget {
    pub fn new(kind: TargetKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// The objects substituted targets are bound to
pub struct SubstitutionBindings {
    pub engine: Arc<dyn Engine>,
    pub session: Arc<dyn Session>,
    pub session_factory: Arc<dyn SessionFactory>,
}

impl SubstitutionBindings {
    fn object_for(&self, kind: TargetKind) -> GlobalObject {
        match kind {
            TargetKind::Engine => GlobalObject::Engine(Arc::clone(&self.engine)),
            TargetKind::Session => GlobalObject::Session(Arc::clone(&self.session)),
            TargetKind::SessionFactory => {
                GlobalObject::SessionFactory(Arc::clone(&self.session_factory))
            }
        }
    }
}

/// Held while any substitution is in place, so contexts that rebind global
/// names never overlap
static SUBSTITUTION_LOCK: LazyLock<Arc<Mutex<()>>> = LazyLock::new(|| Arc::new(Mutex::new(())));

#[derive(Debug, Clone, Default)]
pub struct SubstitutionPolicy {
    targets: Vec<SubstitutionTarget>,
}

impl SubstitutionPolicy {
    pub fn new(targets: Vec<SubstitutionTarget>) -> Self {
        Self { targets }
    }

    /// Engines first, then sessions, then session factories
    pub fn from_settings(settings: &Settings) -> Self {
        let engines = settings
            .mocked_engines
            .iter()
            .map(|path| SubstitutionTarget::new(TargetKind::Engine, path));
        let sessions = settings
            .mocked_sessions
            .iter()
            .map(|path| SubstitutionTarget::new(TargetKind::Session, path));
        let factories = settings
            .mocked_sessionmakers
            .iter()
            .map(|path| SubstitutionTarget::new(TargetKind::SessionFactory, path));
        Self::new(engines.chain(sessions).chain(factories).collect())
    }

    pub fn targets(&self) -> &[SubstitutionTarget] {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Rebind every target, waiting for any other context's substitutions to
    /// be reverted first.
    ///
    /// If a target cannot be rebound, the ones already rebound are put back
    /// before the error is returned.
    #[tracing::instrument(skip_all, fields(targets = self.targets.len()))]
    pub async fn apply(&self, bindings: &SubstitutionBindings) -> Result<SubstitutionGuard> {
        if self.targets.is_empty() {
            return Ok(SubstitutionGuard::default());
        }
        let lock = Arc::clone(&*SUBSTITUTION_LOCK).lock_owned().await;
        let mut guard = SubstitutionGuard {
            replaced: Vec::with_capacity(self.targets.len()),
            _lock: Some(lock),
        };
        for target in &self.targets {
            let previous = registry::replace(&target.path, bindings.object_for(target.kind))?;
            tracing::debug!(target = %target.path, kind = ?target.kind, "substituted global object");
            guard.replaced.push((target.path.clone(), previous));
        }
        Ok(guard)
    }
}

/// Original bindings of substituted targets.
///
/// `restore` (or dropping the guard) puts them back in reverse order and
/// releases the substitution lock.
#[derive(Default)]
pub struct SubstitutionGuard {
    replaced: Vec<(String, GlobalObject)>,
    _lock: Option<OwnedMutexGuard<()>>,
}

impl SubstitutionGuard {
    pub fn len(&self) -> usize {
        self.replaced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replaced.is_empty()
    }

    pub fn restore(mut self) {
        self.restore_all();
    }

    fn restore_all(&mut self) {
        while let Some((path, original)) = self.replaced.pop() {
            tracing::debug!(target = %path, "restoring global object");
            registry::register(path, original);
        }
        self._lock.take();
    }
}

impl Drop for SubstitutionGuard {
    fn drop(&mut self) {
        self.restore_all();
    }
}
