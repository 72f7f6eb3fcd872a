//! Session factory bound to an engine

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use txfixture_core::{Engine, Result, Session, SessionFactory, SessionOptions};

use crate::session::{OrmSession, SessionConfig};

/// Creates `OrmSession`s, each on its own connection checked out of the engine
pub struct Sessionmaker {
    engine: RwLock<Arc<dyn Engine>>,
    config: SessionConfig,
}

impl Sessionmaker {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_config(engine, SessionConfig::default())
    }

    pub fn with_config(engine: Arc<dyn Engine>, config: SessionConfig) -> Self {
        Self {
            engine: RwLock::new(engine),
            config,
        }
    }

    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine.read())
    }
}

#[async_trait]
impl SessionFactory for Sessionmaker {
    async fn create(&self) -> Result<Arc<dyn Session>> {
        let engine = self.engine();
        let conn = engine.connect().await?;
        Ok(Arc::new(OrmSession::with_config(
            SessionOptions::bound_to(conn),
            self.config,
        )))
    }

    fn configure(&self, bind: Arc<dyn Engine>) {
        tracing::debug!(url = %bind.url(), "rebinding sessionmaker");
        *self.engine.write() = bind;
    }
}
