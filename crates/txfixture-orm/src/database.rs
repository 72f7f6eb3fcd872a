//! The database collaborator: an engine plus scoped sessions

use std::sync::Arc;

use txfixture_connection::create_engine;
use txfixture_core::{Database, Engine, Result, Session, SessionOptions};

use crate::session::{OrmSession, SessionConfig};
use crate::sessionmaker::Sessionmaker;

/// An engine and the sessions created over it
pub struct SqlDatabase {
    engine: Arc<dyn Engine>,
    config: SessionConfig,
}

impl SqlDatabase {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            config: SessionConfig::default(),
        }
    }

    /// Build the engine from a connection URL
    pub fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(create_engine(url)?))
    }

    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// A session factory over the same engine
    pub fn sessionmaker(&self) -> Sessionmaker {
        Sessionmaker::with_config(Arc::clone(&self.engine), self.config)
    }
}

impl Database for SqlDatabase {
    fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.engine)
    }

    fn create_scoped_session(&self, options: SessionOptions) -> Result<Arc<dyn Session>> {
        Ok(Arc::new(OrmSession::with_config(options, self.config)))
    }
}
