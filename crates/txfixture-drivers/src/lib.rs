//! txfixture drivers - database driver implementations
//!
//! This crate provides concrete implementations of the driver traits defined
//! in `txfixture-core`, plus the registry that maps URL schemes to drivers.

#[cfg(feature = "sqlite")]
pub use txfixture_driver_sqlite as sqlite;

mod registry;
mod runtime;

pub use registry::DriverRegistry;
pub use runtime::{block_on_detached, get_tokio_runtime};

/// Re-export commonly used types from txfixture-core
pub use txfixture_core::{
    Connection, ConnectionConfig, DatabaseDriver, DriverCapabilities, QueryResult, Result, Row,
    SchemaIntrospection, StatementResult, Transaction, TxFixtureError, Value,
};
