//! txfixture connection - pooling and the pooled engine
//!
//! `create_engine("sqlite:///path/to/db")` resolves the URL to a driver and
//! returns a `PooledEngine`, the real `Engine` that test harnesses wrap.

mod engine;
pub mod pool;

pub use engine::{DriverConnectionFactory, PooledEngine, create_engine, create_engine_with};
pub use pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats, PooledConnection};
