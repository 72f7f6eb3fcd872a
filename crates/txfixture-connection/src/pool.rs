//! Connection pooling for database connections
//!
//! ```ignore
//! use txfixture_connection::pool::{ConnectionPool, PoolConfig};
//!
//! let pool = ConnectionPool::new(PoolConfig::new(1, 5), connection_factory);
//! let conn = pool.get().await?;
//! conn.execute("DELETE FROM users", &[]).await?;
//! conn.close().await?; // back to the pool
//! ```

mod config;
mod pool;
mod stats;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use pool::{ConnectionFactory, ConnectionPool, PooledConnection};
pub use stats::PoolStats;
