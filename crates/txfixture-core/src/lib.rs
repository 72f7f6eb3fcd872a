//! txfixture core - traits and types shared by every txfixture crate
//!
//! - `Connection`, `Transaction`, `RawConnection` - the connection stack
//! - `Engine`, `Session`, `SessionFactory`, `Database` - the collaborators a
//!   test harness wraps
//! - `DatabaseDriver` and `ConnectionConfig` - drivers and connection URLs
//! - `registry` - named global objects that application code resolves
//! - Common types like `Value`, `Row`, `QueryResult`, `Entity`

mod connection;
mod dialect;
mod driver;
mod engine;
mod entity;
mod error;
pub mod registry;
mod schema;
mod session;
pub mod transaction;
mod types;

pub use connection::*;
pub use dialect::*;
pub use driver::*;
pub use engine::*;
pub use entity::*;
pub use error::*;
pub use schema::*;
pub use session::*;
pub use transaction::*;
pub use types::*;
