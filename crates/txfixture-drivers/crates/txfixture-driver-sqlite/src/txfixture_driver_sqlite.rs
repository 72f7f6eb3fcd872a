//! SQLite database driver implementation

mod connection;
mod dialect;
mod driver;
mod raw;
mod schema;
mod transaction;

pub use connection::SqliteConnection;
pub use dialect::sqlite_dialect;
pub use driver::SqliteDriver;
pub use raw::SqliteRawConnection;
pub use transaction::{SqliteSavepoint, SqliteTransaction};
