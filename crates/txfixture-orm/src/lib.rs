//! txfixture ORM - a small unit-of-work session over `txfixture_core::Connection`
//!
//! `OrmSession` keeps an identity map of `Entity` rows, writes pending
//! changes on flush, and nests transactions as savepoints. `Sessionmaker` and
//! `SqlDatabase` are the factory and database collaborators built on top of it.

mod database;
mod identity;
mod session;
mod sessionmaker;

pub use database::SqlDatabase;
pub use session::{OrmSession, SessionConfig};
pub use sessionmaker::Sessionmaker;
