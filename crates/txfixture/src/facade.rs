//! Stand-ins for the connection, raw connection, session and engine that
//! keep everything inside one outer transaction

mod connection;
mod engine;
mod raw;
mod session;

pub use connection::{ConnectionFacade, NestedTransaction};
pub use engine::EngineFacade;
pub use raw::SavepointedRawConnection;
pub use session::{FakeSessionFactory, Rehydrator, SessionFacade};
