//! SQLite dialect information

use std::borrow::Cow;
use txfixture_core::DialectInfo;

/// Build the SQLite dialect info
pub fn sqlite_dialect() -> DialectInfo {
    DialectInfo {
        id: Cow::Borrowed("sqlite"),
        display_name: Cow::Borrowed("SQLite"),
        supports_savepoints: true,
        // A failed statement leaves the transaction usable
        errors_abort_transaction: false,
        identifier_quote: '"',
    }
}
