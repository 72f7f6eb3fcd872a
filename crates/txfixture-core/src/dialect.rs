//! SQL Dialect Metadata
//!
//! Drivers describe the transactional behaviour of their database here so the
//! rest of the workspace never hardcodes per-driver logic.

use std::borrow::Cow;

/// Dialect information provided by a driver
#[derive(Debug, Clone)]
pub struct DialectInfo {
    /// Dialect identifier (e.g., "sqlite", "postgresql")
    pub id: Cow<'static, str>,
    /// Display name
    pub display_name: Cow<'static, str>,
    /// Whether SAVEPOINT / RELEASE / ROLLBACK TO are available
    pub supports_savepoints: bool,
    /// Whether a failed statement poisons the enclosing transaction until it
    /// is rolled back (PostgreSQL behaves this way, SQLite does not)
    pub errors_abort_transaction: bool,
    /// Identifier quote character (e.g., '"' for SQL standard, '`' for MySQL)
    pub identifier_quote: char,
}

impl Default for DialectInfo {
    fn default() -> Self {
        Self {
            id: Cow::Borrowed("generic"),
            display_name: Cow::Borrowed("SQL"),
            supports_savepoints: true,
            errors_abort_transaction: false,
            identifier_quote: '"',
        }
    }
}

impl DialectInfo {
    /// Quote an identifier with the dialect's quote character
    pub fn quote_identifier(&self, ident: &str) -> String {
        let q = self.identifier_quote;
        let escaped = ident.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    pub fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVEPOINT {}", self.quote_identifier(name))
    }

    pub fn release_savepoint_sql(&self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {}", self.quote_identifier(name))
    }

    pub fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", self.quote_identifier(name))
    }

    /// Statement that changes the isolation level, if the dialect has one
    pub fn isolation_level_sql(&self, level: crate::IsolationLevel) -> Option<String> {
        use crate::IsolationLevel::*;
        if self.id == "sqlite" {
            return match level {
                ReadUncommitted => Some("PRAGMA read_uncommitted = 1".to_string()),
                _ => Some("PRAGMA read_uncommitted = 0".to_string()),
            };
        }
        let name = match level {
            ReadUncommitted => "READ UNCOMMITTED",
            ReadCommitted => "READ COMMITTED",
            RepeatableRead => "REPEATABLE READ",
            Serializable => "SERIALIZABLE",
        };
        Some(format!("SET TRANSACTION ISOLATION LEVEL {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_savepoint_sql_quotes_names() {
        let dialect = DialectInfo::default();
        assert_eq!(dialect.savepoint_sql("raw_conn"), "SAVEPOINT \"raw_conn\"");
        assert_eq!(
            dialect.rollback_to_savepoint_sql("sp_1"),
            "ROLLBACK TO SAVEPOINT \"sp_1\""
        );
        assert_eq!(
            dialect.release_savepoint_sql("sp_1"),
            "RELEASE SAVEPOINT \"sp_1\""
        );
    }

    #[test]
    fn test_quote_identifier_escapes() {
        let dialect = DialectInfo::default();
        assert_eq!(dialect.quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
