//! Handle configuration.

use ormlink_core::NamingOptions;
use serde::{Deserialize, Serialize};

/// Configuration for a [`Db`](crate::Db) handle.
///
/// # Example
///
/// ```rust,ignore
/// let config = DbConfig::new().table_prefix("app_").log_sql(true);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Use the snake_case type name as the table name, without pluralising.
    pub singular_table: bool,
    /// Prefix prepended to every derived table name.
    pub table_prefix: String,
    /// Reject UPDATE/DELETE statements that have no WHERE clause.
    pub block_global_update: bool,
    /// Log final SQL at `debug` level instead of `trace`.
    pub log_sql: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            singular_table: false,
            table_prefix: String::new(),
            block_global_update: true,
            log_sql: false,
        }
    }
}

impl DbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set singular table naming.
    pub fn singular_table(mut self, singular: bool) -> Self {
        self.singular_table = singular;
        self
    }

    /// Set the table name prefix.
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Allow or reject unconditioned UPDATE/DELETE.
    pub fn block_global_update(mut self, block: bool) -> Self {
        self.block_global_update = block;
        self
    }

    pub fn log_sql(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    /// Table naming options for the descriptor cache.
    pub fn naming(&self) -> NamingOptions {
        NamingOptions {
            singular_table: self.singular_table,
            table_prefix: self.table_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_block_global_updates() {
        let config = DbConfig::default();
        assert!(config.block_global_update);
        assert!(!config.singular_table);
        assert!(config.table_prefix.is_empty());
    }

    #[test]
    fn builder_sets_naming() {
        let naming = DbConfig::new().singular_table(true).table_prefix("app_").naming();
        assert!(naming.singular_table);
        assert_eq!(naming.table_prefix, "app_");
    }

    #[test]
    fn deserializes_partial_json() {
        let config: DbConfig = serde_json::from_str(r#"{"log_sql": true}"#).unwrap();
        assert!(config.log_sql);
        assert!(config.block_global_update);
    }
}
