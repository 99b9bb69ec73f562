//! SQL dialects.
//!
//! A [`Dialect`] owns everything that differs between databases: identifier
//! quoting, bind placeholder syntax, column type names, LIMIT/OFFSET syntax,
//! the key-returning suffix of an INSERT and the catalog queries behind the
//! table/column/index existence checks.

use ormlink_core::{Executor, FieldDescriptor, Result, SqlType, Value};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Dialect capabilities used by the statement assembler and table creation.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Short name, e.g. `"sqlite"`.
    fn name(&self) -> &'static str;

    /// Quote an identifier if it is not a plain lower-risk name.
    ///
    /// Dotted names are quoted part by part; `*` is left alone.
    fn quote(&self, identifier: &str) -> String {
        identifier
            .split('.')
            .map(|part| {
                if part == "*" || !needs_quoting(part) {
                    part.to_string()
                } else {
                    self.quote_always(part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Quote a single identifier unconditionally.
    fn quote_always(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Native bind placeholder for the 1-based `position`.
    fn bind_placeholder(&self, position: usize) -> String;

    /// Column type (plus inline constraints) for a scalar field.
    fn column_type(&self, field: &FieldDescriptor) -> String;

    /// LIMIT/OFFSET clause, or an empty string when neither is set.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut sql = String::new();
        if let Some(limit) = limit {
            sql.push_str(&format!("LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            if !sql.is_empty() {
                sql.push(' ');
            }
            sql.push_str(&format!("OFFSET {offset}"));
        }
        sql
    }

    /// Suffix appended to an INSERT so it yields the generated key.
    fn last_insert_suffix(&self, _table: &str, _column: &str) -> String {
        String::new()
    }

    /// Body of an INSERT with no explicit columns.
    fn insert_default_values(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// `FROM` clause needed by `SELECT <values>` in this dialect, if any.
    fn select_from_dummy_table(&self) -> &'static str {
        ""
    }

    #[allow(clippy::result_large_err)]
    fn has_table(&self, exec: &dyn Executor, table: &str) -> Result<bool>;

    #[allow(clippy::result_large_err)]
    fn has_column(&self, exec: &dyn Executor, table: &str, column: &str) -> Result<bool>;

    #[allow(clippy::result_large_err)]
    fn has_index(&self, exec: &dyn Executor, table: &str, index: &str) -> Result<bool>;
}

const KEYWORDS: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "check", "column", "create", "default",
    "delete", "desc", "distinct", "drop", "else", "exists", "from", "group", "having", "in",
    "index", "insert", "into", "is", "join", "key", "like", "limit", "not", "null", "offset",
    "on", "or", "order", "primary", "references", "select", "set", "table", "then", "to",
    "union", "unique", "update", "user", "using", "values", "when", "where",
];

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"))
}

/// Whether an identifier must be quoted to be used verbatim.
pub fn needs_quoting(identifier: &str) -> bool {
    !identifier_pattern().is_match(identifier)
        || KEYWORDS.contains(&identifier.to_ascii_lowercase().as_str())
}

#[allow(clippy::result_large_err)]
fn count_query(exec: &dyn Executor, sql: &str, params: &[Value]) -> Result<bool> {
    let count = match exec.query_one(sql, params)? {
        Some(row) => row.get_as::<i64>(0)?,
        None => 0,
    };
    Ok(count > 0)
}

fn varchar_or(field: &FieldDescriptor, max: u32, fallback: &str) -> String {
    match field.size() {
        Some(size) if size > 0 && size < max => format!("varchar({size})"),
        _ => fallback.to_string(),
    }
}

/// Inline constraints shared by every dialect.
fn with_constraints(mut sql: String, field: &FieldDescriptor) -> String {
    if field.has_tag("not null") {
        sql.push_str(" NOT NULL");
    }
    if field.has_tag("unique") {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = field.tag("default") {
        sql.push_str(&format!(" DEFAULT {default}"));
    }
    sql
}

/// SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn bind_placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn column_type(&self, field: &FieldDescriptor) -> String {
        if let Some(explicit) = field.tag("type") {
            return with_constraints(explicit.to_string(), field);
        }
        let base = match field.sql_type.unwrap_or(SqlType::Text) {
            SqlType::Boolean => "bool".to_string(),
            t if t.is_integer() && field.is_auto_increment() => {
                "integer primary key autoincrement".to_string()
            }
            SqlType::SmallInt | SqlType::Integer => "integer".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Real | SqlType::Double => "real".to_string(),
            SqlType::Text | SqlType::Json => varchar_or(field, 65532, "text"),
            SqlType::Timestamp => "datetime".to_string(),
            SqlType::Blob => "blob".to_string(),
        };
        with_constraints(base, field)
    }

    fn has_table(&self, exec: &dyn Executor, table: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::from(table)],
        )
    }

    fn has_column(&self, exec: &dyn Executor, table: &str, column: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM pragma_table_info(?) WHERE name = ?",
            &[Value::from(table), Value::from(column)],
        )
    }

    fn has_index(&self, exec: &dyn Executor, table: &str, index: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM sqlite_master WHERE type = 'index' AND tbl_name = ? AND name = ?",
            &[Value::from(table), Value::from(index)],
        )
    }
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn bind_placeholder(&self, position: usize) -> String {
        format!("${position}")
    }

    fn column_type(&self, field: &FieldDescriptor) -> String {
        if let Some(explicit) = field.tag("type") {
            return with_constraints(explicit.to_string(), field);
        }
        let auto = field.is_auto_increment();
        let base = match field.sql_type.unwrap_or(SqlType::Text) {
            SqlType::Boolean => "boolean".to_string(),
            SqlType::SmallInt | SqlType::Integer if auto => "serial".to_string(),
            SqlType::BigInt if auto => "bigserial".to_string(),
            SqlType::SmallInt => "smallint".to_string(),
            SqlType::Integer => "integer".to_string(),
            SqlType::BigInt => "bigint".to_string(),
            SqlType::Real => "real".to_string(),
            SqlType::Double => "double precision".to_string(),
            SqlType::Text => varchar_or(field, 65532, "text"),
            SqlType::Timestamp => "timestamp with time zone".to_string(),
            SqlType::Blob => "bytea".to_string(),
            SqlType::Json => "jsonb".to_string(),
        };
        with_constraints(base, field)
    }

    fn last_insert_suffix(&self, table: &str, column: &str) -> String {
        format!(" RETURNING {}.{}", self.quote(table), self.quote(column))
    }

    fn has_table(&self, exec: &dyn Executor, table: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema = CURRENT_SCHEMA() AND table_name = $1 AND table_type = 'BASE TABLE'",
            &[Value::from(table)],
        )
    }

    fn has_column(&self, exec: &dyn Executor, table: &str, column: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM information_schema.columns \
             WHERE table_schema = CURRENT_SCHEMA() AND table_name = $1 AND column_name = $2",
            &[Value::from(table), Value::from(column)],
        )
    }

    fn has_index(&self, exec: &dyn Executor, table: &str, index: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM pg_indexes WHERE tablename = $1 AND indexname = $2 \
             AND schemaname = CURRENT_SCHEMA()",
            &[Value::from(table), Value::from(index)],
        )
    }
}

/// MySQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mysql;

impl Dialect for Mysql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_always(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn bind_placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    fn column_type(&self, field: &FieldDescriptor) -> String {
        if let Some(explicit) = field.tag("type") {
            return with_constraints(explicit.to_string(), field);
        }
        let auto = if field.is_auto_increment() {
            " AUTO_INCREMENT"
        } else {
            ""
        };
        let base = match field.sql_type.unwrap_or(SqlType::Text) {
            SqlType::Boolean => "boolean".to_string(),
            SqlType::SmallInt => format!("smallint{auto}"),
            SqlType::Integer => format!("int{auto}"),
            SqlType::BigInt => format!("bigint{auto}"),
            SqlType::Real => "float".to_string(),
            SqlType::Double => "double".to_string(),
            SqlType::Text => match field.size() {
                Some(size) if size > 0 && size < 65532 => format!("varchar({size})"),
                Some(_) => "longtext".to_string(),
                None => "varchar(255)".to_string(),
            },
            SqlType::Timestamp => "datetime".to_string(),
            SqlType::Blob => "longblob".to_string(),
            SqlType::Json => "json".to_string(),
        };
        with_constraints(base, field)
    }

    fn insert_default_values(&self) -> &'static str {
        "VALUES ()"
    }

    fn select_from_dummy_table(&self) -> &'static str {
        "FROM DUAL"
    }

    fn has_table(&self, exec: &dyn Executor, table: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
            &[Value::from(table)],
        )
    }

    fn has_column(&self, exec: &dyn Executor, table: &str, column: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
            &[Value::from(table), Value::from(column)],
        )
    }

    fn has_index(&self, exec: &dyn Executor, table: &str, index: &str) -> Result<bool> {
        count_query(
            exec,
            "SELECT count(*) FROM information_schema.statistics \
             WHERE table_schema = DATABASE() AND table_name = ? AND index_name = ?",
            &[Value::from(table), Value::from(index)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormlink_core::parse_tag;
    use std::collections::BTreeMap;

    fn field(sql_type: SqlType, pk: bool, tag: &str) -> FieldDescriptor {
        FieldDescriptor {
            name: "f".into(),
            names: vec!["f".into()],
            db_name: "f".into(),
            is_primary_key: pk,
            is_ignored: false,
            is_normal: true,
            has_default_value: false,
            is_scanner: false,
            sql_type: Some(sql_type),
            nullable: false,
            tags: if tag.is_empty() {
                BTreeMap::new()
            } else {
                parse_tag(tag)
            },
            relationship: None,
        }
    }

    #[test]
    fn quotes_only_when_needed() {
        assert_eq!(Sqlite.quote("users"), "users");
        assert_eq!(Sqlite.quote("users.name"), "users.name");
        assert_eq!(Sqlite.quote("order"), "\"order\"");
        assert_eq!(Sqlite.quote("my table"), "\"my table\"");
        assert_eq!(Sqlite.quote("users.*"), "users.*");
        assert_eq!(Mysql.quote("group.key"), "`group`.`key`");
        assert_eq!(Postgres.quote_always("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn placeholders_per_dialect() {
        assert_eq!(Sqlite.bind_placeholder(3), "?");
        assert_eq!(Mysql.bind_placeholder(3), "?");
        assert_eq!(Postgres.bind_placeholder(3), "$3");
    }

    #[test]
    fn limit_offset_syntax() {
        assert_eq!(Sqlite.limit_offset(Some(10), Some(20)), "LIMIT 10 OFFSET 20");
        assert_eq!(Sqlite.limit_offset(None, Some(5)), "OFFSET 5");
        assert_eq!(Sqlite.limit_offset(None, None), "");
    }

    #[test]
    fn sqlite_column_types() {
        assert_eq!(
            Sqlite.column_type(&field(SqlType::BigInt, true, "")),
            "integer primary key autoincrement"
        );
        assert_eq!(Sqlite.column_type(&field(SqlType::BigInt, false, "")), "bigint");
        assert_eq!(
            Sqlite.column_type(&field(SqlType::Text, false, "size:64;not null;unique")),
            "varchar(64) NOT NULL UNIQUE"
        );
        assert_eq!(Sqlite.column_type(&field(SqlType::Text, false, "")), "text");
        assert_eq!(
            Sqlite.column_type(&field(SqlType::Integer, false, "default:0")),
            "integer DEFAULT 0"
        );
        assert_eq!(
            Sqlite.column_type(&field(SqlType::Text, false, "type:char(2)")),
            "char(2)"
        );
    }

    #[test]
    fn server_column_types() {
        assert_eq!(Postgres.column_type(&field(SqlType::BigInt, true, "")), "bigserial");
        assert_eq!(Postgres.column_type(&field(SqlType::Blob, false, "")), "bytea");
        assert_eq!(Mysql.column_type(&field(SqlType::Integer, true, "")), "int AUTO_INCREMENT");
        assert_eq!(Mysql.column_type(&field(SqlType::Text, false, "")), "varchar(255)");
    }

    #[test]
    fn returning_suffix_only_on_postgres() {
        assert_eq!(Sqlite.last_insert_suffix("users", "id"), "");
        assert_eq!(
            Postgres.last_insert_suffix("users", "id"),
            " RETURNING users.id"
        );
        assert_eq!(Mysql.select_from_dummy_table(), "FROM DUAL");
    }
}
