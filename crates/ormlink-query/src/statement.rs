//! Statement assembly.
//!
//! [`Assembler`] composes SELECT/INSERT/UPDATE/DELETE statements from a model
//! descriptor and a [`Search`]. Every builder produces SQL with dialect-neutral
//! markers; [`Statement::finish`] rewrites them to the dialect's placeholders
//! as the last step, exactly once.

use ormlink_core::{
    ConfigErrorKind, DescriptorCache, Error, ModelDescriptor, Record, Result, Value,
};
use std::collections::BTreeMap;

use crate::condition::{self, Fragment, MARKER, RenderContext};
use crate::dialect::Dialect;
use crate::search::{ORDER_BY_PRIMARY_KEY, Search};

/// Column that turns DELETE into a soft delete when present.
pub const SOFT_DELETE_COLUMN: &str = "deleted_at";

/// SQL text plus its ordered arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// Rewrite markers into the dialect's native placeholders.
    ///
    /// The marker count must equal the argument count.
    #[allow(clippy::result_large_err)]
    pub fn finish(self, dialect: &dyn Dialect) -> Result<Statement> {
        let pieces: Vec<&str> = self.sql.split(MARKER).collect();
        let markers = pieces.len() - 1;
        if markers != self.args.len() {
            return Err(Error::config(
                ConfigErrorKind::PlaceholderMismatch,
                format!(
                    "statement has {markers} placeholder(s) but {} argument(s)",
                    self.args.len()
                ),
            ));
        }
        let mut sql = String::with_capacity(self.sql.len());
        for (i, piece) in pieces.iter().enumerate() {
            if i > 0 {
                sql.push_str(&dialect.bind_placeholder(i));
            }
            sql.push_str(piece);
        }
        Ok(Statement {
            sql,
            args: self.args,
        })
    }
}

impl From<Fragment> for Statement {
    fn from(fragment: Fragment) -> Self {
        Statement::new(fragment.sql, fragment.args)
    }
}

/// Builds statements for one model type under one search state.
#[derive(Clone, Copy)]
pub struct Assembler<'a> {
    dialect: &'a dyn Dialect,
    cache: &'a DescriptorCache,
    descriptor: &'a ModelDescriptor,
    search: &'a Search,
}

impl<'a> Assembler<'a> {
    pub fn new(
        dialect: &'a dyn Dialect,
        cache: &'a DescriptorCache,
        descriptor: &'a ModelDescriptor,
        search: &'a Search,
    ) -> Self {
        Self {
            dialect,
            cache,
            descriptor,
            search,
        }
    }

    /// Target table: the search override or the descriptor's table.
    pub fn table(&self) -> &'a str {
        self.search
            .table_name
            .as_deref()
            .unwrap_or(&self.descriptor.table_name)
    }

    pub fn quoted_table(&self) -> String {
        self.dialect.quote(self.table())
    }

    fn context(&self) -> RenderContext<'a> {
        RenderContext {
            dialect: self.dialect,
            cache: self.cache,
            table: self.table(),
            primary_key: self.descriptor.primary_field().map(|f| f.db_name.as_str()),
        }
    }

    fn soft_delete(&self) -> bool {
        self.descriptor.has_column(SOFT_DELETE_COLUMN)
    }

    /// Terms of the WHERE clause, before they are joined.
    #[allow(clippy::result_large_err)]
    fn where_parts(&self, record: Option<&dyn Record>) -> Result<WhereParts> {
        let ctx = self.context();
        let mut parts = WhereParts::default();

        if self.soft_delete() && !self.search.unscoped {
            parts.scope = Some(format!("{} IS NULL", ctx.column(SOFT_DELETE_COLUMN)));
        }
        if let Some(record) = record {
            for (column, value) in self.descriptor.primary_values(record) {
                if value.is_blank() {
                    continue;
                }
                parts.keys.push(format!("{} = {MARKER}", ctx.column(&column)));
                parts.args.push(value);
            }
        }

        let mut and_parts = Vec::new();
        for clause in &self.search.where_conditions {
            push_fragment(&mut and_parts, &mut parts.args, condition::render(clause, &ctx)?);
        }
        for clause in &self.search.not_conditions {
            push_fragment(
                &mut and_parts,
                &mut parts.args,
                condition::render_not(clause, &ctx)?,
            );
        }
        let mut or_parts = Vec::new();
        for clause in &self.search.or_conditions {
            push_fragment(&mut or_parts, &mut parts.args, condition::render(clause, &ctx)?);
        }

        parts.conditions = and_parts.join(" AND ");
        if !or_parts.is_empty() {
            let or_sql = or_parts.join(" OR ");
            if parts.conditions.is_empty() {
                parts.conditions = or_sql;
            } else {
                parts.conditions = format!("{} OR {or_sql}", parts.conditions);
            }
        }
        Ok(parts)
    }

    /// WHERE clause, including the leading keyword, or an empty fragment.
    ///
    /// Soft-delete exclusion and the record's primary key come first; user
    /// conditions are grouped in parentheses after them.
    #[allow(clippy::result_large_err)]
    pub fn where_sql(&self, record: Option<&dyn Record>) -> Result<Fragment> {
        let parts = self.where_parts(record)?;
        let primary: Vec<String> = parts.scope.into_iter().chain(parts.keys).collect();
        let combined = parts.conditions;
        let sql = match (primary.is_empty(), combined.is_empty()) {
            (true, true) => String::new(),
            (true, false) => format!("WHERE {combined}"),
            (false, true) => format!("WHERE {}", primary.join(" AND ")),
            (false, false) => format!("WHERE {} AND ({combined})", primary.join(" AND ")),
        };
        Ok(Fragment::new(sql, parts.args))
    }

    /// Whether the WHERE clause narrows the rows beyond soft-delete
    /// exclusion: a non-blank primary key or a condition that rendered SQL.
    ///
    /// Clauses that render nothing, such as an empty map or a blank record,
    /// do not count.
    #[allow(clippy::result_large_err)]
    pub fn restricts_rows(&self, record: Option<&dyn Record>) -> Result<bool> {
        let parts = self.where_parts(record)?;
        Ok(!parts.keys.is_empty() || !parts.conditions.is_empty())
    }

    #[allow(clippy::result_large_err)]
    fn joins_sql(&self) -> Result<Fragment> {
        let mut parts = Vec::new();
        let mut args = Vec::new();
        for clause in &self.search.join_conditions {
            let fragment = match &clause.query {
                condition::Filter::Raw(sql) => condition::substitute(sql, &clause.args)?,
                _ => {
                    return Err(Error::config(
                        ConfigErrorKind::UnsupportedFilter,
                        "joins must be raw SQL",
                    ));
                }
            };
            push_fragment(&mut parts, &mut args, fragment);
        }
        Ok(Fragment::new(parts.join(" "), args))
    }

    #[allow(clippy::result_large_err)]
    fn select_columns(&self) -> Result<Fragment> {
        if let Some(clause) = &self.search.selects {
            if let condition::Filter::Raw(sql) = &clause.query {
                return condition::substitute(sql, &clause.args);
            }
        }
        let ctx = self.context();
        if !self.search.omits.is_empty() {
            let columns: Vec<String> = self
                .descriptor
                .columns()
                .filter(|f| self.search.includes_column(&f.db_name))
                .map(|f| ctx.column(&f.db_name))
                .collect();
            return Ok(Fragment::new(columns.join(", "), Vec::new()));
        }
        if self.search.join_conditions.is_empty() {
            Ok(Fragment::new("*", Vec::new()))
        } else {
            Ok(Fragment::new(format!("{}.*", self.quoted_table()), Vec::new()))
        }
    }

    #[allow(clippy::result_large_err)]
    fn having_sql(&self) -> Result<Fragment> {
        let ctx = self.context();
        let mut parts = Vec::new();
        let mut args = Vec::new();
        for clause in &self.search.having_conditions {
            push_fragment(&mut parts, &mut args, condition::render(clause, &ctx)?);
        }
        if parts.is_empty() {
            return Ok(Fragment::default());
        }
        Ok(Fragment::new(format!("HAVING {}", parts.join(" AND ")), args))
    }

    fn order_sql(&self) -> String {
        if !self.search.orders.is_empty() {
            return format!("ORDER BY {}", self.search.orders.join(", "));
        }
        if self.search.flag(ORDER_BY_PRIMARY_KEY) {
            if let Some(pk) = self.descriptor.primary_field() {
                return format!("ORDER BY {} ASC", self.context().column(&pk.db_name));
            }
        }
        String::new()
    }

    /// Raw-mode statement: the first WHERE clause, placeholders substituted.
    #[allow(clippy::result_large_err)]
    fn raw_statement(&self) -> Result<Statement> {
        match self.search.where_conditions.first() {
            Some(clause) => match &clause.query {
                condition::Filter::Raw(sql) => {
                    Ok(condition::substitute(sql, &clause.args)?.into())
                }
                _ => Err(Error::config(
                    ConfigErrorKind::UnsupportedFilter,
                    "raw mode requires SQL text",
                )),
            },
            None => Err(Error::config(
                ConfigErrorKind::UnsupportedFilter,
                "raw mode without SQL",
            )),
        }
    }

    /// SELECT for the search, scoped to `record`'s primary key when given.
    ///
    /// Clauses appear in a fixed order: JOIN, WHERE, GROUP BY, HAVING,
    /// ORDER BY, LIMIT/OFFSET.
    #[allow(clippy::result_large_err)]
    pub fn select(&self, record: Option<&dyn Record>) -> Result<Statement> {
        if self.search.raw {
            return self.raw_statement();
        }
        let columns = self.select_columns()?;
        let mut out = Builder::new(format!("SELECT {} FROM {}", columns.sql, self.quoted_table()));
        out.args.extend(columns.args);
        self.push_tail(&mut out, record)?;
        out.push_str(&self.order_sql());
        out.push_str(&self.dialect.limit_offset(self.search.limit, self.search.offset));
        Ok(out.into_statement())
    }

    /// `SELECT count(*)` under the same conditions, ignoring order and paging.
    #[allow(clippy::result_large_err)]
    pub fn count(&self, record: Option<&dyn Record>) -> Result<Statement> {
        let mut out = Builder::new(format!("SELECT count(*) FROM {}", self.quoted_table()));
        self.push_tail(&mut out, record)?;
        Ok(out.into_statement())
    }

    #[allow(clippy::result_large_err)]
    fn push_tail(&self, out: &mut Builder, record: Option<&dyn Record>) -> Result<()> {
        out.push(self.joins_sql()?);
        out.push(self.where_sql(record)?);
        if let Some(group) = &self.search.group {
            out.push_str(&format!("GROUP BY {group}"));
        }
        out.push(self.having_sql()?);
        Ok(())
    }

    /// INSERT for `record`.
    ///
    /// Blank primary keys and blank fields with a database default are left
    /// to the store.
    #[allow(clippy::result_large_err)]
    pub fn insert(&self, record: &dyn Record) -> Result<Statement> {
        let mut columns = Vec::new();
        let mut args = Vec::new();
        for field in self.descriptor.bind(record) {
            let desc = &field.descriptor;
            if !desc.is_column() || !self.search.includes_column(&desc.db_name) {
                continue;
            }
            if field.is_blank && (desc.is_primary_key || desc.has_default_value) {
                continue;
            }
            columns.push(self.dialect.quote(&desc.db_name));
            args.push(field.value);
        }

        let suffix = match self.descriptor.primary_field() {
            Some(pk) if self.descriptor.primary_key_is_blank(record) => {
                self.dialect.last_insert_suffix(self.table(), &pk.db_name)
            }
            _ => String::new(),
        };
        let table = self.quoted_table();
        let sql = if columns.is_empty() {
            format!(
                "INSERT INTO {table} {}{suffix}",
                self.dialect.insert_default_values()
            )
        } else {
            let markers = vec![MARKER; columns.len()].join(", ");
            format!(
                "INSERT INTO {table} ({}) VALUES ({markers}){suffix}",
                columns.join(", ")
            )
        };
        Ok(Statement::new(sql, args))
    }

    /// UPDATE for `record`, or for every row the search matches.
    ///
    /// With `attrs`, only those columns are set (keys may be field or column
    /// names); otherwise every non-key column of `record` is. Returns `None`
    /// when nothing is left to set.
    #[allow(clippy::result_large_err)]
    pub fn update(
        &self,
        record: Option<&dyn Record>,
        attrs: Option<&BTreeMap<String, Value>>,
    ) -> Result<Option<Statement>> {
        let mut sets = Vec::new();
        let mut args = Vec::new();
        match attrs {
            Some(attrs) => {
                for (key, value) in attrs {
                    let Some(field) = self.descriptor.field(key).filter(|f| f.is_column()) else {
                        return Err(Error::config(
                            ConfigErrorKind::UnknownName,
                            format!(
                                "{} has no column named '{key}'",
                                self.descriptor.type_name
                            ),
                        ));
                    };
                    if !self.search.includes_column(&field.db_name) {
                        continue;
                    }
                    sets.push(format!("{} = {MARKER}", self.dialect.quote(&field.db_name)));
                    args.push(value.clone());
                }
            }
            None => {
                let Some(record) = record else {
                    return Ok(None);
                };
                for field in self.descriptor.bind(record) {
                    let desc = &field.descriptor;
                    if !desc.is_column()
                        || desc.is_primary_key
                        || !self.search.includes_column(&desc.db_name)
                    {
                        continue;
                    }
                    sets.push(format!("{} = {MARKER}", self.dialect.quote(&desc.db_name)));
                    args.push(field.value);
                }
            }
        }
        if sets.is_empty() {
            return Ok(None);
        }

        let mut out = Builder::new(format!(
            "UPDATE {} SET {}",
            self.quoted_table(),
            sets.join(", ")
        ));
        out.args = args;
        out.push(self.where_sql(record)?);
        Ok(Some(out.into_statement()))
    }

    /// DELETE for the search, scoped to `record`'s primary key when given.
    ///
    /// Models with a soft-delete column get `UPDATE ... SET deleted_at = now`
    /// instead, unless the search is unscoped.
    #[allow(clippy::result_large_err)]
    pub fn delete(&self, record: Option<&dyn Record>, now: Value) -> Result<Statement> {
        let mut out = if self.soft_delete() && !self.search.unscoped {
            let mut out = Builder::new(format!(
                "UPDATE {} SET {} = {MARKER}",
                self.quoted_table(),
                self.dialect.quote(SOFT_DELETE_COLUMN)
            ));
            out.args.push(now);
            out
        } else {
            Builder::new(format!("DELETE FROM {}", self.quoted_table()))
        };
        out.push(self.where_sql(record)?);
        Ok(out.into_statement())
    }
}

#[derive(Default)]
struct WhereParts {
    /// Soft-delete exclusion.
    scope: Option<String>,
    keys: Vec<String>,
    conditions: String,
    args: Vec<Value>,
}

fn push_fragment(parts: &mut Vec<String>, args: &mut Vec<Value>, fragment: Fragment) {
    if fragment.is_empty() {
        return;
    }
    parts.push(fragment.sql);
    args.extend(fragment.args);
}

/// Space-separated statement text with its arguments.
struct Builder {
    sql: String,
    args: Vec<Value>,
}

impl Builder {
    fn new(head: String) -> Self {
        Self {
            sql: head,
            args: Vec::new(),
        }
    }

    fn push_str(&mut self, part: &str) {
        if part.is_empty() {
            return;
        }
        self.sql.push(' ');
        self.sql.push_str(part);
    }

    fn push(&mut self, fragment: Fragment) {
        self.push_str(&fragment.sql);
        self.args.extend(fragment.args);
    }

    fn into_statement(self) -> Statement {
        Statement::new(self.sql, self.args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Filter;
    use crate::dialect::{Postgres, Sqlite};
    use ormlink_core::Model;
    use ormlink_macros::Model;

    #[derive(Model, Debug, Clone, Default, PartialEq)]
    struct User {
        id: i64,
        name: String,
        age: i64,
    }

    #[derive(Model, Debug, Clone, Default, PartialEq)]
    struct Note {
        id: i64,
        body: String,
        deleted_at: Option<i64>,
    }

    fn build<T: Model>(
        search: &Search,
        f: impl FnOnce(&Assembler<'_>) -> Result<Statement>,
    ) -> Statement {
        let cache = DescriptorCache::new();
        let descriptor = cache.describe::<T>().unwrap();
        let assembler = Assembler::new(&Sqlite, &cache, &descriptor, search);
        f(&assembler).unwrap().finish(&Sqlite).unwrap()
    }

    #[test]
    fn insert_skips_blank_primary_key() {
        let user = User {
            name: "hello".to_string(),
            ..User::default()
        };
        let search = Search::new().omit(["age"]);
        let stmt = build::<User>(&search, |a| a.insert(&user));
        assert_eq!(stmt.sql, "INSERT INTO users (name) VALUES (?)");
        assert_eq!(stmt.args, vec![Value::from("hello")]);
    }

    #[test]
    fn insert_keeps_explicit_primary_key() {
        let user = User {
            id: 9,
            name: "x".to_string(),
            age: 3,
        };
        let stmt = build::<User>(&Search::new(), |a| a.insert(&user));
        assert_eq!(stmt.sql, "INSERT INTO users (id, name, age) VALUES (?, ?, ?)");
        assert_eq!(stmt.args.len(), 3);
    }

    #[test]
    fn select_defaults_to_star() {
        let stmt = build::<User>(&Search::new(), |a| a.select(None));
        assert_eq!(stmt.sql, "SELECT * FROM users");
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn clause_order_is_fixed() {
        let search = Search::new()
            .filter("name = ?", vec![Value::from("a")])
            .or_filter("name = ?", vec![Value::from("b")])
            .not_filter([("age", 3_i64)], vec![])
            .group("age")
            .having("count(*) > ?", vec![Value::from(1_i64)])
            .order("age DESC")
            .limit(10)
            .offset(5);
        let stmt = build::<User>(&search, |a| a.select(None));
        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE (name = ?) AND (users.age <> ?) OR (name = ?) \
             GROUP BY age HAVING (count(*) > ?) ORDER BY age DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(
            stmt.args,
            vec![
                Value::from("a"),
                Value::from(3_i64),
                Value::from("b"),
                Value::from(1_i64)
            ]
        );

        let at = |needle: &str| stmt.sql.find(needle).unwrap();
        assert!(at("WHERE") < at(" OR "));
        assert!(at(" OR ") < at("GROUP BY"));
        assert!(at("GROUP BY") < at("HAVING"));
        assert!(at("HAVING") < at("ORDER BY"));
        assert!(at("ORDER BY") < at("LIMIT"));
    }

    #[test]
    fn joins_select_table_star() {
        let search = Search::new()
            .joins("JOIN emails ON emails.user_id = users.id AND emails.email = ?", vec![
                Value::from("a@b.c"),
            ])
            .filter([("name", "x")], vec![]);
        let stmt = build::<User>(&search, |a| a.select(None));
        assert_eq!(
            stmt.sql,
            "SELECT users.* FROM users JOIN emails ON emails.user_id = users.id \
             AND emails.email = ? WHERE (users.name = ?)"
        );
        assert_eq!(stmt.args, vec![Value::from("a@b.c"), Value::from("x")]);
    }

    #[test]
    fn primary_key_scopes_with_grouped_conditions() {
        let user = User {
            id: 4,
            ..User::default()
        };
        let search = Search::new()
            .filter("age > ?", vec![Value::from(1_i64)])
            .or_filter("age < ?", vec![Value::from(0_i64)]);
        let stmt = build::<User>(&search, |a| a.select(Some(&user)));
        assert_eq!(
            stmt.sql,
            "SELECT * FROM users WHERE users.id = ? AND ((age > ?) OR (age < ?))"
        );
        assert_eq!(stmt.args[0], Value::BigInt(4));
    }

    #[test]
    fn order_by_primary_key_setting() {
        let search = Search::new().set(ORDER_BY_PRIMARY_KEY, true).limit(1);
        let stmt = build::<User>(&search, |a| a.select(None));
        assert_eq!(stmt.sql, "SELECT * FROM users ORDER BY users.id ASC LIMIT 1");
    }

    #[test]
    fn raw_mode_passes_sql_through() {
        let search = Search::new().raw("SELECT name FROM users WHERE id IN (?)", vec![
            Value::from(vec![1_i64, 2]),
        ]);
        let stmt = build::<User>(&search, |a| a.select(None));
        assert_eq!(stmt.sql, "SELECT name FROM users WHERE id IN (?,?)");
        assert_eq!(stmt.args.len(), 2);
    }

    #[test]
    fn update_sets_non_key_columns() {
        let user = User {
            id: 2,
            name: "n".to_string(),
            age: 5,
        };
        let cache = DescriptorCache::new();
        let descriptor = cache.describe::<User>().unwrap();
        let search = Search::new();
        let assembler = Assembler::new(&Sqlite, &cache, &descriptor, &search);

        let stmt = assembler.update(Some(&user), None).unwrap().unwrap();
        let stmt = stmt.finish(&Sqlite).unwrap();
        assert_eq!(stmt.sql, "UPDATE users SET name = ?, age = ? WHERE users.id = ?");
        assert_eq!(
            stmt.args,
            vec![Value::from("n"), Value::from(5_i64), Value::BigInt(2)]
        );

        let attrs = BTreeMap::from([("name".to_string(), Value::from("m"))]);
        let stmt = assembler.update(Some(&user), Some(&attrs)).unwrap().unwrap();
        assert_eq!(stmt.finish(&Sqlite).unwrap().sql, "UPDATE users SET name = ? WHERE users.id = ?");

        let attrs = BTreeMap::from([("nope".to_string(), Value::Null)]);
        let err = assembler.update(Some(&user), Some(&attrs)).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnknownName));

        let empty = BTreeMap::new();
        assert!(assembler.update(Some(&user), Some(&empty)).unwrap().is_none());
    }

    #[test]
    fn empty_conditions_do_not_restrict_rows() {
        let cache = DescriptorCache::new();
        let users = cache.describe::<User>().unwrap();
        let notes = cache.describe::<Note>().unwrap();
        let restricts =
            |descriptor: &ModelDescriptor, search: &Search, record: Option<&dyn Record>| {
                Assembler::new(&Sqlite, &cache, descriptor, search)
                    .restricts_rows(record)
                    .unwrap()
            };

        let empty_map = Search::new().filter(BTreeMap::<String, Value>::new(), Vec::new());
        assert!(empty_map.has_conditions());
        assert!(!restricts(&*users, &empty_map, None));

        let blank = Search::new().filter(Filter::record(&User::default()), Vec::new());
        assert!(!restricts(&*users, &blank, None));

        // soft-delete exclusion alone is not a restriction
        assert!(!restricts(&*notes, &Search::new(), None));

        let keyed = User {
            id: 4,
            ..User::default()
        };
        assert!(restricts(&*users, &Search::new(), Some(&keyed)));
        let named = Search::new().filter([("name", "x")], Vec::new());
        assert!(restricts(&*users, &named, None));
    }

    #[test]
    fn soft_delete_becomes_update_and_filters_selects() {
        let note = Note {
            id: 3,
            ..Note::default()
        };
        let stmt = build::<Note>(&Search::new(), |a| a.delete(Some(&note), Value::BigInt(100)));
        assert_eq!(
            stmt.sql,
            "UPDATE notes SET deleted_at = ? WHERE notes.deleted_at IS NULL AND notes.id = ?"
        );
        assert_eq!(stmt.args, vec![Value::BigInt(100), Value::BigInt(3)]);

        let stmt = build::<Note>(&Search::new(), |a| a.select(None));
        assert_eq!(stmt.sql, "SELECT * FROM notes WHERE notes.deleted_at IS NULL");

        let unscoped = Search::new().unscoped();
        let stmt = build::<Note>(&unscoped, |a| a.delete(Some(&note), Value::BigInt(100)));
        assert_eq!(stmt.sql, "DELETE FROM notes WHERE notes.id = ?");
    }

    #[test]
    fn count_ignores_order_and_paging() {
        let search = Search::new().filter([("age", 1_i64)], vec![]).order("id").limit(2);
        let stmt = build::<User>(&search, |a| a.count(None));
        assert_eq!(stmt.sql, "SELECT count(*) FROM users WHERE (users.age = ?)");
    }

    #[test]
    fn finish_numbers_postgres_placeholders() {
        let stmt = Statement::new("a = $$$ AND b IN ($$$,$$$)", vec![
            Value::BigInt(1),
            Value::BigInt(2),
            Value::BigInt(3),
        ]);
        let stmt = stmt.finish(&Postgres).unwrap();
        assert_eq!(stmt.sql, "a = $1 AND b IN ($2,$3)");
    }

    #[test]
    fn finish_rejects_mismatched_arguments() {
        let err = Statement::new("a = $$$", vec![]).finish(&Sqlite).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::PlaceholderMismatch));
    }

    #[test]
    fn postgres_insert_returns_key() {
        let cache = DescriptorCache::new();
        let descriptor = cache.describe::<User>().unwrap();
        let search = Search::new();
        let user = User {
            name: "p".to_string(),
            age: 1,
            ..User::default()
        };
        let stmt = Assembler::new(&Postgres, &cache, &descriptor, &search)
            .insert(&user)
            .unwrap()
            .finish(&Postgres)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO users (name, age) VALUES ($1, $2) RETURNING users.id"
        );
    }
}
