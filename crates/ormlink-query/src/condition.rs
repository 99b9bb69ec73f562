//! Condition builder.
//!
//! Turns a [`Clause`] (filter value plus positional arguments) into a SQL
//! fragment with dialect-neutral [`MARKER`] placeholders. The shapes a filter
//! can take are listed by [`Filter`]; every shape renders through one
//! exhaustive match, in a positive and a negated form.

use ormlink_core::{ConfigErrorKind, DescriptorCache, Error, Record, Result, Value};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::dialect::Dialect;

/// Dialect-neutral bind marker, rewritten once by `Statement::finish`.
pub const MARKER: &str = "$$$";

/// The value a condition filters on.
pub enum Filter {
    /// Raw SQL with `?` placeholders, or a primary key when purely numeric.
    Raw(String),
    /// A single value matched against the primary key.
    Scalar(Value),
    /// Primary key membership.
    List(Vec<Value>),
    /// Column equality per entry; `Null` means `IS NULL`, arrays mean `IN`.
    Map(BTreeMap<String, Value>),
    /// Equality over the record's non-blank columns.
    Record(Box<dyn Record>),
}

impl Filter {
    /// Filter on the non-blank fields of `record`.
    pub fn record(record: &dyn Record) -> Self {
        Filter::Record(record.clone_box())
    }
}

impl Clone for Filter {
    fn clone(&self) -> Self {
        match self {
            Filter::Raw(s) => Filter::Raw(s.clone()),
            Filter::Scalar(v) => Filter::Scalar(v.clone()),
            Filter::List(v) => Filter::List(v.clone()),
            Filter::Map(m) => Filter::Map(m.clone()),
            Filter::Record(r) => Filter::Record(r.clone_box()),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Raw(s) => f.debug_tuple("Raw").field(s).finish(),
            Filter::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Filter::List(v) => f.debug_tuple("List").field(v).finish(),
            Filter::Map(m) => f.debug_tuple("Map").field(m).finish(),
            Filter::Record(r) => f.debug_tuple("Record").field(r).finish(),
        }
    }
}

impl From<&str> for Filter {
    fn from(s: &str) -> Self {
        Filter::Raw(s.to_string())
    }
}

impl From<String> for Filter {
    fn from(s: String) -> Self {
        Filter::Raw(s)
    }
}

impl From<Value> for Filter {
    fn from(v: Value) -> Self {
        match v {
            Value::Array(items) => Filter::List(items),
            other => Filter::Scalar(other),
        }
    }
}

macro_rules! scalar_filter {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Filter {
                fn from(v: $ty) -> Self {
                    Filter::Scalar(Value::from(v))
                }
            }
        )*
    };
}

scalar_filter!(i32, i64, u32, u64);

impl<T: Into<Value>> From<Vec<T>> for Filter {
    fn from(v: Vec<T>) -> Self {
        Filter::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Filter {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Filter::Map(m)
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Filter {
    fn from(pairs: [(K, V); N]) -> Self {
        Filter::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<Box<dyn Record>> for Filter {
    fn from(r: Box<dyn Record>) -> Self {
        Filter::Record(r)
    }
}

/// A filter and the positional arguments for its `?` placeholders.
#[derive(Debug, Clone)]
pub struct Clause {
    pub query: Filter,
    pub args: Vec<Value>,
}

impl Clause {
    pub fn new(query: impl Into<Filter>, args: Vec<Value>) -> Self {
        Self {
            query: query.into(),
            args,
        }
    }
}

/// Rendered SQL with markers and the matching argument list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub sql: String,
    pub args: Vec<Value>,
}

impl Fragment {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// Number of bind markers in the SQL.
    pub fn marker_count(&self) -> usize {
        self.sql.matches(MARKER).count()
    }
}

/// Table-level context a clause is rendered against.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub dialect: &'a dyn Dialect,
    pub cache: &'a DescriptorCache,
    /// Unquoted table name.
    pub table: &'a str,
    /// Primary key column, target of the numeric shortcut.
    pub primary_key: Option<&'a str>,
}

impl RenderContext<'_> {
    /// `table.column`, quoted as the dialect requires.
    pub fn column(&self, column: &str) -> String {
        format!(
            "{}.{}",
            self.dialect.quote(self.table),
            self.dialect.quote(column)
        )
    }

    fn primary_column(&self) -> Result<String> {
        match self.primary_key {
            Some(pk) => Ok(self.column(pk)),
            None => Err(Error::config(
                ConfigErrorKind::UnsupportedFilter,
                format!("table '{}' has no primary key to filter on", self.table),
            )),
        }
    }
}

fn numeric_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*\d+\s*$").expect("valid numeric pattern"))
}

fn operator_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i) (=|<>|(>|<)(=?)|LIKE|IS|IN) ").expect("valid operator pattern")
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Positive,
    Negated,
}

/// Render a clause as a positive condition.
#[allow(clippy::result_large_err)]
pub fn render(clause: &Clause, ctx: &RenderContext<'_>) -> Result<Fragment> {
    render_with(clause, ctx, Polarity::Positive)
}

/// Render the logical complement of a clause.
#[allow(clippy::result_large_err)]
pub fn render_not(clause: &Clause, ctx: &RenderContext<'_>) -> Result<Fragment> {
    render_with(clause, ctx, Polarity::Negated)
}

#[allow(clippy::result_large_err)]
fn render_with(clause: &Clause, ctx: &RenderContext<'_>, polarity: Polarity) -> Result<Fragment> {
    let negated = polarity == Polarity::Negated;
    match &clause.query {
        Filter::Raw(sql) => render_text(sql, &clause.args, ctx, polarity),
        Filter::Scalar(value) => match value {
            Value::Int(_) | Value::BigInt(_) => {
                let op = if negated { "<>" } else { "=" };
                Ok(Fragment::new(
                    format!("({} {op} {MARKER})", ctx.primary_column()?),
                    vec![value.clone()],
                ))
            }
            Value::Text(sql) => render_text(sql, &clause.args, ctx, polarity),
            other => Err(Error::config(
                ConfigErrorKind::UnsupportedFilter,
                format!("cannot filter on a {} value", other.type_name()),
            )),
        },
        Filter::List(values) => {
            let op = if negated { "NOT IN" } else { "IN" };
            let (list, args) = expand_list(values);
            Ok(Fragment::new(
                format!("({} {op} ({list}))", ctx.primary_column()?),
                args,
            ))
        }
        Filter::Map(map) => {
            let mut parts = Vec::with_capacity(map.len());
            let mut args = Vec::new();
            for (key, value) in map {
                let column = ctx.column(key);
                match value {
                    Value::Null => {
                        let op = if negated { "IS NOT NULL" } else { "IS NULL" };
                        parts.push(format!("({column} {op})"));
                    }
                    Value::Array(items) => {
                        let op = if negated { "NOT IN" } else { "IN" };
                        let (list, mut list_args) = expand_list(items);
                        parts.push(format!("({column} {op} ({list}))"));
                        args.append(&mut list_args);
                    }
                    other => {
                        let op = if negated { "<>" } else { "=" };
                        parts.push(format!("({column} {op} {MARKER})"));
                        args.push(other.clone());
                    }
                }
            }
            Ok(Fragment::new(parts.join(" AND "), args))
        }
        Filter::Record(record) => {
            let descriptor = ctx.cache.describe_record(record.as_ref())?;
            let op = if negated { "<>" } else { "=" };
            let mut parts = Vec::new();
            let mut args = Vec::new();
            for field in descriptor.bind(record.as_ref()) {
                if !field.descriptor.is_column() || field.is_blank {
                    continue;
                }
                parts.push(format!("({} {op} {MARKER})", ctx.column(field.db_name())));
                args.push(field.value);
            }
            Ok(Fragment::new(parts.join(" AND "), args))
        }
    }
}

/// Render a textual filter: numeric primary key, raw expression, or (when
/// negated) a bare column name.
#[allow(clippy::result_large_err)]
fn render_text(
    sql: &str,
    args: &[Value],
    ctx: &RenderContext<'_>,
    polarity: Polarity,
) -> Result<Fragment> {
    if numeric_pattern().is_match(sql) {
        let id: i64 = sql.trim().parse().map_err(|_| {
            Error::config(
                ConfigErrorKind::UnsupportedFilter,
                format!("primary key '{}' is out of range", sql.trim()),
            )
        })?;
        let op = if polarity == Polarity::Negated { "<>" } else { "=" };
        return Ok(Fragment::new(
            format!("({} {op} {MARKER})", ctx.primary_column()?),
            vec![Value::BigInt(id)],
        ));
    }

    match polarity {
        Polarity::Positive => substitute(&format!("({sql})"), args),
        Polarity::Negated if operator_pattern().is_match(sql) => {
            substitute(&format!("NOT ({sql})"), args)
        }
        Polarity::Negated => {
            // A bare column name: one scalar argument excludes a value,
            // anything else excludes a set.
            let column = ctx.column(sql.trim());
            match args {
                [single] if !matches!(single, Value::Array(_)) => {
                    substitute(&format!("({column} <> ?)"), args)
                }
                [Value::Array(_)] => substitute(&format!("({column} NOT IN (?))"), args),
                _ => substitute(
                    &format!("({column} NOT IN (?))"),
                    &[Value::Array(args.to_vec())],
                ),
            }
        }
    }
}

/// `(marker, marker, ...)` body for a value list; `NULL` when empty.
fn expand_list(values: &[Value]) -> (String, Vec<Value>) {
    if values.is_empty() {
        return ("NULL".to_string(), Vec::new());
    }
    let markers = vec![MARKER; values.len()].join(",");
    (markers, values.to_vec())
}

/// Replace each `?` outside string literals with a marker, left to right.
///
/// Array arguments expand to one marker per element (`NULL` when empty).
/// A `?` count that differs from the argument count is an error.
#[allow(clippy::result_large_err)]
pub fn substitute(sql: &str, args: &[Value]) -> Result<Fragment> {
    let mut out = String::with_capacity(sql.len() + args.len() * MARKER.len());
    let mut bound = Vec::with_capacity(args.len());
    let mut remaining = args.iter();
    let mut in_literal = false;
    let mut placeholders = 0usize;

    for c in sql.chars() {
        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '?' if !in_literal => {
                placeholders += 1;
                match remaining.next() {
                    Some(Value::Array(items)) => {
                        let (list, mut list_args) = expand_list(items);
                        out.push_str(&list);
                        bound.append(&mut list_args);
                    }
                    Some(value) => {
                        out.push_str(MARKER);
                        bound.push(value.clone());
                    }
                    None => {}
                }
            }
            _ => out.push(c),
        }
    }

    if placeholders != args.len() {
        return Err(Error::config(
            ConfigErrorKind::PlaceholderMismatch,
            format!(
                "'{sql}' has {placeholders} placeholder(s) but {} argument(s) were given",
                args.len()
            ),
        ));
    }
    Ok(Fragment::new(out, bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Sqlite;

    fn ctx(cache: &DescriptorCache) -> RenderContext<'_> {
        RenderContext {
            dialect: &Sqlite,
            cache,
            table: "users",
            primary_key: Some("id"),
        }
    }

    fn check(fragment: &Fragment) {
        assert_eq!(fragment.marker_count(), fragment.args.len(), "{fragment:?}");
    }

    #[test]
    fn map_equality_and_null() {
        let cache = DescriptorCache::new();
        let c = ctx(&cache);
        let f = render(&Clause::new([("name", "gernest")], vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.name = $$$)");
        assert_eq!(f.args, vec![Value::from("gernest")]);

        let f = render(&Clause::new([("name", Value::Null)], vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.name IS NULL)");
        assert!(f.args.is_empty());
    }

    #[test]
    fn map_entries_are_conjoined() {
        let cache = DescriptorCache::new();
        let c = ctx(&cache);
        let filter = [
            ("age", Value::from(30)),
            ("role", Value::from(vec!["a", "b"])),
        ];
        let f = render(&Clause::new(filter, vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.age = $$$) AND (users.role IN ($$$,$$$))");
        check(&f);
    }

    #[test]
    fn numeric_shortcut_targets_primary_key() {
        let cache = DescriptorCache::new();
        let c = ctx(&cache);
        let f = render(&Clause::new("42", vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.id = $$$)");
        assert_eq!(f.args, vec![Value::BigInt(42)]);

        let f = render(&Clause::new(7_i64, vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.id = $$$)");
        assert_eq!(f.args, vec![Value::BigInt(7)]);
    }

    #[test]
    fn list_renders_in_and_empty_list_null() {
        let cache = DescriptorCache::new();
        let c = ctx(&cache);
        let f = render(&Clause::new(vec![1_i64, 2, 3], vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.id IN ($$$,$$$,$$$))");
        check(&f);

        let f = render(&Clause::new(Vec::<i64>::new(), vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.id IN (NULL))");
        assert!(f.args.is_empty());
    }

    #[test]
    fn raw_placeholders_expand_arrays() {
        let cache = DescriptorCache::new();
        let c = ctx(&cache);
        let f = render(
            &Clause::new(
                "name = ? AND role IN (?) AND tag IN (?)",
                vec![
                    Value::from("jinzhu"),
                    Value::from(vec!["admin", "dev"]),
                    Value::Array(vec![]),
                ],
            ),
            &c,
        )
        .unwrap();
        assert_eq!(
            f.sql,
            "(name = $$$ AND role IN ($$$,$$$) AND tag IN (NULL))"
        );
        check(&f);
    }

    #[test]
    fn question_marks_inside_literals_are_kept() {
        let f = substitute("note = 'why?' AND id = ?", &[Value::BigInt(1)]).unwrap();
        assert_eq!(f.sql, "note = 'why?' AND id = $$$");
        check(&f);
    }

    #[test]
    fn placeholder_mismatch_is_config_error() {
        let err = substitute("a = ? AND b = ?", &[Value::BigInt(1)]).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::PlaceholderMismatch));
        let err = substitute("a = 1", &[Value::BigInt(1)]).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::PlaceholderMismatch));
    }

    #[test]
    fn unsupported_scalars_are_config_errors() {
        let cache = DescriptorCache::new();
        let c = ctx(&cache);
        for value in [Value::Bool(true), Value::Double(1.5), Value::Bytes(vec![1])] {
            let err = render(&Clause::new(value, vec![]), &c).unwrap_err();
            assert_eq!(err.config_kind(), Some(ConfigErrorKind::UnsupportedFilter));
        }
    }

    #[test]
    fn negation_forms() {
        let cache = DescriptorCache::new();
        let c = ctx(&cache);

        let f = render_not(&Clause::new([("name", Value::Null)], vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.name IS NOT NULL)");

        let f = render_not(&Clause::new([("name", "x")], vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.name <> $$$)");

        let f = render_not(&Clause::new(vec![1_i64, 2], vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.id NOT IN ($$$,$$$))");

        let f = render_not(&Clause::new("5", vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.id <> $$$)");

        let f = render_not(&Clause::new("name LIKE ?", vec![Value::from("%a%")]), &c).unwrap();
        assert_eq!(f.sql, "NOT (name LIKE $$$)");
        check(&f);
    }

    #[test]
    fn negated_column_name_selects_branch_by_args() {
        let cache = DescriptorCache::new();
        let c = ctx(&cache);

        let f = render_not(&Clause::new("name", vec![Value::from("jinzhu")]), &c).unwrap();
        assert_eq!(f.sql, "(users.name <> $$$)");
        assert_eq!(f.args, vec![Value::from("jinzhu")]);

        let f = render_not(
            &Clause::new("name", vec![Value::from(vec!["a", "b"])]),
            &c,
        )
        .unwrap();
        assert_eq!(f.sql, "(users.name NOT IN ($$$,$$$))");
        check(&f);

        let f = render_not(
            &Clause::new("name", vec![Value::from("a"), Value::from("b")]),
            &c,
        )
        .unwrap();
        assert_eq!(f.sql, "(users.name NOT IN ($$$,$$$))");
        assert_eq!(f.args, vec![Value::from("a"), Value::from("b")]);

        let f = render_not(&Clause::new("name", vec![]), &c).unwrap();
        assert_eq!(f.sql, "(users.name NOT IN (NULL))");
        assert!(f.args.is_empty());
    }

    #[test]
    fn missing_primary_key_rejects_shortcut() {
        let cache = DescriptorCache::new();
        let c = RenderContext {
            primary_key: None,
            ..ctx(&cache)
        };
        let err = render(&Clause::new(1_i64, vec![]), &c).unwrap_err();
        assert!(err.is_config());
    }
}
