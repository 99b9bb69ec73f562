//! Per-operation search state.

use ormlink_core::Value;
use std::collections::BTreeMap;

use crate::condition::{Clause, Filter};

/// Settings key: order by the primary key when no explicit order is given.
pub const ORDER_BY_PRIMARY_KEY: &str = "order_by_primary_key";

/// Accumulated query-building instructions for one statement.
///
/// Built through a by-value fluent chain and consumed by the statement
/// assembler; a `Search` is never shared between statements.
#[derive(Debug, Clone, Default)]
pub struct Search {
    pub where_conditions: Vec<Clause>,
    pub or_conditions: Vec<Clause>,
    pub not_conditions: Vec<Clause>,
    pub having_conditions: Vec<Clause>,
    pub join_conditions: Vec<Clause>,
    /// Explicit column list or expression.
    pub selects: Option<Clause>,
    pub omits: Vec<String>,
    pub orders: Vec<String>,
    pub group: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Relation names loaded after the query completes.
    pub preload: Vec<String>,
    /// Pass the first WHERE clause through as the whole statement.
    pub raw: bool,
    /// Ignore soft-delete exclusion.
    pub unscoped: bool,
    /// Table override.
    pub table_name: Option<String>,
    /// Transient flags shared between hook steps.
    pub settings: BTreeMap<String, Value>,
}

impl Search {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an AND condition.
    #[must_use]
    pub fn filter(mut self, query: impl Into<Filter>, args: Vec<Value>) -> Self {
        self.where_conditions.push(Clause::new(query, args));
        self
    }

    /// Add an OR condition.
    #[must_use]
    pub fn or_filter(mut self, query: impl Into<Filter>, args: Vec<Value>) -> Self {
        self.or_conditions.push(Clause::new(query, args));
        self
    }

    /// Add a negated condition, folded into the AND group.
    #[must_use]
    pub fn not_filter(mut self, query: impl Into<Filter>, args: Vec<Value>) -> Self {
        self.not_conditions.push(Clause::new(query, args));
        self
    }

    #[must_use]
    pub fn having(mut self, query: impl Into<Filter>, args: Vec<Value>) -> Self {
        self.having_conditions.push(Clause::new(query, args));
        self
    }

    /// Add a JOIN fragment, e.g. `"JOIN emails ON emails.user_id = users.id"`.
    #[must_use]
    pub fn joins(mut self, query: impl Into<String>, args: Vec<Value>) -> Self {
        self.join_conditions
            .push(Clause::new(Filter::Raw(query.into()), args));
        self
    }

    #[must_use]
    pub fn select(mut self, query: impl Into<String>, args: Vec<Value>) -> Self {
        self.selects = Some(Clause::new(Filter::Raw(query.into()), args));
        self
    }

    /// Exclude columns from SELECT and INSERT/UPDATE column lists.
    #[must_use]
    pub fn omit<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omits.extend(columns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.orders.push(order.into());
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn preload(mut self, relation: impl Into<String>) -> Self {
        self.preload.push(relation.into());
        self
    }

    #[must_use]
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    #[must_use]
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Switch to raw mode: the first WHERE clause is the whole statement.
    #[must_use]
    pub fn raw(mut self, sql: impl Into<String>, args: Vec<Value>) -> Self {
        self.raw = true;
        self.where_conditions
            .push(Clause::new(Filter::Raw(sql.into()), args));
        self
    }

    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Whether a boolean setting is switched on.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether any WHERE-producing condition has been added.
    pub fn has_conditions(&self) -> bool {
        !(self.where_conditions.is_empty()
            && self.or_conditions.is_empty()
            && self.not_conditions.is_empty())
    }

    /// Whether `column` survives the select/omit lists.
    pub fn includes_column(&self, column: &str) -> bool {
        if self.omits.iter().any(|c| c == column) {
            return false;
        }
        match self.selects.as_ref().map(|c| &c.query) {
            Some(Filter::Raw(list)) => list
                .split(',')
                .map(str::trim)
                .any(|c| c == column || c == "*"),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_accumulates() {
        let search = Search::new()
            .filter("name = ?", vec![Value::from("a")])
            .or_filter("name = ?", vec![Value::from("b")])
            .not_filter([("role", "admin")], vec![])
            .order("name DESC")
            .limit(3)
            .offset(1)
            .set(ORDER_BY_PRIMARY_KEY, true);

        assert_eq!(search.where_conditions.len(), 1);
        assert_eq!(search.or_conditions.len(), 1);
        assert_eq!(search.not_conditions.len(), 1);
        assert_eq!(search.orders, vec!["name DESC"]);
        assert_eq!((search.limit, search.offset), (Some(3), Some(1)));
        assert!(search.flag(ORDER_BY_PRIMARY_KEY));
        assert!(search.has_conditions());
    }

    #[test]
    fn empty_search_has_no_conditions() {
        let search = Search::new().order("id").limit(1).having("count(*) > 1", vec![]);
        assert!(!search.has_conditions());
        assert!(!search.flag("missing"));
    }

    #[test]
    fn select_and_omit_filter_columns() {
        let search = Search::new().select("id, name", vec![]);
        assert!(search.includes_column("name"));
        assert!(!search.includes_column("email"));

        let search = Search::new().omit(["email"]);
        assert!(search.includes_column("name"));
        assert!(!search.includes_column("email"));
    }
}
