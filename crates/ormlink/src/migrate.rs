//! Table creation from model descriptors.

use ormlink_core::{FieldDescriptor, JoinKey, JoinTable, ModelDescriptor, RelationshipKind, Result};
use ormlink_query::Dialect;
use std::collections::BTreeMap;

use crate::db::Db;

/// `CREATE TABLE` for a model's columns.
///
/// A `PRIMARY KEY (...)` constraint is added unless a column type already
/// declares the key inline (SQLite's `integer primary key autoincrement`).
pub fn create_table_sql(dialect: &dyn Dialect, descriptor: &ModelDescriptor) -> String {
    let mut definitions: Vec<String> = descriptor
        .columns()
        .map(|f| format!("{} {}", dialect.quote(&f.db_name), dialect.column_type(f)))
        .collect();
    let inline_key = definitions
        .iter()
        .any(|d| d.to_ascii_lowercase().contains("primary key"));
    let keys: Vec<String> = descriptor
        .primary_fields()
        .map(|f| dialect.quote(&f.db_name))
        .collect();
    if !inline_key && !keys.is_empty() {
        definitions.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    format!(
        "CREATE TABLE {} ({})",
        dialect.quote(&descriptor.table_name),
        definitions.join(", ")
    )
}

/// Column definition for a join-table column mirroring `source`.
fn join_column(dialect: &dyn Dialect, key: &JoinKey, source: Option<&FieldDescriptor>) -> String {
    let column_type = match source {
        Some(source) => {
            let mut field = source.clone();
            field.db_name.clone_from(&key.db_name);
            field.is_primary_key = false;
            field.has_default_value = false;
            field.nullable = false;
            field.tags = source
                .tags
                .iter()
                .filter(|(k, _)| k.as_str() == "SIZE")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>();
            dialect.column_type(&field)
        }
        None => "bigint".to_string(),
    };
    format!("{} {column_type}", dialect.quote(&key.db_name))
}

/// `CREATE TABLE` for a many-to-many join table; the pair of keys is the
/// primary key.
pub fn join_table_sql(
    dialect: &dyn Dialect,
    join: &JoinTable,
    owner: &ModelDescriptor,
    related: &ModelDescriptor,
) -> String {
    let mut definitions: Vec<String> = join
        .source_keys
        .iter()
        .map(|k| join_column(dialect, k, owner.field(&k.association_field)))
        .chain(
            join.destination_keys
                .iter()
                .map(|k| join_column(dialect, k, related.field(&k.association_field))),
        )
        .collect();
    let keys: Vec<String> = join.columns().map(|c| dialect.quote(c)).collect();
    definitions.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    format!(
        "CREATE TABLE {} ({})",
        dialect.quote(&join.table),
        definitions.join(", ")
    )
}

#[allow(clippy::result_large_err)]
pub(crate) fn create_table(db: &Db, descriptor: &ModelDescriptor) -> Result<()> {
    if db.has_table(&descriptor.table_name)? {
        tracing::debug!(table = %descriptor.table_name, "table exists");
    } else {
        let sql = create_table_sql(db.dialect(), descriptor);
        tracing::debug!(table = %descriptor.table_name, sql = %sql, "creating table");
        db.executor().execute(&sql, &[])?;
    }
    create_join_tables(db, descriptor)
}

#[allow(clippy::result_large_err)]
fn create_join_tables(db: &Db, descriptor: &ModelDescriptor) -> Result<()> {
    for (_, rel) in descriptor.relationships() {
        let (RelationshipKind::ManyToMany, Some(join)) = (rel.kind, &rel.join_table) else {
            continue;
        };
        if db.has_table(&join.table)? {
            continue;
        }
        let related = db.cache().describe_type(&(rel.related_type)())?;
        let sql = join_table_sql(db.dialect(), join, descriptor, &related);
        tracing::debug!(table = %join.table, sql = %sql, "creating join table");
        db.executor().execute(&sql, &[])?;
    }
    Ok(())
}

/// Create the table, or add whichever columns it lacks.
///
/// Existing columns are never altered or dropped.
#[allow(clippy::result_large_err)]
pub(crate) fn auto_migrate(db: &Db, descriptor: &ModelDescriptor) -> Result<()> {
    if !db.has_table(&descriptor.table_name)? {
        return create_table(db, descriptor);
    }
    let dialect = db.dialect();
    for field in descriptor.columns().filter(|f| !f.is_primary_key) {
        if dialect.has_column(db.executor(), &descriptor.table_name, &field.db_name)? {
            continue;
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            dialect.quote(&descriptor.table_name),
            dialect.quote(&field.db_name),
            dialect.column_type(field)
        );
        tracing::info!(table = %descriptor.table_name, column = %field.db_name, "adding column");
        db.executor().execute(&sql, &[])?;
    }
    create_join_tables(db, descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Model;
    use ormlink_core::DescriptorCache;
    use ormlink_query::{Postgres, Sqlite};

    #[derive(Model, Debug, Clone, Default)]
    struct Language {
        id: i64,
        #[ormlink(size = 32)]
        name: String,
    }

    #[derive(Model, Debug, Clone, Default)]
    struct Speaker {
        id: i64,
        name: String,
        #[ormlink(many2many = "speaker_languages")]
        languages: Vec<Language>,
    }

    #[test]
    fn sqlite_key_is_inline() {
        let cache = DescriptorCache::new();
        let speaker = cache.describe::<Speaker>().unwrap();
        assert_eq!(
            create_table_sql(&Sqlite, &speaker),
            "CREATE TABLE speakers (id integer primary key autoincrement, name text)"
        );
    }

    #[test]
    fn postgres_gets_key_constraint() {
        let cache = DescriptorCache::new();
        let speaker = cache.describe::<Speaker>().unwrap();
        assert_eq!(
            create_table_sql(&Postgres, &speaker),
            "CREATE TABLE speakers (id bigserial, name text, PRIMARY KEY (id))"
        );
    }

    #[test]
    fn join_table_keys_both_sides() {
        let cache = DescriptorCache::new();
        let speaker = cache.describe::<Speaker>().unwrap();
        let language = cache.describe::<Language>().unwrap();
        let (_, rel) = speaker.relationships().next().unwrap();
        let join = rel.join_table.as_ref().unwrap();
        assert_eq!(
            join_table_sql(&Sqlite, join, &speaker, &language),
            "CREATE TABLE speaker_languages (speaker_id bigint, language_id bigint, \
             PRIMARY KEY (speaker_id, language_id))"
        );
    }
}
