//! Model descriptors and the descriptor cache.
//!
//! [`DescriptorCache::describe`] introspects a record type once: it flattens
//! embedded structs, parses field annotations, picks the primary key and
//! infers every relationship. The result is immutable and shared through an
//! `Arc`; callers that need a variation clone the field descriptor.

use crate::error::{ConfigErrorKind, Error, Result};
use crate::field::{Field, FieldDescriptor, FieldShape, parse_tag};
use crate::model::{Model, Record, RecordType};
use crate::naming;
use crate::relationship::{JoinKey, JoinTable, Relationship, RelationshipKind};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Table naming switches applied when deriving default table names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingOptions {
    /// Use `user` instead of `users`.
    pub singular_table: bool,
    /// Prepended to every table name.
    pub table_prefix: String,
}

impl NamingOptions {
    /// Table name for a record type, honoring its explicit override.
    pub fn table_name(&self, ty: &RecordType) -> String {
        let base = match ty.table {
            Some(table) => table.to_string(),
            None if self.singular_table => naming::to_snake_case(ty.name),
            None => naming::table_name(ty.name),
        };
        format!("{}{}", self.table_prefix, base)
    }
}

/// Everything the engine knows about one record type.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub type_name: &'static str,
    pub type_id: TypeId,
    pub table_name: String,
    /// Flattened fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
    primary: Vec<usize>,
}

impl ModelDescriptor {
    /// Primary key fields, in declaration order.
    pub fn primary_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.primary.iter().map(|&i| &self.fields[i])
    }

    /// The first primary key field.
    pub fn primary_field(&self) -> Option<&FieldDescriptor> {
        self.primary.first().map(|&i| &self.fields[i])
    }

    /// Look a field up by in-language name or column name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.field_by_db_name(name))
    }

    pub fn field_by_db_name(&self, db_name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.db_name == db_name && !f.is_ignored)
    }

    /// Fields that map to columns.
    pub fn columns(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_column())
    }

    pub fn has_column(&self, db_name: &str) -> bool {
        self.columns().any(|f| f.db_name == db_name)
    }

    /// Relationship fields.
    pub fn relationships(&self) -> impl Iterator<Item = (&FieldDescriptor, &Relationship)> {
        self.fields
            .iter()
            .filter(|f| !f.is_ignored)
            .filter_map(|f| f.relationship.as_ref().map(|r| (f, r)))
    }

    /// Bind every non-ignored field to the values held by `record`.
    pub fn bind(&self, record: &dyn Record) -> Vec<Field> {
        self.fields
            .iter()
            .filter(|f| !f.is_ignored)
            .map(|f| Field::bind(f, record))
            .collect()
    }

    /// Primary key values of `record`, paired with their column names.
    pub fn primary_values(&self, record: &dyn Record) -> Vec<(String, crate::Value)> {
        self.primary_fields()
            .map(|f| (f.db_name.clone(), Field::bind(f, record).value))
            .collect()
    }

    /// Whether every primary key of `record` is blank.
    pub fn primary_key_is_blank(&self, record: &dyn Record) -> bool {
        self.primary_fields()
            .all(|f| Field::bind(f, record).is_blank)
    }
}

/// Concurrency-safe cache of model descriptors, keyed by type identity.
///
/// Reads take a shared lock. A missing descriptor is built outside the lock
/// and inserted with `entry().or_insert`, so concurrent first calls converge
/// on a single cached `Arc`.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    descriptors: RwLock<HashMap<TypeId, Arc<ModelDescriptor>>>,
    naming: NamingOptions,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_naming(naming: NamingOptions) -> Self {
        Self {
            descriptors: RwLock::new(HashMap::new()),
            naming,
        }
    }

    pub fn naming(&self) -> &NamingOptions {
        &self.naming
    }

    #[allow(clippy::result_large_err)]
    pub fn describe<T: Model>(&self) -> Result<Arc<ModelDescriptor>> {
        self.describe_type(&T::record_type())
    }

    /// Descriptor for the concrete type behind a record.
    #[allow(clippy::result_large_err)]
    pub fn describe_record(&self, record: &dyn Record) -> Result<Arc<ModelDescriptor>> {
        self.describe_type(&record.shape())
    }

    #[allow(clippy::result_large_err)]
    pub fn describe_type(&self, ty: &RecordType) -> Result<Arc<ModelDescriptor>> {
        {
            let map = self
                .descriptors
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(found) = map.get(&ty.type_id) {
                return Ok(Arc::clone(found));
            }
        }

        let built = Arc::new(build_descriptor(ty, &self.naming)?);
        tracing::debug!(
            model = ty.name,
            table = %built.table_name,
            fields = built.fields.len(),
            "described model"
        );

        let mut map = self
            .descriptors
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(map.entry(ty.type_id).or_insert(built)))
    }

    /// Table name for a type without describing it.
    pub fn table_name(&self, ty: &RecordType) -> String {
        self.naming.table_name(ty)
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.descriptors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[allow(clippy::result_large_err)]
fn build_descriptor(ty: &RecordType, naming_opts: &NamingOptions) -> Result<ModelDescriptor> {
    let mut fields = Vec::new();
    let mut pending = Vec::new();
    collect_fields(ty, &[], "", false, &mut fields, &mut pending);
    let primary = assign_primary_keys(&mut fields);

    let table_name = naming_opts.table_name(ty);
    let owner = Owner {
        ty,
        table: &table_name,
        fields: &fields,
        primary: &primary,
    };
    let mut resolved = Vec::with_capacity(pending.len());
    for (index, shape) in pending {
        let rel = resolve_relationship(&owner, &fields[index], shape, naming_opts)?;
        resolved.push((index, rel));
    }
    for (index, rel) in resolved {
        fields[index].relationship = Some(rel);
    }

    Ok(ModelDescriptor {
        type_name: ty.name,
        type_id: ty.type_id,
        table_name,
        fields,
        primary,
    })
}

/// Scalar fields of a related type, without resolving its relationships.
fn shallow_fields(ty: &RecordType) -> (Vec<FieldDescriptor>, Vec<usize>) {
    let mut fields = Vec::new();
    let mut pending = Vec::new();
    collect_fields(ty, &[], "", true, &mut fields, &mut pending);
    let primary = assign_primary_keys(&mut fields);
    (fields, primary)
}

/// Flatten declared fields into descriptors.
///
/// Relationship fields are returned in `pending` for later resolution.
/// Relationship fields found inside embedded structs are kept as ignored.
fn collect_fields(
    ty: &RecordType,
    path: &[String],
    db_prefix: &str,
    nested: bool,
    out: &mut Vec<FieldDescriptor>,
    pending: &mut Vec<(usize, FieldShape)>,
) {
    for decl in &ty.fields {
        let tags = parse_tag(decl.tag);
        let ignored = tags.contains_key("-") || tags.contains_key("IGNORE");
        let mut names = path.to_vec();
        names.push(decl.name.to_string());

        match decl.shape {
            FieldShape::Embedded(inner) => {
                if ignored {
                    continue;
                }
                let prefix = match tags.get("EMBEDDED_PREFIX") {
                    Some(p) => format!("{db_prefix}{p}"),
                    None => db_prefix.to_string(),
                };
                collect_fields(&inner(), &names, &prefix, nested, out, pending);
            }
            FieldShape::Scalar { sql_type, nullable } => {
                let db_name = match tags.get("COLUMN") {
                    Some(column) => format!("{db_prefix}{column}"),
                    None => format!("{db_prefix}{}", naming::to_snake_case(decl.name)),
                };
                out.push(FieldDescriptor {
                    name: decl.name.to_string(),
                    names,
                    db_name,
                    is_primary_key: tags.contains_key("PRIMARY_KEY"),
                    is_ignored: ignored,
                    is_normal: true,
                    has_default_value: tags.contains_key("DEFAULT"),
                    is_scanner: tags.contains_key("SCANNER"),
                    sql_type: Some(sql_type),
                    nullable: nullable && !tags.contains_key("NOT NULL"),
                    tags,
                    relationship: None,
                });
            }
            FieldShape::One(_) | FieldShape::Many(_) => {
                let skip = ignored || nested || !path.is_empty();
                out.push(FieldDescriptor {
                    name: decl.name.to_string(),
                    names,
                    db_name: naming::to_snake_case(decl.name),
                    is_primary_key: false,
                    is_ignored: skip,
                    is_normal: false,
                    has_default_value: false,
                    is_scanner: false,
                    sql_type: None,
                    nullable: true,
                    tags,
                    relationship: None,
                });
                if !skip {
                    pending.push((out.len() - 1, decl.shape));
                }
            }
        }
    }
}

/// Mark primary keys; a column named `id` is the fallback.
fn assign_primary_keys(fields: &mut [FieldDescriptor]) -> Vec<usize> {
    let tagged: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.is_primary_key && f.is_column())
        .map(|(i, _)| i)
        .collect();
    if !tagged.is_empty() {
        return tagged;
    }
    match fields
        .iter()
        .position(|f| f.is_column() && f.db_name == "id")
    {
        Some(i) => {
            fields[i].is_primary_key = true;
            vec![i]
        }
        None => Vec::new(),
    }
}

struct Owner<'a> {
    ty: &'a RecordType,
    table: &'a str,
    fields: &'a [FieldDescriptor],
    primary: &'a [usize],
}

fn find_field<'f>(fields: &'f [FieldDescriptor], name: &str) -> Option<&'f FieldDescriptor> {
    let snake = naming::to_snake_case(name);
    fields
        .iter()
        .filter(|f| f.is_column())
        .find(|f| f.name == name || f.db_name == name || f.db_name == snake)
}

fn tag_list(field: &FieldDescriptor, key: &str) -> Option<Vec<String>> {
    field.tag(key).map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
}

/// Resolve every name in `names` against `fields`, or none.
fn find_all<'f>(fields: &'f [FieldDescriptor], names: &[String]) -> Option<Vec<&'f FieldDescriptor>> {
    if names.is_empty() {
        return None;
    }
    names.iter().map(|n| find_field(fields, n)).collect()
}

fn relationship_error(owner: &RecordType, field: &FieldDescriptor, message: &str) -> Error {
    Error::config(
        ConfigErrorKind::Relationship,
        format!("{}.{}: {message}", owner.name, field.name),
    )
}

fn names_of(fields: &[&FieldDescriptor]) -> (Vec<String>, Vec<String>) {
    (
        fields.iter().map(|f| f.name.clone()).collect(),
        fields.iter().map(|f| f.db_name.clone()).collect(),
    )
}

/// Keys named by `key` on `field`, looked up in `fields`, or the primary keys.
#[allow(clippy::result_large_err)]
fn referenced_keys<'f>(
    owner: &RecordType,
    field: &FieldDescriptor,
    key: &str,
    fields: &'f [FieldDescriptor],
    primary: &[usize],
) -> Result<Vec<&'f FieldDescriptor>> {
    let keys: Vec<&FieldDescriptor> = match tag_list(field, key) {
        Some(list) => find_all(fields, &list).ok_or_else(|| {
            relationship_error(owner, field, &format!("{key} names an unknown field"))
        })?,
        None => primary.iter().map(|&i| &fields[i]).collect(),
    };
    if keys.is_empty() {
        return Err(relationship_error(
            owner,
            field,
            "referenced type has no primary key",
        ));
    }
    Ok(keys)
}

#[allow(clippy::result_large_err)]
fn resolve_relationship(
    owner: &Owner<'_>,
    field: &FieldDescriptor,
    shape: FieldShape,
    naming_opts: &NamingOptions,
) -> Result<Relationship> {
    let (related_type, many) = match shape {
        FieldShape::One(f) => (f, false),
        FieldShape::Many(f) => (f, true),
        FieldShape::Scalar { .. } | FieldShape::Embedded(_) => {
            return Err(relationship_error(owner.ty, field, "not a relationship field"));
        }
    };
    let related = related_type();
    let (related_fields, related_primary) = shallow_fields(&related);
    let related_table = naming_opts.table_name(&related);
    let owner_snake = naming::to_snake_case(owner.ty.name);
    let related_snake = naming::to_snake_case(related.name);

    let base = Relationship {
        kind: RelationshipKind::HasMany,
        related_type,
        related_table,
        foreign_field_names: Vec::new(),
        foreign_db_names: Vec::new(),
        association_foreign_field_names: Vec::new(),
        association_foreign_db_names: Vec::new(),
        polymorphic_type: None,
        polymorphic_db_name: None,
        polymorphic_value: None,
        join_table: None,
    };

    if let (true, Some(join_table)) = (many, field.tag("many2many")) {
        let owner_keys = referenced_keys(owner.ty, field, "foreignkey", owner.fields, owner.primary)?;
        let related_keys = referenced_keys(
            owner.ty,
            field,
            "association_foreignkey",
            &related_fields,
            &related_primary,
        )?;
        let self_referential = related.type_id == owner.ty.type_id;
        let source_columns = tag_list(field, "jointable_foreignkey").unwrap_or_else(|| {
            owner_keys
                .iter()
                .map(|k| format!("{owner_snake}_{}", k.db_name))
                .collect()
        });
        let destination_columns =
            tag_list(field, "association_jointable_foreignkey").unwrap_or_else(|| {
                related_keys
                    .iter()
                    .map(|k| {
                        if self_referential {
                            format!(
                                "{}_{related_snake}_{}",
                                naming::to_snake_case(&field.name),
                                k.db_name
                            )
                        } else {
                            format!("{related_snake}_{}", k.db_name)
                        }
                    })
                    .collect()
            });
        if source_columns.len() != owner_keys.len()
            || destination_columns.len() != related_keys.len()
        {
            return Err(relationship_error(
                owner.ty,
                field,
                "join table key count does not match the referenced keys",
            ));
        }
        let join_keys = |columns: Vec<String>, keys: &[&FieldDescriptor]| -> Vec<JoinKey> {
            columns
                .into_iter()
                .zip(keys)
                .map(|(db_name, key)| JoinKey {
                    db_name,
                    association_db_name: key.db_name.clone(),
                    association_field: key.name.clone(),
                })
                .collect()
        };
        let (foreign_field_names, foreign_db_names) = names_of(&owner_keys);
        let (association_foreign_field_names, association_foreign_db_names) =
            names_of(&related_keys);
        return Ok(Relationship {
            kind: RelationshipKind::ManyToMany,
            foreign_field_names,
            foreign_db_names,
            association_foreign_field_names,
            association_foreign_db_names,
            join_table: Some(JoinTable {
                table: join_table.to_string(),
                source_keys: join_keys(source_columns, &owner_keys),
                destination_keys: join_keys(destination_columns, &related_keys),
            }),
            ..base
        });
    }

    // has_one / has_many: the related type holds the key.
    let owner_keys = referenced_keys(
        owner.ty,
        field,
        "association_foreignkey",
        owner.fields,
        owner.primary,
    );
    let mut polymorphic = None;
    let candidates: Option<Vec<String>> = if let Some(name) = field.tag("polymorphic") {
        let stem = naming::to_snake_case(name);
        let discriminator = find_field(&related_fields, &format!("{stem}_type")).ok_or_else(|| {
            Error::config(
                ConfigErrorKind::MissingDiscriminator,
                format!(
                    "{}.{}: polymorphic '{name}' requires a '{stem}_type' field on {}",
                    owner.ty.name, field.name, related.name
                ),
            )
        })?;
        let value = field
            .tag("polymorphic_value")
            .map_or_else(|| owner.table.to_string(), str::to_string);
        polymorphic = Some((
            discriminator.name.clone(),
            discriminator.db_name.clone(),
            value,
        ));
        Some(tag_list(field, "foreignkey").unwrap_or_else(|| vec![format!("{stem}_id")]))
    } else {
        tag_list(field, "foreignkey").or_else(|| {
            owner_keys.as_ref().ok().map(|keys| {
                keys.iter()
                    .map(|k| format!("{owner_snake}_{}", k.db_name))
                    .collect()
            })
        })
    };

    let held_by_related = match (&owner_keys, &candidates) {
        (Ok(keys), Some(candidates)) => find_all(&related_fields, candidates)
            .filter(|foreign| foreign.len() <= keys.len())
            .map(|foreign| (keys, foreign)),
        _ => None,
    };
    if let Some((owner_keys, foreign)) = held_by_related {
        let (foreign_field_names, foreign_db_names) = names_of(&foreign);
        let (association_foreign_field_names, association_foreign_db_names) =
            names_of(&owner_keys[..foreign.len()]);
        let (polymorphic_type, polymorphic_db_name, polymorphic_value) = match polymorphic {
            Some((name, db, value)) => (Some(name), Some(db), Some(value)),
            None => (None, None, None),
        };
        return Ok(Relationship {
            kind: if many {
                RelationshipKind::HasMany
            } else {
                RelationshipKind::HasOne
            },
            foreign_field_names,
            foreign_db_names,
            association_foreign_field_names,
            association_foreign_db_names,
            polymorphic_type,
            polymorphic_db_name,
            polymorphic_value,
            ..base
        });
    }

    if many || polymorphic.is_some() {
        return Err(relationship_error(
            owner.ty,
            field,
            &format!("no foreign key found on {}", related.name),
        ));
    }

    // belongs_to: the owner holds the key.
    let related_keys = referenced_keys(
        owner.ty,
        field,
        "association_foreignkey",
        &related_fields,
        &related_primary,
    )?;
    let field_snake = naming::to_snake_case(&field.name);
    let candidate_sets: Vec<Vec<String>> = match tag_list(field, "foreignkey") {
        Some(list) => vec![list],
        None => [field_snake.as_str(), related_snake.as_str()]
            .iter()
            .map(|stem| {
                related_keys
                    .iter()
                    .map(|k| format!("{stem}_{}", k.db_name))
                    .collect()
            })
            .collect(),
    };
    for candidates in &candidate_sets {
        if let Some(foreign) = find_all(owner.fields, candidates) {
            let (foreign_field_names, foreign_db_names) = names_of(&foreign);
            let (association_foreign_field_names, association_foreign_db_names) =
                names_of(&related_keys[..foreign.len().min(related_keys.len())]);
            return Ok(Relationship {
                kind: RelationshipKind::BelongsTo,
                foreign_field_names,
                foreign_db_names,
                association_foreign_field_names,
                association_foreign_db_names,
                ..base
            });
        }
    }

    Err(relationship_error(
        owner.ty,
        field,
        &format!(
            "cannot infer relationship with {}: no foreign key on either side",
            related.name
        ),
    ))
}
