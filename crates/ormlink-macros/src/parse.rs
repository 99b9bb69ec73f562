//! Parsing of `#[derive(Model)]` input.

use proc_macro2::Span;
use syn::{
    Attribute, Data, DeriveInput, Error, Field, Fields, GenericArgument, Generics, Ident, Lit,
    PathArguments, Result, Type,
};

/// Parsed model definition.
pub struct ModelDef {
    pub name: Ident,
    pub generics: Generics,
    pub table: Option<String>,
    /// The user implements `ModelEvents` by hand.
    pub custom_events: bool,
    pub fields: Vec<FieldDef>,
}

/// How a field is read and written.
pub enum FieldKind {
    /// Converted through `Value`/`FromValue`.
    Scalar,
    /// Converted through the field type's `Scanner` impl.
    Scanner,
    /// Nested model flattened into the owner.
    Embedded,
    /// Relationship field.
    Relation(RelationWrapper),
}

/// The container a related model sits in.
pub enum RelationWrapper {
    /// `Vec<T>`
    Many(Type),
    /// `Option<T>`
    Optional(Type),
    /// `Option<Box<T>>`
    OptionalBoxed(Type),
    /// `T`
    Plain(Type),
}

impl RelationWrapper {
    pub fn related(&self) -> &Type {
        match self {
            Self::Many(ty) | Self::Optional(ty) | Self::OptionalBoxed(ty) | Self::Plain(ty) => ty,
        }
    }
}

/// Parsed field definition.
pub struct FieldDef {
    pub name: Ident,
    pub ty: Type,
    pub kind: FieldKind,
    /// Annotation text passed through to the runtime, `key:value;flag;...`.
    pub tag: String,
}

impl FieldDef {
    pub fn name_str(&self) -> String {
        self.name.to_string()
    }
}

/// Parse a derive input into a model definition.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let name = input.ident.clone();
    let StructAttrs {
        table,
        custom_events,
    } = parse_struct_attrs(&input.attrs)?;

    let fields = match &input.data {
        Data::Struct(data) => parse_fields(&data.fields)?,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };

    Ok(ModelDef {
        name,
        generics: input.generics.clone(),
        table,
        custom_events,
        fields,
    })
}

struct StructAttrs {
    table: Option<String>,
    custom_events: bool,
}

/// Parse struct-level `#[ormlink(...)]` attributes.
///
/// Supported keys:
/// - `table = "name"` (overrides the derived table name)
/// - `events` (skip the empty `ModelEvents` impl)
fn parse_struct_attrs(attrs: &[Attribute]) -> Result<StructAttrs> {
    let mut table: Option<String> = None;
    let mut custom_events = false;

    for attr in attrs {
        if !attr.path().is_ident("ormlink") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                if table.is_some() {
                    return Err(Error::new_spanned(
                        meta.path,
                        "duplicate ormlink attribute: table",
                    ));
                }
                table = Some(string_value(&meta, "table")?);
                Ok(())
            } else if meta.path.is_ident("events") {
                custom_events = true;
                Ok(())
            } else {
                Err(Error::new_spanned(
                    meta.path,
                    "unknown ormlink struct attribute (supported: table, events)",
                ))
            }
        })?;
    }

    Ok(StructAttrs {
        table,
        custom_events,
    })
}

fn string_value(meta: &syn::meta::ParseNestedMeta<'_>, key: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(s) => {
            let text = s.value();
            if text.contains(';') {
                return Err(Error::new_spanned(s, format!("{key} must not contain ';'")));
            }
            Ok(text)
        }
        Lit::Int(i) if key == "size" => Ok(i.base10_digits().to_string()),
        Lit::Bool(b) if key == "auto_increment" => Ok(b.value.to_string()),
        other => Err(Error::new_spanned(
            other,
            format!("expected string literal for {key}"),
        )),
    }
}

fn parse_fields(fields: &Fields) -> Result<Vec<FieldDef>> {
    match fields {
        Fields::Named(named) => named.named.iter().map(parse_field).collect(),
        Fields::Unnamed(_) => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with named fields, not a tuple struct",
        )),
        Fields::Unit => Err(Error::new(
            Span::call_site(),
            "Model requires a struct with fields, not a unit struct",
        )),
    }
}

/// Keys that take a value, in the order they are written to the tag.
const VALUE_KEYS: &[&str] = &[
    "column",
    "default",
    "size",
    "type",
    "auto_increment",
    "embedded_prefix",
    "foreignkey",
    "association_foreignkey",
    "polymorphic",
    "polymorphic_value",
    "many2many",
    "jointable_foreignkey",
    "association_jointable_foreignkey",
];

/// Value keys that make a field a relationship.
const RELATION_KEYS: &[&str] = &[
    "foreignkey",
    "association_foreignkey",
    "polymorphic",
    "polymorphic_value",
    "many2many",
    "jointable_foreignkey",
    "association_jointable_foreignkey",
];

#[derive(Default)]
struct FieldAttrs {
    primary_key: bool,
    ignore: bool,
    unique: bool,
    not_null: bool,
    embedded: bool,
    scanner: bool,
    association: bool,
    values: Vec<(&'static str, String)>,
}

impl FieldAttrs {
    fn has(&self, key: &str) -> bool {
        self.values.iter().any(|(k, _)| *k == key)
    }

    fn is_relation(&self) -> bool {
        self.association || RELATION_KEYS.iter().any(|k| self.has(k))
    }

    fn tag(&self) -> String {
        let mut parts = Vec::new();
        if let Some((_, v)) = self.values.iter().find(|(k, _)| *k == "column") {
            parts.push(format!("column:{v}"));
        }
        if self.primary_key {
            parts.push("primary_key".to_string());
        }
        if self.ignore {
            parts.push("-".to_string());
        }
        for key in &VALUE_KEYS[1..] {
            if let Some((_, v)) = self.values.iter().find(|(k, _)| k == key) {
                parts.push(format!("{key}:{v}"));
            }
        }
        if self.not_null {
            parts.push("not null".to_string());
        }
        if self.unique {
            parts.push("unique".to_string());
        }
        if self.embedded {
            parts.push("embedded".to_string());
        }
        if self.scanner {
            parts.push("scanner".to_string());
        }
        parts.join(";")
    }
}

fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut result = FieldAttrs::default();

    for attr in attrs {
        if !attr.path().is_ident("ormlink") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let path = &meta.path;
            if path.is_ident("primary_key") {
                result.primary_key = true;
            } else if path.is_ident("ignore") || path.is_ident("skip") {
                result.ignore = true;
            } else if path.is_ident("unique") {
                result.unique = true;
            } else if path.is_ident("not_null") {
                result.not_null = true;
            } else if path.is_ident("embedded") {
                result.embedded = true;
            } else if path.is_ident("scanner") {
                result.scanner = true;
            } else if path.is_ident("association") {
                result.association = true;
            } else if let Some(&key) = VALUE_KEYS.iter().find(|k| path.is_ident(k)) {
                if result.has(key) {
                    return Err(Error::new_spanned(
                        path,
                        format!("duplicate ormlink attribute: {key}"),
                    ));
                }
                let value = string_value(&meta, key)?;
                result.values.push((key, value));
            } else {
                return Err(Error::new_spanned(
                    path,
                    "unknown ormlink field attribute",
                ));
            }
            Ok(())
        })?;
    }

    Ok(result)
}

fn parse_field(field: &Field) -> Result<FieldDef> {
    let name = field
        .ident
        .clone()
        .ok_or_else(|| Error::new_spanned(field, "expected named field"))?;
    let ty = field.ty.clone();
    let attrs = parse_field_attrs(&field.attrs)?;

    let exclusive = [attrs.embedded, attrs.scanner, attrs.is_relation()]
        .iter()
        .filter(|b| **b)
        .count();
    if exclusive > 1 {
        return Err(Error::new_spanned(
            &field.ty,
            "a field can be only one of: embedded, scanner, association",
        ));
    }

    let kind = if attrs.embedded {
        FieldKind::Embedded
    } else if attrs.scanner {
        FieldKind::Scanner
    } else if attrs.is_relation() {
        FieldKind::Relation(relation_wrapper(&ty)?)
    } else {
        FieldKind::Scalar
    };

    Ok(FieldDef {
        name,
        ty,
        kind,
        tag: attrs.tag(),
    })
}

/// Classify the container of a relationship field.
fn relation_wrapper(ty: &Type) -> Result<RelationWrapper> {
    if let Some(inner) = generic_inner(ty, "Vec") {
        return Ok(RelationWrapper::Many(inner.clone()));
    }
    if let Some(inner) = generic_inner(ty, "Option") {
        if let Some(boxed) = generic_inner(inner, "Box") {
            return Ok(RelationWrapper::OptionalBoxed(boxed.clone()));
        }
        return Ok(RelationWrapper::Optional(inner.clone()));
    }
    if generic_inner(ty, "Box").is_some() {
        return Err(Error::new_spanned(
            ty,
            "use Option<Box<T>> for a boxed association",
        ));
    }
    Ok(RelationWrapper::Plain(ty.clone()))
}

/// `Some(T)` when `ty` is `Wrapper<T>`.
pub fn generic_inner<'a>(ty: &'a Type, wrapper: &str) -> Option<&'a Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != wrapper {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    match args.args.first()? {
        GenericArgument::Type(inner) => Some(inner),
        _ => None,
    }
}
