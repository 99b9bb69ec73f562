//! Procedural macros for ormlink.
//!
//! `#[derive(Model)]` describes a struct's shape once at compile time: the
//! declared fields, their annotation tags and how each is read and written.
//! Column names, primary keys and relationships are resolved from that shape
//! at runtime by `ormlink_core::DescriptorCache`.

use proc_macro::TokenStream;
use quote::quote;

mod parse;

use parse::{FieldDef, FieldKind, ModelDef, RelationWrapper, parse_model};

/// Derive macro for the `Model` and `Record` traits.
///
/// # Attributes
///
/// Struct level:
/// - `#[ormlink(table = "name")]` - Override the table name
/// - `#[ormlink(events)]` - The type implements `ModelEvents` itself
///
/// Field level:
/// - `primary_key`, `unique`, `not_null`, `ignore` (or `skip`)
/// - `column = "name"`, `default = "expr"`, `size = 64`, `type = "sql type"`
/// - `auto_increment = false`
/// - `embedded`, `embedded_prefix = "prefix_"` - Flatten a nested model
/// - `scanner` - Convert through the field type's `Scanner` impl
/// - `association` - Mark a relationship field (`Vec<T>`, `Option<T>`,
///   `Option<Box<T>>` or `T`)
/// - `foreignkey`, `association_foreignkey`, `polymorphic`,
///   `polymorphic_value`, `many2many`, `jointable_foreignkey`,
///   `association_jointable_foreignkey` - Relationship overrides; each also
///   marks the field as a relationship
///
/// # Example
///
/// ```ignore
/// use ormlink::Model;
///
/// #[derive(Model, Debug, Clone, Default)]
/// struct User {
///     id: i64,
///     #[ormlink(size = 64, unique)]
///     name: String,
///     #[ormlink(association)]
///     pets: Vec<Pet>,
///     #[ormlink(many2many = "user_languages")]
///     languages: Vec<Language>,
/// }
/// ```
#[proc_macro_derive(Model, attributes(ormlink))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_model_impl(&model).into()
}

/// Generate the `Model`, `Record` and default `ModelEvents` impls.
fn generate_model_impl(model: &ModelDef) -> proc_macro2::TokenStream {
    let name = &model.name;
    let name_str = name.to_string();
    let (impl_generics, ty_generics, where_clause) = model.generics.split_for_impl();

    let table = match &model.table {
        Some(t) => quote! { ::std::option::Option::Some(#t) },
        None => quote! { ::std::option::Option::None },
    };
    let decls = model.fields.iter().map(field_decl);

    let scalars: Vec<&FieldDef> = model
        .fields
        .iter()
        .filter(|f| matches!(f.kind, FieldKind::Scalar | FieldKind::Scanner))
        .collect();
    let get_arms = scalars.iter().map(|f| {
        let ident = &f.name;
        let key = f.name_str();
        match f.kind {
            FieldKind::Scanner => quote! {
                #key => ::std::option::Option::Some(ormlink_core::Scanner::value(&self.#ident)),
            },
            _ => quote! {
                #key => ::std::option::Option::Some(
                    ormlink_core::Value::from(::std::clone::Clone::clone(&self.#ident))
                ),
            },
        }
    });
    let set_arms = scalars.iter().map(|f| {
        let ident = &f.name;
        let key = f.name_str();
        match f.kind {
            FieldKind::Scanner => quote! {
                #key => ormlink_core::Scanner::scan(&mut self.#ident, value),
            },
            _ => quote! {
                #key => {
                    self.#ident = ormlink_core::convert(field, &value)?;
                    ::std::result::Result::Ok(())
                }
            },
        }
    });

    let embedded: Vec<&FieldDef> = model
        .fields
        .iter()
        .filter(|f| matches!(f.kind, FieldKind::Embedded))
        .collect();
    let embedded_arms = embedded.iter().map(|f| {
        let ident = &f.name;
        let key = f.name_str();
        quote! { #key => ::std::option::Option::Some(&self.#ident as &dyn ormlink_core::Record), }
    });
    let embedded_mut_arms = embedded.iter().map(|f| {
        let ident = &f.name;
        let key = f.name_str();
        quote! { #key => ::std::option::Option::Some(&mut self.#ident as &mut dyn ormlink_core::Record), }
    });

    let relations: Vec<(&FieldDef, &RelationWrapper)> = model
        .fields
        .iter()
        .filter_map(|f| match &f.kind {
            FieldKind::Relation(w) => Some((f, w)),
            _ => None,
        })
        .collect();
    let related_arms = relations.iter().map(|(f, w)| related_arm(f, w, false));
    let related_mut_arms = relations.iter().map(|(f, w)| related_arm(f, w, true));
    let set_related_arms = relations.iter().map(|(f, w)| set_related_arm(f, w));

    let events_impl = if model.custom_events {
        quote! {}
    } else {
        quote! {
            impl #impl_generics ormlink_core::ModelEvents for #name #ty_generics #where_clause {}
        }
    };

    quote! {
        #events_impl

        impl #impl_generics ormlink_core::Model for #name #ty_generics #where_clause {
            fn record_type() -> ormlink_core::RecordType {
                ormlink_core::RecordType {
                    name: #name_str,
                    type_id: ::std::any::TypeId::of::<Self>(),
                    table: #table,
                    fields: ::std::vec![#(#decls),*],
                    new: || ::std::boxed::Box::new(<Self as ::std::default::Default>::default()),
                }
            }
        }

        impl #impl_generics ormlink_core::Record for #name #ty_generics #where_clause {
            fn shape(&self) -> ormlink_core::RecordType {
                <Self as ormlink_core::Model>::record_type()
            }

            fn get(&self, field: &str) -> ::std::option::Option<ormlink_core::Value> {
                match field {
                    #(#get_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            fn set(
                &mut self,
                field: &str,
                value: ormlink_core::Value,
            ) -> ormlink_core::Result<()> {
                match field {
                    #(#set_arms)*
                    _ => {
                        let _ = value;
                        ::std::result::Result::Err(ormlink_core::unknown_field(#name_str, field))
                    }
                }
            }

            fn embedded(&self, field: &str) -> ::std::option::Option<&dyn ormlink_core::Record> {
                match field {
                    #(#embedded_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            fn embedded_mut(
                &mut self,
                field: &str,
            ) -> ::std::option::Option<&mut dyn ormlink_core::Record> {
                match field {
                    #(#embedded_mut_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            fn related(&self, field: &str) -> ::std::option::Option<ormlink_core::Related<'_>> {
                match field {
                    #(#related_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            fn related_mut(
                &mut self,
                field: &str,
            ) -> ::std::option::Option<ormlink_core::RelatedMut<'_>> {
                match field {
                    #(#related_mut_arms)*
                    _ => ::std::option::Option::None,
                }
            }

            fn set_related(
                &mut self,
                field: &str,
                records: ::std::vec::Vec<::std::boxed::Box<dyn ormlink_core::Record>>,
            ) -> ormlink_core::Result<()> {
                match field {
                    #(#set_related_arms)*
                    _ => {
                        let _ = records;
                        ::std::result::Result::Err(ormlink_core::unknown_field(#name_str, field))
                    }
                }
            }

            fn clone_box(&self) -> ::std::boxed::Box<dyn ormlink_core::Record> {
                ::std::boxed::Box::new(::std::clone::Clone::clone(self))
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }

            fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::std::any::Any> {
                self
            }
        }
    }
}

/// `FieldDecl` expression for one field.
fn field_decl(field: &FieldDef) -> proc_macro2::TokenStream {
    let key = field.name_str();
    let tag = &field.tag;
    let ty = &field.ty;
    let shape = match &field.kind {
        FieldKind::Scalar => quote! {
            ormlink_core::FieldShape::Scalar {
                sql_type: <#ty as ormlink_core::TypeInfo>::SQL_TYPE,
                nullable: <#ty as ormlink_core::TypeInfo>::NULLABLE,
            }
        },
        FieldKind::Scanner => quote! {
            ormlink_core::FieldShape::Scalar {
                sql_type: <#ty as ormlink_core::Scanner>::SQL_TYPE,
                nullable: false,
            }
        },
        FieldKind::Embedded => quote! {
            ormlink_core::FieldShape::Embedded(<#ty as ormlink_core::Model>::record_type)
        },
        FieldKind::Relation(wrapper) => {
            let related = wrapper.related();
            match wrapper {
                RelationWrapper::Many(_) => quote! {
                    ormlink_core::FieldShape::Many(<#related as ormlink_core::Model>::record_type)
                },
                _ => quote! {
                    ormlink_core::FieldShape::One(<#related as ormlink_core::Model>::record_type)
                },
            }
        }
    };
    quote! { ormlink_core::FieldDecl::new(#key, #tag, #shape) }
}

fn related_arm(field: &FieldDef, wrapper: &RelationWrapper, mutable: bool) -> proc_macro2::TokenStream {
    let ident = &field.name;
    let key = field.name_str();
    let body = match (wrapper, mutable) {
        (RelationWrapper::Many(_), false) => quote! {
            ormlink_core::Related::Many(
                self.#ident.iter().map(|r| r as &dyn ormlink_core::Record).collect()
            )
        },
        (RelationWrapper::Many(_), true) => quote! {
            ormlink_core::RelatedMut::Many(
                self.#ident.iter_mut().map(|r| r as &mut dyn ormlink_core::Record).collect()
            )
        },
        (RelationWrapper::Optional(_), false) => quote! {
            ormlink_core::Related::One(self.#ident.as_ref().map(|r| r as &dyn ormlink_core::Record))
        },
        (RelationWrapper::Optional(_), true) => quote! {
            ormlink_core::RelatedMut::One(
                self.#ident.as_mut().map(|r| r as &mut dyn ormlink_core::Record)
            )
        },
        (RelationWrapper::OptionalBoxed(_), false) => quote! {
            ormlink_core::Related::One(self.#ident.as_deref().map(|r| r as &dyn ormlink_core::Record))
        },
        (RelationWrapper::OptionalBoxed(_), true) => quote! {
            ormlink_core::RelatedMut::One(
                self.#ident.as_deref_mut().map(|r| r as &mut dyn ormlink_core::Record)
            )
        },
        (RelationWrapper::Plain(_), false) => quote! {
            ormlink_core::Related::One(::std::option::Option::Some(
                &self.#ident as &dyn ormlink_core::Record
            ))
        },
        (RelationWrapper::Plain(_), true) => quote! {
            ormlink_core::RelatedMut::One(::std::option::Option::Some(
                &mut self.#ident as &mut dyn ormlink_core::Record
            ))
        },
    };
    quote! { #key => ::std::option::Option::Some(#body), }
}

fn set_related_arm(field: &FieldDef, wrapper: &RelationWrapper) -> proc_macro2::TokenStream {
    let ident = &field.name;
    let key = field.name_str();
    let related = wrapper.related();
    let assign = match wrapper {
        RelationWrapper::Many(_) => quote! {
            self.#ident = ormlink_core::downcast_many::<#related>(records)?;
        },
        RelationWrapper::Optional(_) => quote! {
            self.#ident = ormlink_core::downcast_one::<#related>(records)?;
        },
        RelationWrapper::OptionalBoxed(_) => quote! {
            self.#ident = ormlink_core::downcast_one::<#related>(records)?
                .map(::std::boxed::Box::new);
        },
        RelationWrapper::Plain(_) => quote! {
            self.#ident = ormlink_core::downcast_one::<#related>(records)?
                .unwrap_or_default();
        },
    };
    quote! {
        #key => {
            #assign
            ::std::result::Result::Ok(())
        }
    }
}
