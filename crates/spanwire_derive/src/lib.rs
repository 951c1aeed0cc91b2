//! Derive macro for the `Record` trait.
//!
//! `#[derive(Record)]` generates the compile-time field table a
//! `spanwire::FieldCodec` is built from, and a `FieldValue` impl so the record
//! can be embedded by value in other records.
//!
//! # Example
//!
//! ```ignore
//! use spanwire::{Record, Shared, WeakShared};
//!
//! #[derive(Default, Record)]
//! struct MeasurementBase {
//!     platform_ident: u64,
//!     sensor_type_ident: u64,
//! }
//!
//! #[derive(Default, Record)]
//! #[record(name = "apm.TimerData")]
//! struct TimerData {
//!     #[record(flatten)]
//!     base: MeasurementBase,
//!     count: u64,
//!     #[record(rename = "min")]
//!     min_nanos: u64,
//!     #[record(transient)]
//!     cached_mean: Option<f64>,
//! }
//! ```
//!
//! # Container Attributes
//!
//! - `#[record(name = "...")]`: the stable type name schemas are looked up
//!   by. Defaults to `module_path!()::Ident`; set it explicitly when the type
//!   may move between modules.
//!
//! # Field Attributes
//!
//! - `#[record(transient)]`: the field is never serialized and is left at its
//!   default when reading. Its type needs no `FieldValue` impl.
//! - `#[record(flatten)]`: the field is an embedded base record whose fields
//!   are listed as if declared on this record.
//! - `#[record(rename = "...")]`: the name the field has in schemas.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Data, DeriveInput, Field, Fields, Ident, LitStr, parse_macro_input,
    spanned::Spanned,
};

/// How a single struct field takes part in the record.
enum FieldKind {
    Serialized { name: String },
    Transient { name: String },
    Flatten,
}

/// Parses the `#[record(...)]` attributes of a field.
fn field_kind(field: &Field) -> syn::Result<FieldKind> {
    let mut transient = false;
    let mut flatten = false;
    let mut rename = None;

    for attr in &field.attrs {
        if !attr.path().is_ident("record") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("transient") {
                transient = true;
                Ok(())
            } else if meta.path.is_ident("flatten") {
                flatten = true;
                Ok(())
            } else if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                rename = Some(value.value());
                Ok(())
            } else {
                Err(meta.error("unknown record attribute"))
            }
        })?;
    }

    if transient && flatten {
        return Err(syn::Error::new_spanned(
            field,
            "a field cannot be both transient and flattened",
        ));
    }
    if flatten && rename.is_some() {
        return Err(syn::Error::new_spanned(
            field,
            "a flattened field has no name of its own to rename",
        ));
    }

    let name = match (rename, &field.ident) {
        (Some(name), _) => name,
        (None, Some(ident)) => ident.to_string(),
        (None, None) => {
            return Err(syn::Error::new(
                field.span(),
                "Record can only be derived for structs with named fields",
            ));
        }
    };

    Ok(if flatten {
        FieldKind::Flatten
    } else if transient {
        FieldKind::Transient { name }
    } else {
        FieldKind::Serialized { name }
    })
}

/// Parses `#[record(name = "...")]` on the struct itself.
fn type_name(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let mut name = None;

    for attr in &input.attrs {
        if !attr.path().is_ident("record") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                name = Some(value);
                Ok(())
            } else {
                Err(meta.error("unknown record attribute"))
            }
        })?;
    }

    let ident = input.ident.to_string();
    Ok(name.map_or_else(
        || quote! { ::std::concat!(::std::module_path!(), "::", #ident) },
        |name| quote! { #name },
    ))
}

/// Derive macro for `Record`.
///
/// Only non-generic structs with named fields are supported; the stable type
/// name must not depend on type parameters.
#[proc_macro_derive(Record, attributes(record))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match expand(&input) {
        Ok(expanded) => expanded.into(),
        Err(error) => error.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Record cannot be derived for generic types",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Record can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Record can only be derived for structs",
            ));
        }
    };

    let type_name = type_name(input)?;
    let descriptors = fields
        .iter()
        .map(|field| descriptor(name, field))
        .collect::<syn::Result<Vec<_>>>()?;

    Ok(quote! {
        impl ::spanwire::Record for #name {
            const TYPE_NAME: &'static str = #type_name;

            fn fields() -> ::std::vec::Vec<::spanwire::FieldDescriptor<Self>> {
                let mut fields = ::std::vec::Vec::new();
                #(#descriptors)*
                fields
            }
        }

        impl ::spanwire::FieldValue for #name {
            fn write_value(
                &self,
                encoder: &mut ::spanwire::Encoder,
                registry: &::spanwire::TypeRegistry,
                context: &mut ::spanwire::SerializationContext,
            ) -> ::std::result::Result<(), ::spanwire::SerializationFault> {
                ::spanwire::field::write_registered(
                    self,
                    encoder,
                    registry,
                    context,
                )
            }

            fn read_value(
                decoder: &mut ::spanwire::Decoder<'_>,
                registry: &::spanwire::TypeRegistry,
                context: &mut ::spanwire::SerializationContext,
            ) -> ::std::result::Result<Self, ::spanwire::SerializationFault> {
                ::spanwire::field::read_registered(decoder, registry, context)
            }
        }
    })
}

/// Generates the statements pushing one field's descriptors.
fn descriptor(
    record: &Ident,
    field: &Field,
) -> syn::Result<proc_macro2::TokenStream> {
    let ident = field.ident.as_ref().ok_or_else(|| {
        syn::Error::new(field.span(), "expected a named field")
    })?;
    let ty = &field.ty;

    // named projections rather than closures, so that the higher-ranked
    // signatures never depend on closure inference
    let projections = quote! {
        fn get(record: &#record) -> &#ty { &record.#ident }
        fn get_mut(record: &mut #record) -> &mut #ty { &mut record.#ident }
    };

    Ok(match field_kind(field)? {
        FieldKind::Serialized { name } => quote! {
            {
                #projections
                fields.push(::spanwire::FieldDescriptor::new::<#ty>(
                    #name, get, get_mut,
                ));
            }
        },
        FieldKind::Transient { name } => quote! {
            fields.push(::spanwire::FieldDescriptor::transient(#name));
        },
        FieldKind::Flatten => quote! {
            {
                #projections
                fields.extend(
                    <#ty as ::spanwire::Record>::fields()
                        .into_iter()
                        .map(|descriptor| descriptor.project(get, get_mut)),
                );
            }
        },
    })
}
