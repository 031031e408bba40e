//! # Persistream Derive Macros
//!
//! This crate provides the procedural macros for `persistream`. It automates
//! the implementation of the `Persistent` trait for structs.
//!
//! Compatible with `syn 2.0`.
//!
//! ## Attributes
//!
//! On the struct:
//! * `#[persist(name = "crate::Type")]` sets the canonical class name
//!   (default: `module_path!()` + `::` + the struct name).
//! * `#[persist(version = N)]` sets the class version (default 1).
//! * `#[persist(abstract_class)]` declares the class without a factory.
//!
//! On fields:
//! * `#[persist(base)]` embeds a base part; the field is serialized by the
//!   base's own hooks, not by this class.
//! * `#[persist(skip)]` leaves the field out of the stream.
//! * `#[persist(since = N)]` only reads the field from parts written with
//!   version `N` or later.

use proc_macro::TokenStream;
use quote::quote;
use syn::{Attribute, Data, DeriveInput, Fields, LitInt, LitStr, Member, parse_macro_input};

/// Derives `persistream::Persistent`.
#[proc_macro_derive(Persistent, attributes(persist))]
pub fn derive_persistent(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

// --- Internal Data Structures ---
struct ClassAttrs {
    name: Option<LitStr>,
    version: u32,
    is_abstract: bool,
}

enum FieldRole {
    Data { since: u32 },
    Base,
    Skip,
}

struct PersistField {
    member: Member,
    ty: syn::Type,
    role: FieldRole,
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Persistent cannot be derived for generic types",
        ));
    }

    let data_struct = match &input.data {
        Data::Struct(ds) => ds,
        _ => {
            return Err(syn::Error::new(
                name.span(),
                "Persistent only supports structs",
            ));
        }
    };

    let class = parse_class_attributes(&input.attrs)?;
    let fields = collect_fields(&data_struct.fields)?;

    for field in &fields {
        if let FieldRole::Data { since } = field.role
            && since > class.version
        {
            return Err(syn::Error::new_spanned(
                &field.ty,
                format!(
                    "field is introduced in version {since} but the class version is {}",
                    class.version
                ),
            ));
        }
    }

    let class_name = match &class.name {
        Some(lit) => quote! { #lit },
        None => {
            let ident = name.to_string();
            quote! { ::core::concat!(::core::module_path!(), "::", #ident) }
        }
    };
    let version = class.version;

    let impl_output = generate_output(&fields);
    let impl_input = generate_input(&fields);
    let impl_describe = generate_describe(&class, &fields);

    Ok(quote! {
        impl ::persistream::Persistent for #name {
            const CLASS_NAME: &'static str = #class_name;
            const VERSION: u32 = #version;

            #impl_output
            #impl_input
            #impl_describe
        }
    })
}

/// Parses struct-level attributes.
fn parse_class_attributes(attrs: &[Attribute]) -> syn::Result<ClassAttrs> {
    let mut class = ClassAttrs {
        name: None,
        version: 1,
        is_abstract: false,
    };

    for attr in attrs {
        if attr.path().is_ident("persist") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let value = meta.value()?;
                    let s: LitStr = value.parse()?;
                    if s.value().is_empty() {
                        return Err(meta.error("class name must not be empty"));
                    }
                    class.name = Some(s);
                    return Ok(());
                }

                if meta.path.is_ident("version") {
                    let value = meta.value()?;
                    let lit: LitInt = value.parse()?;
                    class.version = lit.base10_parse()?;
                    return Ok(());
                }

                if meta.path.is_ident("abstract_class") {
                    class.is_abstract = true;
                    return Ok(());
                }

                Err(meta.error(
                    "Unknown persist attribute key. Supported on structs: name, version, abstract_class",
                ))
            })?;
        }
    }
    Ok(class)
}

/// Parses field-level attributes.
fn parse_field_role(attrs: &[Attribute]) -> syn::Result<FieldRole> {
    let mut is_base = false;
    let mut is_skip = false;
    let mut since = 0u32;

    for attr in attrs {
        if attr.path().is_ident("persist") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("base") {
                    is_base = true;
                    return Ok(());
                }

                if meta.path.is_ident("skip") {
                    is_skip = true;
                    return Ok(());
                }

                if meta.path.is_ident("since") {
                    let value = meta.value()?;
                    let lit: LitInt = value.parse()?;
                    since = lit.base10_parse()?;
                    return Ok(());
                }

                Err(meta.error("Unknown persist attribute key. Supported on fields: base, skip, since"))
            })?;
        }
    }

    match (is_base, is_skip) {
        (true, true) => Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "a field cannot be both `base` and `skip`",
        )),
        (true, false) => Ok(FieldRole::Base),
        (false, true) => Ok(FieldRole::Skip),
        (false, false) => Ok(FieldRole::Data { since }),
    }
}

fn collect_fields(fields: &Fields) -> syn::Result<Vec<PersistField>> {
    let mut out = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        let member = match &field.ident {
            Some(ident) => Member::Named(ident.clone()),
            None => Member::Unnamed(syn::Index::from(index)),
        };
        let role = parse_field_role(&field.attrs)
            .map_err(|e| syn::Error::new_spanned(field, e.to_string()))?;
        out.push(PersistField {
            member,
            ty: field.ty.clone(),
            role,
        });
    }
    Ok(out)
}

// --- Generator: persist_output ---

fn generate_output(fields: &[PersistField]) -> proc_macro2::TokenStream {
    let writes = fields.iter().filter_map(|f| match f.role {
        FieldRole::Data { .. } => {
            let member = &f.member;
            Some(quote! {
                ::persistream::Persist::put(&self.#member, out)?;
            })
        }
        _ => None,
    });

    quote! {
        fn persist_output(
            &self,
            out: &mut ::persistream::OutputStream<'_>,
        ) -> ::persistream::Result<()> {
            let _ = &out;
            #(#writes)*
            ::core::result::Result::Ok(())
        }
    }
}

// --- Generator: persist_input ---

fn generate_input(fields: &[PersistField]) -> proc_macro2::TokenStream {
    let reads = fields.iter().filter_map(|f| match f.role {
        FieldRole::Data { since } => {
            let member = &f.member;
            let read = quote! {
                self.#member = ::persistream::Persist::get(input)?;
            };
            Some(if since == 0 {
                read
            } else {
                quote! {
                    if version >= #since {
                        #read
                    }
                }
            })
        }
        _ => None,
    });

    quote! {
        fn persist_input(
            &mut self,
            input: &mut ::persistream::InputStream<'_>,
            version: u32,
        ) -> ::persistream::Result<()> {
            let _ = (&input, version);
            #(#reads)*
            ::core::result::Result::Ok(())
        }
    }
}

// --- Generator: describe ---

fn generate_describe(class: &ClassAttrs, fields: &[PersistField]) -> proc_macro2::TokenStream {
    let start = if class.is_abstract {
        quote! { ::persistream::ClassDescriptor::abstract_of::<Self>() }
    } else {
        quote! { ::persistream::ClassDescriptor::of::<Self>() }
    };

    let bases = fields.iter().filter_map(|f| match f.role {
        FieldRole::Base => {
            let member = &f.member;
            let ty = &f.ty;
            Some(quote! {
                .base::<#ty>(|object| &object.#member, |object| &mut object.#member)
            })
        }
        _ => None,
    });

    quote! {
        fn describe() -> ::persistream::ClassDeclaration<Self> {
            #start
                #(#bases)*
        }
    }
}
