//! `#[derive(Serialize, Deserialize)]` for plain, named-field structs.
//!
//! Supports two field attributes, matching what `beserial`'s hand-written
//! impls elsewhere in the workspace need:
//! - `#[beserial(len_type(u8|u16|u32))]` on a `Vec<T>` field: write/read a
//!   length of that width before the elements.
//! - `#[beserial(skip)]`: never (de)serialized; reconstructed via
//!   `Default::default()` on deserialize.

extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields, Type};

#[proc_macro_derive(Serialize, attributes(beserial))]
pub fn derive_serialize(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let fields = match named_fields(&input.data) {
        Some(fields) => fields,
        None => panic!("Serialize can only be derived for structs with named fields"),
    };

    let mut serialize_stmts = Vec::new();
    let mut size_stmts = Vec::new();

    for field in fields {
        let ident = field.ident.as_ref().unwrap();
        let attrs = FieldAttrs::parse(field);

        if attrs.skip {
            continue;
        }

        if let Some(len_ty) = attrs.len_type {
            serialize_stmts.push(quote! {
                size += beserial::serialize_vec::<W, _, #len_ty>(&self.#ident, writer)?;
            });
            size_stmts.push(quote! {
                size += beserial::serialized_vec_size::<_, #len_ty>(&self.#ident);
            });
        } else {
            serialize_stmts.push(quote! {
                size += beserial::Serialize::serialize(&self.#ident, writer)?;
            });
            size_stmts.push(quote! {
                size += beserial::Serialize::serialized_size(&self.#ident);
            });
        }
    }

    let expanded = quote! {
        impl beserial::Serialize for #name {
            fn serialize<W: ::std::io::Write>(&self, writer: &mut W) -> ::std::io::Result<usize> {
                let mut size = 0usize;
                #(#serialize_stmts)*
                Ok(size)
            }

            fn serialized_size(&self) -> usize {
                let mut size = 0usize;
                #(#size_stmts)*
                size
            }
        }
    };
    expanded.into()
}

#[proc_macro_derive(Deserialize, attributes(beserial))]
pub fn derive_deserialize(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let fields = match named_fields(&input.data) {
        Some(fields) => fields,
        None => panic!("Deserialize can only be derived for structs with named fields"),
    };

    let mut field_inits = Vec::new();

    for field in fields {
        let ident = field.ident.as_ref().unwrap();
        let attrs = FieldAttrs::parse(field);

        if attrs.skip {
            field_inits.push(quote! { #ident: ::std::default::Default::default() });
            continue;
        }

        if let Some(len_ty) = attrs.len_type {
            field_inits.push(quote! {
                #ident: beserial::deserialize_vec::<R, _, #len_ty>(reader)?
            });
        } else {
            field_inits.push(quote! {
                #ident: beserial::Deserialize::deserialize(reader)?
            });
        }
    }

    let expanded = quote! {
        impl beserial::Deserialize for #name {
            fn deserialize<R: ::std::io::Read>(reader: &mut R) -> ::std::io::Result<Self> {
                Ok(#name {
                    #(#field_inits),*
                })
            }
        }
    };
    expanded.into()
}

fn named_fields(data: &Data) -> Option<impl Iterator<Item = &syn::Field>> {
    match data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => Some(fields.named.iter()),
            _ => None,
        },
        _ => None,
    }
}

struct FieldAttrs {
    skip: bool,
    len_type: Option<Type>,
}

impl FieldAttrs {
    fn parse(field: &syn::Field) -> Self {
        let mut skip = false;
        let mut len_type = None;

        for attr in &field.attrs {
            if !attr.path.is_ident("beserial") {
                continue;
            }

            let parsed: syn::Result<syn::punctuated::Punctuated<syn::Meta, syn::Token![,]>> =
                attr.parse_args_with(syn::punctuated::Punctuated::parse_terminated);
            let metas = parsed.expect("invalid #[beserial(..)] attribute");

            for meta in metas {
                match meta {
                    syn::Meta::Path(path) if path.is_ident("skip") => {
                        skip = true;
                    }
                    syn::Meta::List(list) if list.path.is_ident("len_type") => {
                        let ty = list
                            .nested
                            .first()
                            .expect("len_type requires a type argument");
                        if let syn::NestedMeta::Meta(syn::Meta::Path(path)) = ty {
                            len_type = Some(syn::Type::Path(syn::TypePath {
                                qself: None,
                                path: path.clone(),
                            }));
                        }
                    }
                    _ => {}
                }
            }
        }

        FieldAttrs { skip, len_type }
    }
}
