//! Derive macro for the `Traverse` trait.

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Data, DeriveInput, Field, Fields,
    GenericParam, Generics, Ident, Index, Path,
};

/// Derives `Traverse` by visiting every field in declaration order.
///
/// Fields marked `#[rcgc(skip)]` are not visited. The path of the runtime
/// crate can be overridden with `#[rcgc(crate = some::path)]` on the type.
#[proc_macro_derive(Traverse, attributes(rcgc))]
pub fn derive_traverse(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let mut rcgc: Path = parse_quote!(::rcgc);

    for attr in &input.attrs {
        if !attr.path().is_ident("rcgc") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                rcgc = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute"))
            }
        });

        if let Err(err) = result {
            return err.into_compile_error().into();
        }
    }

    let name = &input.ident;
    let generics = add_trait_bounds(&rcgc, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let body = match generate_traverse_body(&rcgc, name, &input.data) {
        Ok(body) => body,
        Err(err) => return err.into_compile_error().into(),
    };

    let generated = quote! {
        impl #impl_generics #rcgc::Traverse for #name #ty_generics #where_clause {
            #[inline]
            fn traverse(&self, visitor: &mut dyn #rcgc::Visitor) {
                #body
            }
        }
    };

    generated.into()
}

fn add_trait_bounds(rcgc: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_traverse = type_param.bounds.iter().any(|b| {
                if let syn::TypeParamBound::Trait(t) = b {
                    t.path.segments.last().is_some_and(|s| s.ident == "Traverse")
                } else {
                    false
                }
            });

            if !has_traverse {
                type_param.bounds.push(parse_quote!(#rcgc::Traverse));
            }
        }
    }
    generics
}

fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in &field.attrs {
        if !attr.path().is_ident("rcgc") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute"))
            }
        })?;
    }
    Ok(skip)
}

fn generate_traverse_body(rcgc: &Path, name: &Ident, data: &Data) -> syn::Result<TokenStream> {
    match data {
        Data::Struct(data) => generate_struct_traverse(rcgc, &data.fields),
        Data::Enum(data) => generate_enum_traverse(rcgc, name, data),
        Data::Union(u) => Ok(quote_spanned! {
            u.union_token.span => compile_error!("`Traverse` must be manually implemented for unions");
        }),
    }
}

fn generate_struct_traverse(rcgc: &Path, fields: &Fields) -> syn::Result<TokenStream> {
    let mut calls = Vec::new();
    match fields {
        Fields::Named(f) => {
            for field in &f.named {
                if is_skipped(field)? {
                    continue;
                }
                let name = &field.ident;
                calls.push(quote_spanned! {field.span() =>
                    #rcgc::Traverse::traverse(&self.#name, visitor);
                });
            }
        }
        Fields::Unnamed(f) => {
            for (i, field) in f.unnamed.iter().enumerate() {
                if is_skipped(field)? {
                    continue;
                }
                let index = Index::from(i);
                calls.push(quote_spanned! {field.span() =>
                    #rcgc::Traverse::traverse(&self.#index, visitor);
                });
            }
        }
        Fields::Unit => {}
    }
    if calls.is_empty() {
        return Ok(quote! { let _ = visitor; });
    }
    Ok(quote! { #(#calls)* })
}

fn generate_enum_traverse(
    rcgc: &Path,
    name: &Ident,
    data: &syn::DataEnum,
) -> syn::Result<TokenStream> {
    let mut arms = Vec::new();
    for variant in &data.variants {
        let var_name = &variant.ident;
        let arm = match &variant.fields {
            Fields::Named(f) => {
                let mut bindings = Vec::new();
                let mut calls = Vec::new();
                for (i, field) in f.named.iter().enumerate() {
                    let ident = field.ident.as_ref().ok_or_else(|| {
                        syn::Error::new_spanned(field, "named field without an identifier")
                    })?;
                    if is_skipped(field)? {
                        bindings.push(quote! { #ident: _ });
                        continue;
                    }
                    let binding = format_ident!("field{}", i);
                    bindings.push(quote! { #ident: #binding });
                    calls.push(quote! { #rcgc::Traverse::traverse(#binding, visitor); });
                }
                quote! {
                    #name::#var_name { #(#bindings),* } => {
                        #(#calls)*
                    }
                }
            }
            Fields::Unnamed(f) => {
                let mut bindings = Vec::new();
                let mut calls = Vec::new();
                for (i, field) in f.unnamed.iter().enumerate() {
                    if is_skipped(field)? {
                        bindings.push(quote! { _ });
                        continue;
                    }
                    let binding = format_ident!("field{}", i);
                    calls.push(quote! { #rcgc::Traverse::traverse(#binding, visitor); });
                    bindings.push(quote! { #binding });
                }
                quote! {
                    #name::#var_name(#(#bindings),*) => {
                        #(#calls)*
                    }
                }
            }
            Fields::Unit => quote! {
                #name::#var_name => {}
            },
        };
        arms.push(arm);
    }

    if arms.is_empty() {
        return Ok(quote! { let _ = visitor; match *self {} });
    }

    Ok(quote! {
        match self {
            #(#arms)*
        }
    })
}
