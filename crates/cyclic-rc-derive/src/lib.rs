//! Derive macro for the `Trace` trait.
//!
//! The generated impl reports every field to the tracer. Fields that can
//! never hold a handle may opt out with `#[cyclic_rc(skip)]`, and the path of
//! the runtime crate can be overridden with `#[cyclic_rc(crate = path)]` on
//! the type.

use proc_macro2::TokenStream;
use quote::{format_ident, quote, quote_spanned};
use syn::{
    parse_macro_input, parse_quote, spanned::Spanned, Attribute, Data, DataEnum, DeriveInput,
    Field, Fields, GenericParam, Generics, Ident, Index, Path,
};

const ATTR: &str = "cyclic_rc";

/// Derive `cyclic_rc::Trace` for a struct or enum.
#[proc_macro_derive(Trace, attributes(cyclic_rc))]
pub fn derive_trace(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream> {
    let krate = crate_path(&input.attrs)?;
    let name = &input.ident;
    let body = trace_body(&krate, name, &input.data)?;
    let generics = add_trait_bounds(&krate, input.generics);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    Ok(quote! {
        unsafe impl #impl_generics #krate::Trace for #name #ty_generics #where_clause {
            #[inline]
            #[allow(unused_variables)]
            fn trace(&self, tracer: &mut #krate::Tracer) {
                #body
            }
        }
    })
}

fn crate_path(attrs: &[Attribute]) -> syn::Result<Path> {
    let mut krate: Path = parse_quote!(::cyclic_rc);
    for attr in attrs.iter().filter(|a| a.path().is_ident(ATTR)) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("crate") {
                krate = meta.value()?.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported attribute, expected `crate = path`"))
            }
        })?;
    }
    Ok(krate)
}

fn is_skipped(field: &Field) -> syn::Result<bool> {
    let mut skip = false;
    for attr in field.attrs.iter().filter(|a| a.path().is_ident(ATTR)) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skip = true;
                Ok(())
            } else {
                Err(meta.error("unsupported field attribute, expected `skip`"))
            }
        })?;
    }
    Ok(skip)
}

fn add_trait_bounds(krate: &Path, mut generics: Generics) -> Generics {
    for param in &mut generics.params {
        if let GenericParam::Type(ref mut type_param) = *param {
            let has_trace = type_param.bounds.iter().any(|b| {
                matches!(b, syn::TypeParamBound::Trait(t)
                    if t.path.segments.last().is_some_and(|s| s.ident == "Trace"))
            });
            if !has_trace {
                type_param.bounds.push(parse_quote!(#krate::Trace));
            }
        }
    }
    generics
}

fn trace_body(krate: &Path, name: &Ident, data: &Data) -> syn::Result<TokenStream> {
    match data {
        Data::Struct(data) => struct_body(krate, &data.fields),
        Data::Enum(data) => enum_body(krate, name, data),
        Data::Union(u) => Err(syn::Error::new(
            u.union_token.span,
            "`Trace` must be implemented manually for unions",
        )),
    }
}

fn struct_body(krate: &Path, fields: &Fields) -> syn::Result<TokenStream> {
    let mut calls = Vec::new();
    for (i, field) in fields.iter().enumerate() {
        if is_skipped(field)? {
            continue;
        }
        let access = field.ident.as_ref().map_or_else(
            || {
                let index = Index::from(i);
                quote!(#index)
            },
            |ident| quote!(#ident),
        );
        calls.push(quote_spanned! {field.span() =>
            #krate::Trace::trace(&self.#access, tracer);
        });
    }
    Ok(quote! { #(#calls)* })
}

fn enum_body(krate: &Path, name: &Ident, data: &DataEnum) -> syn::Result<TokenStream> {
    let mut arms = Vec::new();
    for variant in &data.variants {
        let var_name = &variant.ident;
        let mut bindings = Vec::new();
        let mut calls = Vec::new();
        for (i, field) in variant.fields.iter().enumerate() {
            let binding = format_ident!("field{}", i);
            if is_skipped(field)? {
                bindings.push(quote!(_));
                continue;
            }
            calls.push(quote_spanned! {field.span() =>
                #krate::Trace::trace(#binding, tracer);
            });
            bindings.push(quote!(#binding));
        }

        let pattern = match &variant.fields {
            Fields::Named(f) => {
                let idents = f.named.iter().filter_map(|f| f.ident.as_ref());
                quote!(#name::#var_name { #(#idents: #bindings),* })
            }
            Fields::Unnamed(_) => quote!(#name::#var_name(#(#bindings),*)),
            Fields::Unit => quote!(#name::#var_name),
        };
        arms.push(quote! {
            #pattern => { #(#calls)* }
        });
    }

    if arms.is_empty() {
        return Ok(quote! { match *self {} });
    }
    Ok(quote! {
        match self {
            #(#arms)*
        }
    })
}
