//! Shared utilities for cacheval procedural macros
//!
//! Attribute parsing and code generation used by both `cacheval-macros`
//! and `cacheval-async-macros`. Errors are returned as ready-to-emit
//! `compile_error!` tokens.

use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::{quote, ToTokens};
use syn::{
    parse_quote, punctuated::Punctuated, Expr, FnArg, GenericParam, MetaNameValue, Pat,
    ReturnType, Signature, Token, Type,
};

/// Which decorator is expanding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flavor {
    Blocking,
    Suspending,
}

/// Parsed `#[cache_value(...)]` / `#[async_cache_value(...)]` attributes
#[derive(Default)]
pub struct CacheValueAttributes {
    /// Function returning the storage factory.
    pub storage: Option<syn::Path>,
    /// Function returning the `TypeEncoders`.
    pub type_encoders: Option<syn::Path>,
    /// Seconds.
    pub expires_in: Option<u64>,
    pub serialize: bool,
    /// Codec type; must implement `Default`.
    pub codec: Option<syn::Path>,
    pub custom_name: Option<String>,
}

fn error(span: impl ToTokens, msg: &str) -> TokenStream2 {
    syn::Error::new_spanned(span, msg).to_compile_error()
}

/// Parse a `key = some::path` attribute
pub fn parse_path_attribute(nv: &MetaNameValue) -> Result<syn::Path, TokenStream2> {
    let name = nv.path.to_token_stream().to_string();
    match &nv.value {
        Expr::Path(expr_path) => Ok(expr_path.path.clone()),
        _ => Err(error(
            &nv.value,
            &format!("Invalid syntax for `{name}`: expected `{name} = path::to::item`"),
        )),
    }
}

/// Parse the `expires_in` attribute (seconds)
pub fn parse_expires_in_attribute(nv: &MetaNameValue) -> Result<u64, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Int(lit_int) => lit_int
                .base10_parse::<u64>()
                .map_err(|_| error(lit_int, "`expires_in` must be a non-negative integer (seconds)")),
            _ => Err(error(
                &nv.value,
                "Invalid literal for `expires_in`: expected integer (seconds)",
            )),
        },
        _ => Err(error(
            &nv.value,
            "Invalid syntax for `expires_in`: expected `expires_in = <integer>`",
        )),
    }
}

/// Parse the `serialize` attribute
pub fn parse_serialize_attribute(nv: &MetaNameValue) -> Result<bool, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Bool(b) => Ok(b.value),
            _ => Err(error(
                &nv.value,
                "Invalid literal for `serialize`: expected `true` or `false`",
            )),
        },
        _ => Err(error(
            &nv.value,
            "Invalid syntax for `serialize`: expected `serialize = true|false`",
        )),
    }
}

/// Parse the `name` attribute
pub fn parse_name_attribute(nv: &MetaNameValue) -> Result<String, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            syn::Lit::Str(s) if !s.value().is_empty() => Ok(s.value()),
            _ => Err(error(&nv.value, "`name` must be a non-empty string literal")),
        },
        _ => Err(error(&nv.value, "Invalid syntax for `name`: expected `name = \"...\"`")),
    }
}

/// Parse cache attributes from a token stream
pub fn parse_attributes(attr: TokenStream2) -> Result<CacheValueAttributes, TokenStream2> {
    use syn::parse::Parser;

    let parser = Punctuated::<MetaNameValue, Token![,]>::parse_terminated;
    let parsed_args = parser.parse2(attr).map_err(|e| e.to_compile_error())?;

    let mut attrs = CacheValueAttributes::default();

    for nv in parsed_args {
        if nv.path.is_ident("storage") {
            attrs.storage = Some(parse_path_attribute(&nv)?);
        } else if nv.path.is_ident("type_encoders") {
            attrs.type_encoders = Some(parse_path_attribute(&nv)?);
        } else if nv.path.is_ident("expires_in") {
            attrs.expires_in = Some(parse_expires_in_attribute(&nv)?);
        } else if nv.path.is_ident("serialize") {
            attrs.serialize = parse_serialize_attribute(&nv)?;
        } else if nv.path.is_ident("codec") {
            attrs.codec = Some(parse_path_attribute(&nv)?);
        } else if nv.path.is_ident("name") {
            attrs.custom_name = Some(parse_name_attribute(&nv)?);
        } else {
            return Err(error(
                &nv.path,
                "Unknown attribute: expected one of `storage`, `type_encoders`, \
                 `expires_in`, `serialize`, `codec`, `name`",
            ));
        }
    }

    Ok(attrs)
}

/// Parse `#[cache_reference(...)]` / `#[async_cache_reference(...)]` attributes
///
/// Resources never leave the process, so only `type_encoders` and `name`
/// apply.
pub fn parse_reference_attributes(attr: TokenStream2) -> Result<CacheValueAttributes, TokenStream2> {
    use syn::parse::Parser;

    let parser = Punctuated::<MetaNameValue, Token![,]>::parse_terminated;
    let parsed_args = parser.parse2(attr).map_err(|e| e.to_compile_error())?;

    let mut attrs = CacheValueAttributes::default();

    for nv in parsed_args {
        if nv.path.is_ident("type_encoders") {
            attrs.type_encoders = Some(parse_path_attribute(&nv)?);
        } else if nv.path.is_ident("name") {
            attrs.custom_name = Some(parse_name_attribute(&nv)?);
        } else {
            return Err(error(
                &nv.path,
                "Unknown attribute: expected one of `type_encoders`, `name`",
            ));
        }
    }

    Ok(attrs)
}

/// Rejects a function of the wrong call-path flavor for the decorator.
///
/// The message matches the runtime `Configuration` error raised by
/// `CacheValue::decorate` / `AsyncCacheValue::decorate`.
pub fn check_flavor(sig: &Signature, expected: Flavor) -> Result<(), TokenStream2> {
    check_flavor_for(sig, expected, "cache_value")
}

/// Like [`check_flavor`] for the decorator family named `base`
/// (`cache_value` or `cache_reference`); the async variant is `async_<base>`.
pub fn check_flavor_for(sig: &Signature, expected: Flavor, base: &str) -> Result<(), TokenStream2> {
    let name = &sig.ident;
    match (sig.asyncness.is_some(), expected) {
        (true, Flavor::Blocking) => Err(error(
            sig.asyncness,
            &format!(
                "improperly configured: '{name}' is a suspending function; \
                 cache it with #[async_{base}]"
            ),
        )),
        (false, Flavor::Suspending) => Err(error(
            &sig.fn_token,
            &format!(
                "improperly configured: '{name}' is a blocking function; \
                 cache it with #[{base}]"
            ),
        )),
        _ => Ok(()),
    }
}

/// Generic functions would share one cache across instantiations.
pub fn reject_generics(sig: &Signature) -> Result<(), TokenStream2> {
    match sig
        .generics
        .params
        .iter()
        .find(|p| !matches!(p, GenericParam::Lifetime(_)))
    {
        Some(param) => Err(error(
            param,
            "cached functions cannot have type or const parameters",
        )),
        None => Ok(()),
    }
}

/// Returns true when `ty` is spelled as a `Result<..>`
pub fn is_result_type(ty: &Type) -> bool {
    let s = quote!(#ty).to_string().replace(' ', "");
    s.starts_with("Result<")
        || s.starts_with("std::result::Result<")
        || s.starts_with("::std::result::Result<")
        || s.starts_with("core::result::Result<")
}

/// The decorated function's new signature and what its body produces.
pub struct CachedSignature {
    pub sig: Signature,
    /// Type produced by the original body.
    pub body_ty: Type,
    /// The body returns `Result<T, E>` whose `Err` is passed through.
    pub is_result: bool,
}

/// Wraps a plain return type `T` in `CacheResult<T>`; keeps `Result<T, E>`.
pub fn cached_signature(sig: &Signature) -> CachedSignature {
    let body_ty: Type = match &sig.output {
        ReturnType::Type(_, ty) => (**ty).clone(),
        ReturnType::Default => parse_quote!(()),
    };
    let is_result = is_result_type(&body_ty);

    let mut sig = sig.clone();
    if !is_result {
        sig.output = parse_quote!(-> ::cacheval_core::CacheResult<#body_ty>);
    }

    CachedSignature {
        sig,
        body_ty,
        is_result,
    }
}

/// Generate the `.push(..)` calls adding each argument to a `CallArgs`
///
/// Every argument (including `self`) becomes a positional entry named after
/// its binding. Natively keyable values are keyed directly; the rest go
/// through the decorator's type encoders.
pub fn generate_key_pushes(sig: &Signature) -> Result<Vec<TokenStream2>, TokenStream2> {
    let mut pushes = Vec::new();

    for arg in sig.inputs.iter() {
        let (name, target) = match arg {
            FnArg::Receiver(receiver) => {
                let target = match (&receiver.reference, receiver.mutability) {
                    (Some(_), None) => quote! { self },
                    (Some(_), Some(_)) => quote! { &*self },
                    (None, _) => quote! { &self },
                };
                ("self".to_string(), target)
            }
            FnArg::Typed(pat_type) => {
                let ident = match &*pat_type.pat {
                    Pat::Ident(pat_ident) if pat_ident.by_ref.is_none() => &pat_ident.ident,
                    other => {
                        return Err(error(
                            other,
                            "cached functions only support identifier patterns in arguments",
                        ))
                    }
                };
                let target = match &*pat_type.ty {
                    Type::Reference(r) if r.mutability.is_some() => quote! { &*#ident },
                    Type::Reference(_) => quote! { #ident },
                    _ => quote! { &#ident },
                };
                (ident.to_string().trim_start_matches("r#").to_string(), target)
            }
        };

        pushes.push(quote! {
            .push(#name, (&::cacheval_core::__private::KeyArg(#target)).key_arg())
        });
    }

    Ok(pushes)
}

/// Generate the expression building the decorator configuration
///
/// `builder` is the configuration type, `CacheValue` or `AsyncCacheValue`.
pub fn generate_builder(attrs: &CacheValueAttributes, builder: TokenStream2) -> TokenStream2 {
    let storage = attrs
        .storage
        .as_ref()
        .map(|path| quote! { .storage_factory(#path()) });
    let encoders = attrs
        .type_encoders
        .as_ref()
        .map(|path| quote! { .type_encoders(#path()) });
    let expires_in = attrs
        .expires_in
        .map(|secs| quote! { .expires_in(::std::time::Duration::from_secs(#secs)) });
    let serialize = attrs.serialize;
    let codec = attrs
        .codec
        .as_ref()
        .map(|path| quote! { .codec(<#path as ::std::default::Default>::default()) });

    quote! {
        #builder::new()
            #storage
            #encoders
            #expires_in
            .serialize(#serialize)
            #codec
    }
}

/// Generate the expression building a `CacheReference`
pub fn generate_reference_builder(attrs: &CacheValueAttributes) -> TokenStream2 {
    let encoders = attrs
        .type_encoders
        .as_ref()
        .map(|path| quote! { .type_encoders(#path()) });

    quote! {
        ::cacheval_core::CacheReference::new()
            #encoders
    }
}

/// Generate the cache type held by the function's static
pub fn generate_cache_type(attrs: &CacheValueAttributes, cache: TokenStream2) -> TokenStream2 {
    match &attrs.codec {
        Some(path) => quote! { #cache<#path> },
        None => quote! { #cache },
    }
}

/// Generate the marker fn emitted at the top of the decorated function
///
/// Its type name spells out the function's fully qualified path.
pub fn generate_marker() -> TokenStream2 {
    let marker = syn::Ident::new(MARKER_IDENT, Span::call_site());
    quote! {
        #[allow(dead_code)]
        fn #marker() {}
    }
}

/// Generate the expression yielding the function's `FunctionIdentity`
///
/// Refers to the item emitted by [`generate_marker`] unless a custom name
/// was given.
pub fn generate_identity(attrs: &CacheValueAttributes) -> TokenStream2 {
    match &attrs.custom_name {
        Some(name) => quote! { ::cacheval_core::FunctionIdentity::new(#name) },
        None => {
            let marker = syn::Ident::new(MARKER_IDENT, Span::call_site());
            quote! { ::cacheval_core::FunctionIdentity::from_marker(&#marker) }
        }
    }
}

/// Must match `cacheval_core::identity::MARKER_SEGMENT`.
pub const MARKER_IDENT: &str = "__cacheval_marker";
