use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

use cacheval_macro_utils::{
    cached_signature, check_flavor, check_flavor_for, generate_builder, generate_cache_type,
    generate_identity, generate_key_pushes, generate_marker, generate_reference_builder,
    parse_attributes, parse_reference_attributes, reject_generics, Flavor,
};

/// Caches the return value of a blocking function or method in pluggable
/// storage, keyed by the function and its arguments.
///
/// Every call derives a key from the function's fully qualified path and
/// its argument values, looks it up in storage, and only runs the body on a
/// miss. The computed value is encoded (JSON by default) and stored before
/// it is returned; each caller gets its own decoded copy.
///
/// # Requirements
///
/// - **Arguments**: each must implement `CacheableKey` (or
///   `DefaultCacheableKey` + `Debug`), or have an encoder registered through
///   `type_encoders`. Only plain identifier patterns are supported.
/// - **Return type**: must be encodable by the codec; with the default
///   `JsonCodec` that means `Serialize + DeserializeOwned`.
/// - **Not `async`**: use `#[async_cache_value]` from `cacheval-async`.
/// - **No type parameters**: one cache is shared by the whole function.
///
/// # Macro Parameters
///
/// - `storage` (optional): path of a `fn() -> StorageFactory`. Default: the
///   process-wide in-memory storage.
/// - `type_encoders` (optional): path of a `fn() -> TypeEncoders` for
///   argument types that have no native key.
/// - `expires_in` (optional): lifetime of stored values in seconds.
///   Default: no expiry.
/// - `serialize` (optional): when `true`, calls to this function run one at
///   a time, whatever their arguments (the lock is per function, not per
///   key), so a value is computed at most once per key. Default: `false`.
/// - `codec` (optional): a `Codec` type implementing `Default`.
/// - `name` (optional): replaces the qualified path as the function's
///   identity and its name in the statistics registry.
///
/// # Return Type
///
/// - A plain `T` becomes `CacheResult<T>`: caching failures surface as
///   `CacheValueError`.
/// - A `Result<T, E>` is kept as is and `E: From<CacheValueError>` is
///   required. Only `Ok` values are stored; `Err` reaches the caller
///   untouched and is never cached.
///
/// # Examples
///
/// ```ignore
/// use cacheval::cache_value;
///
/// #[cache_value(expires_in = 60)]
/// fn exchange_rate(from: &str, to: &str) -> f64 {
///     fetch_rate(from, to)
/// }
///
/// let rate = exchange_rate("EUR", "USD")?;
/// ```
///
/// ## Serialized Calls
///
/// ```ignore
/// use cacheval::cache_value;
///
/// #[cache_value(serialize = true)]
/// fn build_report(day: u32) -> Report {
///     // Runs once per `day` even under concurrent callers
///     expensive_report(day)
/// }
/// ```
///
/// ## Arguments Without a Native Key
///
/// ```ignore
/// use cacheval::{cache_value, TypeEncoders};
///
/// fn encoders() -> TypeEncoders {
///     TypeEncoders::new().with(|pool: &DbPool| pool.url().to_string())
/// }
///
/// #[cache_value(type_encoders = encoders)]
/// fn user_count(pool: &DbPool) -> Result<u64, AppError> {
///     pool.count("users")
/// }
/// ```
#[proc_macro_attribute]
pub fn cache_value(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    match expand(attr.into(), input) {
        Ok(expanded) => expanded.into(),
        Err(err) => err.into(),
    }
}

fn expand(attr: TokenStream2, input: ItemFn) -> Result<TokenStream2, TokenStream2> {
    let attrs = parse_attributes(attr)?;
    check_flavor(&input.sig, Flavor::Blocking)?;
    reject_generics(&input.sig)?;

    let fn_attrs = &input.attrs;
    let vis = &input.vis;
    let block = &input.block;

    let cached = cached_signature(&input.sig);
    let sig = &cached.sig;
    let body_ty = &cached.body_ty;

    let pushes = generate_key_pushes(&input.sig)?;
    let marker = generate_marker();
    let identity = generate_identity(&attrs);
    let builder = generate_builder(&attrs, quote! { ::cacheval_core::CacheValue });
    let cache_ty = generate_cache_type(&attrs, quote! { ::cacheval_core::ValueCache });

    let call = if cached.is_result {
        quote! { __cache.try_get_or_compute(__key, move || -> #body_ty #block) }
    } else {
        quote! { __cache.get_or_compute(__key, move || -> #body_ty #block) }
    };

    Ok(quote! {
        #(#fn_attrs)*
        #vis #sig {
            #[allow(unused_imports)]
            use ::cacheval_core::__private::{NativeKeyArg as _, OpaqueKeyArg as _};

            #marker

            static __CACHEVAL: ::cacheval_core::__private::OnceCell<#cache_ty> =
                ::cacheval_core::__private::OnceCell::new();

            let __cache = __CACHEVAL.get_or_try_init(|| {
                #builder.decorate(::cacheval_core::FunctionDescriptor::new(
                    #identity,
                    ::cacheval_core::FnFlavor::Blocking,
                ))
            })?;

            // Reported by the orchestrator at its key step
            let __key = __cache.call_key(&::cacheval_core::CallArgs::new() #(#pushes)*);

            #call
        }
    })
}

/// Caches the object a blocking function creates, one per set of arguments,
/// and hands every later caller a clone of it.
///
/// Meant for functions that build resources rather than values: clients,
/// sessions or loaded models. Nothing is encoded; return an `Arc` so all
/// callers share the same instance.
///
/// # Requirements
///
/// - **Arguments**: keyed the same way as `#[cache_value]`.
/// - **Return type**: `Clone + Send + Sync + 'static`.
/// - **Not `async`**: use `#[async_cache_reference]` from `cacheval-async`.
///
/// # Macro Parameters
///
/// - `type_encoders` (optional): path of a `fn() -> TypeEncoders`.
/// - `name` (optional): replaces the qualified path as the function's
///   identity.
///
/// # Return Type
///
/// As with `#[cache_value]`, `T` becomes `CacheResult<T>` and `Result<T, E>`
/// is kept. An `Err` is not cached; the next call tries again.
///
/// # Examples
///
/// ```ignore
/// use cacheval::cache_reference;
/// use std::sync::Arc;
///
/// #[cache_reference]
/// fn client_for(repo: &str) -> Arc<RepoClient> {
///     Arc::new(RepoClient::connect(repo))
/// }
///
/// let a = client_for("dummy")?;
/// let b = client_for("dummy")?;
/// assert!(Arc::ptr_eq(&a, &b));
/// ```
#[proc_macro_attribute]
pub fn cache_reference(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    match expand_reference(attr.into(), input) {
        Ok(expanded) => expanded.into(),
        Err(err) => err.into(),
    }
}

fn expand_reference(attr: TokenStream2, input: ItemFn) -> Result<TokenStream2, TokenStream2> {
    let attrs = parse_reference_attributes(attr)?;
    check_flavor_for(&input.sig, Flavor::Blocking, "cache_reference")?;
    reject_generics(&input.sig)?;

    let fn_attrs = &input.attrs;
    let vis = &input.vis;
    let block = &input.block;

    let cached = cached_signature(&input.sig);
    let sig = &cached.sig;
    let body_ty = &cached.body_ty;

    let pushes = generate_key_pushes(&input.sig)?;
    let marker = generate_marker();
    let identity = generate_identity(&attrs);
    let builder = generate_reference_builder(&attrs);

    let call = if cached.is_result {
        quote! { __cache.try_get_or_create(__key, move || -> #body_ty #block) }
    } else {
        quote! { __cache.get_or_create(__key, move || -> #body_ty #block) }
    };

    Ok(quote! {
        #(#fn_attrs)*
        #vis #sig {
            #[allow(unused_imports)]
            use ::cacheval_core::__private::{NativeKeyArg as _, OpaqueKeyArg as _};

            #marker

            static __CACHEVAL: ::cacheval_core::__private::OnceCell<::cacheval_core::ReferenceCache> =
                ::cacheval_core::__private::OnceCell::new();

            let __cache = __CACHEVAL.get_or_try_init(|| {
                #builder.decorate(::cacheval_core::FunctionDescriptor::new(
                    #identity,
                    ::cacheval_core::FnFlavor::Blocking,
                ))
            })?;

            let __key = __cache.call_key(&::cacheval_core::CallArgs::new() #(#pushes)*);

            #call
        }
    })
}
