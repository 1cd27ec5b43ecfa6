use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

use cacheval_macro_utils::{
    cached_signature, check_flavor, check_flavor_for, generate_builder, generate_cache_type,
    generate_identity, generate_key_pushes, generate_marker, generate_reference_builder,
    parse_attributes, parse_reference_attributes, reject_generics, Flavor,
};

/// Caches the return value of an `async` function or method in pluggable
/// storage, keyed by the function and its arguments.
///
/// Same behavior and parameters as `#[cache_value]`, except that:
///
/// - the function must be `async`; a blocking function is rejected at
///   compile time
/// - `storage` names a `fn() -> AsyncStorageFactory`; the factory itself may
///   be blocking or suspending
/// - with `serialize = true`, waiting callers suspend instead of blocking
///   their thread
///
/// The call key is derived before the first `.await`, so arguments only
/// need to be `Send` if the function's own body requires it.
///
/// # Examples
///
/// ```ignore
/// use cacheval_async::async_cache_value;
///
/// #[async_cache_value(expires_in = 300)]
/// async fn fetch_profile(user_id: u64) -> Result<Profile, ApiError> {
///     client().get_profile(user_id).await
/// }
/// ```
///
/// ## Shared Suspending Storage
///
/// ```ignore
/// use cacheval_async::{async_cache_value, AsyncStorage, AsyncStorageFactory};
/// use once_cell::sync::Lazy;
/// use std::sync::Arc;
///
/// static REDIS: Lazy<AsyncStorageFactory> = Lazy::new(|| {
///     AsyncStorageFactory::suspending(|| async {
///         Ok(Arc::new(RedisStorage::connect("redis://cache").await?) as Arc<dyn AsyncStorage>)
///     })
/// });
///
/// fn redis() -> AsyncStorageFactory {
///     REDIS.clone()
/// }
///
/// #[async_cache_value(storage = redis, serialize = true)]
/// async fn price(sku: String) -> u64 {
///     pricing_service(&sku).await
/// }
/// ```
#[proc_macro_attribute]
pub fn async_cache_value(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    match expand(attr.into(), input) {
        Ok(expanded) => expanded.into(),
        Err(err) => err.into(),
    }
}

fn expand(attr: TokenStream2, input: ItemFn) -> Result<TokenStream2, TokenStream2> {
    let attrs = parse_attributes(attr)?;
    check_flavor(&input.sig, Flavor::Suspending)?;
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
    let builder = generate_builder(&attrs, quote! { ::cacheval_core::AsyncCacheValue });
    let cache_ty = generate_cache_type(&attrs, quote! { ::cacheval_core::AsyncValueCache });

    let body = quote! {
        ::cacheval_core::__private::assert_output::<_, #body_ty>(async move #block)
    };
    let call = if cached.is_result {
        quote! { __cache.try_get_or_compute(__key, #body).await }
    } else {
        quote! { __cache.get_or_compute(__key, #body).await }
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
                    ::cacheval_core::FnFlavor::Suspending,
                ))
            })?;

            // Reported by the orchestrator at its key step
            let __key = __cache.call_key(&::cacheval_core::CallArgs::new() #(#pushes)*);

            #call
        }
    })
}

/// Caches the object an `async` function creates, one per set of
/// arguments, and hands every later caller a clone of it.
///
/// Same parameters as `#[cache_reference]`. Concurrent first callers with
/// the same arguments await a single creation.
///
/// # Examples
///
/// ```ignore
/// use cacheval_async::async_cache_reference;
/// use std::sync::Arc;
///
/// #[async_cache_reference]
/// async fn session_for(repo: String) -> Result<Arc<Session>, ApiError> {
///     Ok(Arc::new(Session::open(&repo).await?))
/// }
/// ```
#[proc_macro_attribute]
pub fn async_cache_reference(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    match expand_reference(attr.into(), input) {
        Ok(expanded) => expanded.into(),
        Err(err) => err.into(),
    }
}

fn expand_reference(attr: TokenStream2, input: ItemFn) -> Result<TokenStream2, TokenStream2> {
    let attrs = parse_reference_attributes(attr)?;
    check_flavor_for(&input.sig, Flavor::Suspending, "cache_reference")?;
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

    let body = quote! {
        ::cacheval_core::__private::assert_output::<_, #body_ty>(async move #block)
    };
    let call = if cached.is_result {
        quote! { __cache.try_get_or_create(__key, #body).await }
    } else {
        quote! { __cache.get_or_create(__key, #body).await }
    };

    Ok(quote! {
        #(#fn_attrs)*
        #vis #sig {
            #[allow(unused_imports)]
            use ::cacheval_core::__private::{NativeKeyArg as _, OpaqueKeyArg as _};

            #marker

            static __CACHEVAL: ::cacheval_core::__private::OnceCell<::cacheval_core::AsyncReferenceCache> =
                ::cacheval_core::__private::OnceCell::new();

            let __cache = __CACHEVAL.get_or_try_init(|| {
                #builder.decorate_async(::cacheval_core::FunctionDescriptor::new(
                    #identity,
                    ::cacheval_core::FnFlavor::Suspending,
                ))
            })?;

            let __key = __cache.call_key(&::cacheval_core::CallArgs::new() #(#pushes)*);

            #call
        }
    })
}
