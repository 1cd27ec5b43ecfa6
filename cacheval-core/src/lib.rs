//! # Cacheval Core
//!
//! Runtime behind the `#[cache_value]` and `#[async_cache_value]` attributes.
//!
//! A decorated function gets a [`ValueCache`] (blocking) or an
//! [`AsyncValueCache`] (suspending). Every call then runs the same sequence:
//!
//! 1. bind the function's storage through the [`SingletonRegistry`], once
//! 2. enter the function's [`Gate`] (no-op unless `serialize` was set)
//! 3. derive the [`CallKey`] from the [`FunctionIdentity`] and the arguments
//! 4. `get` from storage and decode with the [`Codec`]; a hit returns here
//! 5. run the function
//! 6. encode and `set` the value, then return it
//!
//! Failures in the caching machinery fail the call with a
//! [`CacheValueError`]; they never fall back to an uncached call.
//!
//! ## Module Organization
//!
//! - [`identity`] - Stable per-function identities
//! - [`keys`] - Native cache keys, type encoders and call key derivation
//! - [`registry`] - At-most-once resolution of storage factories
//! - [`gate`] - No-op and mutex gates for both call-path flavors
//! - [`codec`] - Value encoding, JSON by default
//! - [`storage`] - Blocking and suspending storage traits
//! - [`memory_storage`] - In-process storage with per-entry expiry
//!
//! Functions that build resources rather than values (clients or
//! loaded models) use [`CacheReference`] instead: the object itself is kept
//! in process, one per call key, and every caller shares it.
//!
//! Hits, misses and stores are logged with `tracing` at debug level and can
//! also be observed through [`CacheValue::on_event`].

mod async_value_cache;
mod cache_entry;
mod error;
mod events;
mod reference_cache;
mod value_cache;

pub mod codec;
pub mod gate;
pub mod identity;
pub mod keys;
pub mod memory_storage;
pub mod registry;
pub mod storage;

#[cfg(feature = "stats")]
mod stats;

#[cfg(feature = "stats")]
pub mod stats_registry;

pub use async_value_cache::{AsyncCacheValue, AsyncValueCache};
pub use cache_entry::CacheEntry;
pub use codec::{Codec, CodecError, JsonCodec};
pub use error::{BoxError, CacheOperation, CacheResult, CacheValueError, ReturnValue};
pub use events::{CacheEvent, EventHook};
pub use gate::{AsyncGate, AsyncGatePermit, Gate, GatePermit};
pub use identity::{FnFlavor, FunctionDescriptor, FunctionIdentity};
pub use keys::{
    ArgValue, CacheableKey, CallArgs, CallKey, DefaultCacheableKey, IntoCallKey, KeyArg,
    NativeKeyArg, OpaqueKeyArg, TypeEncoders,
};
pub use memory_storage::{AsyncMemoryStorage, MemoryStorage};
pub use registry::{Factory, FactoryId, SingletonRegistry};
pub use storage::{
    AsyncStorage, AsyncStorageFactory, Storage, StorageError, StorageFactory, StorageResult,
};
pub use reference_cache::{AsyncReferenceCache, CacheReference, ReferenceCache};
pub use value_cache::{CacheValue, ValueCache};

#[cfg(feature = "stats")]
pub use stats::CacheStats;

/// Items used by code generated from the attribute macros.
#[doc(hidden)]
pub mod __private {
    pub use crate::keys::{KeyArg, NativeKeyArg, OpaqueKeyArg};
    pub use once_cell::sync::OnceCell;
    use std::future::Future;

    /// Pins the output type of an `async` block so `?` inside it resolves.
    #[inline(always)]
    pub fn assert_output<F, R>(future: F) -> F
    where
        F: Future<Output = R>,
    {
        future
    }
}
