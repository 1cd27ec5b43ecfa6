//! # Cacheval Async
//!
//! Caches the return values of `async` functions in pluggable async storage.
//!
//! `#[async_cache_value]` keys each call by the function's qualified path and
//! its arguments. On a hit, the stored value is decoded and returned without
//! running the body; on a miss, the body runs, and its value is encoded,
//! stored and returned. Storage calls and, with `serialize = true`, waits
//! for other callers of the same function suspend the task instead of
//! blocking its thread.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! cacheval-async = "0.3"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```rust,ignore
//! use cacheval_async::async_cache_value;
//! use std::time::Duration;
//!
//! #[async_cache_value(expires_in = 60)]
//! async fn expensive_operation(x: u32) -> u32 {
//!     tokio::time::sleep(Duration::from_secs(1)).await;
//!     x * 2
//! }
//!
//! #[tokio::main]
//! async fn main() -> cacheval_async::CacheResult<()> {
//!     // First call: sleeps for 1 second
//!     let a = expensive_operation(5).await?;
//!     // Second call: decoded from storage
//!     let b = expensive_operation(5).await?;
//!     assert_eq!(a, b);
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Storage
//!
//! Implement [`AsyncStorage`] and hand the decorator a factory for it. The
//! factory runs at most once per process, however many functions share it.
//!
//! ```rust,ignore
//! use cacheval_async::{async_trait, AsyncStorage, StorageResult};
//! use std::time::Duration;
//!
//! struct RedisStorage { /* ... */ }
//!
//! #[async_trait]
//! impl AsyncStorage for RedisStorage {
//!     async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> { todo!() }
//!     async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StorageResult<()> { todo!() }
//! }
//! ```
//!
//! ## Macro Parameters
//!
//! - `storage`: path of a `fn() -> AsyncStorageFactory` (default: shared in-memory storage)
//! - `type_encoders`: path of a `fn() -> TypeEncoders` (default: none)
//! - `expires_in`: lifetime of stored values in seconds (default: none)
//! - `serialize`: run calls to the function one at a time (default: `false`)
//! - `codec`: a `Codec` type implementing `Default` (default: `JsonCodec`)
//! - `name`: identity and statistics name (default: the qualified path)
//!
//! ## Shared Resources
//!
//! `#[async_cache_reference]` keeps the object an `async` function builds,
//! one per set of arguments, and hands a clone of it to every later caller.
//! It accepts only `type_encoders` and `name`.
//!
//! ```rust,ignore
//! use cacheval_async::async_cache_reference;
//! use std::sync::Arc;
//!
//! #[async_cache_reference]
//! async fn client_session(repo: String) -> Arc<Session> {
//!     Arc::new(Session::open(&repo).await)
//! }
//! ```

pub use cacheval_async_macros::{async_cache_reference, async_cache_value};

pub use cacheval_core::{
    AsyncCacheValue, AsyncMemoryStorage, AsyncReferenceCache, AsyncStorage, AsyncStorageFactory,
    AsyncValueCache, CacheEvent, CacheOperation, CacheReference, CacheResult, CacheValueError,
    CacheableKey, CallArgs, CallKey, Codec, CodecError, DefaultCacheableKey, Factory,
    FunctionDescriptor, FunctionIdentity, JsonCodec, SingletonRegistry, StorageError,
    StorageResult, TypeEncoders,
};

#[cfg(feature = "stats")]
pub use cacheval_core::{stats_registry, CacheStats};

pub use async_trait::async_trait;
pub use once_cell;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{async_cache_reference, async_cache_value};
    pub use crate::{AsyncStorageFactory, CacheResult, CacheValueError, TypeEncoders};
    #[cfg(feature = "stats")]
    pub use crate::{stats_registry, CacheStats};
}
