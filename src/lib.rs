//! # Cacheval
//!
//! Caches the return value of a function in pluggable storage, keyed by the
//! function's identity and its arguments, through procedural macros.
//!
//! ## Features
//!
//! - **Shared storage**: values live in a [`Storage`] backend (in-memory by
//!   default) that many functions, and many processes, can share
//! - **Stable keys**: call keys depend on the function's qualified path and
//!   its argument values, never on addresses or run-specific state
//! - **Fail-closed**: a storage or encoding failure fails the call with a
//!   [`CacheValueError`]; the function is never silently re-run uncached
//! - **Serialized calls**: `serialize = true` computes each value once even
//!   under concurrent callers
//! - **Result-aware**: only `Ok` values of a `Result` function are stored
//! - **Shared resources**: `#[cache_reference]` keeps the client or model a
//!   function builds and hands the same instance to every caller
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cacheval::cache_value;
//!
//! #[cache_value(expires_in = 60)]
//! fn fibonacci(n: u32) -> u64 {
//!     if n <= 1 {
//!         return n as u64;
//!     }
//!     fibonacci(n - 1).unwrap_or(0) + fibonacci(n - 2).unwrap_or(0)
//! }
//!
//! // First call computes and stores the result
//! let first = fibonacci(10)?;
//! // Second call decodes it from storage
//! let second = fibonacci(10)?;
//! assert_eq!(first, second);
//! ```
//!
//! The generated code refers to `cacheval_core`, so add both crates to
//! `Cargo.toml`.
//!
//! ## Cache Keys
//!
//! Arguments are keyed through [`CacheableKey`]. Primitives, strings and
//! collections of them already implement it; other types either opt into
//! the `Debug`-based key or provide their own:
//!
//! ```rust
//! use cacheval::{CacheableKey, DefaultCacheableKey};
//!
//! #[derive(Debug, Clone)]
//! struct Region {
//!     code: String,
//! }
//!
//! // Debug-based key
//! impl DefaultCacheableKey for Region {}
//!
//! struct UserId(u64);
//!
//! // Custom key
//! impl CacheableKey for UserId {
//!     fn to_cache_key(&self) -> String {
//!         format!("user:{}", self.0)
//!     }
//! }
//! ```
//!
//! Types from other crates can be keyed through [`TypeEncoders`] and the
//! `type_encoders` attribute instead. An argument with neither fails the
//! call with [`CacheValueError::UnhashableParam`].
//!
//! ## Shared Storage
//!
//! ```rust
//! use cacheval::{MemoryStorage, Storage, StorageFactory};
//! use std::sync::Arc;
//!
//! fn shared() -> StorageFactory {
//!     static FACTORY: once_cell::sync::Lazy<StorageFactory> = once_cell::sync::Lazy::new(|| {
//!         StorageFactory::blocking(|| Ok(Arc::new(MemoryStorage::new()) as Arc<dyn Storage>))
//!     });
//!     FACTORY.clone()
//! }
//!
//! // `#[cache_value(storage = shared)]` on any number of functions binds
//! // them all to one storage instance.
//! # let _ = shared();
//! ```
//!
//! ## Error Handling
//!
//! A function returning a plain `T` now returns [`CacheResult<T>`]. A
//! function already returning `Result<T, E>` keeps its signature and needs
//! `E: From<CacheValueError>`:
//!
//! ```rust,ignore
//! use cacheval::{cache_value, CacheValueError};
//!
//! #[derive(Debug)]
//! enum AppError {
//!     DivisionByZero,
//!     Cache(CacheValueError),
//! }
//!
//! impl From<CacheValueError> for AppError {
//!     fn from(err: CacheValueError) -> Self {
//!         AppError::Cache(err)
//!     }
//! }
//!
//! #[cache_value]
//! fn divide(a: i32, b: i32) -> Result<i32, AppError> {
//!     if b == 0 {
//!         Err(AppError::DivisionByZero)
//!     } else {
//!         Ok(a / b)
//!     }
//! }
//! ```

pub use cacheval_core::*;
pub use cacheval_macros::{cache_reference, cache_value};
