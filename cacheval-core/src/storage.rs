//! Storage collaborators.
//!
//! The orchestrators only talk to storage through [`Storage`] (blocking) and
//! [`AsyncStorage`] (suspending). Implementations must be safe to share
//! between threads and tasks, and they own expiry of what they store.

use crate::error::BoxError;
use crate::registry::Factory;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend is misconfigured. Propagated to the caller as
    /// [`CacheValueError::Configuration`](crate::CacheValueError::Configuration)
    /// without being wrapped.
    #[error("storage misconfigured: {0}")]
    Configuration(String),

    /// Any other backend failure.
    #[error(transparent)]
    Backend(BoxError),
}

impl StorageError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        StorageError::Backend(err.into())
    }
}

/// Blocking key-value storage for encoded values.
pub trait Storage: Send + Sync {
    /// Returns the payload stored under `key`, or `None` when absent or expired.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous payload.
    ///
    /// `expires_in` of `None` keeps the value until the backend evicts it.
    fn set(&self, key: &str, value: Vec<u8>, expires_in: Option<Duration>) -> StorageResult<()>;
}

/// Suspending counterpart of [`Storage`].
#[async_trait]
pub trait AsyncStorage: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, expires_in: Option<Duration>)
        -> StorageResult<()>;
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>, expires_in: Option<Duration>) -> StorageResult<()> {
        (**self).set(key, value, expires_in)
    }
}

#[async_trait]
impl<S: AsyncStorage + ?Sized> AsyncStorage for Arc<S> {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expires_in: Option<Duration>,
    ) -> StorageResult<()> {
        (**self).set(key, value, expires_in).await
    }
}

/// Factory producing the blocking storage of a decorated function.
pub type StorageFactory = Factory<Arc<dyn Storage>>;

/// Factory producing the suspending storage of a decorated function.
///
/// May itself be blocking or suspending; see [`Factory`].
pub type AsyncStorageFactory = Factory<Arc<dyn AsyncStorage>>;
