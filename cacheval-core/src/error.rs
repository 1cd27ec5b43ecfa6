//! Error taxonomy for cached calls.
//!
//! Every failure surfaces to the original caller. Nothing is retried in the
//! background and no failure silently degrades into an uncached call.

use crate::codec::CodecError;
use crate::identity::FunctionIdentity;
use crate::keys::CallKey;
use crate::storage::StorageError;
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// Result type alias for cached calls
pub type CacheResult<T> = Result<T, CacheValueError>;

/// Boxed error used as the cause of a [`CacheValueError::Cache`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The storage-facing step that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheOperation {
    Get,
    Set,
    Decode,
    Resolve,
}

impl CacheOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Set => "set",
            CacheOperation::Decode => "decode",
            CacheOperation::Resolve => "resolve",
        }
    }
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A computed return value that could not be encoded.
///
/// The value is kept so the caller can still use it after the cache refused
/// to store it. See [`CacheValueError::into_value`].
pub struct ReturnValue {
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl ReturnValue {
    pub(crate) fn new<R: Any + Send + Sync>(value: R) -> Self {
        Self {
            type_name: std::any::type_name::<R>(),
            value: Box::new(value),
        }
    }

    /// Name of the value's type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Recovers the value if `R` is its concrete type.
    pub fn downcast<R: Any>(self) -> Result<R, Self> {
        let type_name = self.type_name;
        self.value
            .downcast::<R>()
            .map(|v| *v)
            .map_err(|value| Self { type_name, value })
    }
}

impl fmt::Debug for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// All errors raised by the caching layer.
///
/// The wrapped function's own errors are never represented here: they reach
/// the caller untouched.
#[derive(Debug, Error)]
pub enum CacheValueError {
    /// Decoration-time misuse or a misconfigured storage collaborator.
    #[error("improperly configured: {0}")]
    Configuration(String),

    /// An argument has no native cache key and no registered type encoder.
    #[error(
        "parameter '{param}' of type '{type_name}' cannot be used as a cache key; \
         implement CacheableKey for it or register a type encoder"
    )]
    UnhashableParam {
        param: String,
        type_name: &'static str,
    },

    /// The computed value could not be encoded for storage.
    #[error("return value of type '{}' from '{function}' cannot be serialized", .value.type_name())]
    UnserializableReturnValue {
        function: FunctionIdentity,
        value: ReturnValue,
        #[source]
        source: CodecError,
    },

    /// Storage failed, or a stored payload could not be decoded.
    #[error("cache {operation} failed for key '{key}'")]
    Cache {
        key: String,
        operation: CacheOperation,
        #[source]
        source: BoxError,
    },
}

impl CacheValueError {
    pub(crate) fn storage(key: &CallKey, operation: CacheOperation, err: StorageError) -> Self {
        match err {
            StorageError::Configuration(msg) => CacheValueError::Configuration(msg),
            StorageError::Backend(source) => CacheValueError::Cache {
                key: key.as_str().to_string(),
                operation,
                source,
            },
        }
    }

    pub(crate) fn decode(key: &CallKey, err: CodecError) -> Self {
        CacheValueError::Cache {
            key: key.as_str().to_string(),
            operation: CacheOperation::Decode,
            source: Box::new(err),
        }
    }

    /// Returns true for [`CacheValueError::Configuration`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, CacheValueError::Configuration(_))
    }

    /// Recovers the computed value from an `UnserializableReturnValue` error.
    ///
    /// Returns `None` for every other variant or when `R` is not the value's
    /// type.
    pub fn into_value<R: Any>(self) -> Option<R> {
        match self {
            CacheValueError::UnserializableReturnValue { value, .. } => value.downcast().ok(),
            _ => None,
        }
    }
}
