//! Blocking decorator configuration and orchestrator.

use crate::codec::{Codec, JsonCodec};
use crate::error::{CacheOperation, CacheResult, CacheValueError, ReturnValue};
use crate::events::{CacheEvent, CallObserver, EventHook};
use crate::gate::Gate;
use crate::identity::{FnFlavor, FunctionDescriptor, FunctionIdentity};
use crate::keys::{CallArgs, CallKey, IntoCallKey, TypeEncoders};
use crate::registry::SingletonRegistry;
use crate::storage::{Storage, StorageFactory};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "stats")]
use crate::CacheStats;

/// Configuration for caching a blocking function.
///
/// Defaults: the shared in-memory storage, no type encoders, no expiry,
/// no serialization, [`JsonCodec`] and the global [`SingletonRegistry`].
///
/// With `serialize(true)` every call to the decorated function waits for
/// the previous one to finish, whatever its arguments: the lock is per
/// function, not per key.
///
/// # Examples
///
/// ```
/// use cacheval_core::{CacheValue, CallArgs, FunctionDescriptor};
/// use std::time::Duration;
///
/// let cache = CacheValue::new()
///     .expires_in(Duration::from_secs(30))
///     .serialize(true)
///     .decorate(FunctionDescriptor::blocking("docs::square"))
///     .unwrap();
///
/// let x = 12u64;
/// let args = CallArgs::new().positional("x", &x);
/// assert_eq!(cache.get_or_compute(&args, || x * x).unwrap(), 144);
/// assert_eq!(cache.get_or_compute(&args, || -> u64 { unreachable!() }).unwrap(), 144);
/// ```
pub struct CacheValue<C = JsonCodec> {
    storage: StorageFactory,
    encoders: TypeEncoders,
    expires_in: Option<Duration>,
    serialize: bool,
    codec: C,
    registry: Arc<SingletonRegistry>,
    hook: Option<EventHook>,
}

impl CacheValue<JsonCodec> {
    pub fn new() -> Self {
        Self {
            storage: StorageFactory::memory(),
            encoders: TypeEncoders::new(),
            expires_in: None,
            serialize: false,
            codec: JsonCodec,
            registry: SingletonRegistry::global(),
            hook: None,
        }
    }
}

impl Default for CacheValue<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CacheValue<C> {
    pub fn storage_factory(mut self, factory: StorageFactory) -> Self {
        self.storage = factory;
        self
    }

    pub fn type_encoders(mut self, encoders: TypeEncoders) -> Self {
        self.encoders = encoders;
        self
    }

    /// Lifetime handed to storage with every stored value.
    pub fn expires_in(mut self, duration: Duration) -> Self {
        self.expires_in = Some(duration);
        self
    }

    pub fn serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    pub fn codec<C2>(self, codec: C2) -> CacheValue<C2> {
        CacheValue {
            storage: self.storage,
            encoders: self.encoders,
            expires_in: self.expires_in,
            serialize: self.serialize,
            codec,
            registry: self.registry,
            hook: self.hook,
        }
    }

    pub fn registry(mut self, registry: Arc<SingletonRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn on_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CacheEvent<'_>) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Binds this configuration to one function.
    ///
    /// # Errors
    ///
    /// [`CacheValueError::Configuration`] when `function` is suspending.
    pub fn decorate(self, function: FunctionDescriptor) -> CacheResult<ValueCache<C>> {
        if function.flavor != FnFlavor::Blocking {
            return Err(CacheValueError::Configuration(format!(
                "'{}' is a {} function; cache it with the async decorator",
                function.identity, function.flavor
            )));
        }
        tracing::debug!(
            function = %function.identity,
            serialize = self.serialize,
            expires_in = ?self.expires_in,
            "decorated function"
        );
        Ok(ValueCache {
            observer: CallObserver::new(function.identity, self.hook),
            storage_factory: self.storage,
            storage: OnceCell::new(),
            registry: self.registry,
            gate: Gate::new(self.serialize),
            encoders: self.encoders,
            expires_in: self.expires_in,
            codec: self.codec,
        })
    }
}

impl<C> fmt::Debug for CacheValue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheValue")
            .field("storage", &self.storage)
            .field("encoders", &self.encoders)
            .field("expires_in", &self.expires_in)
            .field("serialize", &self.serialize)
            .finish_non_exhaustive()
    }
}

/// Cache of one decorated blocking function.
pub struct ValueCache<C = JsonCodec> {
    observer: CallObserver,
    storage_factory: StorageFactory,
    storage: OnceCell<Arc<dyn Storage>>,
    registry: Arc<SingletonRegistry>,
    gate: Gate,
    encoders: TypeEncoders,
    expires_in: Option<Duration>,
    codec: C,
}

impl<C> ValueCache<C> {
    pub fn identity(&self) -> &FunctionIdentity {
        self.observer.identity()
    }

    /// Derives the key the given arguments would be cached under.
    pub fn call_key(&self, args: &CallArgs<'_>) -> CacheResult<CallKey> {
        CallKey::derive(self.identity(), args, &self.encoders)
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &Arc<CacheStats> {
        self.observer.stats()
    }

    /// Returns the cached value for `key_source`, or runs `compute` and
    /// caches what it returns.
    ///
    /// # Errors
    ///
    /// Every [`CacheValueError`] variant except `Configuration` from
    /// decoration; see the variant docs for when each is raised.
    pub fn get_or_compute<R, K, F>(&self, key_source: K, compute: F) -> CacheResult<R>
    where
        C: Codec<R>,
        R: Any + Send + Sync,
        K: IntoCallKey,
        F: FnOnce() -> R,
    {
        self.try_get_or_compute(key_source, || Ok::<R, CacheValueError>(compute()))
    }

    /// Like [`ValueCache::get_or_compute`] for a fallible function.
    ///
    /// An `Err` from `compute` is returned as is and nothing is stored.
    pub fn try_get_or_compute<R, E, K, F>(&self, key_source: K, compute: F) -> Result<R, E>
    where
        C: Codec<R>,
        R: Any + Send + Sync,
        E: From<CacheValueError>,
        K: IntoCallKey,
        F: FnOnce() -> Result<R, E>,
    {
        let storage = self.bind_storage().map_err(|e| self.observer.failed::<E>(e))?;
        let _permit = self.gate.enter();

        let key = key_source
            .into_call_key(self.identity(), &self.encoders)
            .map_err(|e| self.observer.failed::<E>(e))?;

        if let Some(value) = self
            .lookup(storage.as_ref(), &key)
            .map_err(|e| self.observer.failed::<E>(e))?
        {
            return Ok(value);
        }

        let value = compute()?;
        self.store(storage.as_ref(), &key, value)
            .map_err(|e| self.observer.failed::<E>(e))
    }

    fn bind_storage(&self) -> CacheResult<&Arc<dyn Storage>> {
        self.storage
            .get_or_try_init(|| self.registry.resolve(&self.storage_factory))
    }

    fn lookup<R>(&self, storage: &dyn Storage, key: &CallKey) -> CacheResult<Option<R>>
    where
        C: Codec<R>,
    {
        let payload = storage
            .get(key.as_str())
            .map_err(|e| CacheValueError::storage(key, CacheOperation::Get, e))?;
        let Some(payload) = payload else {
            self.observer.miss(key);
            return Ok(None);
        };
        let value = self
            .codec
            .decode(&payload)
            .map_err(|e| CacheValueError::decode(key, e))?;
        self.observer.hit(key);
        Ok(Some(value))
    }

    fn store<R>(&self, storage: &dyn Storage, key: &CallKey, value: R) -> CacheResult<R>
    where
        C: Codec<R>,
        R: Any + Send + Sync,
    {
        let payload = match self.codec.encode(&value) {
            Ok(payload) => payload,
            Err(source) => {
                return Err(CacheValueError::UnserializableReturnValue {
                    function: self.identity().clone(),
                    value: ReturnValue::new(value),
                    source,
                })
            }
        };
        storage
            .set(key.as_str(), payload, self.expires_in)
            .map_err(|e| CacheValueError::storage(key, CacheOperation::Set, e))?;
        self.observer.stored(key);
        Ok(value)
    }
}

impl<C> fmt::Debug for ValueCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCache")
            .field("identity", self.identity())
            .field("gate", &self.gate)
            .field("bound", &self.storage.get().is_some())
            .finish_non_exhaustive()
    }
}
