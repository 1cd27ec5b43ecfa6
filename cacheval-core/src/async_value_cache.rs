//! Suspending decorator configuration and orchestrator.
//!
//! Same control flow as [`ValueCache`](crate::ValueCache); storage calls and
//! gate waits suspend the task instead of blocking its thread.

use crate::codec::{Codec, JsonCodec};
use crate::error::{CacheOperation, CacheResult, CacheValueError, ReturnValue};
use crate::events::{CacheEvent, CallObserver, EventHook};
use crate::gate::AsyncGate;
use crate::identity::{FnFlavor, FunctionDescriptor, FunctionIdentity};
use crate::keys::{CallArgs, CallKey, IntoCallKey, TypeEncoders};
use crate::registry::SingletonRegistry;
use crate::storage::{AsyncStorage, AsyncStorageFactory};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

#[cfg(feature = "stats")]
use crate::CacheStats;

/// Configuration for caching an `async` function.
///
/// The storage factory may itself be blocking or suspending. Serialization
/// is per function, as for [`CacheValue`](crate::CacheValue); waiting callers
/// yield to the executor.
///
/// # Examples
///
/// ```
/// use cacheval_core::{AsyncCacheValue, CallArgs, FunctionDescriptor};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = AsyncCacheValue::new()
///     .decorate(FunctionDescriptor::suspending("docs::fetch_title"))
///     .unwrap();
///
/// let id = 7u32;
/// let args = CallArgs::new().positional("id", &id);
/// let key = cache.call_key(&args).unwrap();
///
/// let title = cache
///     .get_or_compute(key.clone(), async { format!("post #{id}") })
///     .await
///     .unwrap();
/// assert_eq!(title, "post #7");
/// # }
/// ```
pub struct AsyncCacheValue<C = JsonCodec> {
    storage: AsyncStorageFactory,
    encoders: TypeEncoders,
    expires_in: Option<Duration>,
    serialize: bool,
    codec: C,
    registry: Arc<SingletonRegistry>,
    hook: Option<EventHook>,
}

impl AsyncCacheValue<JsonCodec> {
    pub fn new() -> Self {
        Self {
            storage: AsyncStorageFactory::memory(),
            encoders: TypeEncoders::new(),
            expires_in: None,
            serialize: false,
            codec: JsonCodec,
            registry: SingletonRegistry::global(),
            hook: None,
        }
    }
}

impl Default for AsyncCacheValue<JsonCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> AsyncCacheValue<C> {
    pub fn storage_factory(mut self, factory: AsyncStorageFactory) -> Self {
        self.storage = factory;
        self
    }

    pub fn type_encoders(mut self, encoders: TypeEncoders) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn expires_in(mut self, duration: Duration) -> Self {
        self.expires_in = Some(duration);
        self
    }

    pub fn serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    pub fn codec<C2>(self, codec: C2) -> AsyncCacheValue<C2> {
        AsyncCacheValue {
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

    /// Binds this configuration to one `async` function.
    ///
    /// # Errors
    ///
    /// [`CacheValueError::Configuration`] when `function` is blocking.
    pub fn decorate(self, function: FunctionDescriptor) -> CacheResult<AsyncValueCache<C>> {
        if function.flavor != FnFlavor::Suspending {
            return Err(CacheValueError::Configuration(format!(
                "'{}' is a {} function; cache it with the blocking decorator",
                function.identity, function.flavor
            )));
        }
        tracing::debug!(
            function = %function.identity,
            serialize = self.serialize,
            expires_in = ?self.expires_in,
            "decorated async function"
        );
        Ok(AsyncValueCache {
            observer: CallObserver::new(function.identity, self.hook),
            storage_factory: self.storage,
            storage: OnceCell::new(),
            registry: self.registry,
            gate: AsyncGate::new(self.serialize),
            encoders: self.encoders,
            expires_in: self.expires_in,
            codec: self.codec,
        })
    }
}

impl<C> fmt::Debug for AsyncCacheValue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCacheValue")
            .field("storage", &self.storage)
            .field("encoders", &self.encoders)
            .field("expires_in", &self.expires_in)
            .field("serialize", &self.serialize)
            .finish_non_exhaustive()
    }
}

/// Cache of one decorated `async` function.
pub struct AsyncValueCache<C = JsonCodec> {
    observer: CallObserver,
    storage_factory: AsyncStorageFactory,
    storage: OnceCell<Arc<dyn AsyncStorage>>,
    registry: Arc<SingletonRegistry>,
    gate: AsyncGate,
    encoders: TypeEncoders,
    expires_in: Option<Duration>,
    codec: C,
}

impl<C> AsyncValueCache<C> {
    pub fn identity(&self) -> &FunctionIdentity {
        self.observer.identity()
    }

    pub fn call_key(&self, args: &CallArgs<'_>) -> CacheResult<CallKey> {
        CallKey::derive(self.identity(), args, &self.encoders)
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &Arc<CacheStats> {
        self.observer.stats()
    }

    /// Returns the cached value for `key_source`, or awaits `compute` and
    /// caches its output.
    ///
    /// The key is derived right away, before the returned future is first
    /// polled; an argument that cannot be keyed is reported when it is
    /// awaited.
    pub fn get_or_compute<'s, R, K, Fut>(
        &'s self,
        key_source: K,
        compute: Fut,
    ) -> impl Future<Output = CacheResult<R>> + 's
    where
        C: Codec<R>,
        R: Any + Send + Sync,
        K: IntoCallKey,
        Fut: Future<Output = R> + 's,
    {
        self.try_get_or_compute(key_source, async move {
            Ok::<R, CacheValueError>(compute.await)
        })
    }

    /// Like [`AsyncValueCache::get_or_compute`] for a fallible function.
    ///
    /// An `Err` from `compute` is returned as is and nothing is stored.
    pub fn try_get_or_compute<'s, R, E, K, Fut>(
        &'s self,
        key_source: K,
        compute: Fut,
    ) -> impl Future<Output = Result<R, E>> + 's
    where
        C: Codec<R>,
        R: Any + Send + Sync,
        E: From<CacheValueError> + 's,
        K: IntoCallKey,
        Fut: Future<Output = Result<R, E>> + 's,
    {
        let key = key_source.into_call_key(self.identity(), &self.encoders);
        async move {
            let storage = self
                .bind_storage()
                .await
                .map_err(|e| self.observer.failed::<E>(e))?;
            let _permit = self.gate.enter().await;

            let key = key.map_err(|e| self.observer.failed::<E>(e))?;

            if let Some(value) = self
                .lookup(storage.as_ref(), &key)
                .await
                .map_err(|e| self.observer.failed::<E>(e))?
            {
                return Ok(value);
            }

            let value = compute.await?;
            self.store(storage.as_ref(), &key, value)
                .await
                .map_err(|e| self.observer.failed::<E>(e))
        }
    }

    async fn bind_storage(&self) -> CacheResult<&Arc<dyn AsyncStorage>> {
        self.storage
            .get_or_try_init(|| self.registry.resolve_async(&self.storage_factory))
            .await
    }

    async fn lookup<R>(&self, storage: &dyn AsyncStorage, key: &CallKey) -> CacheResult<Option<R>>
    where
        C: Codec<R>,
    {
        let payload = storage
            .get(key.as_str())
            .await
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

    async fn store<R>(&self, storage: &dyn AsyncStorage, key: &CallKey, value: R) -> CacheResult<R>
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
            .await
            .map_err(|e| CacheValueError::storage(key, CacheOperation::Set, e))?;
        self.observer.stored(key);
        Ok(value)
    }
}

impl<C> fmt::Debug for AsyncValueCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValueCache")
            .field("identity", self.identity())
            .field("gate", &self.gate)
            .field("bound", &self.storage.initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_storage::AsyncMemoryStorage;
    use crate::storage::{StorageError, StorageResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn isolated() -> AsyncCacheValue {
        AsyncCacheValue::new()
            .registry(Arc::new(SingletonRegistry::new()))
            .storage_factory(AsyncStorageFactory::suspending(|| async {
                Ok(Arc::new(AsyncMemoryStorage::new()) as Arc<dyn AsyncStorage>)
            }))
    }

    struct FlakyStorage;

    #[async_trait]
    impl AsyncStorage for FlakyStorage {
        async fn get(&self, _: &str) -> StorageResult<Option<Vec<u8>>> {
            Err(StorageError::backend("timeout"))
        }

        async fn set(&self, _: &str, _: Vec<u8>, _: Option<Duration>) -> StorageResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let cache = isolated()
            .decorate(FunctionDescriptor::suspending("async_value_cache::hit"))
            .unwrap();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute(&CallArgs::new(), async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    String::from("payload")
                })
                .await
                .unwrap();
            assert_eq!(value, "payload");
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits(), 2);
    }

    #[test]
    fn test_decorating_blocking_function_fails() {
        let err = AsyncCacheValue::new()
            .decorate(FunctionDescriptor::blocking("async_value_cache::sync_fn"))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_blocking_factory_is_accepted() {
        let cache = AsyncCacheValue::new()
            .registry(Arc::new(SingletonRegistry::new()))
            .storage_factory(AsyncStorageFactory::blocking(|| {
                Ok(Arc::new(AsyncMemoryStorage::new()) as Arc<dyn AsyncStorage>)
            }))
            .decorate(FunctionDescriptor::suspending("async_value_cache::blocking_factory"))
            .unwrap();
        let value = cache
            .get_or_compute(&CallArgs::new(), async { 3u8 })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_storage_failure_fails_closed() {
        let cache = AsyncCacheValue::new()
            .registry(Arc::new(SingletonRegistry::new()))
            .storage_factory(AsyncStorageFactory::blocking(|| {
                Ok(Arc::new(FlakyStorage) as Arc<dyn AsyncStorage>)
            }))
            .decorate(FunctionDescriptor::suspending("async_value_cache::flaky"))
            .unwrap();

        let err = cache
            .get_or_compute(&CallArgs::new(), async { 1u8 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheValueError::Cache {
                operation: CacheOperation::Get,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unhashable_argument_reported_on_await() {
        struct Session;
        let session = Session;
        let cache = isolated()
            .decorate(FunctionDescriptor::suspending("async_value_cache::unhashable"))
            .unwrap();

        let err = cache
            .get_or_compute(
                &CallArgs::new().keyword_opaque("session", &session),
                async { 0u8 },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CacheValueError::UnhashableParam { .. }));
    }

    #[tokio::test]
    async fn test_function_error_is_not_cached() {
        let cache = isolated()
            .decorate(FunctionDescriptor::suspending("async_value_cache::fallible"))
            .unwrap();
        let runs = AtomicUsize::new(0);

        for expect_ok in [false, true, true] {
            let result: CacheResult<u32> = cache
                .try_get_or_compute(&CallArgs::new(), async {
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CacheValueError::Configuration("upstream down".into()))
                    } else {
                        Ok(42)
                    }
                })
                .await;
            assert_eq!(result.is_ok(), expect_ok);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_serialized_concurrent_tasks_compute_once() {
        let cache = Arc::new(
            isolated()
                .serialize(true)
                .decorate(FunctionDescriptor::suspending("async_value_cache::serialized"))
                .unwrap(),
        );
        let runs = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (cache, runs) = (Arc::clone(&cache), Arc::clone(&runs));
                tokio::spawn(async move {
                    let key = cache.call_key(&CallArgs::new().positional("id", &1u8)).unwrap();
                    cache
                        .get_or_compute(key, async {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            vec![1u8, 2, 3]
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), vec![1, 2, 3]);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
