//! Per-argument caching of resources.
//!
//! Where [`ValueCache`](crate::ValueCache) stores encoded copies of a value,
//! a [`ReferenceCache`] keeps the object a function produced in process and
//! hands every later caller with the same arguments a clone of it. Return an
//! `Arc` to share one client or loaded model between callers.

use crate::error::{CacheResult, CacheValueError};
use crate::events::{CallObserver, EventHook};
use crate::identity::{FnFlavor, FunctionDescriptor, FunctionIdentity};
use crate::keys::{CallArgs, CallKey, IntoCallKey, TypeEncoders};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

#[cfg(feature = "stats")]
use crate::CacheStats;

type Resource = Arc<dyn Any + Send + Sync>;

/// Configuration for caching the resources a function creates.
///
/// # Examples
///
/// ```
/// use cacheval_core::{CacheReference, CallArgs, FunctionDescriptor};
/// use std::sync::Arc;
///
/// struct Model {
///     labels: Vec<String>,
/// }
///
/// let cache = CacheReference::new()
///     .decorate(FunctionDescriptor::blocking("docs::load_model"))
///     .unwrap();
///
/// let load = || Arc::new(Model { labels: vec!["positive".into(), "negative".into()] });
/// let a = cache.get_or_create(&CallArgs::new(), load).unwrap();
/// let b = cache.get_or_create(&CallArgs::new(), load).unwrap();
///
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(a.labels.len(), 2);
/// ```
#[derive(Default)]
pub struct CacheReference {
    encoders: TypeEncoders,
    hook: Option<EventHook>,
}

impl CacheReference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_encoders(mut self, encoders: TypeEncoders) -> Self {
        self.encoders = encoders;
        self
    }

    /// Hit when an existing resource is handed out, miss then store when
    /// one is created.
    pub fn on_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&crate::CacheEvent<'_>) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Binds this configuration to a blocking function.
    ///
    /// # Errors
    ///
    /// [`CacheValueError::Configuration`] when `function` is suspending.
    pub fn decorate(self, function: FunctionDescriptor) -> CacheResult<ReferenceCache> {
        if function.flavor != FnFlavor::Blocking {
            return Err(CacheValueError::Configuration(format!(
                "'{}' is a {} function; cache its resources with the async decorator",
                function.identity, function.flavor
            )));
        }
        Ok(ReferenceCache {
            observer: CallObserver::new(function.identity, self.hook),
            encoders: self.encoders,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// Binds this configuration to an `async` function.
    ///
    /// # Errors
    ///
    /// [`CacheValueError::Configuration`] when `function` is blocking.
    pub fn decorate_async(self, function: FunctionDescriptor) -> CacheResult<AsyncReferenceCache> {
        if function.flavor != FnFlavor::Suspending {
            return Err(CacheValueError::Configuration(format!(
                "'{}' is a {} function; cache its resources with the blocking decorator",
                function.identity, function.flavor
            )));
        }
        Ok(AsyncReferenceCache {
            observer: CallObserver::new(function.identity, self.hook),
            encoders: self.encoders,
            slots: Mutex::new(HashMap::new()),
        })
    }
}

impl fmt::Debug for CacheReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheReference")
            .field("encoders", &self.encoders)
            .finish_non_exhaustive()
    }
}

/// Resources created by one blocking function, one per call key.
///
/// A resource is created at most once per key: concurrent first callers
/// wait for the one creating it. A failed creation leaves nothing behind.
/// The creating function must not call itself with the same arguments.
pub struct ReferenceCache {
    observer: CallObserver,
    encoders: TypeEncoders,
    slots: Mutex<HashMap<CallKey, Arc<once_cell::sync::OnceCell<Resource>>>>,
}

impl ReferenceCache {
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

    /// Returns the resource cached for `key_source`, creating it first if
    /// needed.
    pub fn get_or_create<T, K, F>(&self, key_source: K, create: F) -> CacheResult<T>
    where
        T: Clone + Send + Sync + 'static,
        K: IntoCallKey,
        F: FnOnce() -> T,
    {
        self.try_get_or_create(key_source, || Ok::<T, CacheValueError>(create()))
    }

    /// Like [`ReferenceCache::get_or_create`] for a fallible function.
    ///
    /// An `Err` from `create` is returned as is; the next call tries again.
    pub fn try_get_or_create<T, E, K, F>(&self, key_source: K, create: F) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
        E: From<CacheValueError>,
        K: IntoCallKey,
        F: FnOnce() -> Result<T, E>,
    {
        let key = key_source
            .into_call_key(self.identity(), &self.encoders)
            .map_err(|e| self.observer.failed::<E>(e))?;
        let slot = slot(&self.slots, &key);

        let mut created = false;
        let resource = slot.get_or_try_init(|| {
            created = true;
            self.observer.miss(&key);
            create().map(|value| Arc::new(value) as Resource)
        })?;

        if created {
            self.observer.stored(&key);
        } else {
            self.observer.hit(&key);
        }
        downcast(self.identity(), resource).map_err(|e| self.observer.failed::<E>(e))
    }

    /// Number of resources created so far.
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|s| s.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached resource. Later calls create them again.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl fmt::Debug for ReferenceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("identity", self.identity())
            .field("resources", &self.len())
            .finish()
    }
}

/// Resources created by one `async` function, one per call key.
///
/// Same guarantees as [`ReferenceCache`]; callers waiting for a resource
/// being created yield to the executor.
pub struct AsyncReferenceCache {
    observer: CallObserver,
    encoders: TypeEncoders,
    slots: Mutex<HashMap<CallKey, Arc<tokio::sync::OnceCell<Resource>>>>,
}

impl AsyncReferenceCache {
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

    /// Returns the resource cached for `key_source`, awaiting `create`
    /// first if needed.
    ///
    /// The key is derived before the returned future is first polled.
    pub fn get_or_create<'s, T, K, Fut>(
        &'s self,
        key_source: K,
        create: Fut,
    ) -> impl Future<Output = CacheResult<T>> + 's
    where
        T: Clone + Send + Sync + 'static,
        K: IntoCallKey,
        Fut: Future<Output = T> + 's,
    {
        self.try_get_or_create(key_source, async move {
            Ok::<T, CacheValueError>(create.await)
        })
    }

    /// Like [`AsyncReferenceCache::get_or_create`] for a fallible function.
    pub fn try_get_or_create<'s, T, E, K, Fut>(
        &'s self,
        key_source: K,
        create: Fut,
    ) -> impl Future<Output = Result<T, E>> + 's
    where
        T: Clone + Send + Sync + 'static,
        E: From<CacheValueError> + 's,
        K: IntoCallKey,
        Fut: Future<Output = Result<T, E>> + 's,
    {
        let key = key_source.into_call_key(self.identity(), &self.encoders);
        async move {
            let key = key.map_err(|e| self.observer.failed::<E>(e))?;
            let slot = slot(&self.slots, &key);

            let mut created = false;
            let resource = slot
                .get_or_try_init(|| {
                    created = true;
                    self.observer.miss(&key);
                    async move { create.await.map(|value| Arc::new(value) as Resource) }
                })
                .await?;

            if created {
                self.observer.stored(&key);
            } else {
                self.observer.hit(&key);
            }
            downcast(self.identity(), resource).map_err(|e| self.observer.failed::<E>(e))
        }
    }

    /// Number of resources created so far.
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|s| s.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached resource. Later calls create them again.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

impl fmt::Debug for AsyncReferenceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncReferenceCache")
            .field("identity", self.identity())
            .field("resources", &self.len())
            .finish()
    }
}

fn slot<C: Default>(slots: &Mutex<HashMap<CallKey, Arc<C>>>, key: &CallKey) -> Arc<C> {
    Arc::clone(slots.lock().entry(key.clone()).or_default())
}

fn downcast<T: Clone + 'static>(identity: &FunctionIdentity, resource: &Resource) -> CacheResult<T> {
    resource.downcast_ref::<T>().cloned().ok_or_else(|| {
        CacheValueError::Configuration(format!(
            "'{identity}' produced a resource of an unexpected type"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug)]
    struct Session {
        base_url: String,
    }

    fn sessions(name: &str) -> ReferenceCache {
        CacheReference::new()
            .decorate(FunctionDescriptor::blocking(name))
            .unwrap()
    }

    #[test]
    fn test_same_arguments_share_one_resource() {
        let cache = sessions("reference_cache::shared");
        let created = AtomicUsize::new(0);
        let open = |repo: &str| {
            created.fetch_add(1, Ordering::SeqCst);
            Arc::new(Session {
                base_url: format!("https://{repo}.example"),
            })
        };

        let a = cache
            .get_or_create(&CallArgs::new().positional("repo", "dummy"), || open("dummy"))
            .unwrap();
        let b = cache
            .get_or_create(&CallArgs::new().positional("repo", "dummy"), || open("dummy"))
            .unwrap();
        let c = cache
            .get_or_create(&CallArgs::new().positional("repo", "other"), || open("other"))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.base_url, "https://other.example");
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_creation_is_retried() {
        let cache = sessions("reference_cache::retry");
        let attempts = AtomicUsize::new(0);
        let connect = || -> Result<Arc<Session>, CacheValueError> {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CacheValueError::Configuration("host unreachable".into()))
            } else {
                Ok(Arc::new(Session {
                    base_url: "https://db".into(),
                }))
            }
        };

        assert!(cache.try_get_or_create(&CallArgs::new(), connect).is_err());
        assert!(cache.is_empty());
        assert!(cache.try_get_or_create(&CallArgs::new(), connect).is_ok());
        assert!(cache.try_get_or_create(&CallArgs::new(), connect).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unhashable_argument_never_creates() {
        struct Socket;
        let socket = Socket;
        let cache = sessions("reference_cache::unhashable");

        let err = cache
            .get_or_create(&CallArgs::new().positional_opaque("sock", &socket), || -> u8 {
                panic!("must not run")
            })
            .unwrap_err();
        assert!(matches!(err, CacheValueError::UnhashableParam { .. }));
        assert_eq!(cache.stats().failures(), 1);
    }

    #[test]
    fn test_concurrent_first_callers_create_once() {
        let cache = Arc::new(sessions("reference_cache::concurrent"));
        let created = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (cache, created) = (Arc::clone(&cache), Arc::clone(&created));
                thread::spawn(move || {
                    cache
                        .get_or_create(&CallArgs::new(), || {
                            created.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(30));
                            Arc::new(7u64)
                        })
                        .unwrap()
                })
            })
            .collect();

        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_clear_drops_resources() {
        let cache = sessions("reference_cache::clear");
        let first = cache.get_or_create(&CallArgs::new(), || Arc::new(1u8)).unwrap();
        cache.clear();
        let second = cache.get_or_create(&CallArgs::new(), || Arc::new(1u8)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_decorate_checks_flavor() {
        let err = CacheReference::new()
            .decorate(FunctionDescriptor::suspending("reference_cache::async_fn"))
            .unwrap_err();
        assert!(err.is_configuration());

        let err = CacheReference::new()
            .decorate_async(FunctionDescriptor::blocking("reference_cache::sync_fn"))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_concurrent_first_callers_create_once() {
        let cache = Arc::new(
            CacheReference::new()
                .decorate_async(FunctionDescriptor::suspending("reference_cache::async"))
                .unwrap(),
        );
        let created = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (cache, created) = (Arc::clone(&cache), Arc::clone(&created));
                tokio::spawn(async move {
                    let key = cache.call_key(&CallArgs::new().positional("repo", "dummy"));
                    cache
                        .get_or_create(key, async {
                            created.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Arc::new(Session {
                                base_url: "https://dummy.example".into(),
                            })
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut values = Vec::new();
        for task in tasks {
            values.push(task.await.unwrap());
        }
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }
}
