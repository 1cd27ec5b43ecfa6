//! Singleton registry for storage factories.
//!
//! Many decorated functions can share one storage instance by sharing a
//! [`Factory`]. The registry runs each factory at most once and hands every
//! later caller the value it produced.
//!
//! # Examples
//!
//! ```
//! use cacheval_core::{Factory, SingletonRegistry};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! static BUILT: AtomicUsize = AtomicUsize::new(0);
//!
//! let registry = SingletonRegistry::new();
//! let factory = Factory::blocking(|| {
//!     BUILT.fetch_add(1, Ordering::SeqCst);
//!     Ok(Arc::new(String::from("connection pool")))
//! });
//!
//! let a = registry.resolve(&factory).unwrap();
//! let b = registry.resolve(&factory.clone()).unwrap();
//!
//! assert!(Arc::ptr_eq(&a, &b));
//! assert_eq!(BUILT.load(Ordering::SeqCst), 1);
//! ```

use crate::error::{CacheOperation, CacheResult, CacheValueError};
use crate::storage::{StorageError, StorageResult};
use futures_util::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type BlockingFn<T> = dyn Fn() -> StorageResult<T> + Send + Sync;
type SuspendingFn<T> = dyn Fn() -> BoxFuture<'static, StorageResult<T>> + Send + Sync;

enum FactoryFn<T> {
    Blocking(Box<BlockingFn<T>>),
    Suspending(Box<SuspendingFn<T>>),
}

/// Identity of a [`Factory`]; shared by all of its clones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FactoryId(usize);

impl fmt::Display for FactoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "factory@{:#x}", self.0)
    }
}

/// A nullary producer of `T`, either blocking or suspending.
///
/// Clones share one identity, which is what the [`SingletonRegistry`] keys
/// on. Two factories built separately are different even if they build
/// equal values.
pub struct Factory<T> {
    inner: Arc<FactoryFn<T>>,
}

impl<T: Send + Sync + 'static> Factory<T> {
    pub fn blocking<F>(make: F) -> Self
    where
        F: Fn() -> StorageResult<T> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(FactoryFn::Blocking(Box::new(make))),
        }
    }

    pub fn suspending<F, Fut>(make: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
    {
        Self {
            inner: Arc::new(FactoryFn::Suspending(Box::new(move || make().boxed()))),
        }
    }
}

impl<T> Factory<T> {
    pub fn id(&self) -> FactoryId {
        FactoryId(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    pub fn is_suspending(&self) -> bool {
        matches!(*self.inner, FactoryFn::Suspending(_))
    }
}

impl<T> Clone for Factory<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Factory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("id", &self.id())
            .field("suspending", &self.is_suspending())
            .finish()
    }
}

type Resolved = Arc<dyn Any + Send + Sync>;

enum Cell {
    Blocking(once_cell::sync::OnceCell<Resolved>),
    Suspending(tokio::sync::OnceCell<Resolved>),
}

struct Slot {
    // Keeps the factory allocation alive so its id is never handed out again.
    _factory: Arc<dyn Any + Send + Sync>,
    cell: Cell,
}

impl Slot {
    fn is_resolved(&self) -> bool {
        match &self.cell {
            Cell::Blocking(cell) => cell.get().is_some(),
            Cell::Suspending(cell) => cell.initialized(),
        }
    }
}

/// Memoizes factory results by factory identity.
///
/// Resolution is at-most-once per identity for both flavors: the first
/// caller runs the factory while concurrent callers for the same identity
/// wait for its result. The registry map itself is only locked to find the
/// slot, never while a factory runs. A factory that fails leaves nothing
/// behind, so the next resolution tries again.
#[derive(Default)]
pub struct SingletonRegistry {
    slots: Mutex<HashMap<FactoryId, Arc<Slot>>>,
}

static GLOBAL_REGISTRY: Lazy<Arc<SingletonRegistry>> =
    Lazy::new(|| Arc::new(SingletonRegistry::new()));

impl SingletonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry used by decorators that are not given one explicitly.
    pub fn global() -> Arc<SingletonRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Resolves a blocking factory.
    ///
    /// # Errors
    ///
    /// - [`CacheValueError::Configuration`] if `factory` is suspending, or if
    ///   it reported a configuration error
    /// - [`CacheValueError::Cache`] with operation `resolve` for any other
    ///   factory failure
    pub fn resolve<T>(&self, factory: &Factory<T>) -> CacheResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let slot = self.slot(factory);
        let resolved = match (&slot.cell, &*factory.inner) {
            (Cell::Blocking(cell), FactoryFn::Blocking(make)) => cell
                .get_or_try_init(|| run_blocking(factory.id(), make))
                .map_err(|err| resolve_error(factory.id(), err))?,
            _ => {
                return Err(CacheValueError::Configuration(format!(
                    "{} is suspending and cannot be resolved from a blocking call path",
                    factory.id()
                )))
            }
        };
        downcast(factory.id(), resolved)
    }

    /// Resolves a factory of either flavor from a suspending call path.
    ///
    /// A blocking factory runs inline on the thread polling this future, and
    /// a caller on another thread that arrives while it runs blocks until it
    /// returns. Once resolved, neither flavor blocks. Give slow connections
    /// a [`Factory::suspending`] factory so waiting tasks yield instead.
    ///
    /// # Errors
    ///
    /// Same as [`SingletonRegistry::resolve`], minus the flavor check.
    pub async fn resolve_async<T>(&self, factory: &Factory<T>) -> CacheResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = factory.id();
        let slot = self.slot(factory);
        let resolved = match (&slot.cell, &*factory.inner) {
            (Cell::Blocking(cell), FactoryFn::Blocking(make)) => {
                cell.get_or_try_init(|| run_blocking(id, make))
            }
            (Cell::Suspending(cell), FactoryFn::Suspending(make)) => {
                cell.get_or_try_init(|| async move {
                    tracing::trace!(factory = %id, "running suspending storage factory");
                    make().await.map(|value| Arc::new(value) as Resolved)
                })
                .await
            }
            _ => {
                return Err(CacheValueError::Configuration(format!(
                    "{id} changed flavor after registration"
                )))
            }
        }
        .map_err(|err| resolve_error(id, err))?;
        downcast(id, resolved)
    }

    /// Number of factories that have produced a value.
    pub fn len(&self) -> usize {
        self.slots.lock().values().filter(|s| s.is_resolved()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every resolved value. Later resolutions run factories again.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    fn slot<T: Send + Sync + 'static>(&self, factory: &Factory<T>) -> Arc<Slot> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(factory.id()).or_insert_with(|| {
            let cell = if factory.is_suspending() {
                Cell::Suspending(tokio::sync::OnceCell::new())
            } else {
                Cell::Blocking(once_cell::sync::OnceCell::new())
            };
            Arc::new(Slot {
                _factory: factory.inner.clone(),
                cell,
            })
        });
        Arc::clone(slot)
    }
}

impl fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("resolved", &self.len())
            .finish()
    }
}

fn run_blocking<T: Send + Sync + 'static>(
    id: FactoryId,
    make: &BlockingFn<T>,
) -> StorageResult<Resolved> {
    tracing::trace!(factory = %id, "running blocking storage factory");
    make().map(|value| Arc::new(value) as Resolved)
}

fn resolve_error(id: FactoryId, err: StorageError) -> CacheValueError {
    match err {
        StorageError::Configuration(msg) => CacheValueError::Configuration(msg),
        StorageError::Backend(source) => CacheValueError::Cache {
            key: id.to_string(),
            operation: CacheOperation::Resolve,
            source,
        },
    }
}

fn downcast<T: Clone + 'static>(id: FactoryId, resolved: &Resolved) -> CacheResult<T> {
    resolved.downcast_ref::<T>().cloned().ok_or_else(|| {
        CacheValueError::Configuration(format!("{id} produced a value of an unexpected type"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_resolve_runs_factory_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = Factory::blocking(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(5u32))
        });
        let registry = SingletonRegistry::new();

        let a = registry.resolve(&factory).unwrap();
        let b = registry.resolve(&factory).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_factories_distinct_values() {
        let registry = SingletonRegistry::new();
        let f1 = Factory::blocking(|| Ok(Arc::new(1u8)));
        let f2 = Factory::blocking(|| Ok(Arc::new(1u8)));

        let a = registry.resolve(&f1).unwrap();
        let b = registry.resolve(&f2).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(f1.id(), f2.id());
    }

    #[test]
    fn test_concurrent_first_resolution_converges() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = Factory::blocking(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            Ok(Arc::new(String::from("shared")))
        });
        let registry = Arc::new(SingletonRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let factory = factory.clone();
                thread::spawn(move || registry.resolve(&factory).unwrap())
            })
            .collect();
        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_failed_factory_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = Factory::blocking(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StorageError::backend("connection refused"))
            } else {
                Ok(Arc::new(7i64))
            }
        });
        let registry = SingletonRegistry::new();

        let err = registry.resolve(&factory).unwrap_err();
        assert!(matches!(
            err,
            CacheValueError::Cache {
                operation: CacheOperation::Resolve,
                ..
            }
        ));
        assert!(registry.is_empty());
        assert_eq!(*registry.resolve(&factory).unwrap(), 7);
    }

    #[test]
    fn test_factory_configuration_error_propagates() {
        let factory: Factory<Arc<u8>> =
            Factory::blocking(|| Err(StorageError::Configuration("missing url".into())));
        let err = SingletonRegistry::new().resolve(&factory).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_blocking_resolve_rejects_suspending_factory() {
        let factory = Factory::suspending(|| async { Ok(Arc::new(1u8)) });
        let err = SingletonRegistry::new().resolve(&factory).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_clear_forgets_values() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = Factory::blocking(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(()))
        });
        let registry = SingletonRegistry::new();
        registry.resolve(&factory).unwrap();
        registry.clear();
        registry.resolve(&factory).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_async_uniform_for_both_flavors() {
        let registry = SingletonRegistry::new();
        let blocking = Factory::blocking(|| Ok(Arc::new(String::from("sync"))));
        let suspending = Factory::suspending(|| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Arc::new(String::from("async")))
        });

        assert_eq!(
            registry.resolve_async(&blocking).await.unwrap().as_str(),
            "sync"
        );
        assert_eq!(
            registry.resolve_async(&suspending).await.unwrap().as_str(),
            "async"
        );
    }

    #[tokio::test]
    async fn test_concurrent_async_resolution_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = Factory::suspending(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(Arc::new(99u64))
            }
        });
        let registry = Arc::new(SingletonRegistry::new());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let factory = factory.clone();
                tokio::spawn(async move { registry.resolve_async(&factory).await.unwrap() })
            })
            .collect();

        let mut values = Vec::new();
        for task in tasks {
            values.push(task.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocking_factory_from_async_tasks_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = Factory::blocking(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            Ok(Arc::new(String::from("pool")))
        });
        let registry = Arc::new(SingletonRegistry::new());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let factory = factory.clone();
                tokio::spawn(async move { registry.resolve_async(&factory).await.unwrap() })
            })
            .collect();

        let mut values = Vec::new();
        for task in tasks {
            values.push(task.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
