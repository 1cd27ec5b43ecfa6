//! # Shared Async Storage Example
//!
//! Several functions bound to one storage whose factory connects
//! asynchronously. The factory runs once, however many functions and
//! concurrent callers use it, and `serialize = true` keeps concurrent
//! callers from computing the same report twice.

use cacheval_async::{
    async_cache_value, async_trait, AsyncMemoryStorage, AsyncStorage, AsyncStorageFactory,
    CacheResult, StorageResult,
};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Stands in for a remote key-value store.
struct RemoteStore {
    inner: AsyncMemoryStorage,
}

impl RemoteStore {
    async fn connect(url: &str) -> StorageResult<Self> {
        println!("Connecting to {}", url);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Self {
            inner: AsyncMemoryStorage::new(),
        })
    }
}

#[async_trait]
impl AsyncStorage for RemoteStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        println!("  GET {}", key);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, expires_in: Option<Duration>) -> StorageResult<()> {
        println!("  SET {} ({} bytes)", key, value.len());
        self.inner.set(key, value, expires_in).await
    }
}

static CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

static REMOTE: Lazy<AsyncStorageFactory> = Lazy::new(|| {
    AsyncStorageFactory::suspending(|| async {
        CONNECTIONS.fetch_add(1, Ordering::SeqCst);
        RemoteStore::connect("kv://cache.internal:7000")
            .await
            .map(|store| Arc::new(store) as Arc<dyn AsyncStorage>)
    })
});

fn remote() -> AsyncStorageFactory {
    REMOTE.clone()
}

static REPORTS: AtomicUsize = AtomicUsize::new(0);

#[async_cache_value(storage = remote, serialize = true, expires_in = 300)]
async fn daily_report(day: u32) -> Vec<String> {
    REPORTS.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    vec![format!("day {}", day), "all systems nominal".to_string()]
}

#[async_cache_value(storage = remote)]
async fn owner(team: &str) -> String {
    format!("{}-lead", team)
}

#[tokio::main]
async fn main() -> CacheResult<()> {
    println!("=== Shared Async Storage Example ===\n");

    let tasks: Vec<_> = (0..5)
        .map(|_| tokio::spawn(async { daily_report(42).await }))
        .collect();
    for task in tasks {
        let report = task.await.expect("task panicked")?;
        println!("Report: {:?}", report);
    }

    println!("Owner: {}", owner("storage").await?);
    println!("Owner: {}", owner("storage").await?);

    println!("\nConnections opened: {} (expected 1)", CONNECTIONS.load(Ordering::SeqCst));
    println!("Reports computed:   {} (expected 1)", REPORTS.load(Ordering::SeqCst));

    println!("\n✅ Shared async storage example completed!");
    Ok(())
}
