//! Process-wide lookup of [`CacheStats`] by function name.
//!
//! Every cached function registers its counters here under its qualified
//! name the first time it is decorated.
//!
//! ```
//! use cacheval_core::{stats_registry, CacheStats};
//! use std::sync::Arc;
//!
//! let stats = Arc::new(CacheStats::new());
//! stats_registry::register("billing::invoice_total", Arc::clone(&stats));
//! stats.record_miss();
//!
//! let seen = stats_registry::get("billing::invoice_total").unwrap();
//! assert_eq!(seen.misses(), 1);
//! ```

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::CacheStats;

static STATS_REGISTRY: Lazy<RwLock<HashMap<String, Arc<CacheStats>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `stats` under `name`, replacing any previous registration.
pub fn register(name: &str, stats: Arc<CacheStats>) {
    STATS_REGISTRY.write().insert(name.to_string(), stats);
}

/// Returns the counters registered under `name`, or registers fresh ones.
pub fn get_or_register(name: &str) -> Arc<CacheStats> {
    if let Some(stats) = STATS_REGISTRY.read().get(name) {
        return Arc::clone(stats);
    }
    let mut registry = STATS_REGISTRY.write();
    Arc::clone(registry.entry(name.to_string()).or_default())
}

/// Snapshot of the counters registered under `name`.
pub fn get(name: &str) -> Option<CacheStats> {
    STATS_REGISTRY.read().get(name).map(|stats| (**stats).clone())
}

/// Live counters registered under `name`.
pub fn get_ref(name: &str) -> Option<Arc<CacheStats>> {
    STATS_REGISTRY.read().get(name).cloned()
}

pub fn list() -> Vec<String> {
    STATS_REGISTRY.read().keys().cloned().collect()
}

pub fn clear() {
    STATS_REGISTRY.write().clear();
}

/// Zeroes the counters under `name`; false when nothing is registered.
pub fn reset(name: &str) -> bool {
    match STATS_REGISTRY.read().get(name) {
        Some(stats) => {
            stats.reset();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_register_and_get() {
        let stats = Arc::new(CacheStats::new());
        register("registry_tests::a", Arc::clone(&stats));
        stats.record_hit();

        let snapshot = get("registry_tests::a").unwrap();
        assert_eq!(snapshot.hits(), 1);
        assert!(get("registry_tests::missing").is_none());
    }

    #[test]
    #[serial]
    fn test_get_or_register_shares_counters() {
        let first = get_or_register("registry_tests::shared");
        let second = get_or_register("registry_tests::shared");
        assert!(Arc::ptr_eq(&first, &second));

        first.record_miss();
        assert_eq!(get_ref("registry_tests::shared").unwrap().misses(), 1);
    }

    #[test]
    #[serial]
    fn test_reset() {
        let stats = get_or_register("registry_tests::reset");
        stats.record_hit();
        assert!(reset("registry_tests::reset"));
        assert_eq!(stats.hits(), 0);
        assert!(!reset("registry_tests::nonexistent"));
    }

    #[test]
    #[serial]
    fn test_list_and_clear() {
        clear();
        get_or_register("registry_tests::one");
        get_or_register("registry_tests::two");

        let names = list();
        assert!(names.contains(&"registry_tests::one".to_string()));
        assert!(names.contains(&"registry_tests::two".to_string()));

        clear();
        assert!(list().is_empty());
    }
}
