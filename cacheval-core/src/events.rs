//! Structured hit/miss/store notifications.

use crate::error::CacheValueError;
use crate::identity::FunctionIdentity;
use crate::keys::CallKey;
use std::sync::Arc;

#[cfg(feature = "stats")]
use crate::CacheStats;

/// What happened to one cached call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheEvent<'a> {
    /// The value was decoded from storage; the function did not run.
    Hit {
        function: &'a FunctionIdentity,
        key: &'a CallKey,
    },
    /// Nothing was stored under the key; the function is about to run.
    Miss {
        function: &'a FunctionIdentity,
        key: &'a CallKey,
    },
    /// A freshly computed value was written to storage.
    Stored {
        function: &'a FunctionIdentity,
        key: &'a CallKey,
    },
}

impl<'a> CacheEvent<'a> {
    pub fn function(&self) -> &'a FunctionIdentity {
        match self {
            CacheEvent::Hit { function, .. }
            | CacheEvent::Miss { function, .. }
            | CacheEvent::Stored { function, .. } => function,
        }
    }

    pub fn key(&self) -> &'a CallKey {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key, .. }
            | CacheEvent::Stored { key, .. } => key,
        }
    }
}

/// Callback invoked synchronously, inside the gate, for every [`CacheEvent`].
pub type EventHook = Arc<dyn Fn(&CacheEvent<'_>) + Send + Sync>;

/// Fans one decorated function's outcomes out to tracing, its hook and its
/// stats.
pub(crate) struct CallObserver {
    identity: FunctionIdentity,
    hook: Option<EventHook>,
    #[cfg(feature = "stats")]
    stats: Arc<CacheStats>,
}

impl CallObserver {
    pub(crate) fn new(identity: FunctionIdentity, hook: Option<EventHook>) -> Self {
        Self {
            #[cfg(feature = "stats")]
            stats: crate::stats_registry::get_or_register(identity.name()),
            identity,
            hook,
        }
    }

    pub(crate) fn identity(&self) -> &FunctionIdentity {
        &self.identity
    }

    #[cfg(feature = "stats")]
    pub(crate) fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    pub(crate) fn hit(&self, key: &CallKey) {
        tracing::debug!(function = %self.identity, key = %key, "cache hit");
        #[cfg(feature = "stats")]
        self.stats.record_hit();
        self.emit(CacheEvent::Hit {
            function: &self.identity,
            key,
        });
    }

    pub(crate) fn miss(&self, key: &CallKey) {
        tracing::debug!(function = %self.identity, key = %key, "cache miss");
        #[cfg(feature = "stats")]
        self.stats.record_miss();
        self.emit(CacheEvent::Miss {
            function: &self.identity,
            key,
        });
    }

    pub(crate) fn stored(&self, key: &CallKey) {
        tracing::debug!(function = %self.identity, key = %key, "cache store");
        #[cfg(feature = "stats")]
        self.stats.record_store();
        self.emit(CacheEvent::Stored {
            function: &self.identity,
            key,
        });
    }

    /// Logs `err` and passes it on in the caller's error type.
    pub(crate) fn failed<E: From<CacheValueError>>(&self, err: CacheValueError) -> E {
        tracing::warn!(function = %self.identity, error = %err, "cached call failed");
        #[cfg(feature = "stats")]
        self.stats.record_failure();
        E::from(err)
    }

    fn emit(&self, event: CacheEvent<'_>) {
        if let Some(hook) = &self.hook {
            hook(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{CallArgs, TypeEncoders};
    use parking_lot::Mutex;

    #[test]
    fn test_event_accessors() {
        let identity = FunctionIdentity::new("events::f");
        let key = CallKey::derive(&identity, &CallArgs::new(), &TypeEncoders::new()).unwrap();
        let event = CacheEvent::Stored {
            function: &identity,
            key: &key,
        };
        assert_eq!(event.function().name(), "events::f");
        assert_eq!(event.key(), &key);
    }

    #[test]
    fn test_observer_forwards_to_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: EventHook = Arc::new(move |event: &CacheEvent<'_>| {
            let label = match event {
                CacheEvent::Hit { .. } => "hit",
                CacheEvent::Miss { .. } => "miss",
                CacheEvent::Stored { .. } => "stored",
            };
            sink.lock().push(label);
        });

        let identity = FunctionIdentity::new("events::observed");
        let key = CallKey::derive(&identity, &CallArgs::new(), &TypeEncoders::new()).unwrap();
        let observer = CallObserver::new(identity, Some(hook));
        observer.miss(&key);
        observer.stored(&key);
        observer.hit(&key);

        assert_eq!(*seen.lock(), vec!["miss", "stored", "hit"]);
    }

    #[test]
    fn test_failed_converts_error() {
        let observer = CallObserver::new(FunctionIdentity::new("events::failing"), None);
        let err: CacheValueError = observer.failed(CacheValueError::Configuration("x".into()));
        assert!(err.is_configuration());
    }
}
