//! Concurrency gates around the get-compute-set sequence.
//!
//! An open gate admits every caller at once, so concurrent misses on the
//! same key may each run the function; the last write wins. A serialized
//! gate admits one caller at a time per decorated function, which makes
//! "computed at most once per key" hold in-process.
//!
//! ```
//! use cacheval_core::Gate;
//!
//! let gate = Gate::serialized();
//! {
//!     let _permit = gate.enter();
//!     // get, compute, set
//! }
//! assert!(gate.is_serialized());
//! ```

use std::fmt;

/// Gate for blocking call paths.
pub enum Gate {
    Open,
    Serialized(parking_lot::Mutex<()>),
}

/// Held for the duration of one gated sequence.
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct GatePermit<'a> {
    _guard: Option<parking_lot::MutexGuard<'a, ()>>,
}

impl Gate {
    pub fn open() -> Self {
        Gate::Open
    }

    pub fn serialized() -> Self {
        Gate::Serialized(parking_lot::Mutex::new(()))
    }

    /// Picks [`Gate::Serialized`] when `serialize` is true.
    pub fn new(serialize: bool) -> Self {
        if serialize {
            Self::serialized()
        } else {
            Self::open()
        }
    }

    pub fn is_serialized(&self) -> bool {
        matches!(self, Gate::Serialized(_))
    }

    /// Blocks until the caller may proceed.
    pub fn enter(&self) -> GatePermit<'_> {
        GatePermit {
            _guard: match self {
                Gate::Open => None,
                Gate::Serialized(lock) => Some(lock.lock()),
            },
        }
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Open => f.write_str("Gate::Open"),
            Gate::Serialized(_) => f.write_str("Gate::Serialized"),
        }
    }
}

/// Gate for suspending call paths.
///
/// Waiting on a serialized gate suspends the task instead of blocking its
/// thread, and the permit may be held across `.await`.
pub enum AsyncGate {
    Open,
    Serialized(tokio::sync::Mutex<()>),
}

/// Held for the duration of one gated sequence.
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct AsyncGatePermit<'a> {
    _guard: Option<tokio::sync::MutexGuard<'a, ()>>,
}

impl AsyncGate {
    pub fn open() -> Self {
        AsyncGate::Open
    }

    pub fn serialized() -> Self {
        AsyncGate::Serialized(tokio::sync::Mutex::new(()))
    }

    pub fn new(serialize: bool) -> Self {
        if serialize {
            Self::serialized()
        } else {
            Self::open()
        }
    }

    pub fn is_serialized(&self) -> bool {
        matches!(self, AsyncGate::Serialized(_))
    }

    pub async fn enter(&self) -> AsyncGatePermit<'_> {
        AsyncGatePermit {
            _guard: match self {
                AsyncGate::Open => None,
                AsyncGate::Serialized(lock) => Some(lock.lock().await),
            },
        }
    }
}

impl fmt::Debug for AsyncGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncGate::Open => f.write_str("AsyncGate::Open"),
            AsyncGate::Serialized(_) => f.write_str("AsyncGate::Serialized"),
        }
    }
}
