use std::time::{Duration, Instant};

/// A stored payload together with the moment it was written and how long it
/// may live.
///
/// Used by [`MemoryStorage`](crate::MemoryStorage) to enforce `expires_in`.
///
/// # Examples
///
/// ```
/// use cacheval_core::CacheEntry;
/// use std::time::Duration;
///
/// let entry = CacheEntry::new(vec![1u8, 2, 3], Some(Duration::from_secs(60)));
/// assert_eq!(entry.payload, vec![1, 2, 3]);
/// assert!(!entry.is_expired());
///
/// // No expiry means the entry lives until it is overwritten or removed
/// let entry = CacheEntry::new(vec![], None);
/// assert!(!entry.is_expired());
/// ```
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub inserted_at: Instant,
    pub expires_in: Option<Duration>,
}

impl CacheEntry {
    /// Creates a new entry stamped with `Instant::now()`.
    pub fn new(payload: Vec<u8>, expires_in: Option<Duration>) -> Self {
        Self {
            payload,
            inserted_at: Instant::now(),
            expires_in,
        }
    }

    /// Returns true once the entry's age reaches its `expires_in`.
    pub fn is_expired(&self) -> bool {
        match self.expires_in {
            Some(ttl) => self.inserted_at.elapsed() >= ttl,
            None => false,
        }
    }
}
