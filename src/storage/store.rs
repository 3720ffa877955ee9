//! Sharded in-memory key/value storage with per-key expiration.
//!
//! Keys are spread across a fixed set of `RwLock`-protected hash map shards,
//! so readers and writers touching different shards never contend. Values
//! are stored as [`Bytes`] and handed out by reference-counted clone.
//!
//! Expiration works in two layers. Every read path checks the entry's
//! deadline against the current time, and `get` removes an expired entry it
//! trips over, so a dead key is never observable no matter what the
//! background sweeper is doing. Independently, each TTL write records its
//! deadline in a shared ordered index that the sweeper drains via
//! [`Store::purge_due`], reclaiming memory for keys nobody reads again.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Number of independent shards keys are distributed across.
const NUM_SHARDS: usize = 64;

/// A stored value and its optional expiration deadline.
#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Thread-safe sharded key/value store.
///
/// All operations take `&self`; the store is designed to sit behind an
/// `Arc` shared by every connection task and the expiry sweeper.
pub struct Store {
    shards: Vec<RwLock<HashMap<String, Entry>>>,
    /// Expiration deadlines ordered soonest-first. The `u64` disambiguates
    /// writes that share an instant, so no deadline ever overwrites another.
    deadlines: Mutex<BTreeMap<(Instant, u64), String>>,
    next_deadline_id: AtomicU64,
    /// Signalled when a new soonest deadline is recorded.
    waker: Notify,
}

impl Store {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Store {
            shards,
            deadlines: Mutex::new(BTreeMap::new()),
            next_deadline_id: AtomicU64::new(0),
            waker: Notify::new(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &str) -> &RwLock<HashMap<String, Entry>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % NUM_SHARDS;
        &self.shards[index]
    }

    /// Inserts or replaces a value.
    ///
    /// A `ttl` of `Some(d)` arms expiration `d` from now; `None` stores the
    /// key without a deadline, clearing any deadline a previous write armed.
    pub fn set(&self, key: String, value: Bytes, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| {
            Instant::now()
                .checked_add(ttl)
                // tokio's private Instant::far_future(): roughly 30 years out.
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86400 * 365 * 30))
        });
        let deadline = expires_at.map(|when| (when, key.clone()));

        {
            let mut shard = self.shard_for(&key).write().unwrap();
            shard.insert(key, Entry { value, expires_at });
        }

        // The shard lock is released before the deadline index is touched;
        // purge_due acquires the two in the opposite order.
        if let Some((when, key)) = deadline {
            self.record_deadline(when, key);
        }
    }

    /// Returns the live value for `key`, removing it if it has expired.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let shard = self.shard_for(key);

        {
            let guard = shard.read().unwrap();
            match guard.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Expired under the read lock: re-check under the write lock, since
        // another writer may have replaced the entry in between.
        let mut guard = shard.write().unwrap();
        let expired = guard.get(key).map_or(false, |entry| entry.is_expired(now));
        if expired {
            guard.remove(key);
            return None;
        }
        guard.get(key).map(|entry| entry.value.clone())
    }

    /// Removes `key`, reporting whether a live entry was deleted.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut guard = self.shard_for(key).write().unwrap();
        match guard.remove(key) {
            Some(entry) => !entry.is_expired(now),
            None => false,
        }
    }

    /// Reports whether `key` holds a live entry. Never mutates the shard.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        let guard = self.shard_for(key).read().unwrap();
        guard.get(key).map_or(false, |entry| !entry.is_expired(now))
    }

    /// Returns every live key matched by `pattern`.
    ///
    /// Patterns support a single `*` wildcard at one end: `*` alone matches
    /// everything, a leading `*` matches by suffix, a trailing `*` matches
    /// by prefix, and anything else is an exact comparison. When both ends
    /// carry a star the leading one wins. Order of the result is undefined.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let pattern = KeyPattern::parse(pattern);
        let now = Instant::now();
        let mut matched = Vec::new();
        for shard in &self.shards {
            let guard = shard.read().unwrap();
            for (key, entry) in guard.iter() {
                if !entry.is_expired(now) && pattern.matches(key) {
                    matched.push(key.clone());
                }
            }
        }
        matched
    }

    /// Removes every key and every pending deadline.
    pub fn flush(&self) {
        for shard in &self.shards {
            shard.write().unwrap().clear();
        }
        self.deadlines.lock().unwrap().clear();
    }

    /// Number of live keys across all shards.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                let guard = shard.read().unwrap();
                guard.values().filter(|entry| !entry.is_expired(now)).count()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_deadline(&self, when: Instant, key: String) {
        let id = self.next_deadline_id.fetch_add(1, Ordering::Relaxed);
        let mut deadlines = self.deadlines.lock().unwrap();
        let is_soonest = deadlines
            .first_key_value()
            .map_or(true, |(&(soonest, _), _)| when < soonest);
        deadlines.insert((when, id), key);
        drop(deadlines);

        if is_soonest {
            self.waker.notify_one();
        }
    }

    /// Removes every entry whose recorded deadline is at or before `now`.
    ///
    /// Returns how many entries were removed and the soonest deadline still
    /// pending, if any. A popped deadline only removes the entry when the
    /// entry still carries that exact deadline; a key rewritten since the
    /// deadline was recorded is left alone.
    pub(crate) fn purge_due(&self, now: Instant) -> (usize, Option<Instant>) {
        let mut removed = 0;
        loop {
            let mut deadlines = self.deadlines.lock().unwrap();
            match deadlines.first_key_value() {
                None => return (removed, None),
                Some((&(when, _), _)) if when > now => return (removed, Some(when)),
                Some(_) => {}
            }
            let ((when, _), key) = match deadlines.pop_first() {
                Some(front) => front,
                None => return (removed, None),
            };
            drop(deadlines);

            let mut shard = self.shard_for(&key).write().unwrap();
            let due = shard
                .get(&key)
                .map_or(false, |entry| entry.expires_at == Some(when));
            if due {
                shard.remove(&key);
                removed += 1;
            }
        }
    }

    /// Notified whenever a write arms a deadline sooner than all pending ones.
    pub(crate) fn expiry_waker(&self) -> &Notify {
        &self.waker
    }

    /// Raw entry count including expired-but-unreclaimed entries.
    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap().len())
            .sum()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed KEYS pattern.
enum KeyPattern {
    All,
    Prefix(String),
    Suffix(String),
    Exact(String),
}

impl KeyPattern {
    fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            KeyPattern::All
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            KeyPattern::Suffix(suffix.to_string())
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            KeyPattern::Prefix(prefix.to_string())
        } else {
            KeyPattern::Exact(pattern.to_string())
        }
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::All => true,
            KeyPattern::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyPattern::Suffix(suffix) => key.ends_with(suffix.as_str()),
            KeyPattern::Exact(exact) => key == exact.as_str(),
        }
    }
}
