//! LRU + TTL cache keyed by wrapped tile id.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::tile_id::OverscaledTileId;

/// Identifies one slot in a cache bucket.
pub type EntryId = u64;

/// Called with every value the cache drops on its own: capacity eviction,
/// TTL expiry, replacement, [`filter`](TileCache::filter),
/// [`remove`](TileCache::remove) and [`reset`](TileCache::reset).
/// [`get_and_remove`](TileCache::get_and_remove) hands the value back instead.
pub type OnRemove<T> = Box<dyn FnMut(T) + Send>;

struct Entry<T> {
    entry_id: EntryId,
    id: OverscaledTileId,
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Bounded LRU store mapping a wrapped tile id to zero or more entries.
///
/// Entries are bucketed by [`OverscaledTileId::wrapped`], so copies of the
/// same tile in different world copies share a bucket. Lookups prefer the
/// entry whose id matches exactly and fall back to any other live entry in
/// the bucket; callers re-stamp the wrap on a fallback hit.
///
/// Entries added with an expiry disappear once it elapses, even when the
/// cache is under capacity. Expiry is checked lazily: read-only lookups skip
/// expired entries and every mutating call purges them (invoking the removal
/// callback). The cache runs no timer of its own. An owner that needs the
/// callback to fire on time must sleep until [`next_expiry`](Self::next_expiry)
/// and then call [`prune_expired`](Self::prune_expired).
///
/// After any method returns, [`len`](Self::len) is at most
/// [`max_size`](Self::max_size).
pub struct TileCache<T> {
    max_size: usize,
    buckets: HashMap<String, Vec<Entry<T>>>,
    /// Entry ids, least recently used first.
    order: VecDeque<(String, EntryId)>,
    next_entry_id: EntryId,
    on_remove: Option<OnRemove<T>>,
}

impl<T> TileCache<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            buckets: HashMap::new(),
            order: VecDeque::new(),
            next_entry_id: 1,
            on_remove: None,
        }
    }

    /// Set the callback invoked for dropped values.
    pub fn with_on_remove(mut self, on_remove: impl FnMut(T) + Send + 'static) -> Self {
        self.on_remove = Some(Box::new(on_remove));
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Insert `value` as the most recently used entry.
    ///
    /// An existing entry with the exact same id is replaced. With `expiry`,
    /// the entry is dropped once that much time has passed. Returns the slot
    /// id, usable with [`remove`](Self::remove); with a max size of zero the
    /// value is dropped immediately.
    ///
    /// The expiry is not enforced until the next mutation or
    /// [`prune_expired`](Self::prune_expired) call.
    pub fn add(&mut self, id: OverscaledTileId, value: T, expiry: Option<Duration>) -> EntryId {
        self.prune_expired();

        let key = id.wrapped().key();
        let existing = self
            .buckets
            .get(&key)
            .and_then(|bucket| bucket.iter().find(|e| e.id == id))
            .map(|e| e.entry_id);
        if let Some(entry_id) = existing {
            if let Some(old) = self.take_entry(&key, entry_id) {
                self.notify(old);
            }
        }

        let entry_id = self.next_entry_id;
        self.next_entry_id += 1;
        let now = Instant::now();
        self.buckets.entry(key.clone()).or_default().push(Entry {
            entry_id,
            id,
            value,
            expires_at: expiry.map(|ttl| now + ttl),
        });
        self.order.push_back((key, entry_id));
        trace!(tile = %id, entries = self.order.len(), "Tile cached");

        self.evict_to(self.max_size);
        entry_id
    }

    /// True if a live entry exists for `id` in any world copy.
    pub fn has(&self, id: &OverscaledTileId) -> bool {
        self.find(id).is_some()
    }

    /// Borrow the best live entry for `id` without changing recency.
    pub fn get(&self, id: &OverscaledTileId) -> Option<&T> {
        let (key, entry_id) = self.find(id)?;
        self.buckets
            .get(&key)?
            .iter()
            .find(|e| e.entry_id == entry_id)
            .map(|e| &e.value)
    }

    /// Id the best live entry for `id` was stored under.
    pub fn stored_id(&self, id: &OverscaledTileId) -> Option<OverscaledTileId> {
        let (key, entry_id) = self.find(id)?;
        self.buckets
            .get(&key)?
            .iter()
            .find(|e| e.entry_id == entry_id)
            .map(|e| e.id)
    }

    /// Take the best live entry for `id` out of the cache.
    ///
    /// The removal callback is not invoked; ownership moves to the caller.
    pub fn get_and_remove(&mut self, id: &OverscaledTileId) -> Option<T> {
        self.prune_expired();
        let (key, entry_id) = self.find(id)?;
        self.take_entry(&key, entry_id)
    }

    /// Remove one entry for `id`, invoking the removal callback.
    ///
    /// With `entry_id`, only that slot is removed. Otherwise the exact-id
    /// entry is preferred, then any entry in the bucket. Returns `false` if
    /// nothing matched.
    pub fn remove(&mut self, id: &OverscaledTileId, entry_id: Option<EntryId>) -> bool {
        self.prune_expired();
        let key = id.wrapped().key();
        let target = match entry_id {
            Some(entry_id) => Some(entry_id),
            None => self.find(id).map(|(_, entry_id)| entry_id),
        };
        let Some(entry_id) = target else {
            return false;
        };
        match self.take_entry(&key, entry_id) {
            Some(value) => {
                self.notify(value);
                true
            }
            None => false,
        }
    }

    /// Change the capacity, evicting the oldest entries past the new bound.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.prune_expired();
        self.evict_to(max_size);
    }

    /// Keep only values for which `keep` returns `true`.
    pub fn filter(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.prune_expired();
        let mut doomed = Vec::new();
        for (key, bucket) in &self.buckets {
            for entry in bucket {
                if !keep(&entry.value) {
                    doomed.push((key.clone(), entry.entry_id));
                }
            }
        }
        for (key, entry_id) in doomed {
            if let Some(value) = self.take_entry(&key, entry_id) {
                self.notify(value);
            }
        }
    }

    /// Drop every expired entry, invoking the removal callback. Returns how
    /// many were dropped.
    ///
    /// Owners drive this from [`next_expiry`](Self::next_expiry); until it
    /// runs, expired entries still count towards [`len`](Self::len).
    pub fn prune_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, EntryId)> = self
            .order
            .iter()
            .filter(|(key, entry_id)| {
                self.buckets
                    .get(key)
                    .and_then(|bucket| bucket.iter().find(|e| e.entry_id == *entry_id))
                    .is_some_and(|e| e.is_expired(now))
            })
            .cloned()
            .collect();
        let count = expired.len();
        for (key, entry_id) in expired {
            if let Some(value) = self.take_entry(&key, entry_id) {
                self.notify(value);
            }
        }
        if count > 0 {
            trace!(count, "Expired cached tiles dropped");
        }
        count
    }

    /// Earliest pending expiry, for callers that want to prune on a timer.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.buckets
            .values()
            .flatten()
            .filter_map(|e| e.expires_at)
            .min()
    }

    /// Drop everything, invoking the removal callback for each value.
    pub fn reset(&mut self) {
        let order = std::mem::take(&mut self.order);
        let mut buckets = std::mem::take(&mut self.buckets);
        for (key, entry_id) in order {
            let value = buckets.get_mut(&key).and_then(|bucket| {
                let index = bucket.iter().position(|e| e.entry_id == entry_id)?;
                Some(bucket.remove(index).value)
            });
            if let Some(value) = value {
                self.notify(value);
            }
        }
    }

    /// Ids of all entries, least recently used first.
    pub fn ids(&self) -> Vec<OverscaledTileId> {
        self.order
            .iter()
            .filter_map(|(key, entry_id)| {
                self.buckets
                    .get(key)?
                    .iter()
                    .find(|e| e.entry_id == *entry_id)
                    .map(|e| e.id)
            })
            .collect()
    }

    /// Best live entry for `id`: exact match first, else the oldest entry of
    /// another world copy.
    fn find(&self, id: &OverscaledTileId) -> Option<(String, EntryId)> {
        let now = Instant::now();
        let key = id.wrapped().key();
        let bucket = self.buckets.get(&key)?;
        let entry = bucket
            .iter()
            .find(|e| e.id == *id && !e.is_expired(now))
            .or_else(|| bucket.iter().find(|e| !e.is_expired(now)))?;
        Some((key, entry.entry_id))
    }

    fn take_entry(&mut self, key: &str, entry_id: EntryId) -> Option<T> {
        let bucket = self.buckets.get_mut(key)?;
        let index = bucket.iter().position(|e| e.entry_id == entry_id)?;
        let entry = bucket.remove(index);
        if bucket.is_empty() {
            self.buckets.remove(key);
        }
        if let Some(pos) = self.order.iter().position(|(_, id)| *id == entry_id) {
            self.order.remove(pos);
        }
        Some(entry.value)
    }

    fn evict_to(&mut self, max_size: usize) {
        while self.order.len() > max_size {
            let Some((key, entry_id)) = self.order.front().cloned() else {
                break;
            };
            match self.take_entry(&key, entry_id) {
                Some(value) => self.notify(value),
                None => {
                    self.order.pop_front();
                }
            }
        }
    }

    fn notify(&mut self, value: T) {
        if let Some(on_remove) = self.on_remove.as_mut() {
            on_remove(value);
        }
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let entries: usize = self.buckets.values().map(Vec::len).sum();
        assert_eq!(entries, self.order.len());
        for (key, entry_id) in &self.order {
            let bucket = self.buckets.get(key).expect("ordered key has a bucket");
            assert!(bucket.iter().any(|e| e.entry_id == *entry_id));
        }
        assert!(self.buckets.values().all(|bucket| !bucket.is_empty()));
    }
}

impl<T> fmt::Debug for TileCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("max_size", &self.max_size)
            .field("len", &self.order.len())
            .finish()
    }
}

impl<T> Drop for TileCache<T> {
    fn drop(&mut self) {
        self.reset();
    }
}
