use crate::Mutex;
use foldhash::fast::{FixedState, RandomState};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

/// Outcome of a publish attempt on the map.
pub enum Publish<V> {
    /// The key was absent and the candidate is now the published value.
    Inserted(V),
    /// Another value was already published for the key. The candidate is
    /// handed back so the caller can recycle it.
    Lost { published: V, candidate: V },
}

/// A thread-safe hashmap shard.
///
/// This struct wraps a `HashMap` protected by a futex [`Mutex`] to ensure
/// thread safety.
pub struct ShardMap<K, V> {
    /// The underlying hashmap protected by a `Mutex`.
    map: Mutex<HashMap<K, V, RandomState>>,
}

impl<K, V> ShardMap<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new `ShardMap` with the specified initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::with_capacity_and_hasher(
                capacity,
                RandomState::default(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Returns a clone of the published value for `key`, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.map.lock().get(key).cloned()
    }

    /// Inserts `candidate` if `key` is still absent, in one critical section.
    ///
    /// # Returns
    ///
    /// [`Publish::Inserted`] with a clone of the now-published candidate, or
    /// [`Publish::Lost`] carrying both the value that was already published
    /// and the rejected candidate.
    pub fn publish_if_absent(&self, key: K, candidate: V) -> Publish<V>
    where
        V: Clone,
    {
        let mut map = self.map.lock();
        match map.get(&key) {
            Some(published) => Publish::Lost {
                published: published.clone(),
                candidate,
            },
            None => {
                map.insert(key, candidate.clone());
                Publish::Inserted(candidate)
            }
        }
    }

    /// Same as [`ShardMap::publish_if_absent`], but the key is only
    /// materialized from the borrowed form when the insert actually happens.
    pub fn publish_if_absent_by_ref<Q>(&self, key: &Q, candidate: V) -> Publish<V>
    where
        K: Borrow<Q> + for<'c> From<&'c Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        let mut map = self.map.lock();
        match map.get(key) {
            Some(published) => Publish::Lost {
                published: published.clone(),
                candidate,
            },
            None => {
                map.insert(key.into(), candidate.clone());
                Publish::Inserted(candidate)
            }
        }
    }

    /// Removes `key` and returns the previously published value, if any.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.map.lock().remove(key)
    }

    /// Copies the shard's current entries.
    ///
    /// The copy is taken under the shard lock, so every pair is a validly
    /// published entry; the lock is released before the caller looks at them.
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.map
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A collection of `ShardMap` instances, providing sharded access to a hashmap.
pub struct ShardsMap<K, V> {
    /// The vector of `ShardMap` instances.
    shards: Vec<ShardMap<K, V>>,
}

impl<K, V> ShardsMap<K, V>
where
    K: Eq + Hash,
{
    /// Creates a new `ShardsMap` with the specified capacity and number of shards.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The total initial capacity of the hashmap.
    /// * `shard_amount` - The number of shards to create.
    pub fn with_capacity_and_shard_amount(capacity: usize, shard_amount: usize) -> Self {
        let shard_capacity = capacity / shard_amount;
        Self {
            shards: (0..shard_amount)
                .map(|_| ShardMap::with_capacity(shard_capacity))
                .collect::<Vec<_>>(),
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns a clone of the published value for `key`, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.shard(key).get(key)
    }

    /// Atomically inserts `candidate` if `key` is absent.
    ///
    /// Only the owning shard is locked; operations on keys that hash to other
    /// shards proceed concurrently.
    pub fn publish_if_absent(&self, key: K, candidate: V) -> Publish<V>
    where
        V: Clone,
    {
        self.shard(&key).publish_if_absent(key, candidate)
    }

    /// Atomically inserts `candidate` if `key` is absent, cloning the key
    /// from its borrowed form only on insertion.
    pub fn publish_if_absent_by_ref<Q>(&self, key: &Q, candidate: V) -> Publish<V>
    where
        K: Borrow<Q> + for<'c> From<&'c Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.shard(key).publish_if_absent_by_ref(key, candidate)
    }

    /// Removes `key` and returns the previously published value, if any.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.shard(key).remove(key)
    }

    /// Copies the entries of the shard at `idx`.
    pub fn snapshot(&self, idx: usize) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.shards[idx].snapshot()
    }

    #[inline(always)]
    fn shard<Q>(&self, key: &Q) -> &ShardMap<K, V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let idx = FixedState::default().hash_one(key) as usize % self.shards.len();
        &self.shards[idx]
    }
}
