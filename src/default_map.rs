use crate::{Pool, Publish, ShardsMap};
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};

/// Returns the default number of shards to use for the `DefaultMap`.
fn default_shard_amount() -> usize {
    static DEFAULT_SHARD_AMOUNT: OnceLock<usize> = OnceLock::new();
    *DEFAULT_SHARD_AMOUNT.get_or_init(|| {
        (std::thread::available_parallelism().map_or(1, usize::from) * 4).next_power_of_two()
    })
}

/// A thread-safe map that creates, publishes and returns a default value when
/// a missing key is read.
///
/// Values are produced by the generator given at construction and handed out
/// as [`Arc`] handles. Once a key is published its handle never changes; the
/// binding only goes away through [`DefaultMap::delete`] or
/// [`DefaultMap::load_and_delete`]. There is no way to store a different
/// value under an existing key: all mutation happens through the returned
/// handle (atomics, or a lock the value carries itself).
pub struct DefaultMap<K, V> {
    map: ShardsMap<K, Arc<V>>,
    pool: Arc<Pool<V>>,
}

impl<K: Eq + Hash, V> DefaultMap<K, V> {
    /// Creates a new `DefaultMap` whose defaults come from `generator`.
    ///
    /// The generator may be called from any thread, and may be called more
    /// often than there are keys: a value constructed for a lost publish
    /// race is recycled, not published.
    ///
    /// # Examples
    /// ```
    /// use defaultdict::DefaultMap;
    /// use std::sync::atomic::{AtomicI64, Ordering};
    ///
    /// let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));
    /// map.get("hits".to_string()).fetch_add(1, Ordering::AcqRel);
    /// assert_eq!(map.get("hits".to_string()).load(Ordering::Acquire), 1);
    /// ```
    pub fn new<G>(generator: G) -> Self
    where
        G: Fn() -> V + Send + Sync + 'static,
    {
        Self::with_shared_pool(Arc::new(Pool::new(generator)))
    }

    /// Creates a new `DefaultMap` with the specified initial capacity and the
    /// default number of shards.
    pub fn with_capacity<G>(generator: G, capacity: usize) -> Self
    where
        G: Fn() -> V + Send + Sync + 'static,
    {
        Self {
            map: ShardsMap::with_capacity_and_shard_amount(capacity, default_shard_amount()),
            pool: Arc::new(Pool::new(generator)),
        }
    }

    /// Creates a new `DefaultMap` with the specified initial capacity and
    /// number of shards.
    pub fn with_capacity_and_shard_amount<G>(
        generator: G,
        capacity: usize,
        shard_amount: usize,
    ) -> Self
    where
        G: Fn() -> V + Send + Sync + 'static,
    {
        Self {
            map: ShardsMap::with_capacity_and_shard_amount(capacity, shard_amount),
            pool: Arc::new(Pool::new(generator)),
        }
    }

    /// Creates a new `DefaultMap` drawing its defaults from an existing pool.
    ///
    /// Maps built over the same pool recycle discarded candidates between
    /// each other. [`shared_pool_map_generator`] uses this to give every
    /// inner map of a nested layout one shared pool.
    pub fn with_shared_pool(pool: Arc<Pool<V>>) -> Self {
        Self {
            map: ShardsMap::with_capacity_and_shard_amount(0, default_shard_amount()),
            pool,
        }
    }

    /// Returns the value for `key`, creating and publishing a default if the
    /// key is absent.
    ///
    /// Same as [`DefaultMap::load`], just without the bool return.
    pub fn get(&self, key: K) -> Arc<V> {
        self.load(key).0
    }

    /// Returns the value for `key` and whether the key already existed.
    ///
    /// A `false` return means the handle is the freshly published default for
    /// this key. Concurrent `load`s of the same absent key all return the
    /// same handle, and exactly one of them observes `false`.
    ///
    /// If the key is absent, the candidate default is constructed before any
    /// shard lock is taken, so a slow generator never stalls operations on
    /// other keys.
    ///
    /// # Examples
    /// ```
    /// use defaultdict::DefaultMap;
    /// use std::sync::atomic::AtomicI64;
    ///
    /// let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));
    /// let (_, existed) = map.load("key".to_string());
    /// assert!(!existed);
    /// let (_, existed) = map.load("key".to_string());
    /// assert!(existed);
    /// ```
    pub fn load(&self, key: K) -> (Arc<V>, bool) {
        if let Some(value) = self.map.get(&key) {
            return (value, true);
        }
        let candidate = self.pool.acquire();
        match self.map.publish_if_absent(key, candidate) {
            Publish::Inserted(value) => (value, false),
            Publish::Lost {
                published,
                candidate,
            } => {
                self.pool.release(candidate);
                (published, true)
            }
        }
    }

    /// Returns the value for `key`, creating and publishing a default if the
    /// key is absent. The key is only cloned out of its borrowed form when
    /// the insert actually happens.
    ///
    /// # Examples
    /// ```
    /// use defaultdict::DefaultMap;
    /// use std::sync::atomic::{AtomicI64, Ordering};
    ///
    /// let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));
    /// map.get_by_ref("hits").fetch_add(1, Ordering::AcqRel);
    /// assert_eq!(map.get_by_ref("hits").load(Ordering::Acquire), 1);
    /// ```
    pub fn get_by_ref<Q>(&self, key: &Q) -> Arc<V>
    where
        K: Borrow<Q> + for<'c> From<&'c Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.load_by_ref(key).0
    }

    /// Returns the value for `key` and whether the key already existed,
    /// cloning the key out of its borrowed form only on insertion.
    pub fn load_by_ref<Q>(&self, key: &Q) -> (Arc<V>, bool)
    where
        K: Borrow<Q> + for<'c> From<&'c Q>,
        Q: Eq + Hash + ?Sized,
    {
        if let Some(value) = self.map.get(key) {
            return (value, true);
        }
        let candidate = self.pool.acquire();
        match self.map.publish_if_absent_by_ref(key, candidate) {
            Publish::Inserted(value) => (value, false),
            Publish::Lost {
                published,
                candidate,
            } => {
                self.pool.release(candidate);
                (published, true)
            }
        }
    }

    /// Atomically removes `key` and returns its value.
    ///
    /// If the key was present, returns the previously published handle and
    /// `true`. If it was absent, returns a freshly constructed default and
    /// `false`; that value is NOT published, so a later
    /// [`DefaultMap::get`] of the same key still creates its own default.
    ///
    /// # Examples
    /// ```
    /// use defaultdict::DefaultMap;
    /// use std::sync::atomic::AtomicI64;
    ///
    /// let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));
    /// map.get("key".to_string());
    /// let (_, existed) = map.load_and_delete("key");
    /// assert!(existed);
    /// let (_, existed) = map.load_and_delete("key");
    /// assert!(!existed);
    /// ```
    pub fn load_and_delete<Q>(&self, key: &Q) -> (Arc<V>, bool)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        match self.map.remove(key) {
            Some(value) => (value, true),
            None => (self.pool.acquire(), false),
        }
    }

    /// Removes `key` from the map. Idempotent: removing an absent key is a
    /// no-op.
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let _ = self.map.remove(key);
    }

    /// Visits the map's entries in unspecified order, stopping early if
    /// `visit` returns `false`.
    ///
    /// The traversal is weakly consistent: entries inserted or removed while
    /// it runs may or may not be observed, but every visited pair is a
    /// validly published entry and no key is visited twice. `visit` runs
    /// without any shard lock held, so it may freely call back into the map.
    ///
    /// # Examples
    /// ```
    /// use defaultdict::DefaultMap;
    /// use std::sync::atomic::{AtomicI64, Ordering};
    ///
    /// let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));
    /// map.get_by_ref("a").store(1, Ordering::Release);
    /// map.get_by_ref("b").store(2, Ordering::Release);
    ///
    /// let mut total = 0;
    /// map.range(|_, value| {
    ///     total += value.load(Ordering::Acquire);
    ///     true
    /// });
    /// assert_eq!(total, 3);
    /// ```
    pub fn range<F>(&self, mut visit: F)
    where
        K: Clone,
        F: FnMut(&K, &Arc<V>) -> bool,
    {
        for idx in 0..self.map.shard_count() {
            for (key, value) in self.map.snapshot(idx) {
                if !visit(&key, &value) {
                    return;
                }
            }
        }
    }

    /// Returns a lazy, pull-style view over the map's entries, with the same
    /// weak-consistency guarantees as [`DefaultMap::range`].
    ///
    /// The view is restartable: call `iter` again for a new traversal.
    pub fn iter(&self) -> Iter<'_, K, V>
    where
        K: Clone,
    {
        Iter {
            map: &self.map,
            shard_idx: 0,
            entries: Vec::new().into_iter(),
        }
    }

    /// Returns the number of currently published keys.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// A lazy view over a [`DefaultMap`]'s entries, created by
/// [`DefaultMap::iter`].
///
/// Walks the map shard by shard, copying one shard's entries under its lock
/// and draining them before moving on. Mutations that land in a shard after
/// it was copied are not observed by this traversal.
pub struct Iter<'a, K, V> {
    map: &'a ShardsMap<K, Arc<V>>,
    shard_idx: usize,
    entries: std::vec::IntoIter<(K, Arc<V>)>,
}

impl<K, V> Iterator for Iter<'_, K, V>
where
    K: Eq + Hash + Clone,
{
    type Item = (K, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entries.next() {
                return Some(entry);
            }
            if self.shard_idx == self.map.shard_count() {
                return None;
            }
            self.entries = self.map.snapshot(self.shard_idx).into_iter();
            self.shard_idx += 1;
        }
    }
}

/// Builds a generator whose product is itself a [`DefaultMap`], for nested
/// layouts like `outer.get(key1).get(key2)`.
///
/// Exactly one recycling pool is created per call, and every map produced by
/// the returned generator shares it for its own (leaf) entries. The naive
/// alternative of `|| DefaultMap::new(leaf_generator)` gives every inner map
/// an independent pool, which multiplies allocations and loses candidate
/// reuse across sibling maps. Maps from two separate
/// `shared_pool_map_generator` calls do not share a pool, even with equal
/// leaf generators.
///
/// # Examples
/// ```
/// use defaultdict::{shared_pool_map_generator, DefaultMap};
/// use std::sync::atomic::{AtomicI64, Ordering};
///
/// let generator = shared_pool_map_generator::<String, _, _>(|| AtomicI64::new(0));
/// let map = DefaultMap::<String, DefaultMap<String, AtomicI64>>::new(generator);
/// map.get_by_ref("outer").get_by_ref("inner").fetch_add(1, Ordering::AcqRel);
/// assert_eq!(
///     map.get_by_ref("outer").get_by_ref("inner").load(Ordering::Acquire),
///     1
/// );
/// ```
pub fn shared_pool_map_generator<K, V, G>(
    leaf_generator: G,
) -> impl Fn() -> DefaultMap<K, V> + Clone + Send + Sync + 'static
where
    K: Eq + Hash + 'static,
    V: Send + Sync + 'static,
    G: Fn() -> V + Send + Sync + 'static,
{
    let pool = Arc::new(Pool::new(leaf_generator));
    move || DefaultMap::with_shared_pool(pool.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn inc_and_check(value: &AtomicI64, want: i64) {
        assert_eq!(value.fetch_add(1, Ordering::AcqRel) + 1, want);
    }

    #[test]
    fn test_default_map_semantics() {
        const KEY: &str = "foo";
        let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));

        let (value, existed) = map.load_and_delete(KEY);
        assert!(!existed, "load_and_delete of an absent key must report false");
        inc_and_check(&value, 1);

        let (value, existed) = map.load(KEY.to_string());
        assert!(!existed, "first load of a key must report false");
        inc_and_check(&value, 1);
        let (value, existed) = map.load(KEY.to_string());
        assert!(existed, "second load of a key must report true");
        inc_and_check(&value, 2);
        inc_and_check(&map.get(KEY.to_string()), 3);

        map.delete(KEY);
        inc_and_check(&map.get(KEY.to_string()), 1);

        let mut got = HashMap::new();
        map.range(|key, value| {
            got.insert(key.clone(), value.load(Ordering::Acquire));
            true
        });
        assert_eq!(got.len(), 1);
        assert_eq!(got[KEY], 1);
    }

    #[test]
    fn test_identity_stable() {
        let map = DefaultMap::<u32, AtomicI64>::new(|| AtomicI64::new(0));

        let (first, existed) = map.load(1);
        assert!(!existed);
        assert!(Arc::ptr_eq(&first, &map.get(1)));
        let (again, existed) = map.load(1);
        assert!(existed);
        assert!(Arc::ptr_eq(&first, &again));

        // Deletion severs the binding; re-creation yields a new identity.
        map.delete(&1);
        let fresh = map.get(1);
        assert!(!Arc::ptr_eq(&first, &fresh));
    }

    #[test]
    fn test_load_and_delete_present() {
        let map = DefaultMap::<u32, AtomicI64>::new(|| AtomicI64::new(0));

        let published = map.get(5);
        published.fetch_add(3, Ordering::AcqRel);

        let (value, existed) = map.load_and_delete(&5);
        assert!(existed);
        assert!(Arc::ptr_eq(&published, &value));
        assert_eq!(value.load(Ordering::Acquire), 3);
        assert!(map.is_empty());
    }

    #[test]
    fn test_load_and_delete_absent_stays_unpublished() {
        let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));

        let (throwaway, existed) = map.load_and_delete("nope");
        assert!(!existed);
        throwaway.fetch_add(10, Ordering::AcqRel);
        assert!(map.is_empty());

        // The throwaway was never published: a later get creates a fresh default.
        let value = map.get("nope".to_string());
        assert!(!Arc::ptr_eq(&throwaway, &value));
        assert_eq!(value.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_by_ref_api() {
        let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));

        let (value, existed) = map.load_by_ref("alpha");
        assert!(!existed);
        assert!(Arc::ptr_eq(&value, &map.get_by_ref("alpha")));
        let (value, existed) = map.load_by_ref("alpha");
        assert!(existed);
        assert!(Arc::ptr_eq(&value, &map.get_by_ref("alpha")));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_load_race_single_winner() {
        const M: usize = 16;
        let map = Arc::new(DefaultMap::<u32, AtomicI64>::new(|| AtomicI64::new(0)));
        let barrier = Arc::new(Barrier::new(M));

        let threads = (0..M)
            .map(|_| {
                let map = map.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    map.load(7)
                })
            })
            .collect::<Vec<_>>();
        let results = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .collect::<Vec<_>>();

        let winners = results.iter().filter(|(_, existed)| !existed).count();
        assert_eq!(winners, 1, "exactly one loader must publish the default");
        let (first, _) = &results[0];
        assert!(results.iter().all(|(value, _)| Arc::ptr_eq(value, first)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_counter_per_key() {
        let map = Arc::new(DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0)));

        let mut threads = vec![];
        for i in 1..=9 {
            for _ in 0..i {
                let map = map.clone();
                threads.push(std::thread::spawn(move || {
                    map.get(format!("key-{i}")).fetch_add(1, Ordering::AcqRel);
                }));
            }
        }
        threads.into_iter().for_each(|t| t.join().unwrap());

        let mut got = HashMap::new();
        map.range(|key, value| {
            got.insert(key.clone(), value.load(Ordering::Acquire));
            true
        });
        assert_eq!(got.len(), 9);
        for i in 1..=9i64 {
            assert_eq!(got[&format!("key-{i}")], i);
        }
    }

    #[test]
    fn test_nested_counters() {
        let generator = shared_pool_map_generator::<String, _, _>(|| AtomicI64::new(0));
        let map = Arc::new(DefaultMap::<String, DefaultMap<String, AtomicI64>>::new(
            generator,
        ));

        let mut threads = vec![];
        for i in 1..=3 {
            for j in 1..=3 {
                for _ in 0..i * j {
                    let map = map.clone();
                    threads.push(std::thread::spawn(move || {
                        map.get(format!("key1-{i}"))
                            .get(format!("key2-{j}"))
                            .fetch_add(1, Ordering::AcqRel);
                    }));
                }
            }
        }
        threads.into_iter().for_each(|t| t.join().unwrap());

        for i in 1..=3i64 {
            let inner = map.get(format!("key1-{i}"));
            assert_eq!(inner.len(), 3);
            for j in 1..=3i64 {
                assert_eq!(
                    inner.get(format!("key2-{j}")).load(Ordering::Acquire),
                    i * j
                );
            }
        }
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_shared_pool_across_maps() {
        let calls = Arc::new(AtomicUsize::new(0));
        let generator = {
            let calls = calls.clone();
            shared_pool_map_generator::<String, _, _>(move || {
                calls.fetch_add(1, Ordering::AcqRel);
                AtomicI64::new(0)
            })
        };
        let a = generator();
        let b = generator();
        assert!(Arc::ptr_eq(&a.pool, &b.pool));

        // A candidate discarded by one map is reusable by its sibling.
        let (candidate, existed) = a.load_and_delete("missing");
        assert!(!existed);
        assert_eq!(calls.load(Ordering::Acquire), 1);
        a.pool.release(candidate.clone());
        let value = b.get("leaf".to_string());
        assert!(Arc::ptr_eq(&candidate, &value));
        assert_eq!(calls.load(Ordering::Acquire), 1);

        // Two generator calls never share a pool.
        let other = shared_pool_map_generator::<String, _, _>(|| AtomicI64::new(0));
        assert!(!Arc::ptr_eq(&a.pool, &other().pool));
    }

    #[test]
    fn test_range_early_stop() {
        let map = DefaultMap::<u32, AtomicI64>::new(|| AtomicI64::new(0));
        for i in 0..10 {
            map.get(i);
        }

        let mut visited = 0;
        map.range(|_, _| {
            visited += 1;
            visited < 3
        });
        assert_eq!(visited, 3);
    }

    #[test]
    fn test_iter() {
        let map = DefaultMap::<u32, AtomicI64>::new(|| AtomicI64::new(0));
        for i in 0..10 {
            map.get(i).store(i as i64, Ordering::Release);
        }

        let mut entries = map
            .iter()
            .map(|(key, value)| (key, value.load(Ordering::Acquire)))
            .collect::<Vec<_>>();
        entries.sort_unstable();
        let want = (0..10).map(|i| (i, i as i64)).collect::<Vec<_>>();
        assert_eq!(entries, want);

        // The view is restartable.
        assert_eq!(map.iter().count(), 10);
    }

    #[test]
    fn test_default_map_random_key() {
        let map = Arc::new(DefaultMap::<u32, AtomicI64>::with_capacity_and_shard_amount(
            || AtomicI64::new(0),
            256,
            16,
        ));
        const N: usize = 1 << 12;
        const M: usize = 8;

        let threads = (0..M)
            .map(|_| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for _ in 0..N {
                        let key = rand::random::<u32>() % 32;
                        if rand::random::<u32>() % 8 == 0 {
                            map.delete(&key);
                        } else {
                            map.get(key).fetch_add(1, Ordering::AcqRel);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        threads.into_iter().for_each(|t| t.join().unwrap());

        assert!(map.len() <= 32);
        map.range(|key, value| {
            assert!(*key < 32);
            assert!(value.load(Ordering::Acquire) >= 0);
            true
        });
    }
}
