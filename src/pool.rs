use crossbeam_queue::SegQueue;
use std::sync::Arc;

/// Maximum number of recycled values a pool retains.
///
/// Values released beyond this bound are dropped. The cache only ever holds
/// candidates that lost a publish race, so its population is bounded by
/// contention, but a hard cap keeps a pathological workload from pinning
/// memory forever.
const MAX_RETAINED: usize = 256;

/// A factory for default values with a recycling cache.
///
/// A `Pool` wraps a caller-supplied generator and hands out values as
/// [`Arc`] handles via [`Pool::acquire`]. Values that were constructed
/// speculatively but never published into a map can be given back with
/// [`Pool::release`]; a later `acquire` may then reuse them instead of
/// invoking the generator again.
///
/// The generator must be safe to call from multiple threads at once and must
/// return a ready-to-use value on every call. `acquire` and `release` are
/// themselves safe for concurrent use without external locking, and neither
/// ever blocks on the other.
pub struct Pool<V> {
    generator: Box<dyn Fn() -> V + Send + Sync>,
    cache: SegQueue<Arc<V>>,
}

impl<V> Pool<V> {
    /// Creates a pool around `generator`.
    pub fn new<G>(generator: G) -> Self
    where
        G: Fn() -> V + Send + Sync + 'static,
    {
        Self {
            generator: Box::new(generator),
            cache: SegQueue::new(),
        }
    }

    /// Returns a value, reusing a previously released one when available.
    ///
    /// Falls back to the generator on an empty cache, so reuse is invisible
    /// to the caller: the result is always a handle whose value is in the
    /// generator's freshly-constructed state.
    pub fn acquire(&self) -> Arc<V> {
        match self.cache.pop() {
            Some(value) => value,
            None => Arc::new((self.generator)()),
        }
    }

    /// Returns an unpublished value to the cache for future reuse.
    ///
    /// This is a best-effort optimization: the pool may drop the value
    /// instead of retaining it (the value's `Drop` runs normally), and
    /// callers must not rely on a released value being handed out again.
    ///
    /// Only values that were never published into a map may be released;
    /// releasing a published value would let two keys alias one handle.
    pub fn release(&self, value: Arc<V>) {
        if self.cache.len() < MAX_RETAINED {
            self.cache.push(value);
        }
    }
}

impl<V> std::fmt::Debug for Pool<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("cached", &self.cache.len())
            .finish()
    }
}
