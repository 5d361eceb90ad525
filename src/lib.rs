//! A thread-safe default dictionary: reading a missing key atomically creates,
//! publishes and returns a default value instead of `None`.
//!
//! # Overview
//! `defaultdict` pairs a sharded concurrent map with a value-recycling pool.
//! Default values come from a caller-supplied generator; when a missing key is
//! read, a candidate is constructed outside of any lock and published with a
//! single insert-if-absent step. Candidates that lose the publish race are
//! recycled instead of thrown away.
//!
//! Two use cases drive the design:
//! 1. Per-key locks: every key owns its own mutex-like value.
//! 2. Per-key counters: every key owns its own atomic integer.
//!
//! # Features
//! - Get-or-create reads that never return an absent marker
//! - Identity-stable value handles: a published value never changes until the
//!   key is deleted
//! - Fine-grained sharding; no whole-map lock, generators run outside locks
//! - A recycling pool shared across nested maps via
//!   [`shared_pool_map_generator`]
//! - No poisoning, shard locks are released normally on panic
//!
//! # Examples
//! ```
//! use defaultdict::DefaultMap;
//! use std::sync::atomic::{AtomicI64, Ordering};
//!
//! let map = DefaultMap::<String, AtomicI64>::new(|| AtomicI64::new(0));
//!
//! // Reading a missing key publishes a default.
//! map.get_by_ref("requests").fetch_add(1, Ordering::AcqRel);
//!
//! let (counter, existed) = map.load("requests".to_string());
//! assert!(existed);
//! assert_eq!(counter.load(Ordering::Acquire), 1);
//!
//! // Remove a key; the next read starts from a fresh default.
//! map.delete("requests");
//! assert_eq!(map.get_by_ref("requests").load(Ordering::Acquire), 0);
//! ```
#[doc = include_str!("../README.md")]
mod default_map;
mod futex;
mod pool;
mod shards_map;

pub use default_map::*;
use futex::*;
pub use pool::*;
use shards_map::*;
