//! Broadcast cache: process and encode a message once, send it to many.
//!
//! When the same outbound message goes to hundreds of sessions, running
//! processors and codecs per recipient is wasted work. A kind bound to a
//! [`HashGenerator`] is looked up here first. The key combines the state,
//! the kind, a hash of the message content, and whatever per-recipient
//! context the generator folds in (for example the protocol version).
//!
//! # Guarantees
//!
//! - For one key, processors and encoders run at most once, even when many
//!   sessions miss at the same moment. Late arrivals wait on the entry's
//!   [`OnceCell`] instead of recomputing.
//! - A hit is only returned if the stored message is *equal* to the one
//!   being sent. A hash collision replaces the entry instead of leaking
//!   another message's bytes.
//! - Cached buffers are refcounted [`Bytes`]. Every recipient gets a clone
//!   of the handle, and the memory is freed when the last clone is dropped
//!   after the entry itself is evicted.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::OnceCell;

use crate::ProtocolError;
use crate::codec::CodecContext;
use crate::message::{Message, MessageKind};
use crate::state::ProtocolState;

/// Default time an entry may go unused before [`BroadcastCache::evict_idle`]
/// removes it.
pub const DEFAULT_IDLE: Duration = Duration::from_secs(10);

/// Decides which recipients may share cached output for a message.
pub trait HashGenerator: Send + Sync + 'static {
    /// Returns the context part of the cache key. Recipients producing the
    /// same value share one entry.
    fn generate(&self, ctx: &CodecContext, message: &Message) -> u64;
}

/// Every recipient shares one entry per distinct message.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualHash;

impl HashGenerator for EqualHash {
    fn generate(&self, _ctx: &CodecContext, _message: &Message) -> u64 {
        0
    }
}

/// One entry per distinct message per protocol version.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolVersionHash;

impl HashGenerator for ProtocolVersionHash {
    fn generate(&self, ctx: &CodecContext, _message: &Message) -> u64 {
        ctx.protocol_version as u32 as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    state: ProtocolState,
    kind: MessageKind,
    hash: u64,
}

/// Processed messages and their encoded packet bodies, index-aligned.
#[derive(Debug, Clone)]
pub struct CachedOutput {
    pub processed: Arc<[Message]>,
    pub encoded: Arc<[Bytes]>,
}

struct CacheEntry {
    message: Message,
    /// Milliseconds since the cache's epoch.
    last_access: AtomicU64,
    output: OnceCell<CachedOutput>,
}

/// Shared, concurrent cache of processed and encoded outbound messages.
pub struct BroadcastCache {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    epoch: Instant,
    idle: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BroadcastCache {
    /// Creates a cache whose entries are evicted after `idle` without use.
    pub fn new(idle: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            epoch: Instant::now(),
            idle,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached output for `message`, computing it with
    /// `populate` if this is the first request for its key.
    ///
    /// `populate` runs at most once per key. If it fails, the error is
    /// returned to this caller and the next caller tries again.
    pub fn get_or_populate<F>(
        &self,
        ctx: &CodecContext,
        message: &Message,
        generator: &dyn HashGenerator,
        populate: F,
    ) -> Result<CachedOutput, ProtocolError>
    where
        F: FnOnce() -> Result<CachedOutput, ProtocolError>,
    {
        let key = CacheKey {
            state: ctx.state,
            kind: message.kind(),
            hash: content_hash(message, generator.generate(ctx, message)),
        };

        let entry = self.entry_for(key, message);
        entry.last_access.store(self.now_millis(), Ordering::Relaxed);

        // The map guard is already released here, so a slow encoder never
        // blocks other keys in the same shard.
        let mut computed = false;
        let output = entry
            .output
            .get_or_try_init(|| {
                computed = true;
                populate()
            })?
            .clone();

        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(output)
    }

    fn entry_for(&self, key: CacheKey, message: &Message) -> Arc<CacheEntry> {
        if let Some(existing) = self.entries.get(&key) {
            if existing.message == *message {
                return Arc::clone(existing.value());
            }
        }

        let fresh = || {
            Arc::new(CacheEntry {
                message: message.clone(),
                last_access: AtomicU64::new(self.now_millis()),
                output: OnceCell::new(),
            })
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().message == *message {
                    Arc::clone(occupied.get())
                } else {
                    tracing::debug!(
                        kind = ?key.kind,
                        "broadcast cache hash collision, replacing entry"
                    );
                    let entry = fresh();
                    occupied.insert(Arc::clone(&entry));
                    entry
                }
            }
            Entry::Vacant(vacant) => {
                let entry = fresh();
                vacant.insert(Arc::clone(&entry));
                entry
            }
        }
    }

    /// Removes entries unused for longer than the idle window. Returns how
    /// many were removed.
    pub fn evict_idle(&self) -> usize {
        let now = self.now_millis();
        let idle = self.idle.as_millis() as u64;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            now.saturating_sub(entry.last_access.load(Ordering::Relaxed)) < idle
        });
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(
                evicted,
                remaining = self.entries.len(),
                "evicted idle broadcast cache entries"
            );
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Requests answered from an already-populated entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Requests that had to run processors and encoders.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for BroadcastCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE)
    }
}

fn content_hash(message: &Message, context_hash: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.hash(&mut hasher);
    context_hash.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::message::KeepAlive;

    fn ctx(version: i32) -> CodecContext {
        CodecContext::new(ProtocolState::Play, version)
    }

    fn output_for(message: &Message) -> CachedOutput {
        CachedOutput {
            processed: Arc::from(vec![message.clone()]),
            encoded: Arc::from(vec![Bytes::from_static(b"payload")]),
        }
    }

    /// Always returns the same hash, forcing every message into one slot.
    struct Colliding;

    impl HashGenerator for Colliding {
        fn generate(&self, _: &CodecContext, _: &Message) -> u64 {
            7
        }
    }

    #[test]
    fn test_second_lookup_is_a_hit() {
        let cache = BroadcastCache::default();
        let message = Message::from(KeepAlive { id: 1 });
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .get_or_populate(&ctx(47), &message, &EqualHash, || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(output_for(&message))
                })
                .unwrap();
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_protocol_version_hash_separates_versions() {
        let cache = BroadcastCache::default();
        let message = Message::from(KeepAlive { id: 1 });

        for version in [47, 47, 5] {
            cache
                .get_or_populate(
                    &ctx(version),
                    &message,
                    &ProtocolVersionHash,
                    || Ok(output_for(&message)),
                )
                .unwrap();
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.misses(), 2);
    }

    #[test]
    fn test_different_messages_never_share_output() {
        let cache = BroadcastCache::default();
        let first = Message::from(KeepAlive { id: 1 });
        let second = Message::from(KeepAlive { id: 2 });

        cache
            .get_or_populate(&ctx(47), &first, &Colliding, || {
                Ok(output_for(&first))
            })
            .unwrap();
        let out = cache
            .get_or_populate(&ctx(47), &second, &Colliding, || {
                Ok(output_for(&second))
            })
            .unwrap();

        assert_eq!(&out.processed[..], &[second]);
    }

    #[test]
    fn test_failed_population_is_retried() {
        let cache = BroadcastCache::default();
        let message = Message::from(KeepAlive { id: 1 });

        let failed = cache.get_or_populate(&ctx(47), &message, &EqualHash, || {
            Err(ProtocolError::Processor("boom".into()))
        });
        assert!(failed.is_err());

        let out = cache
            .get_or_populate(&ctx(47), &message, &EqualHash, || {
                Ok(output_for(&message))
            })
            .unwrap();
        assert_eq!(out.encoded.len(), 1);
    }

    #[test]
    fn test_hits_share_the_same_buffer() {
        let cache = BroadcastCache::default();
        let message = Message::from(KeepAlive { id: 1 });
        let populate = || Ok(output_for(&message));

        let a = cache
            .get_or_populate(&ctx(47), &message, &EqualHash, populate)
            .unwrap();
        let b = cache
            .get_or_populate(&ctx(47), &message, &EqualHash, populate)
            .unwrap();

        assert!(Arc::ptr_eq(&a.encoded, &b.encoded));
        assert_eq!(a.encoded[0].as_ptr(), b.encoded[0].as_ptr());
    }

    #[test]
    fn test_evict_idle() {
        let message = Message::from(KeepAlive { id: 1 });

        let keep = BroadcastCache::new(Duration::from_secs(3600));
        keep.get_or_populate(&ctx(47), &message, &EqualHash, || {
            Ok(output_for(&message))
        })
        .unwrap();
        assert_eq!(keep.evict_idle(), 0);
        assert_eq!(keep.len(), 1);

        let drop_all = BroadcastCache::new(Duration::ZERO);
        drop_all
            .get_or_populate(&ctx(47), &message, &EqualHash, || {
                Ok(output_for(&message))
            })
            .unwrap();
        assert_eq!(drop_all.evict_idle(), 1);
        assert!(drop_all.is_empty());
    }

    #[test]
    fn test_concurrent_misses_populate_once() {
        let cache = BroadcastCache::default();
        let message = Message::from(KeepAlive { id: 9 });
        let runs = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..50 {
                scope.spawn(|| {
                    cache
                        .get_or_populate(&ctx(47), &message, &EqualHash, || {
                            runs.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(5));
                            Ok(output_for(&message))
                        })
                        .unwrap();
                });
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.hits() + cache.misses(), 50);
    }
}
