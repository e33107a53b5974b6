//! Options-driven two-tier cache.
//!
//! L1 is an in-process map with optional TTL expiry and LRU eviction,
//! guarded by a single mutex. L2 is an external [`CacheProvider`]
//! consulted on L1 misses and written through on computes. Both read
//! paths release the lock around the factory and reacquire it for the
//! write, so two callers racing a miss may both compute and the last
//! write wins. The sync path consults the provider under the lock; the
//! async path performs provider I/O outside it.

use crate::error::ConfigError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// External second-tier cache contract.
///
/// Implementations are assumed thread-safe; serialization, transport,
/// and key-space namespacing are the provider's concern. The configured
/// expiration is passed to `set` untouched. The async methods default
/// to the sync ones for providers without real async I/O.
#[async_trait]
pub trait CacheProvider<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send,
{
    fn get(&self, key: &K) -> Option<V>;
    fn set(&self, key: &K, value: V, expiration: Option<Duration>);
    fn remove(&self, key: &K);

    async fn get_async(&self, key: &K) -> Option<V> {
        self.get(key)
    }

    async fn set_async(&self, key: &K, value: V, expiration: Option<Duration>)
    where
        V: 'async_trait,
    {
        self.set(key, value, expiration);
    }

    async fn remove_async(&self, key: &K) {
        self.remove(key);
    }
}

/// Process-local provider, mainly for tests and single-node setups.
pub struct InMemoryProvider<K, V> {
    entries: DashMap<K, (V, Option<Instant>)>,
}

impl<K: Eq + Hash, V> Default for InMemoryProvider<K, V> {
    fn default() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl<K, V> InMemoryProvider<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<K, V> CacheProvider<K, V> for InMemoryProvider<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        let (value, deadline) = entry.value();
        match deadline {
            Some(deadline) if Instant::now() >= *deadline => {
                drop(entry);
                self.entries.remove(key);
                None
            }
            _ => Some(value.clone()),
        }
    }

    fn set(&self, key: &K, value: V, expiration: Option<Duration>) {
        let deadline = expiration.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.clone(), (value, deadline));
    }

    fn remove(&self, key: &K) {
        self.entries.remove(key);
    }
}

/// Cache configuration.
///
/// L1 is active when any of `expiration`/`max_size` are set or no
/// provider is given; a provider with no other options runs L2-only.
pub struct MemoizeOptions<K, V> {
    expiration: Option<Duration>,
    max_size: Option<usize>,
    provider: Option<Arc<dyn CacheProvider<K, V>>>,
}

impl<K, V> Default for MemoizeOptions<K, V> {
    fn default() -> Self {
        Self { expiration: None, max_size: None, provider: None }
    }
}

impl<K, V> Clone for MemoizeOptions<K, V> {
    fn clone(&self) -> Self {
        Self {
            expiration: self.expiration,
            max_size: self.max_size,
            provider: self.provider.clone(),
        }
    }
}

impl<K, V> std::fmt::Debug for MemoizeOptions<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizeOptions")
            .field("expiration", &self.expiration)
            .field("max_size", &self.max_size)
            .field("provider", &self.provider.is_some())
            .finish()
    }
}

impl<K, V> MemoizeOptions<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries older than `ttl` are treated as absent and removed on
    /// read.
    #[must_use]
    pub fn with_expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    /// Bound L1 to `max_size` entries with LRU eviction.
    pub fn with_max_size(mut self, max_size: usize) -> Result<Self, ConfigError> {
        if max_size == 0 {
            return Err(ConfigError::InvalidMaxSize(max_size));
        }
        self.max_size = Some(max_size);
        Ok(self)
    }

    /// Attach an external second-tier provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn CacheProvider<K, V>>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Whether the configuration activates the in-process tier.
    pub fn use_l1(&self) -> bool {
        self.max_size.is_some() || self.expiration.is_some() || self.provider.is_none()
    }
}

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
}

/// Doubly-linked access-order list over slab slots. Head is least
/// recently used, tail is most recently used.
struct AccessList<K> {
    slots: Vec<Option<AccessNode<K>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

struct AccessNode<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K> AccessList<K> {
    fn new() -> Self {
        Self { slots: Vec::new(), free: Vec::new(), head: None, tail: None }
    }

    fn push_back(&mut self, key: K) -> usize {
        let node = AccessNode { key, prev: self.tail, next: None };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        if let Some(tail) = self.tail {
            if let Some(tail_node) = self.slots[tail].as_mut() {
                tail_node.next = Some(idx);
            }
        }
        self.tail = Some(idx);
        if self.head.is_none() {
            self.head = Some(idx);
        }
        idx
    }

    fn unlink(&mut self, idx: usize) -> Option<K> {
        let node = self.slots[idx].take()?;
        match node.prev {
            Some(prev) => {
                if let Some(prev_node) = self.slots[prev].as_mut() {
                    prev_node.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(next_node) = self.slots[next].as_mut() {
                    next_node.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        self.free.push(idx);
        Some(node.key)
    }

    fn move_to_back(&mut self, idx: usize) -> usize
    where
        K: Clone,
    {
        match self.unlink(idx) {
            Some(key) => self.push_back(key),
            None => idx,
        }
    }

    fn pop_front(&mut self) -> Option<K> {
        let head = self.head?;
        self.unlink(head)
    }
}

struct L1State<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    node_index: HashMap<K, usize>,
    access_order: AccessList<K>,
}

impl<K, V> L1State<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new() -> Self {
        Self { entries: HashMap::new(), node_index: HashMap::new(), access_order: AccessList::new() }
    }

    fn get(&mut self, key: &K, expiration: Option<Duration>, now: Instant) -> Option<V> {
        let created_at = self.entries.get(key)?.created_at;
        if let Some(ttl) = expiration {
            if now.duration_since(created_at) >= ttl {
                self.remove(key);
                return None;
            }
        }
        if let Some(idx) = self.node_index.get(key).copied() {
            let new_idx = self.access_order.move_to_back(idx);
            self.node_index.insert(key.clone(), new_idx);
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    fn insert(&mut self, key: K, value: V, now: Instant, max_size: Option<usize>) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), CacheEntry { value, created_at: now });
            if let Some(idx) = self.node_index.get(&key).copied() {
                let new_idx = self.access_order.move_to_back(idx);
                self.node_index.insert(key, new_idx);
            }
            return;
        }

        let idx = self.access_order.push_back(key.clone());
        self.node_index.insert(key.clone(), idx);
        self.entries.insert(key, CacheEntry { value, created_at: now });

        if let Some(max) = max_size {
            while self.entries.len() > max {
                match self.access_order.pop_front() {
                    Some(evicted) => {
                        tracing::debug!("evicting least recently used cache entry");
                        self.entries.remove(&evicted);
                        self.node_index.remove(&evicted);
                    }
                    None => break,
                }
            }
        }
    }

    fn remove(&mut self, key: &K) {
        self.entries.remove(key);
        if let Some(idx) = self.node_index.remove(key) {
            self.access_order.unlink(idx);
        }
    }
}

/// Two-tier read-through cache keyed by `K`.
pub struct MemoCache<K, V> {
    l1: Option<Mutex<L1State<K, V>>>,
    expiration: Option<Duration>,
    max_size: Option<usize>,
    provider: Option<Arc<dyn CacheProvider<K, V>>>,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send,
{
    pub fn new(options: MemoizeOptions<K, V>) -> Self {
        let l1 = options.use_l1().then(|| Mutex::new(L1State::new()));
        Self {
            l1,
            expiration: options.expiration,
            max_size: options.max_size,
            provider: options.provider,
        }
    }

    /// Number of entries currently resident in L1.
    pub fn l1_len(&self) -> usize {
        self.l1.as_ref().map_or(0, |l1| l1.lock().entries.len())
    }

    /// Drop a key from both tiers.
    pub fn remove(&self, key: &K) {
        if let Some(l1) = &self.l1 {
            l1.lock().remove(key);
        }
        if let Some(provider) = &self.provider {
            provider.remove(key);
        }
    }

    /// Read through the tiers, computing and storing on a miss.
    ///
    /// The factory runs outside the L1 lock; callers racing an expired
    /// or absent key may both compute, last write wins.
    pub fn get_or_add(&self, key: K, factory: impl FnOnce(&K) -> V) -> V {
        match (&self.l1, &self.provider) {
            (Some(l1), provider) => {
                {
                    let mut state = l1.lock();
                    if let Some(value) = state.get(&key, self.expiration, Instant::now()) {
                        return value;
                    }
                    if let Some(provider) = provider {
                        if let Some(value) = provider.get(&key) {
                            state.insert(key, value.clone(), Instant::now(), self.max_size);
                            return value;
                        }
                    }
                }

                let value = factory(&key);
                l1.lock().insert(key.clone(), value.clone(), Instant::now(), self.max_size);
                if let Some(provider) = provider {
                    provider.set(&key, value.clone(), self.expiration);
                }
                value
            }
            (None, Some(provider)) => {
                if let Some(value) = provider.get(&key) {
                    return value;
                }
                let value = factory(&key);
                provider.set(&key, value.clone(), self.expiration);
                value
            }
            (None, None) => unreachable!("MemoCache always has L1 or a provider"),
        }
    }

    /// Async read-through. Provider I/O and the factory run outside
    /// the L1 lock.
    pub async fn get_or_add_async<Fut>(&self, key: K, factory: impl FnOnce(K) -> Fut) -> V
    where
        Fut: Future<Output = V>,
    {
        if let Some(l1) = &self.l1 {
            if let Some(value) = l1.lock().get(&key, self.expiration, Instant::now()) {
                return value;
            }
        }

        if let Some(provider) = &self.provider {
            if let Some(value) = provider.get_async(&key).await {
                if let Some(l1) = &self.l1 {
                    l1.lock().insert(key, value.clone(), Instant::now(), self.max_size);
                }
                return value;
            }
        }

        let value = factory(key.clone()).await;
        if let Some(l1) = &self.l1 {
            l1.lock().insert(key.clone(), value.clone(), Instant::now(), self.max_size);
        }
        if let Some(provider) = &self.provider {
            provider.set_async(&key, value.clone(), self.expiration).await;
        }
        value
    }
}
