use std::collections::HashMap;
use std::hash::Hash;

use tracing::debug;

use crate::config::LruConfig;
use crate::error::Result;
use crate::store::{Cache, KeyIterator};

// Slab slot holding one entry and its links in the usage order
struct Entry<Key, Value> {
    key: Key,
    value: Value,
    previous: Option<usize>,
    next: Option<usize>,
}

/// Bounded in-memory cache with Least Recently Used replacement.
///
/// Usage order is a doubly-linked list threaded through a slab of entries by index, with
/// the map pointing each key at its slot, so every operation is O(1).
///
/// Eviction is batched: once more than `max_size` keys are tracked, least recently used
/// keys are dropped until `floor(max_size * factor)` remain.
pub struct LruCache<Key, Value> {
    config: LruConfig,
    slots: HashMap<Key, usize>,
    entries: Vec<Option<Entry<Key, Value>>>,
    free: Vec<usize>,
    // most recently used
    head: Option<usize>,
    // least recently used
    tail: Option<usize>,
}

impl<Key, Value> LruCache<Key, Value>
where
    Key: Eq + Hash + Clone,
    Value: Clone,
{
    pub fn new(max_size: usize) -> Result<Self> {
        Ok(Self::with_config(LruConfig::with_max_size(max_size)?))
    }

    /// The config is assumed valid; see [`LruConfig::validate`].
    pub fn with_config(config: LruConfig) -> Self {
        Self {
            config,
            slots: HashMap::new(),
            entries: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size
    }

    pub fn factor(&self) -> f64 {
        self.config.factor
    }

    /// Evicts least recently used entries if the cache is over capacity. Returns how many
    /// were evicted.
    pub fn prune(&mut self) -> usize {
        if self.len() <= self.config.max_size {
            return 0;
        }

        let target = self.config.retained();
        let mut evicted = 0;
        while self.len() > target {
            let Some(lru) = self.tail else { break };
            let entry = self.unlink(lru);
            self.slots.remove(&entry.key);
            evicted += 1;
        }

        debug!(evicted, retained = self.len(), "pruned LRU cache");
        evicted
    }

    fn entry(&self, slot: usize) -> &Entry<Key, Value> {
        match &self.entries[slot] {
            Some(entry) => entry,
            None => unreachable!("LRU slot {slot} is linked but vacant"),
        }
    }

    fn entry_mut(&mut self, slot: usize) -> &mut Entry<Key, Value> {
        match &mut self.entries[slot] {
            Some(entry) => entry,
            None => unreachable!("LRU slot {slot} is linked but vacant"),
        }
    }

    fn allocate(&mut self, key: Key, value: Value) -> usize {
        let entry = Entry {
            key,
            value,
            previous: None,
            next: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        }
    }

    fn detach(&mut self, slot: usize) {
        let (previous, next) = {
            let entry = self.entry(slot);
            (entry.previous, entry.next)
        };

        match previous {
            Some(previous) => self.entry_mut(previous).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.entry_mut(next).previous = previous,
            None => self.tail = previous,
        }

        let entry = self.entry_mut(slot);
        entry.previous = None;
        entry.next = None;
    }

    fn attach_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let entry = self.entry_mut(slot);
            entry.previous = None;
            entry.next = old_head;
        }
        match old_head {
            Some(old_head) => self.entry_mut(old_head).previous = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }

    fn mark_as_most_recent(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.detach(slot);
        self.attach_front(slot);
    }

    // Detaches the slot and frees it, handing back the entry
    fn unlink(&mut self, slot: usize) -> Entry<Key, Value> {
        self.detach(slot);
        self.free.push(slot);
        match self.entries[slot].take() {
            Some(entry) => entry,
            None => unreachable!("LRU slot {slot} is linked but vacant"),
        }
    }
}

impl<Key, Value> Cache<Key, Value> for LruCache<Key, Value>
where
    Key: Eq + Hash + Clone,
    Value: Clone,
{
    fn get(&mut self, key: &Key) -> Result<Option<Value>> {
        let Some(&slot) = self.slots.get(key) else {
            return Ok(None);
        };
        self.mark_as_most_recent(slot);
        Ok(Some(self.entry(slot).value.clone()))
    }

    fn peek(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self
            .slots
            .get(key)
            .map(|&slot| self.entry(slot).value.clone()))
    }

    fn put(&mut self, key: &Key, value: Value) -> Result<()> {
        match self.slots.get(key) {
            Some(&slot) => {
                self.entry_mut(slot).value = value;
                self.mark_as_most_recent(slot);
            }
            None => {
                let slot = self.allocate(key.clone(), value);
                self.slots.insert(key.clone(), slot);
                self.attach_front(slot);
            }
        }
        self.prune();
        Ok(())
    }

    fn remove(&mut self, key: &Key) -> Result<Option<Value>> {
        Ok(self
            .slots
            .remove(key)
            .map(|slot| self.unlink(slot).value))
    }

    fn contains_key(&self, key: &Key) -> bool {
        self.slots.contains_key(key)
    }

    fn clear(&mut self) -> Result<()> {
        self.slots.clear();
        self.entries.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        Ok(())
    }

    /// Most recently used first.
    fn keys(&self) -> KeyIterator<'_, Key> {
        Box::new(
            std::iter::successors(self.head, move |&slot| self.entry(slot).next)
                .map(move |slot| self.entry(slot).key.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn lru(max_size: usize, factor: f64) -> LruCache<String, u32> {
        LruCache::with_config(LruConfig::new(max_size, factor).unwrap())
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    fn keys_of(cache: &LruCache<String, u32>) -> Vec<String> {
        cache.keys().collect()
    }

    #[test]
    fn test_lru_put_get() {
        let mut cache = lru(10, 0.8);
        cache.put(&key("a"), 1).unwrap();

        assert_eq!(cache.get(&key("a")).unwrap(), Some(1));
        assert_eq!(cache.get(&key("missing")).unwrap(), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_put_replaces_without_duplicating() {
        let mut cache = lru(10, 0.8);
        cache.put(&key("a"), 1).unwrap();
        cache.put(&key("b"), 2).unwrap();
        cache.put(&key("a"), 3).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(keys_of(&cache), vec![key("a"), key("b")]);
        assert_eq!(cache.peek(&key("a")).unwrap(), Some(3));
    }

    #[test]
    fn test_lru_get_updates_recency() {
        let mut cache = lru(10, 0.8);
        for name in ["a", "b", "c"] {
            cache.put(&key(name), 0).unwrap();
        }
        assert_eq!(keys_of(&cache), vec![key("c"), key("b"), key("a")]);

        cache.get(&key("a")).unwrap();
        assert_eq!(keys_of(&cache), vec![key("a"), key("c"), key("b")]);
    }

    #[test]
    fn test_lru_peek_does_not_update_recency() {
        let mut cache = lru(10, 0.8);
        cache.put(&key("a"), 1).unwrap();
        cache.put(&key("b"), 2).unwrap();

        assert_eq!(cache.peek(&key("a")).unwrap(), Some(1));
        assert_eq!(keys_of(&cache), vec![key("b"), key("a")]);
    }

    #[test]
    fn test_lru_batch_prune() {
        let mut cache = lru(10, 0.8);
        for i in 0..10u32 {
            cache.put(&format!("k{i}"), i).unwrap();
        }
        assert_eq!(cache.len(), 10);

        cache.put(&key("k10"), 10).unwrap();
        assert_eq!(cache.len(), 8);

        let expected: Vec<String> = (3..=10).rev().map(|i| format!("k{i}")).collect();
        assert_eq!(keys_of(&cache), expected);
        assert!(!cache.contains_key(&key("k0")));
        assert!(!cache.contains_key(&key("k2")));
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        // A, B, C; touch A; one more insert evicts exactly one key
        let mut cache = lru(3, 1.0);
        cache.put(&key("A"), 1).unwrap();
        cache.put(&key("B"), 2).unwrap();
        cache.put(&key("C"), 3).unwrap();
        cache.get(&key("A")).unwrap();

        cache.put(&key("D"), 4).unwrap();

        assert!(!cache.contains_key(&key("B")));
        assert!(cache.contains_key(&key("A")));
        assert!(cache.contains_key(&key("C")));
        assert!(cache.contains_key(&key("D")));
    }

    #[test]
    fn test_lru_remove() {
        let mut cache = lru(10, 0.8);
        cache.put(&key("a"), 1).unwrap();
        cache.put(&key("b"), 2).unwrap();
        cache.put(&key("c"), 3).unwrap();

        assert_eq!(cache.remove(&key("b")).unwrap(), Some(2));
        assert_eq!(cache.remove(&key("b")).unwrap(), None);
        assert_eq!(keys_of(&cache), vec![key("c"), key("a")]);

        // freed slot is reused
        cache.put(&key("d"), 4).unwrap();
        assert_eq!(cache.entries.len(), 3);
        assert_eq!(keys_of(&cache), vec![key("d"), key("c"), key("a")]);
    }

    #[test]
    fn test_lru_remove_only_entry() {
        let mut cache = lru(10, 0.8);
        cache.put(&key("a"), 1).unwrap();
        cache.remove(&key("a")).unwrap();

        assert!(cache.is_empty());
        assert!(cache.head.is_none());
        assert!(cache.tail.is_none());
    }

    #[test]
    fn test_lru_clear() {
        let mut cache = lru(10, 0.8);
        cache.put(&key("a"), 1).unwrap();
        cache.put(&key("b"), 2).unwrap();
        cache.clear().unwrap();

        assert!(cache.is_empty());
        assert_eq!(cache.keys().count(), 0);
        assert_eq!(cache.get(&key("a")).unwrap(), None);

        cache.put(&key("c"), 3).unwrap();
        assert_eq!(keys_of(&cache), vec![key("c")]);
    }

    #[test]
    fn test_lru_put_or_remove() {
        let mut cache = lru(10, 0.8);
        cache.put_or_remove(&key("a"), Some(1)).unwrap();
        assert!(cache.contains_key(&key("a")));

        cache.put_or_remove(&key("a"), None).unwrap();
        assert!(!cache.contains_key(&key("a")));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8),
        Get(u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..32).prop_map(Op::Put),
            (0u8..32).prop_map(Op::Get),
            (0u8..32).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_map_and_usage_order_agree(ops in proptest::collection::vec(op(), 0..200)) {
            let mut cache: LruCache<u8, u8> = LruCache::with_config(LruConfig::new(8, 0.5).unwrap());
            for op in ops {
                match op {
                    Op::Put(k) => cache.put(&k, k).unwrap(),
                    Op::Get(k) => { cache.get(&k).unwrap(); }
                    Op::Remove(k) => { cache.remove(&k).unwrap(); }
                }

                let order: Vec<u8> = cache.keys().collect();
                prop_assert_eq!(order.len(), cache.len());
                prop_assert!(cache.len() <= 8);
                for k in &order {
                    prop_assert!(cache.contains_key(k));
                }
                let mut deduped = order.clone();
                deduped.sort_unstable();
                deduped.dedup();
                prop_assert_eq!(deduped.len(), order.len());
            }
        }
    }
}
