//! A fast volatile tier layered in front of a slower durable one.

use tracing::trace;

use crate::error::Result;
use crate::store::{BoxedCache, Cache, KeyIterator};

/// Where a [`TieredCache`] lookup was satisfied
#[derive(Debug, Eq, PartialEq)]
pub enum TierLookup<Value> {
    /// Value was already in the primary tier.
    Primary(Value),

    /// Value was missing from the primary tier and was copied up from the secondary.
    Promoted(Value),
}

impl<Value> TierLookup<Value> {
    pub fn into_value(self) -> Value {
        match self {
            TierLookup::Primary(value) | TierLookup::Promoted(value) => value,
        }
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self, TierLookup::Promoted(_))
    }
}

/// Read-through, write-through composition of two caches.
///
/// Reads consult `primary` first; a secondary hit is promoted into `primary` so the next
/// read is a primary hit. Writes go to `primary` and then `secondary`. Removes and clears
/// apply to both tiers, so the secondary never serves a value the caller deleted.
///
/// Writes are not atomic across tiers. If the secondary write fails after the primary
/// accepted the value, `put` returns the error and the primary keeps the new value while
/// the secondary keeps the old one.
pub struct TieredCache<Key, Value> {
    primary: BoxedCache<Key, Value>,
    secondary: BoxedCache<Key, Value>,
}

impl<Key, Value: Clone> TieredCache<Key, Value> {
    pub fn new(primary: BoxedCache<Key, Value>, secondary: BoxedCache<Key, Value>) -> Self {
        TieredCache { primary, secondary }
    }

    pub fn get_with_outcome(&mut self, key: &Key) -> Result<Option<TierLookup<Value>>> {
        if !self.primary.contains_key(key) {
            let Some(value) = self.secondary.get(key)? else {
                return Ok(None);
            };
            trace!("promoting secondary hit into primary tier");
            self.primary.put(key, value.clone())?;

            // A primary that refuses the entry still gets the caller the right answer.
            let value = self.primary.get(key)?.unwrap_or(value);
            return Ok(Some(TierLookup::Promoted(value)));
        }

        Ok(self.primary.get(key)?.map(TierLookup::Primary))
    }

    pub fn primary(&self) -> &(dyn Cache<Key, Value> + Send) {
        &*self.primary
    }

    pub fn primary_mut(&mut self) -> &mut (dyn Cache<Key, Value> + Send) {
        &mut *self.primary
    }

    pub fn secondary(&self) -> &(dyn Cache<Key, Value> + Send) {
        &*self.secondary
    }

    pub fn secondary_mut(&mut self) -> &mut (dyn Cache<Key, Value> + Send) {
        &mut *self.secondary
    }

    pub fn into_inner(self) -> (BoxedCache<Key, Value>, BoxedCache<Key, Value>) {
        (self.primary, self.secondary)
    }
}

impl<Key, Value: Clone> Cache<Key, Value> for TieredCache<Key, Value> {
    fn get(&mut self, key: &Key) -> Result<Option<Value>> {
        Ok(self.get_with_outcome(key)?.map(TierLookup::into_value))
    }

    /// Looks in both tiers without promoting.
    fn peek(&self, key: &Key) -> Result<Option<Value>> {
        match self.primary.peek(key)? {
            Some(value) => Ok(Some(value)),
            None => self.secondary.peek(key),
        }
    }

    fn put(&mut self, key: &Key, value: Value) -> Result<()> {
        self.primary.put(key, value.clone())?;
        self.secondary.put(key, value)
    }

    /// Returns the primary's value if it had one, otherwise the secondary's.
    fn remove(&mut self, key: &Key) -> Result<Option<Value>> {
        let primary = self.primary.remove(key)?;
        let secondary = self.secondary.remove(key)?;
        Ok(primary.or(secondary))
    }

    fn contains_key(&self, key: &Key) -> bool {
        self.primary.contains_key(key) || self.secondary.contains_key(key)
    }

    fn clear(&mut self) -> Result<()> {
        self.primary.clear()?;
        self.secondary.clear()
    }

    /// Primary keys first, then secondary keys the primary does not hold.
    fn keys(&self) -> KeyIterator<'_, Key> {
        let primary = &self.primary;
        Box::new(
            self.primary
                .keys()
                .chain(self.secondary.keys().filter(move |key| !primary.contains_key(key))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LruConfig;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use std::io;
    use crate::store::replacement::lru::LruCache;

    fn lru(max_size: usize) -> LruCache<u32, String> {
        LruCache::with_config(LruConfig::new(max_size, 1.0).unwrap())
    }

    /// Read-only tier that refuses every write
    struct RejectingCache;

    impl Cache<u32, String> for RejectingCache {
        fn get(&mut self, _key: &u32) -> Result<Option<String>> {
            Ok(None)
        }

        fn peek(&self, _key: &u32) -> Result<Option<String>> {
            Ok(None)
        }

        fn put(&mut self, _key: &u32, _value: String) -> Result<()> {
            Err(Error::Io(io::Error::new(io::ErrorKind::Other, "read-only tier")))
        }

        fn remove(&mut self, _key: &u32) -> Result<Option<String>> {
            Ok(None)
        }

        fn contains_key(&self, _key: &u32) -> bool {
            false
        }

        fn clear(&mut self) -> Result<()> {
            Ok(())
        }

        fn keys(&self) -> KeyIterator<'_, u32> {
            Box::new(std::iter::empty())
        }
    }

    fn tiered(
        primary: LruCache<u32, String>,
        secondary: LruCache<u32, String>,
    ) -> TieredCache<u32, String> {
        TieredCache::new(Box::new(primary), Box::new(secondary))
    }

    #[test]
    fn test_tiered_put_writes_both() {
        let mut cache = tiered(lru(10), lru(10));
        cache.put(&1, "one".to_string()).unwrap();

        assert!(cache.primary().contains_key(&1));
        assert!(cache.secondary().contains_key(&1));
        assert_eq!(cache.get(&1).unwrap(), Some("one".to_string()));
    }

    #[test]
    fn test_tiered_promotes_secondary_hit() {
        let mut secondary = lru(10);
        secondary.put(&7, "seven".to_string()).unwrap();
        let mut cache = tiered(lru(10), secondary);

        assert!(!cache.primary().contains_key(&7));
        assert!(cache.contains_key(&7));

        let lookup = cache.get_with_outcome(&7).unwrap().unwrap();
        assert!(lookup.is_promoted());
        assert_eq!(lookup.into_value(), "seven");
        assert!(cache.primary().contains_key(&7));

        assert_eq!(
            cache.get_with_outcome(&7).unwrap(),
            Some(TierLookup::Primary("seven".to_string()))
        );
    }

    #[test]
    fn test_tiered_miss_in_both() {
        let mut cache = tiered(lru(10), lru(10));
        assert_eq!(cache.get(&3).unwrap(), None);
        assert!(!cache.contains_key(&3));
    }

    #[test]
    fn test_tiered_peek_does_not_promote() {
        let mut secondary = lru(10);
        secondary.put(&2, "two".to_string()).unwrap();
        let cache = tiered(lru(10), secondary);

        assert_eq!(cache.peek(&2).unwrap(), Some("two".to_string()));
        assert!(!cache.primary().contains_key(&2));
    }

    #[test]
    fn test_tiered_remove_and_clear_reach_both_tiers() {
        let mut cache = tiered(lru(10), lru(10));
        cache.put(&1, "one".to_string()).unwrap();
        cache.put(&2, "two".to_string()).unwrap();

        assert_eq!(cache.remove(&1).unwrap(), Some("one".to_string()));
        assert!(!cache.primary().contains_key(&1));
        assert!(!cache.secondary().contains_key(&1));
        assert_eq!(cache.get(&1).unwrap(), None);

        cache.clear().unwrap();
        assert!(!cache.contains_key(&2));
        assert_eq!(cache.secondary().keys().count(), 0);
    }

    #[test]
    fn test_tiered_remove_secondary_only_value() {
        let mut secondary = lru(10);
        secondary.put(&5, "five".to_string()).unwrap();
        let mut cache = tiered(lru(10), secondary);

        assert_eq!(cache.remove(&5).unwrap(), Some("five".to_string()));
        assert!(!cache.contains_key(&5));
    }

    #[test]
    fn test_tiered_keys_are_deduplicated() {
        let mut secondary = lru(10);
        secondary.put(&1, "a".to_string()).unwrap();
        secondary.put(&2, "b".to_string()).unwrap();
        let mut cache = tiered(lru(10), secondary);
        cache.put(&1, "a".to_string()).unwrap();

        let mut keys: Vec<u32> = cache.keys().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn test_tiered_small_primary_still_serves_from_secondary() {
        let mut cache = tiered(lru(1), lru(10));
        cache.put(&1, "one".to_string()).unwrap();
        cache.put(&2, "two".to_string()).unwrap();

        // 1 was evicted from the primary but survives below it
        assert!(!cache.primary().contains_key(&1));
        assert_eq!(cache.get(&1).unwrap(), Some("one".to_string()));
        assert!(cache.primary().contains_key(&1));
        assert!(!cache.primary().contains_key(&2));
    }

    #[test]
    fn test_tiered_failed_secondary_write_leaves_primary_updated() {
        let mut cache: TieredCache<u32, String> =
            TieredCache::new(Box::new(lru(10)), Box::new(RejectingCache));

        assert_matches!(cache.put(&1, "one".to_string()), Err(Error::Io(_)));
        assert!(cache.primary().contains_key(&1));
        assert!(!cache.secondary().contains_key(&1));
        assert_eq!(cache.get(&1).unwrap(), Some("one".to_string()));
    }
}
