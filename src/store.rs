pub mod append_log;
pub mod replacement;

use crate::error::Result;

pub type KeyIterator<'a, Key> = Box<dyn Iterator<Item = Key> + 'a>;

/// A cache tier that can be stacked with another via [`TieredCache`](crate::TieredCache).
pub type BoxedCache<Key, Value> = Box<dyn Cache<Key, Value> + Send>;

/// The contract every cache tier implements.
///
/// Operations are per-key; nothing is promised about ordering across keys. Tiers backed by
/// I/O surface failures through [`Result`]; a missing key is never an error.
pub trait Cache<Key, Value> {
    /// The value most recently stored for `key`, if it is still live.
    ///
    /// Reads may have side effects: a replacement policy updates its usage tracking, and a
    /// durable tier may write a tombstone for an entry it finds expired.
    fn get(&mut self, key: &Key) -> Result<Option<Value>>;

    /// A platform read of a value. Peek allows you to inspect state without side effects,
    /// so usage tracking and lazy expiry are left untouched.
    fn peek(&self, key: &Key) -> Result<Option<Value>>;

    fn put(&mut self, key: &Key, value: Value) -> Result<()>;

    /// `None` removes the key, `Some` stores it.
    fn put_or_remove(&mut self, key: &Key, value: Option<Value>) -> Result<()> {
        match value {
            Some(value) => self.put(key, value),
            None => self.remove(key).map(|_| ()),
        }
    }

    /// Deletes `key`, returning the value that was present.
    fn remove(&mut self, key: &Key) -> Result<Option<Value>>;

    /// True iff a live (not removed, not expired) value exists for `key`.
    fn contains_key(&self, key: &Key) -> bool;

    fn clear(&mut self) -> Result<()>;

    /// Live keys, in no particular order unless the implementation says otherwise.
    fn keys(&self) -> KeyIterator<'_, Key>;
}
