//! Persistent (immutable) ordered map.
//!
//! This module provides [`PersistentTreeMap`], an immutable ordered
//! map that stores its entries in a [`PersistentBTree`], keeping them
//! in key order and sharing structure between versions.
//!
//! # Overview
//!
//! A map entry is projected into a tree element whose comparator
//! inspects only the key while the equality closure inspects key and
//! value. Inserting an existing key with a different value therefore
//! *replaces* the stored entry, and inserting an identical entry is a
//! no-op returning the same map.
//!
//! - O(log N) get, insert, remove
//! - O(1) len and `is_empty`
//! - O(N) ordered iteration, O(log N) positioning with `iter_from`
//!
//! # Examples
//!
//! ```rust
//! use cambium::persistent::PersistentTreeMap;
//!
//! let map = PersistentTreeMap::new()
//!     .insert(3, "three")
//!     .insert(1, "one")
//!     .insert(2, "two");
//!
//! // Entries are always in key order
//! let keys: Vec<&i32> = map.keys().collect();
//! assert_eq!(keys, vec![&1, &2, &3]);
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.insert(1, "ONE");
//! assert_eq!(map.get(&1), Some(&"one"));     // Original unchanged
//! assert_eq!(updated.get(&1), Some(&"ONE")); // New version
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;

use super::btree::{PersistentBTree, PersistentBTreeIterator, TransientBTree};

// =============================================================================
// Map Entry
// =============================================================================

/// A key-value pair as stored in the underlying tree.
#[derive(Clone)]
struct MapEntry<K, V> {
    key: K,
    value: V,
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for MapEntry<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{:?}: {:?}", self.key, self.value)
    }
}

// =============================================================================
// PersistentTreeMap Definition
// =============================================================================

/// A persistent (immutable) ordered map based on a B+tree.
///
/// `PersistentTreeMap` is an immutable data structure that uses
/// structural sharing to efficiently support functional programming
/// patterns. Keys must implement `Ord`; entries iterate in ascending
/// key order.
///
/// # Time Complexity
///
/// | Operation      | Complexity   |
/// |----------------|--------------|
/// | `new`          | O(1)         |
/// | `get`          | O(log N)     |
/// | `insert`       | O(log N)     |
/// | `remove`       | O(log N)     |
/// | `contains_key` | O(log N)     |
/// | `len`          | O(1)         |
/// | `is_empty`     | O(1)         |
///
/// # Examples
///
/// ```rust
/// use cambium::persistent::PersistentTreeMap;
///
/// let map = PersistentTreeMap::singleton(42, "answer");
/// assert_eq!(map.get(&42), Some(&"answer"));
/// ```
#[derive(Clone)]
pub struct PersistentTreeMap<K, V> {
    tree: PersistentBTree<MapEntry<K, V>>,
}

impl<K, V> PersistentTreeMap<K, V> {
    /// Returns the number of entries in the map.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::new()
    ///     .insert(1, "one")
    ///     .insert(2, "two");
    /// assert_eq!(map.len(), 2);
    /// ```
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the map contains no entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let empty: PersistentTreeMap<i32, String> = PersistentTreeMap::new();
    /// assert!(empty.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns `true` if both maps share the same underlying root,
    /// which is how a no-op mutator hands back the input map.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.tree.ptr_eq(&other.tree)
    }

    /// Returns an iterator over `(&key, &value)` pairs in ascending
    /// key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::new().insert(2, "two").insert(1, "one");
    /// let entries: Vec<(&i32, &&str)> = map.iter().collect();
    /// assert_eq!(entries, vec![(&1, &"one"), (&2, &"two")]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentTreeMapIterator<'_, K, V> {
        PersistentTreeMapIterator {
            inner: self.tree.iter(),
        }
    }

    /// Returns an iterator over the keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over the values, in ascending key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }
}

impl<K, V> PersistentTreeMap<K, V>
where
    K: Clone + Ord + 'static,
    V: Clone + PartialEq + 'static,
{
    /// Creates a new empty map ordered by `K`'s `Ord` instance.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let map: PersistentTreeMap<i32, String> = PersistentTreeMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: PersistentBTree::new(
                |a: &MapEntry<K, V>, b: &MapEntry<K, V>| a.key.cmp(&b.key),
                |a: &MapEntry<K, V>, b: &MapEntry<K, V>| a.key == b.key && a.value == b.value,
            ),
        }
    }

    /// Creates a map containing a single entry.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::singleton(1, "one");
    /// assert_eq!(map.len(), 1);
    /// ```
    #[must_use]
    pub fn singleton(key: K, value: V) -> Self {
        Self::new().insert(key, value)
    }
}

impl<K, V> PersistentTreeMap<K, V>
where
    K: Clone + Ord,
    V: Clone + PartialEq,
{
    /// Returns a reference to the value stored under `key`, if any.
    ///
    /// The key may be any borrowed form of the map's key type, as
    /// long as `Ord` on the borrowed form matches.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::singleton("one".to_string(), 1);
    /// assert_eq!(map.get("one"), Some(&1));
    /// assert_eq!(map.get("two"), None);
    /// ```
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_entry(key).map(|(_, value)| value)
    }

    /// Returns the stored key-value pair for `key`, if any.
    #[must_use]
    pub fn get_entry<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.tree
            .get_by(|entry| entry.key.borrow().cmp(key))
            .map(|entry| (&entry.key, &entry.value))
    }

    /// Returns `true` if the map contains an entry for `key`.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_entry(key).is_some()
    }

    /// Returns a map with `value` stored under `key`.
    ///
    /// Inserting over an existing key replaces the value and keeps
    /// the length; re-inserting an identical entry returns the input
    /// map unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::singleton(1, "one");
    /// let replaced = map.insert(1, "ONE");
    /// assert_eq!(replaced.len(), 1);
    /// assert_eq!(replaced.get(&1), Some(&"ONE"));
    ///
    /// let same = replaced.insert(1, "ONE");
    /// assert!(replaced.ptr_eq(&same));
    /// ```
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        Self {
            tree: self.tree.add(MapEntry { key, value }),
        }
    }

    /// Returns a map without the entry for `key`.
    ///
    /// Removing an absent key returns the input map unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::singleton(1, "one");
    /// let emptied = map.remove(&1);
    /// assert!(emptied.is_empty());
    /// assert_eq!(map.len(), 1);
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Self {
            tree: self.tree.remove_by(|entry| entry.key.borrow().cmp(key)),
        }
    }

    /// Returns an iterator over the entries whose keys are not below
    /// `key`, in ascending key order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeMap;
    ///
    /// let map = PersistentTreeMap::new()
    ///     .insert(1, "one")
    ///     .insert(2, "two")
    ///     .insert(3, "three");
    /// let tail: Vec<&i32> = map.iter_from(&2).map(|(key, _)| key).collect();
    /// assert_eq!(tail, vec![&2, &3]);
    /// ```
    pub fn iter_from<Q>(&self, key: &Q) -> PersistentTreeMapIterator<'_, K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        PersistentTreeMapIterator {
            inner: self.tree.iter_from_by(|entry| entry.key.borrow().cmp(key)),
        }
    }

    /// Forks the map into a transient for batch editing.
    #[must_use]
    pub fn transient(&self) -> TransientTreeMap<K, V> {
        TransientTreeMap {
            tree: self.tree.transient(),
        }
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Borrowing iterator over a [`PersistentTreeMap`], in ascending key
/// order.
pub struct PersistentTreeMapIterator<'a, K, V> {
    inner: PersistentBTreeIterator<'a, MapEntry<K, V>>,
}

impl<'a, K, V> Iterator for PersistentTreeMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| (&entry.key, &entry.value))
    }
}

impl<K, V> FusedIterator for PersistentTreeMapIterator<'_, K, V> {}

/// Owning iterator over a [`PersistentTreeMap`], in ascending key
/// order.
pub struct PersistentTreeMapIntoIterator<K, V> {
    entries: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for PersistentTreeMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl<K, V> ExactSizeIterator for PersistentTreeMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentTreeMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentTreeMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Clone, V: Clone> IntoIterator for PersistentTreeMap<K, V> {
    type Item = (K, V);
    type IntoIter = PersistentTreeMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        PersistentTreeMapIntoIterator {
            entries: self
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Vec<(K, V)>>()
                .into_iter(),
        }
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V> Default for PersistentTreeMap<K, V>
where
    K: Clone + Ord + 'static,
    V: Clone + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for PersistentTreeMap<K, V>
where
    K: Clone + Ord + 'static,
    V: Clone + PartialEq + 'static,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        // Built through a transient: one owned editing session beats
        // a persistent insert per entry.
        let mut transient = Self::new().transient();
        for (key, value) in iter {
            transient.insert(key, value);
        }
        transient.persistent()
    }
}

impl<K, V> PartialEq for PersistentTreeMap<K, V>
where
    K: Clone + Ord,
    V: Clone + PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(mine, theirs)| mine == theirs)
    }
}

impl<K, V> Eq for PersistentTreeMap<K, V>
where
    K: Clone + Ord,
    V: Clone + Eq,
{
}

/// Computes a hash value for this tree map.
///
/// The length is hashed first, then each entry in key order, so equal
/// maps hash equally regardless of insertion order.
impl<K, V> Hash for PersistentTreeMap<K, V>
where
    K: Clone + Ord + Hash,
    V: Clone + Hash,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for (key, value) in self {
            key.hash(state);
            value.hash(state);
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentTreeMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K: fmt::Display, V: fmt::Display> fmt::Display for PersistentTreeMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        let mut first = true;
        for (key, value) in self {
            if first {
                first = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{key}: {value}")?;
        }
        write!(formatter, "}}")
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for PersistentTreeMap<K, V>
where
    K: serde::Serialize,
    V: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentTreeMapVisitor<K, V> {
    key_marker: std::marker::PhantomData<K>,
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for PersistentTreeMapVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord + 'static,
    V: serde::Deserialize<'de> + Clone + PartialEq + 'static,
{
    type Value = PersistentTreeMap<K, V>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut transient = PersistentTreeMap::new().transient();
        while let Some((key, value)) = access.next_entry()? {
            transient.insert(key, value);
        }
        Ok(transient.persistent())
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for PersistentTreeMap<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord + 'static,
    V: serde::Deserialize<'de> + Clone + PartialEq + 'static,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentTreeMapVisitor {
            key_marker: std::marker::PhantomData,
            value_marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// TransientTreeMap Definition
// =============================================================================

/// A transient, mutable editing session over a [`PersistentTreeMap`].
///
/// Mutators apply in place on nodes owned by the session; call
/// [`TransientTreeMap::persistent`] to freeze the result. Once
/// frozen, every further method call panics with
/// [`TRANSIENT_AFTER_PERSISTENT`](super::TRANSIENT_AFTER_PERSISTENT).
///
/// # Examples
///
/// ```rust
/// use cambium::persistent::PersistentTreeMap;
///
/// let mut transient = PersistentTreeMap::new().transient();
/// for index in 0..100 {
///     transient.insert(index, index * 2);
/// }
/// let map = transient.persistent();
/// assert_eq!(map.len(), 100);
/// assert_eq!(map.get(&21), Some(&42));
/// ```
pub struct TransientTreeMap<K, V> {
    tree: TransientBTree<MapEntry<K, V>>,
}

impl<K, V> TransientTreeMap<K, V>
where
    K: Clone + Ord,
    V: Clone + PartialEq,
{
    /// Returns the number of entries.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the map contains no entries.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns a reference to the value stored under `key`, if any.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.tree
            .get_by(|entry| entry.key.borrow().cmp(key))
            .map(|entry| &entry.value)
    }

    /// Returns `true` if the map contains an entry for `key`.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Stores `value` under `key`, editing in place where possible.
    /// An existing value under the same key is replaced.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn insert(&mut self, key: K, value: V) -> &mut Self {
        self.tree.add(MapEntry { key, value });
        self
    }

    /// Removes the entry for `key`; removing an absent key is a
    /// no-op.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn remove<Q>(&mut self, key: &Q) -> &mut Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.tree.remove_by(|entry| entry.key.borrow().cmp(key));
        self
    }

    /// Returns an iterator over `(&key, &value)` pairs in ascending
    /// key order.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn iter(&self) -> PersistentTreeMapIterator<'_, K, V> {
        PersistentTreeMapIterator {
            inner: self.tree.iter(),
        }
    }

    /// Freezes the session into a persistent map.
    ///
    /// If no edit took effect, the originating map's value is
    /// returned as-is.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn persistent(&mut self) -> PersistentTreeMap<K, V> {
        PersistentTreeMap {
            tree: self.tree.persistent(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for TransientTreeMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("TransientTreeMap").field(&self.tree).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_insert_get_remove() {
        let map = PersistentTreeMap::new().insert(1, "one").insert(2, "two");
        assert_eq!(map.get(&1), Some(&"one"));
        let smaller = map.remove(&1);
        assert_eq!(smaller.get(&1), None);
        assert_eq!(map.get(&1), Some(&"one"));
    }

    #[rstest]
    fn test_same_key_insert_replaces_value() {
        let map = PersistentTreeMap::singleton(1, "one");
        let replaced = map.insert(1, "ONE");
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced.get(&1), Some(&"ONE"));
    }

    #[rstest]
    fn test_identical_entry_insert_is_identity() {
        let map = PersistentTreeMap::singleton(1, "one");
        assert!(map.ptr_eq(&map.insert(1, "one")));
    }

    #[rstest]
    fn test_entries_iterate_in_key_order() {
        let map: PersistentTreeMap<i32, i32> =
            (0..100).rev().map(|key| (key, key)).collect();
        let keys: Vec<i32> = map.keys().copied().collect();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());
    }

    #[rstest]
    fn test_transient_roundtrip_without_edits_is_identity() {
        let map: PersistentTreeMap<i32, i32> = [(1, 10)].into_iter().collect();
        let roundtrip = map.transient().persistent();
        assert!(map.ptr_eq(&roundtrip));
    }
}
