//! Persistent (immutable) ordered set.
//!
//! This module provides [`PersistentTreeSet`], an immutable ordered
//! set that uses [`PersistentBTree`] internally, keeping its elements
//! sorted and sharing structure between versions.
//!
//! # Overview
//!
//! `PersistentTreeSet` wraps the B+tree engine with the element's own
//! `Ord` instance, so equality coincides with "compares equal" and an
//! insert of a present element is a no-op returning the same set.
//!
//! - O(log N) contains, insert, remove
//! - O(1) len and `is_empty`
//! - O(N) ordered iteration, O(log N) positioning with `iter_from`
//!
//! # Examples
//!
//! ```rust
//! use cambium::persistent::PersistentTreeSet;
//!
//! let set = PersistentTreeSet::new().insert(3).insert(1).insert(2);
//!
//! assert!(set.contains(&1));
//! assert!(!set.contains(&4));
//!
//! // Elements iterate in ascending order
//! let elements: Vec<&i32> = set.iter().collect();
//! assert_eq!(elements, vec![&1, &2, &3]);
//!
//! // Structural sharing: the original set is preserved
//! let updated = set.insert(4);
//! assert_eq!(set.len(), 3);      // Original unchanged
//! assert_eq!(updated.len(), 4);  // New version
//! ```
//!
//! # Set Operations
//!
//! ```rust
//! use cambium::persistent::PersistentTreeSet;
//!
//! let set_a: PersistentTreeSet<i32> = [1, 2, 3].into_iter().collect();
//! let set_b: PersistentTreeSet<i32> = [2, 3, 4].into_iter().collect();
//!
//! assert_eq!(set_a.union(&set_b).len(), 4);                // {1, 2, 3, 4}
//! assert_eq!(set_a.intersection(&set_b).len(), 2);         // {2, 3}
//! assert_eq!(set_a.difference(&set_b).len(), 1);           // {1}
//! assert_eq!(set_a.symmetric_difference(&set_b).len(), 2); // {1, 4}
//! ```

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;

use super::btree::{PersistentBTree, PersistentBTreeIterator, TransientBTree};

// =============================================================================
// PersistentTreeSet Definition
// =============================================================================

/// A persistent (immutable) ordered set based on a B+tree.
///
/// `PersistentTreeSet` is an immutable data structure that uses
/// structural sharing to efficiently support functional programming
/// patterns. Elements are kept in ascending `Ord` order, enabling
/// ordered iteration and "first element not below" positioning.
///
/// # Time Complexity
///
/// | Operation              | Complexity   |
/// |------------------------|--------------|
/// | `new`                  | O(1)         |
/// | `contains`             | O(log N)     |
/// | `insert`               | O(log N)     |
/// | `remove`               | O(log N)     |
/// | `len`                  | O(1)         |
/// | `is_empty`             | O(1)         |
/// | `union`                | O(m log(n + m)) |
/// | `intersection`         | O(n log m)   |
/// | `difference`           | O(n log m)   |
/// | `symmetric_difference` | O((n + m) log(n + m)) |
///
/// # Examples
///
/// ```rust
/// use cambium::persistent::PersistentTreeSet;
///
/// let set = PersistentTreeSet::singleton(42);
/// assert!(set.contains(&42));
/// assert!(!set.contains(&0));
/// ```
#[derive(Clone)]
pub struct PersistentTreeSet<T> {
    tree: PersistentBTree<T>,
}

impl<T> PersistentTreeSet<T> {
    /// Returns the number of elements in the set.
    ///
    /// # Complexity
    ///
    /// O(1)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set = PersistentTreeSet::new().insert(1).insert(2);
    /// assert_eq!(set.len(), 2);
    /// ```
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the set contains no elements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let empty: PersistentTreeSet<i32> = PersistentTreeSet::new();
    /// assert!(empty.is_empty());
    ///
    /// let non_empty = empty.insert(42);
    /// assert!(!non_empty.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns `true` if both sets share the same underlying root,
    /// which is how a no-op mutator hands back the input set.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.tree.ptr_eq(&other.tree)
    }

    /// Returns an iterator over the elements in ascending order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set = PersistentTreeSet::new().insert(2).insert(1);
    /// let elements: Vec<&i32> = set.iter().collect();
    /// assert_eq!(elements, vec![&1, &2]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentTreeSetIterator<'_, T> {
        PersistentTreeSetIterator {
            inner: self.tree.iter(),
        }
    }
}

impl<T: Clone + Ord + 'static> PersistentTreeSet<T> {
    /// Creates a new empty set ordered by `T`'s `Ord` instance.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set: PersistentTreeSet<i32> = PersistentTreeSet::new();
    /// assert!(set.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: PersistentBTree::new(
                |a: &T, b: &T| a.cmp(b),
                |a: &T, b: &T| a.cmp(b) == Ordering::Equal,
            ),
        }
    }

    /// Creates a set containing a single element.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set = PersistentTreeSet::singleton(42);
    /// assert_eq!(set.len(), 1);
    /// ```
    #[must_use]
    pub fn singleton(element: T) -> Self {
        Self::new().insert(element)
    }
}

impl<T: Clone + Ord> PersistentTreeSet<T> {
    /// Returns `true` if the set contains the specified element.
    ///
    /// The element may be any borrowed form of the set's element
    /// type, as long as `Ord` on the borrowed form matches.
    ///
    /// # Complexity
    ///
    /// O(log N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set = PersistentTreeSet::singleton("alpha".to_string());
    /// assert!(set.contains("alpha"));
    /// assert!(!set.contains("beta"));
    /// ```
    #[must_use]
    pub fn contains<Q>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(element).is_some()
    }

    /// Returns the stored element equal to the probe, if any.
    pub fn get<Q>(&self, element: &Q) -> Option<&T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.tree.get_by(|stored| stored.borrow().cmp(element))
    }

    /// Returns a set with `element` added.
    ///
    /// Inserting an element that is already present returns the input
    /// set unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set = PersistentTreeSet::new().insert(1);
    /// let same = set.insert(1);
    /// assert!(set.ptr_eq(&same));
    /// ```
    #[must_use]
    pub fn insert(&self, element: T) -> Self {
        Self {
            tree: self.tree.add(element),
        }
    }

    /// Returns a set without the specified element.
    ///
    /// Removing an absent element returns the input set unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set = PersistentTreeSet::new().insert(1).insert(2);
    /// let smaller = set.remove(&1);
    /// assert!(!smaller.contains(&1));
    /// assert!(set.contains(&1));
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, element: &Q) -> Self
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        Self {
            tree: self.tree.remove_by(|stored| stored.borrow().cmp(element)),
        }
    }

    /// Returns an iterator over the elements not below `element`, in
    /// ascending order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set: PersistentTreeSet<i32> = [1, 2, 3].into_iter().collect();
    /// let tail: Vec<&i32> = set.iter_from(&2).collect();
    /// assert_eq!(tail, vec![&2, &3]);
    /// ```
    pub fn iter_from<Q>(&self, element: &Q) -> PersistentTreeSetIterator<'_, T>
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        PersistentTreeSetIterator {
            inner: self.tree.iter_from_by(|stored| stored.borrow().cmp(element)),
        }
    }

    /// Forks the set into a transient for batch editing.
    #[must_use]
    pub fn transient(&self) -> TransientTreeSet<T> {
        TransientTreeSet {
            tree: self.tree.transient(),
        }
    }

    /// Returns the union of two sets.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cambium::persistent::PersistentTreeSet;
    ///
    /// let set_a: PersistentTreeSet<i32> = [1, 2].into_iter().collect();
    /// let set_b: PersistentTreeSet<i32> = [2, 3].into_iter().collect();
    /// assert_eq!(set_a.union(&set_b).len(), 3);
    /// ```
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut transient = self.transient();
        for element in other {
            transient.insert(element.clone());
        }
        transient.persistent()
    }

    /// Returns the intersection of two sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let mut transient = Self {
            tree: self.tree.cleared(),
        }
        .transient();
        for element in self {
            if other.contains(element) {
                transient.insert(element.clone());
            }
        }
        transient.persistent()
    }

    /// Returns the elements of `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut transient = self.transient();
        for element in other {
            transient.remove(element);
        }
        transient.persistent()
    }

    /// Returns the elements present in exactly one of the two sets.
    #[must_use]
    pub fn symmetric_difference(&self, other: &Self) -> Self {
        self.difference(other).union(&other.difference(self))
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Borrowing iterator over a [`PersistentTreeSet`], ascending.
pub struct PersistentTreeSetIterator<'a, T> {
    inner: PersistentBTreeIterator<'a, T>,
}

impl<'a, T> Iterator for PersistentTreeSetIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<T> FusedIterator for PersistentTreeSetIterator<'_, T> {}

/// Owning iterator over a [`PersistentTreeSet`], ascending.
pub struct PersistentTreeSetIntoIterator<T> {
    elements: std::vec::IntoIter<T>,
}

impl<T> Iterator for PersistentTreeSetIntoIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.elements.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.elements.size_hint()
    }
}

impl<T> ExactSizeIterator for PersistentTreeSetIntoIterator<T> {
    fn len(&self) -> usize {
        self.elements.len()
    }
}

impl<'a, T> IntoIterator for &'a PersistentTreeSet<T> {
    type Item = &'a T;
    type IntoIter = PersistentTreeSetIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Clone> IntoIterator for PersistentTreeSet<T> {
    type Item = T;
    type IntoIter = PersistentTreeSetIntoIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        PersistentTreeSetIntoIterator {
            elements: self
                .iter()
                .cloned()
                .collect::<Vec<T>>()
                .into_iter(),
        }
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T: Clone + Ord + 'static> Default for PersistentTreeSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Ord + 'static> FromIterator<T> for PersistentTreeSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        // Built through a transient: one owned editing session beats
        // a persistent insert per element.
        let mut transient = Self::new().transient();
        for element in iter {
            transient.insert(element);
        }
        transient.persistent()
    }
}

impl<T: Clone + Ord> PartialEq for PersistentTreeSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(mine, theirs)| mine == theirs)
    }
}

impl<T: Clone + Ord> Eq for PersistentTreeSet<T> {}

impl<T: Clone + Ord + Hash> Hash for PersistentTreeSet<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for element in self {
            element.hash(state);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentTreeSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<T> serde::Serialize for PersistentTreeSet<T>
where
    T: serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut sequence = serializer.serialize_seq(Some(self.len()))?;
        for element in self {
            sequence.serialize_element(element)?;
        }
        sequence.end()
    }
}

#[cfg(feature = "serde")]
struct PersistentTreeSetVisitor<T> {
    marker: std::marker::PhantomData<T>,
}

#[cfg(feature = "serde")]
impl<'de, T> serde::de::Visitor<'de> for PersistentTreeSetVisitor<T>
where
    T: serde::Deserialize<'de> + Clone + Ord + 'static,
{
    type Value = PersistentTreeSet<T>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a sequence")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut transient = PersistentTreeSet::new().transient();
        while let Some(element) = access.next_element()? {
            transient.insert(element);
        }
        Ok(transient.persistent())
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for PersistentTreeSet<T>
where
    T: serde::Deserialize<'de> + Clone + Ord + 'static,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(PersistentTreeSetVisitor {
            marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// TransientTreeSet Definition
// =============================================================================

/// A transient, mutable editing session over a [`PersistentTreeSet`].
///
/// Mutators apply in place on nodes owned by the session; call
/// [`TransientTreeSet::persistent`] to freeze the result. Once
/// frozen, every further method call panics with
/// [`TRANSIENT_AFTER_PERSISTENT`](super::TRANSIENT_AFTER_PERSISTENT).
///
/// # Examples
///
/// ```rust
/// use cambium::persistent::PersistentTreeSet;
///
/// let mut transient = PersistentTreeSet::new().transient();
/// for value in 0..100 {
///     transient.insert(value);
/// }
/// let set = transient.persistent();
/// assert_eq!(set.len(), 100);
/// ```
pub struct TransientTreeSet<T> {
    tree: TransientBTree<T>,
}

impl<T: Clone + Ord> TransientTreeSet<T> {
    /// Returns the number of elements.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the set contains no elements.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Returns `true` if the set contains the specified element.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn contains<Q>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.tree
            .get_by(|stored| stored.borrow().cmp(element))
            .is_some()
    }

    /// Adds an element, editing in place where possible.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn insert(&mut self, element: T) -> &mut Self {
        self.tree.add(element);
        self
    }

    /// Removes an element; removing an absent element is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    pub fn remove<Q>(&mut self, element: &Q) -> &mut Self
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.tree.remove_by(|stored| stored.borrow().cmp(element));
        self
    }

    /// Returns an iterator over the elements in ascending order.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn iter(&self) -> PersistentTreeSetIterator<'_, T> {
        PersistentTreeSetIterator {
            inner: self.tree.iter(),
        }
    }

    /// Freezes the session into a persistent set.
    ///
    /// If no edit took effect, the originating set's value is
    /// returned as-is.
    ///
    /// # Panics
    ///
    /// Panics if the transient was already frozen.
    #[must_use]
    pub fn persistent(&mut self) -> PersistentTreeSet<T> {
        PersistentTreeSet {
            tree: self.tree.persistent(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for TransientTreeSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("TransientTreeSet").field(&self.tree).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
