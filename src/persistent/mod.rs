//! Persistent (immutable) ordered data structures.
//!
//! This module provides ordered containers that use structural sharing
//! to minimize copying:
//!
//! - [`PersistentBTree`]: the B+tree engine over an opaque element type
//!   with caller-supplied ordering and equality
//! - [`PersistentTreeSet`]: persistent ordered set
//! - [`PersistentTreeMap`]: persistent ordered map
//!
//! # Structural Sharing
//!
//! All data structures in this module use structural sharing to ensure
//! that inserting, replacing, or removing elements creates new versions
//! without copying the entire structure.
//!
//! # Transients
//!
//! Each persistent container can be forked into a transient: a
//! short-lived, single-owner editing view whose mutators apply in place
//! on nodes the transient owns. A transient produces the same final
//! value as the equivalent persistent call sequence with far fewer
//! allocations, which makes it the right tool for batch construction:
//!
//! ```rust
//! use cambium::persistent::PersistentTreeMap;
//!
//! let mut transient = PersistentTreeMap::new().transient();
//! for index in 0..100 {
//!     transient.insert(index, index * 2);
//! }
//! let map = transient.persistent();
//! assert_eq!(map.len(), 100);
//! assert_eq!(map.get(&42), Some(&84));
//! ```
//!
//! # Examples
//!
//! ## `PersistentTreeSet`
//!
//! ```rust
//! use cambium::persistent::PersistentTreeSet;
//!
//! let set = PersistentTreeSet::new().insert(3).insert(1).insert(2);
//!
//! // Elements are always in sorted order
//! let elements: Vec<&i32> = set.iter().collect();
//! assert_eq!(elements, vec![&1, &2, &3]);
//!
//! // Structural sharing: the original set is preserved
//! let updated = set.insert(0);
//! assert_eq!(set.len(), 3);     // Original unchanged
//! assert_eq!(updated.len(), 4); // New set
//! ```
//!
//! ## `PersistentTreeMap`
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

use std::cmp::Ordering;

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

// =============================================================================
// Closure Type Aliases
// =============================================================================

/// Shared comparator closure defining the total order of a tree's
/// elements.
///
/// Must be deterministic and side-effect free. With the `arc` feature
/// the closure additionally has to be `Send + Sync` so trees can cross
/// thread boundaries.
#[cfg(feature = "arc")]
pub type Comparator<E> = std::sync::Arc<dyn Fn(&E, &E) -> Ordering + Send + Sync>;

/// Shared comparator closure defining the total order of a tree's
/// elements.
///
/// Must be deterministic and side-effect free.
#[cfg(not(feature = "arc"))]
pub type Comparator<E> = std::rc::Rc<dyn Fn(&E, &E) -> Ordering>;

/// Shared equality closure for a tree's elements.
///
/// `equal(a, b)` must imply `compare(a, b) == Ordering::Equal` and may
/// be strictly stronger: a map façade compares both key and value here
/// while its comparator inspects only the key, which is what turns an
/// equal-key insert into a value replacement.
#[cfg(feature = "arc")]
pub type ElementEquality<E> = std::sync::Arc<dyn Fn(&E, &E) -> bool + Send + Sync>;

/// Shared equality closure for a tree's elements.
///
/// `equal(a, b)` must imply `compare(a, b) == Ordering::Equal` and may
/// be strictly stronger; a map façade compares both key and value here
/// while its comparator inspects only the key.
#[cfg(not(feature = "arc"))]
pub type ElementEquality<E> = std::rc::Rc<dyn Fn(&E, &E) -> bool>;

mod btree;
mod treemap;
mod treeset;

pub use btree::PersistentBTree;
pub use btree::PersistentBTreeIterator;
pub use btree::TransientBTree;
pub use btree::TRANSIENT_AFTER_PERSISTENT;
pub use treemap::PersistentTreeMap;
pub use treemap::PersistentTreeMapIntoIterator;
pub use treemap::PersistentTreeMapIterator;
pub use treemap::TransientTreeMap;
pub use treeset::PersistentTreeSet;
pub use treeset::PersistentTreeSetIntoIterator;
pub use treeset::PersistentTreeSetIterator;
pub use treeset::TransientTreeSet;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod reference_counter_tests {
    use super::ReferenceCounter;
    use rstest::rstest;

    #[rstest]
    fn test_reference_counter_clone() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(*reference_counter, *reference_counter_clone);
    }

    #[rstest]
    fn test_reference_counter_strong_count() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 2);
        drop(reference_counter_clone);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
    }
}
