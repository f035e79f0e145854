//! Unit tests for PersistentTreeSet.

use cambium::persistent::PersistentTreeSet;
use rstest::rstest;

// =============================================================================
// Basic Construction Tests
// =============================================================================

#[rstest]
fn test_new_creates_empty_set() {
    let set: PersistentTreeSet<i32> = PersistentTreeSet::new();
    assert!(set.is_empty());
    assert_eq!(set.len(), 0);
}

#[rstest]
fn test_default_creates_empty_set() {
    let set: PersistentTreeSet<i32> = PersistentTreeSet::default();
    assert!(set.is_empty());
}

#[rstest]
fn test_singleton_creates_set_with_one_element() {
    let set = PersistentTreeSet::singleton(42);
    assert_eq!(set.len(), 1);
    assert!(set.contains(&42));
}

// =============================================================================
// Insert and Contains Tests
// =============================================================================

#[rstest]
fn test_insert_multiple_elements() {
    let set = PersistentTreeSet::new().insert(2).insert(1).insert(3);
    assert_eq!(set.len(), 3);
    assert!(set.contains(&1));
    assert!(set.contains(&2));
    assert!(set.contains(&3));
    assert!(!set.contains(&4));
}

#[rstest]
fn test_insert_duplicate_is_identity() {
    let set = PersistentTreeSet::new().insert(1);
    let same = set.insert(1);
    assert!(set.ptr_eq(&same));
    assert_eq!(same.len(), 1);
}

#[rstest]
fn test_insert_preserves_original_set() {
    let set = PersistentTreeSet::singleton(1);
    let bigger = set.insert(2);
    assert_eq!(set.len(), 1);
    assert_eq!(bigger.len(), 2);
    assert!(!set.contains(&2));
    assert!(bigger.contains(&2));
}

#[rstest]
fn test_contains_with_borrowed_key() {
    let set = PersistentTreeSet::singleton("alpha".to_string());
    assert!(set.contains("alpha"));
    assert!(!set.contains("beta"));
}

// =============================================================================
// Remove Tests
// =============================================================================

#[rstest]
fn test_remove_element() {
    let set = PersistentTreeSet::new().insert(1).insert(2);
    let smaller = set.remove(&1);
    assert!(!smaller.contains(&1));
    assert!(smaller.contains(&2));
    assert!(set.contains(&1));
}

#[rstest]
fn test_remove_absent_is_identity() {
    let set = PersistentTreeSet::new().insert(1);
    let same = set.remove(&9);
    assert!(set.ptr_eq(&same));
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[rstest]
fn test_iter_is_sorted() {
    let set = PersistentTreeSet::new().insert(3).insert(1).insert(2);
    let elements: Vec<&i32> = set.iter().collect();
    assert_eq!(elements, vec![&1, &2, &3]);
}

#[rstest]
fn test_iter_from_yields_suffix() {
    let set: PersistentTreeSet<i32> =
        [-10, -5, 0, 5, 99_997, 100_000, 100_001].into_iter().collect();
    for from in [-11, -10, 0, 100, 99_997, 100_000, 100_001, 100_002] {
        let expected: Vec<i32> = [-10, -5, 0, 5, 99_997, 100_000, 100_001]
            .into_iter()
            .filter(|value| *value >= from)
            .collect();
        let actual: Vec<i32> = set.iter_from(&from).copied().collect();
        assert_eq!(actual, expected, "suffix mismatch for from={from}");
    }
}

#[rstest]
fn test_into_iterator_owned() {
    let set: PersistentTreeSet<i32> = [3, 1, 2].into_iter().collect();
    let elements: Vec<i32> = set.into_iter().collect();
    assert_eq!(elements, vec![1, 2, 3]);
}

#[rstest]
fn test_from_iterator_dedupes() {
    let set: PersistentTreeSet<i32> = [1, 2, 2, 3, 3, 3].into_iter().collect();
    assert_eq!(set.len(), 3);
}

// =============================================================================
// Set Operation Tests
// =============================================================================

#[rstest]
fn test_union() {
    let set_a: PersistentTreeSet<i32> = [1, 2, 3].into_iter().collect();
    let set_b: PersistentTreeSet<i32> = [2, 3, 4].into_iter().collect();
    let union = set_a.union(&set_b);
    assert_eq!(union.len(), 4);
    for value in [1, 2, 3, 4] {
        assert!(union.contains(&value));
    }
}

#[rstest]
fn test_intersection() {
    let set_a: PersistentTreeSet<i32> = [1, 2, 3].into_iter().collect();
    let set_b: PersistentTreeSet<i32> = [2, 3, 4].into_iter().collect();
    let intersection = set_a.intersection(&set_b);
    assert_eq!(intersection.len(), 2);
    assert!(intersection.contains(&2));
    assert!(intersection.contains(&3));
    assert!(!intersection.contains(&1));
}

#[rstest]
fn test_difference() {
    let set_a: PersistentTreeSet<i32> = [1, 2, 3].into_iter().collect();
    let set_b: PersistentTreeSet<i32> = [2, 3, 4].into_iter().collect();
    let difference = set_a.difference(&set_b);
    assert_eq!(difference.len(), 1);
    assert!(difference.contains(&1));
}

#[rstest]
fn test_symmetric_difference() {
    let set_a: PersistentTreeSet<i32> = [1, 2, 3].into_iter().collect();
    let set_b: PersistentTreeSet<i32> = [2, 3, 4].into_iter().collect();
    let symmetric = set_a.symmetric_difference(&set_b);
    assert_eq!(symmetric.len(), 2);
    assert!(symmetric.contains(&1));
    assert!(symmetric.contains(&4));
}

#[rstest]
fn test_set_operations_leave_inputs_untouched() {
    let set_a: PersistentTreeSet<i32> = [1, 2].into_iter().collect();
    let set_b: PersistentTreeSet<i32> = [2, 3].into_iter().collect();
    let _ = set_a.union(&set_b);
    let _ = set_a.intersection(&set_b);
    let _ = set_a.difference(&set_b);
    assert_eq!(set_a.len(), 2);
    assert_eq!(set_b.len(), 2);
}

// =============================================================================
// Standard Trait Tests
// =============================================================================

#[rstest]
fn test_eq_ignores_insertion_order() {
    let forward: PersistentTreeSet<i32> = [1, 2, 3].into_iter().collect();
    let backward: PersistentTreeSet<i32> = [3, 2, 1].into_iter().collect();
    assert_eq!(forward, backward);

    let different: PersistentTreeSet<i32> = [1, 2].into_iter().collect();
    assert_ne!(forward, different);
}

#[rstest]
fn test_hash_consistent_with_eq() {
    use std::collections::HashMap;
    let mut outer: HashMap<PersistentTreeSet<i32>, &str> = HashMap::new();
    let key: PersistentTreeSet<i32> = [1, 2].into_iter().collect();
    outer.insert(key.clone(), "value");
    let lookup: PersistentTreeSet<i32> = [2, 1].into_iter().collect();
    assert_eq!(outer.get(&lookup), Some(&"value"));
}

#[rstest]
fn test_debug_format() {
    let set = PersistentTreeSet::new().insert(2).insert(1);
    assert_eq!(format!("{set:?}"), "{1, 2}");
}

// =============================================================================
// Transient Tests
// =============================================================================

#[rstest]
fn test_transient_batch_build() {
    let mut transient = PersistentTreeSet::new().transient();
    for value in 0..1000 {
        transient.insert(value);
    }
    let set = transient.persistent();
    assert_eq!(set.len(), 1000);
    assert!(set.contains(&999));
}

#[rstest]
fn test_transient_does_not_disturb_origin() {
    let base: PersistentTreeSet<i32> = (0..100).collect();
    let mut transient = base.transient();
    for value in 0..100 {
        transient.remove(&value);
    }
    let emptied = transient.persistent();
    assert_eq!(base.len(), 100);
    assert!(emptied.is_empty());
}

#[rstest]
fn test_transient_roundtrip_identity() {
    let set: PersistentTreeSet<i32> = [1, 2, 3].into_iter().collect();
    let mut transient = set.transient();
    let roundtrip = transient.persistent();
    assert!(set.ptr_eq(&roundtrip));
}

#[rstest]
#[should_panic(expected = "transient used after persistent call")]
fn test_transient_insert_after_persistent_panics() {
    let mut transient = PersistentTreeSet::new().transient();
    transient.insert(1);
    let _set = transient.persistent();
    transient.insert(2);
}

// =============================================================================
// Serde Tests
// =============================================================================

#[cfg(feature = "serde")]
#[rstest]
fn test_serde_roundtrip() {
    let set: PersistentTreeSet<i32> = [3, 1, 2].into_iter().collect();
    let serialized = serde_json::to_string(&set).expect("serialization failed");
    assert_eq!(serialized, "[1,2,3]");
    let deserialized: PersistentTreeSet<i32> =
        serde_json::from_str(&serialized).expect("deserialization failed");
    assert_eq!(set, deserialized);
}
