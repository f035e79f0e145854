//! Unit tests for PersistentTreeMap.

use cambium::persistent::PersistentTreeMap;
use rstest::rstest;

// =============================================================================
// Basic Construction Tests
// =============================================================================

#[rstest]
fn test_new_creates_empty_map() {
    let map: PersistentTreeMap<i32, String> = PersistentTreeMap::new();
    assert!(map.is_empty());
    assert_eq!(map.len(), 0);
}

#[rstest]
fn test_default_creates_empty_map() {
    let map: PersistentTreeMap<i32, String> = PersistentTreeMap::default();
    assert!(map.is_empty());
}

#[rstest]
fn test_singleton_creates_map_with_one_entry() {
    let map = PersistentTreeMap::singleton(42, "answer".to_string());
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&42), Some(&"answer".to_string()));
}

// =============================================================================
// Insert and Get Tests
// =============================================================================

#[rstest]
fn test_insert_and_get() {
    let map = PersistentTreeMap::new()
        .insert(2, "two")
        .insert(1, "one")
        .insert(3, "three");
    assert_eq!(map.len(), 3);
    assert_eq!(map.get(&1), Some(&"one"));
    assert_eq!(map.get(&2), Some(&"two"));
    assert_eq!(map.get(&3), Some(&"three"));
    assert_eq!(map.get(&4), None);
}

#[rstest]
fn test_insert_replaces_value_and_keeps_length() {
    let map = PersistentTreeMap::singleton(1, "one");
    let replaced = map.insert(1, "ONE");
    assert_eq!(map.get(&1), Some(&"one"));
    assert_eq!(replaced.get(&1), Some(&"ONE"));
    assert_eq!(map.len(), 1);
    assert_eq!(replaced.len(), 1);
}

#[rstest]
fn test_insert_identical_entry_is_identity() {
    let map = PersistentTreeMap::singleton(1, "one");
    let same = map.insert(1, "one");
    assert!(map.ptr_eq(&same));
}

#[rstest]
fn test_get_with_borrowed_key() {
    let map = PersistentTreeMap::singleton("one".to_string(), 1);
    assert_eq!(map.get("one"), Some(&1));
    assert_eq!(map.get("two"), None);
}

#[rstest]
fn test_get_entry() {
    let map = PersistentTreeMap::singleton(7, "seven");
    assert_eq!(map.get_entry(&7), Some((&7, &"seven")));
    assert_eq!(map.get_entry(&8), None);
}

#[rstest]
fn test_replace_at_internal_boundary_key() {
    // 98 ascending entries make key 63 a separator inside an
    // internal node; replacing its value exercises the separator
    // rewrite path.
    let mut map = PersistentTreeMap::new();
    for value in 0..98 {
        map = map.insert(value, value);
    }
    let replaced = map.insert(63, 64);
    assert_eq!(replaced.len(), 98);
    assert_eq!(replaced.get(&63), Some(&64));
    assert_eq!(map.get(&63), Some(&63));
}

// =============================================================================
// Remove Tests
// =============================================================================

#[rstest]
fn test_remove_entry() {
    let map = PersistentTreeMap::new().insert(1, "one").insert(2, "two");
    let smaller = map.remove(&1);
    assert_eq!(smaller.get(&1), None);
    assert_eq!(smaller.get(&2), Some(&"two"));
    assert_eq!(map.get(&1), Some(&"one"));
}

#[rstest]
fn test_remove_absent_is_identity() {
    let map = PersistentTreeMap::singleton(1, "one");
    let same = map.remove(&9);
    assert!(map.ptr_eq(&same));
}

// =============================================================================
// Iteration Tests
// =============================================================================

#[rstest]
fn test_iter_is_key_ordered() {
    let map = PersistentTreeMap::new()
        .insert(3, "three")
        .insert(1, "one")
        .insert(2, "two");
    let entries: Vec<(&i32, &&str)> = map.iter().collect();
    assert_eq!(entries, vec![(&1, &"one"), (&2, &"two"), (&3, &"three")]);
}

#[rstest]
fn test_keys_and_values() {
    let map = PersistentTreeMap::new().insert(2, "b").insert(1, "a");
    let keys: Vec<&i32> = map.keys().collect();
    let values: Vec<&&str> = map.values().collect();
    assert_eq!(keys, vec![&1, &2]);
    assert_eq!(values, vec![&"a", &"b"]);
}

#[rstest]
fn test_iter_from_positions_at_key() {
    let map: PersistentTreeMap<i32, i32> = (0..10).map(|value| (value, value * 10)).collect();
    let tail: Vec<i32> = map.iter_from(&7).map(|(key, _)| *key).collect();
    assert_eq!(tail, vec![7, 8, 9]);
    assert_eq!(map.iter_from(&10).count(), 0);
}

#[rstest]
fn test_into_iterator_owned() {
    let map: PersistentTreeMap<i32, i32> = [(2, 20), (1, 10)].into_iter().collect();
    let entries: Vec<(i32, i32)> = map.into_iter().collect();
    assert_eq!(entries, vec![(1, 10), (2, 20)]);
}

#[rstest]
fn test_from_iterator_later_entries_win() {
    let map: PersistentTreeMap<i32, i32> = [(1, 10), (1, 20), (1, 30)].into_iter().collect();
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&1), Some(&30));
}

// =============================================================================
// Standard Trait Tests
// =============================================================================

#[rstest]
fn test_eq_ignores_insertion_order() {
    let forward: PersistentTreeMap<i32, i32> = [(1, 10), (2, 20)].into_iter().collect();
    let backward: PersistentTreeMap<i32, i32> = [(2, 20), (1, 10)].into_iter().collect();
    assert_eq!(forward, backward);

    let different: PersistentTreeMap<i32, i32> = [(1, 10), (2, 21)].into_iter().collect();
    assert_ne!(forward, different);
}

#[rstest]
fn test_hash_consistent_with_eq() {
    use std::collections::HashMap;
    let mut outer: HashMap<PersistentTreeMap<i32, i32>, &str> = HashMap::new();
    let key: PersistentTreeMap<i32, i32> = [(1, 10), (2, 20)].into_iter().collect();
    outer.insert(key.clone(), "value");
    let lookup: PersistentTreeMap<i32, i32> = [(2, 20), (1, 10)].into_iter().collect();
    assert_eq!(outer.get(&lookup), Some(&"value"));
}

#[rstest]
fn test_debug_format() {
    let map = PersistentTreeMap::new().insert(2, "two").insert(1, "one");
    assert_eq!(format!("{map:?}"), r#"{1: "one", 2: "two"}"#);
}

#[rstest]
fn test_display_format() {
    let map = PersistentTreeMap::new().insert(2, "two").insert(1, "one");
    assert_eq!(format!("{map}"), "{1: one, 2: two}");
}

#[rstest]
fn test_display_empty_map() {
    let map: PersistentTreeMap<i32, i32> = PersistentTreeMap::new();
    assert_eq!(format!("{map}"), "{}");
}

// =============================================================================
// Transient Tests
// =============================================================================

#[rstest]
fn test_transient_batch_build() {
    let mut transient = PersistentTreeMap::new().transient();
    for index in 0..1000 {
        transient.insert(index, index * 2);
    }
    let map = transient.persistent();
    assert_eq!(map.len(), 1000);
    assert_eq!(map.get(&500), Some(&1000));
}

#[rstest]
fn test_transient_replace_at_internal_boundary_key() {
    let mut transient = PersistentTreeMap::new().transient();
    for value in 0..98 {
        transient.insert(value, value);
    }
    transient.insert(63, 64);
    assert_eq!(transient.len(), 98);
    assert_eq!(transient.get(&63), Some(&64));
    let map = transient.persistent();
    assert_eq!(map.get(&63), Some(&64));
}

#[rstest]
fn test_transient_remove_and_reads() {
    let base: PersistentTreeMap<i32, i32> = (0..100).map(|value| (value, value)).collect();
    let mut transient = base.transient();
    transient.remove(&50);
    assert!(!transient.contains_key(&50));
    assert_eq!(transient.len(), 99);
    let map = transient.persistent();
    assert_eq!(map.len(), 99);
    assert_eq!(base.len(), 100);
}

#[rstest]
fn test_transient_roundtrip_identity() {
    let map: PersistentTreeMap<i32, i32> = [(1, 10)].into_iter().collect();
    let mut transient = map.transient();
    let roundtrip = transient.persistent();
    assert!(map.ptr_eq(&roundtrip));
}

#[rstest]
#[should_panic(expected = "transient used after persistent call")]
fn test_transient_insert_after_persistent_panics() {
    let mut transient = PersistentTreeMap::new().transient();
    transient.insert(1, "one");
    let _map = transient.persistent();
    transient.insert(2, "two");
}

#[rstest]
#[should_panic(expected = "transient used after persistent call")]
fn test_transient_get_after_persistent_panics() {
    let mut transient = PersistentTreeMap::new().transient();
    transient.insert(1, "one");
    let _map = transient.persistent();
    let _ = transient.get(&1);
}

// =============================================================================
// Serde Tests
// =============================================================================

#[cfg(feature = "serde")]
#[rstest]
fn test_serde_roundtrip() {
    let map: PersistentTreeMap<String, i32> = [("b".to_string(), 2), ("a".to_string(), 1)]
        .into_iter()
        .collect();
    let serialized = serde_json::to_string(&map).expect("serialization failed");
    assert_eq!(serialized, r#"{"a":1,"b":2}"#);
    let deserialized: PersistentTreeMap<String, i32> =
        serde_json::from_str(&serialized).expect("deserialization failed");
    assert_eq!(map, deserialized);
}
