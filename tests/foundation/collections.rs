//! Integration tests for persistent collections
//!
//! Tests structural sharing of LtVec and LtMap as used by unit payloads.

use strata_foundation::{LtMap, LtVec};

// =============================================================================
// LtVec
// =============================================================================

#[test]
fn vec_push_back_shares_structure() {
    let a = LtVec::new().push_back(1).push_back(2);
    let b = a.push_back(3);
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 3);
    assert_eq!(b.get(2), Some(&3));
}

#[test]
fn vec_update_leaves_original() {
    let a: LtVec<i32> = [1, 2, 3].into_iter().collect();
    let b = a.update(1, 20).unwrap();
    assert_eq!(a.get(1), Some(&2));
    assert_eq!(b.get(1), Some(&20));
    assert!(a.update(3, 0).is_none());
}

#[test]
fn vec_equality_is_structural() {
    let a: LtVec<i32> = [1, 2].into_iter().collect();
    let b = LtVec::new().push_back(1).push_back(2);
    assert_eq!(a, b);
}

// =============================================================================
// LtMap
// =============================================================================

#[test]
fn map_iterates_in_key_order() {
    let m: LtMap<&str, i32> = [("b", 2), ("a", 1), ("c", 3)].into_iter().collect();
    let keys: Vec<_> = m.keys().copied().collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
}

#[test]
fn map_remove_returns_new_map() {
    let m = LtMap::new().insert("a", 1).insert("b", 2);
    let smaller = m.remove(&"a");
    assert!(m.contains_key(&"a"));
    assert!(!smaller.contains_key(&"a"));
    assert_eq!(smaller.len(), 1);
}

#[test]
fn map_in_place_mutation() {
    let original = LtMap::new().insert("a", 1);
    let mut copy = original.clone();
    assert_eq!(copy.insert_mut("a", 5), Some(1));
    if let Some(v) = copy.get_mut(&"a") {
        *v += 1;
    }
    assert_eq!(copy.get(&"a"), Some(&6));
    assert_eq!(original.get(&"a"), Some(&1));
    assert_eq!(copy.remove_mut(&"a"), Some(6));
    assert!(copy.is_empty());
}
