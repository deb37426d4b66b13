//! Assertions on map-shaped results, panicking like `assert_eq!`.

use std::collections::BTreeMap;
use std::fmt::Debug;

/// Asserts that every entry of `expected_subset` is present in
/// `actual_superset` with the same value
#[track_caller]
pub fn assert_dict_superset_of<K, V>(
    expected_subset: &BTreeMap<K, V>,
    actual_superset: &BTreeMap<K, V>,
) where
    K: Ord + Debug,
    V: PartialEq + Debug,
{
    for (key, expected) in expected_subset {
        let Some(actual) = actual_superset.get(key) else {
            panic!("key {key:?} missing from {actual_superset:?}");
        };
        assert_eq!(
            expected, actual,
            "Key {key:?} expected: {expected:?}, actual {actual:?}"
        );
    }
}

/// Asserts two maps of lists are equal once every list is sorted
#[track_caller]
pub fn assert_ordered_eq<K, T>(expected: &BTreeMap<K, Vec<T>>, actual: &BTreeMap<K, Vec<T>>)
where
    K: Ord + Clone + Debug,
    T: Ord + Clone + Debug,
{
    fn sorted<K: Ord + Clone, T: Ord + Clone>(map: &BTreeMap<K, Vec<T>>) -> BTreeMap<K, Vec<T>> {
        map.iter()
            .map(|(k, v)| {
                let mut v = v.clone();
                v.sort();
                (k.clone(), v)
            })
            .collect()
    }

    assert_eq!(sorted(expected), sorted(actual));
}
