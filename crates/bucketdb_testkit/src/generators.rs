//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random buckets, records and
//! per-record transform decisions, plus a reference model of what a bulk
//! pass should do with them.

use bucketdb_core::Transformed;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Strategy for generating valid bucket names.
pub fn bucket_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,31}").expect("Invalid regex")
}

/// Strategy for generating non-empty keys.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..16)
}

/// A small record used by generated buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Free text.
    pub label: String,
    /// A counter.
    pub count: u32,
}

/// Strategy for generating sample records.
pub fn sample_strategy() -> impl Strategy<Value = Sample> {
    (
        prop::string::string_regex("[a-z]{0,12}").expect("Invalid regex"),
        any::<u32>(),
    )
        .prop_map(|(label, count)| Sample { label, count })
}

/// Strategy for generating bucket contents.
pub fn bucket_contents_strategy(
    max_records: usize,
) -> impl Strategy<Value = BTreeMap<Vec<u8>, Sample>> {
    prop::collection::btree_map(key_strategy(), sample_strategy(), 0..max_records)
}

/// What a generated transform does with one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Write the record back unchanged.
    Keep,
    /// Write the record back with a new count.
    SetCount(u32),
    /// Move the record to another key.
    MoveTo(Vec<u8>),
    /// Delete the record.
    Delete,
    /// Fail the pass.
    Fail,
}

impl Decision {
    /// Applies the decision to one record, as a transform would.
    pub fn apply(&self, key: &[u8], record: Sample) -> Option<Transformed<Sample>> {
        match self {
            Decision::Keep => Some(Transformed::write(key, record)),
            Decision::SetCount(count) => Some(Transformed::write(
                key,
                Sample {
                    count: *count,
                    ..record
                },
            )),
            Decision::MoveTo(to) => Some(Transformed::write(to.clone(), record)),
            Decision::Delete => Some(Transformed::Delete),
            Decision::Fail => None,
        }
    }
}

/// Strategy for generating decisions that never fail.
pub fn decision_strategy() -> impl Strategy<Value = Decision> {
    prop_oneof![
        3 => Just(Decision::Keep),
        2 => any::<u32>().prop_map(Decision::SetCount),
        2 => key_strategy().prop_map(Decision::MoveTo),
        1 => Just(Decision::Delete),
    ]
}

/// Strategy for generating decisions that fail now and then.
pub fn fallible_decision_strategy() -> impl Strategy<Value = Decision> {
    prop_oneof![
        8 => decision_strategy(),
        1 => Just(Decision::Fail),
    ]
}

/// Computes what a successful bulk pass leaves behind.
///
/// Visits records in key order; removals (deletes and the source side of
/// moves) happen before writes, and later writes to the same key win.
/// A record kept under its own key with identical contents is not written
/// at all, so a record moved onto its key replaces it.
/// Returns `None` if any decision is [`Decision::Fail`].
pub fn expected_after_pass(
    records: &BTreeMap<Vec<u8>, Sample>,
    decide: impl Fn(&[u8]) -> Decision,
) -> Option<BTreeMap<Vec<u8>, Sample>> {
    let mut removed = Vec::new();
    let mut written = Vec::new();

    for (key, record) in records {
        match decide(key).apply(key, record.clone())? {
            Transformed::Delete => removed.push(key.clone()),
            Transformed::Write {
                key: new_key,
                record,
            } => {
                if new_key != *key {
                    removed.push(key.clone());
                } else if record == records[key] {
                    // Unchanged records are not rewritten.
                    continue;
                }
                written.push((new_key, record));
            }
        }
    }

    let mut expected = records.clone();
    for key in removed {
        expected.remove(&key);
    }
    expected.extend(written);
    Some(expected)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn bucket_name_is_valid(name in bucket_name_strategy()) {
            let first = name.chars().next();
            prop_assert!(first.map_or(false, |c| c.is_ascii_alphabetic()));
        }

        #[test]
        fn keys_are_never_empty(key in key_strategy()) {
            prop_assert!(!key.is_empty());
        }

        #[test]
        fn keep_everything_is_identity(records in bucket_contents_strategy(16)) {
            let expected = expected_after_pass(&records, |_| Decision::Keep);
            prop_assert_eq!(expected, Some(records));
        }
    }

    #[test]
    fn model_handles_swap_onto_vacated_key() {
        let mut records = BTreeMap::new();
        let a = Sample { label: "a".into(), count: 1 };
        let b = Sample { label: "b".into(), count: 2 };
        records.insert(b"a".to_vec(), a.clone());
        records.insert(b"b".to_vec(), b.clone());

        let expected = expected_after_pass(&records, |key| {
            if key == b"a" {
                Decision::MoveTo(b"b".to_vec())
            } else {
                Decision::MoveTo(b"c".to_vec())
            }
        })
        .unwrap();

        assert_eq!(expected.get(b"b".as_slice()), Some(&a));
        assert_eq!(expected.get(b"c".as_slice()), Some(&b));
        assert_eq!(expected.len(), 2);
    }

    #[test]
    fn model_reports_failure() {
        let mut records = BTreeMap::new();
        records.insert(b"k".to_vec(), Sample { label: String::new(), count: 0 });
        assert_eq!(expected_after_pass(&records, |_| Decision::Fail), None);
    }
}
