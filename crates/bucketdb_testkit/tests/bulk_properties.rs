//! Property tests for bulk passes and migrations.

use bucketdb_core::{
    encode_u64_key, Bucket, CoreError, Migration, MigrationMode, Migrator, Store, Transformed,
};
use bucketdb_testkit::{
    bucket_contents_strategy, decision_strategy, fallible_decision_strategy, BucketHarness,
    Decision, PropTestConfig,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn decisions_for(keys: Vec<Vec<u8>>, decisions: Vec<Decision>) -> BTreeMap<Vec<u8>, Decision> {
    keys.into_iter().zip(decisions).collect()
}

/// A migration list of `len` steps, each adding `step + 1` to every value.
/// Step `fail_at` fails on the last record instead.
fn counting_migrations(len: usize, fail_at: Option<usize>) -> Vec<Migration> {
    (0..len)
        .map(|step| {
            let fails = fail_at == Some(step);
            Migration::new(format!("add-{step}"), move |key: &[u8], value: u64| {
                if fails && key == encode_u64_key(3) {
                    return Err(CoreError::invalid_argument("step failed"));
                }
                Ok(Transformed::write(key.to_vec(), value + step as u64 + 1))
            })
        })
        .collect()
}

fn seeded_bucket(store: &Store) -> Bucket {
    let bucket = Bucket::open(store, "numbers").unwrap();
    for n in 1..=3u64 {
        bucket.create(encode_u64_key(n), &0u64).unwrap();
    }
    bucket
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn bulk_pass_matches_model(
        contents in bucket_contents_strategy(24),
        decisions in prop::collection::vec(decision_strategy(), 24),
    ) {
        let mut harness = BucketHarness::new();
        harness.seed(&contents);

        let decisions = decisions_for(contents.keys().cloned().collect(), decisions);
        harness
            .update_all(|key| decisions.get(key).cloned().unwrap_or(Decision::Keep))
            .unwrap();
        harness.verify_all();
    }

    #[test]
    fn failed_pass_leaves_bucket_untouched(
        contents in bucket_contents_strategy(24),
        decisions in prop::collection::vec(fallible_decision_strategy(), 24),
    ) {
        let mut harness = BucketHarness::new();
        harness.seed(&contents);
        let before = harness.model().clone();

        let decisions = decisions_for(contents.keys().cloned().collect(), decisions);
        let failing = decisions.values().any(|d| *d == Decision::Fail);
        let result =
            harness.update_all(|key| decisions.get(key).cloned().unwrap_or(Decision::Keep));

        prop_assert_eq!(result.is_err(), failing);
        if failing {
            prop_assert_eq!(harness.model(), &before);
        }
        harness.verify_all();
    }

    #[test]
    fn applied_count_reaches_list_length_or_stays(
        applied in 0usize..4,
        extra in 0usize..4,
        fail in any::<bool>(),
        atomic in any::<bool>(),
    ) {
        let store = Store::open_in_memory().unwrap();
        let bucket = seeded_bucket(&store);
        let mode = if atomic { MigrationMode::Atomic } else { MigrationMode::PerStep };
        let migrator = Migrator::new().mode(mode);

        migrator.migrate(&bucket, &counting_migrations(applied, None)).unwrap();
        prop_assert_eq!(bucket.applied_migrations().unwrap(), applied as u64);

        let total = applied + extra;
        let fail_at = (fail && extra > 0).then(|| total - 1);
        let result = migrator.migrate(&bucket, &counting_migrations(total, fail_at));

        if fail_at.is_some() {
            prop_assert!(result.is_err());
            prop_assert_eq!(bucket.applied_migrations().unwrap(), applied as u64);
        } else {
            let report = result.unwrap();
            prop_assert_eq!(report.from, applied as u64);
            prop_assert_eq!(report.to, total as u64);
            prop_assert_eq!(report.steps.len(), extra);
            prop_assert_eq!(bucket.applied_migrations().unwrap(), total as u64);
        }
    }

    #[test]
    fn shorter_list_is_rejected_without_changes(applied in 1usize..5, missing in 1usize..5) {
        let store = Store::open_in_memory().unwrap();
        let bucket = seeded_bucket(&store);
        bucket.migrate(&counting_migrations(applied, None)).unwrap();
        let before: Vec<u64> = bucket.get_all().unwrap();

        let supplied = applied.saturating_sub(missing);
        let result = bucket.migrate(&counting_migrations(supplied, None));

        prop_assert!(
            matches!(result, Err(CoreError::NotEnoughMigrations { .. })),
            "expected NotEnoughMigrations, got {:?}",
            result
        );
        prop_assert_eq!(bucket.applied_migrations().unwrap(), applied as u64);
        prop_assert_eq!(bucket.get_all::<u64>().unwrap(), before);
    }

    #[test]
    fn second_migrate_is_a_noop(len in 0usize..5) {
        let store = Store::open_in_memory().unwrap();
        let bucket = seeded_bucket(&store);
        let migrations = counting_migrations(len, None);

        bucket.migrate(&migrations).unwrap();
        let after_first: Vec<u64> = bucket.get_all().unwrap();
        let commits = store.stats().snapshot().transactions_committed;

        let report = bucket.migrate(&migrations).unwrap();
        prop_assert!(report.is_noop());
        prop_assert_eq!(bucket.get_all::<u64>().unwrap(), after_first);
        prop_assert_eq!(store.stats().snapshot().transactions_committed, commits);
    }
}
