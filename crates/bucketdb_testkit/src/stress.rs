//! Stress tests for bucketdb.
//!
//! These tests verify behavior under heavy load and concurrent access.

use bucketdb_core::{encode_u64_key, Bucket, CoreError, Transformed};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent reader threads.
    pub threads: usize,
    /// Size of each record's payload in bytes.
    pub record_size: usize,
    /// Number of distinct records.
    pub record_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            record_size: 256,
            record_count: 1_000,
        }
    }
}

/// Record written by the stress runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressRecord {
    /// Bumped by every rewrite pass.
    pub round: u64,
    /// Filler.
    pub payload: Vec<u8>,
}

impl StressRecord {
    fn new(config: &StressConfig) -> Self {
        Self {
            round: 0,
            payload: vec![0xAB; config.record_size],
        }
    }
}

fn key(index: usize) -> [u8; 8] {
    encode_u64_key(index as u64)
}

/// Fills `bucket` with `config.record_count` records in round 0.
pub fn seed_records(bucket: &Bucket, config: &StressConfig) -> Result<usize, CoreError> {
    let record = StressRecord::new(config);
    bucket.create_all((0..config.record_count).map(|_| record.clone()), |_, seq| {
        Ok::<_, CoreError>(encode_u64_key(seq.next_sequence()).to_vec())
    })
}

/// Run a sequential create stress test, one transaction per record.
pub fn stress_sequential_creates(bucket: &Bucket, config: &StressConfig) -> StressTestResult {
    let record = StressRecord::new(config);
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match bucket.create(key(i), &record) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a sequential read stress test.
pub fn stress_sequential_reads(bucket: &Bucket, config: &StressConfig) -> StressTestResult {
    let record = StressRecord::new(config);
    for i in 0..config.record_count {
        let _ = bucket.create(key(i), &record);
    }

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match bucket.try_get::<StressRecord>(key(i % config.record_count)) {
            Ok(Some(_)) => successful += 1,
            _ => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a transaction abort stress test.
///
/// Every other bulk rewrite fails halfway; failed passes must leave no
/// trace, so the final round equals the number of successful passes.
pub fn stress_rewrite_aborts(bucket: &Bucket, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let should_fail = i % 2 == 0;
        let mut seen = 0usize;
        let result = bucket.update_all(|key: &[u8], mut record: StressRecord| {
            seen += 1;
            if should_fail && seen > config.record_count / 2 {
                return Err(CoreError::invalid_argument("intentional"));
            }
            record.round += 1;
            Ok(Transformed::write(key.to_vec(), record))
        });

        match result {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run readers concurrently with bulk rewrites.
///
/// A writer bumps every record's round `config.operations` times while
/// `config.threads` readers load the whole bucket. A read that sees two
/// different rounds counts as failed.
pub fn stress_reads_during_rewrites(bucket: &Bucket, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let start = Instant::now();

    let readers: Vec<_> = (0..config.threads)
        .map(|_| {
            let bucket = bucket.clone();
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let done = Arc::clone(&done);

            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let consistent = bucket
                        .get_all::<StressRecord>()
                        .map(|records| records.windows(2).all(|w| w[0].round == w[1].round));
                    match consistent {
                        Ok(true) => successful.fetch_add(1, Ordering::Relaxed),
                        _ => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for _ in 0..config.operations {
        let result = bucket.update_all(|key: &[u8], mut record: StressRecord| {
            record.round += 1;
            Ok::<_, CoreError>(Transformed::write(key.to_vec(), record))
        });
        match result {
            Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
            Err(_) => failed.fetch_add(1, Ordering::Relaxed),
        };
    }
    done.store(true, Ordering::Release);

    for handle in readers {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a large transaction stress test.
pub fn stress_large_transactions(bucket: &Bucket, config: &StressConfig) -> StressTestResult {
    let batch_size = 100;
    let record = StressRecord::new(config);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for _ in 0..(config.operations / batch_size) {
        let result = bucket.create_all((0..batch_size).map(|_| record.clone()), |_, seq| {
            Ok::<_, CoreError>(encode_u64_key(seq.next_sequence()).to_vec())
        });

        match result {
            Ok(_) => successful += batch_size,
            Err(_) => failed += batch_size,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}
