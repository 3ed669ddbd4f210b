//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss.

mod common;

use aggregator_engine::error::{ErrorRecord, FailureKind, RunErrors};
use aggregator_engine::queue::{BatchQueue, QueueItem};
use aggregator_engine::resilience::RetryConfig;
use aggregator_engine::window::DateWindow;
use aggregator_engine::{AdapterError, Engine, EngineConfig};
use chrono::Duration as ChronoDuration;
use common::*;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Phase Delivery Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Every target receives every record exactly once, in batches no
    /// larger than the cap, and the ledger counts records plus End markers.
    #[test]
    fn phase_delivers_every_record_once(
        sizes in prop::collection::vec(0usize..25, 0..5),
        batch_size in 1usize..12,
        target_count in 1usize..4,
    ) {
        let sources: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(i, n)| MockSource::new(&format!("s{}", i), *n).shared())
            .collect();
        let targets: Vec<_> = (0..target_count)
            .map(|i| MockTarget::new(&format!("t{}", i)).shared())
            .collect();
        let history = MockHistory::new().shared();

        let engine = Engine::new(
            vec![phase("p", &sources, &targets)],
            history.clone(),
            EngineConfig { batch_size, retries: 1, ..EngineConfig::for_testing() },
        )
        .unwrap();

        let rt = runtime();
        let summary = rt.block_on(engine.execute(window(), false)).unwrap();

        let total: usize = sizes.iter().sum();
        prop_assert_eq!(summary.phases[0].records, total as u64);

        let entries = history.ledger().entries();
        prop_assert_eq!(entries.len(), 1);
        prop_assert_eq!(entries[0].count, (total + sizes.len()) as u64);

        for target in &targets {
            let (injected, batch_sizes) = rt.block_on(async {
                (target.injected().await, target.batch_sizes().await)
            });
            prop_assert_eq!(injected.len(), total);
            prop_assert!(batch_sizes.iter().all(|s| *s >= 1 && *s <= batch_size));

            let mut per_source: HashMap<String, Vec<u64>> = HashMap::new();
            for item in &injected {
                per_source
                    .entry(item.source_id.clone())
                    .or_default()
                    .push(item.record["n"].as_u64().unwrap());
            }
            for (i, n) in sizes.iter().enumerate() {
                let seen = per_source.remove(&format!("s{}", i)).unwrap_or_default();
                prop_assert_eq!(seen, (0..*n as u64).collect::<Vec<_>>());
            }
        }
    }
}

// =============================================================================
// Batch Queue Properties
// =============================================================================

proptest! {
    /// Draining with next_batch returns every record in queue order and
    /// every End marker, and never exceeds the cap.
    #[test]
    fn next_batch_preserves_items(
        runs in prop::collection::vec(0usize..10, 1..8),
        batch_size in 1usize..6,
    ) {
        let queue = BatchQueue::new();
        let mut expected = Vec::new();
        for (source, len) in runs.iter().enumerate() {
            for n in 0..*len {
                queue.put(QueueItem::record(format!("s{}", source), json!(n)));
                expected.push((format!("s{}", source), n as u64));
            }
            queue.put(QueueItem::End);
        }

        let rt = runtime();
        let mut seen = Vec::new();
        let mut ends = 0;
        while !queue.is_empty() {
            let batch = rt.block_on(queue.next_batch(batch_size));
            prop_assert!(batch.len() <= batch_size);
            prop_assert!(batch.ends <= 1);
            ends += batch.ends;
            seen.extend(
                batch
                    .items
                    .into_iter()
                    .map(|item| (item.source_id, item.record.as_u64().unwrap())),
            );
        }

        prop_assert_eq!(ends, runs.len());
        prop_assert_eq!(seen, expected);
    }
}

// =============================================================================
// Date Window Properties
// =============================================================================

fn arb_window() -> impl Strategy<Value = DateWindow> {
    (0i64..400, 0i64..30).prop_map(|(offset, len)| {
        let start = day(2024, 1, 1) + ChronoDuration::days(offset);
        DateWindow::new(start, start + ChronoDuration::days(len)).unwrap()
    })
}

proptest! {
    /// Overlap is symmetric.
    #[test]
    fn window_overlap_symmetric(a in arb_window(), b in arb_window()) {
        prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
    }

    /// Overlap holds exactly when some day lies in both windows.
    #[test]
    fn window_overlap_matches_shared_day(a in arb_window(), b in arb_window()) {
        let shared = a.start().max(b.start()) <= a.end().min(b.end());
        prop_assert_eq!(a.overlaps(&b), shared);
    }

    /// A window always overlaps itself and counts its days inclusively.
    #[test]
    fn window_self_overlap(a in arb_window()) {
        prop_assert!(a.overlaps(&a));
        prop_assert_eq!(a.days() as i64, (a.end() - a.start()).num_days() + 1);
    }
}

// =============================================================================
// Retry Properties
// =============================================================================

proptest! {
    /// Backoff never exceeds the configured ceiling.
    #[test]
    fn retry_delay_capped(
        initial_ms in 0u64..5_000,
        max_ms in 0u64..60_000,
        attempt in 1usize..40,
    ) {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_factor: 2.0,
        };
        prop_assert!(config.delay_for_attempt(attempt) <= config.max_delay);
    }

    /// Backoff is non-decreasing across attempts.
    #[test]
    fn retry_delay_monotonic(initial_ms in 1u64..1_000, attempt in 1usize..20) {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(3600),
            backoff_factor: 2.0,
        };
        prop_assert!(config.delay_for_attempt(attempt) <= config.delay_for_attempt(attempt + 1));
    }
}

// =============================================================================
// Error Reporting Properties
// =============================================================================

proptest! {
    /// The aggregated message names every collected failure.
    #[test]
    fn run_errors_enumerate_all(adapters in prop::collection::vec("[a-z]{1,8}", 1..10)) {
        let errors = RunErrors::new(
            adapters
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let kind = if i % 2 == 0 { FailureKind::Extract } else { FailureKind::Inject };
                    ErrorRecord::new(kind, name.as_str(), AdapterError::new(format!("failure {}", i)))
                })
                .collect(),
        );

        let message = errors.to_string();
        let header = format!("{} failures", adapters.len());
        prop_assert!(message.starts_with(&header));
        for (i, name) in adapters.iter().enumerate() {
            let line = format!("{}. ", i + 1);
            prop_assert!(message.contains(&line));
            let cause = format!("in {}. error: failure {}", name, i);
            prop_assert!(message.contains(&cause));
        }
    }
}
