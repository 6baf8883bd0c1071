use anyhow::Result;
use bucketbeam::io::helpers::RetryConfig;
use bucketbeam::io::memory::MemoryObjectStore;
use bucketbeam::testing::{malformed_csv, read_parquet, sample_csv, seed_objects};
use bucketbeam::*;
use std::sync::Arc;
use std::time::Duration;

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 4,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

fn orchestrator(store: &MemoryObjectStore, config: ConverterConfig) -> BatchOrchestrator {
    bucketbeam::telemetry::init_tracing("bucketbeam=warn");
    BatchOrchestrator::new(config, Arc::new(store.clone())).expect("valid config")
}

#[test]
fn converts_every_object_under_prefix() -> Result<()> {
    let store = MemoryObjectStore::new();
    let keys = seed_objects(&store, "raw", "data/", 6);
    store.insert("raw", "other/skip.csv", sample_csv(1));

    let result = run(ConverterConfig::new("raw").with_prefix("data/"), Arc::new(store.clone()))?;

    assert_eq!(result.success_count(), 6);
    assert_eq!(result.failure_count(), 0);
    assert_eq!(result.attempted, 6);
    assert!(!result.timed_out);
    assert!(result.enumeration_error.is_none());
    assert_eq!(result.successes.keys().cloned().collect::<Vec<_>>(), keys);
    assert!(result.successes.values().all(|secs| *secs >= 0.0));

    for i in 0..6 {
        let rows = read_parquet(&store, "raw", &format!("processed/file{i}.parquet"))?;
        assert_eq!(rows.num_rows(), i + 1);
        assert!(store.object("raw", &format!("processed/file{i}.avro")).is_some());
    }
    assert!(store.object("raw", "processed/skip.parquet").is_none());
    Ok(())
}

#[test]
fn one_bad_object_does_not_stop_the_batch() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 4);
    store.insert("raw", "data/broken.csv", malformed_csv());

    let result = orchestrator(&store, ConverterConfig::new("raw").with_prefix("data/")).run();

    assert_eq!(result.attempted, 5);
    assert_eq!(result.success_count(), 4);
    assert_eq!(result.failed_keys(), ["data/broken.csv"]);
    assert!(!result.successes.contains_key("data/broken.csv"));
    assert!(matches!(
        result.failures[0].error,
        Some(ConversionError::Parse { .. })
    ));
    assert_eq!(result.metrics.objects_failed, 1);
    assert_eq!(result.metrics.objects_converted, 4);
}

#[test]
fn empty_prefix_yields_empty_result() {
    let store = MemoryObjectStore::new();
    store.create_container("raw");

    let result = orchestrator(&store, ConverterConfig::new("raw").with_prefix("nothing/")).run();

    assert!(result.is_empty());
    assert_eq!(result.attempted, 0);
    assert!(result.enumeration_error.is_none());
    assert_eq!(result.statistics(), BatchStatistics::default());
}

#[test]
fn listing_failure_degrades_to_empty_result() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 2);
    store.fail_list(StoreErrorKind::AccessDenied);

    let result = orchestrator(&store, ConverterConfig::new("raw").with_prefix("data/")).run();

    assert!(result.is_empty());
    let err = result.enumeration_error.expect("listing failed");
    assert_eq!(err.source.kind, StoreErrorKind::AccessDenied);
    assert_eq!(store.get_calls(), 0);
}

#[test]
fn missing_container_is_an_enumeration_error() {
    let store = MemoryObjectStore::new();
    let result = orchestrator(&store, ConverterConfig::new("absent")).run();
    assert!(result.is_empty());
    assert!(result.enumeration_error.is_some());
}

#[test]
fn in_flight_objects_never_exceed_worker_count() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 12);
    store.set_latency(Duration::from_millis(15));

    let config = ConverterConfig::new("raw")
        .with_prefix("data/")
        .with_max_workers(3);
    let result = orchestrator(&store, config).run();

    assert_eq!(result.success_count(), 12);
    assert!(result.metrics.peak_in_flight <= 3, "{:?}", result.metrics);
    assert!(result.metrics.peak_in_flight >= 1);
    assert!(store.peak_concurrent_gets() <= 3);
}

#[test]
fn deadline_reports_completed_outcomes_only() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 4);
    store.set_latency(Duration::from_millis(400));

    let config = ConverterConfig::new("raw")
        .with_prefix("data/")
        .with_max_workers(1)
        .with_deadline(Duration::from_secs(1));
    let result = orchestrator(&store, config).run();

    assert!(result.timed_out);
    assert!(result.success_count() < 4);
    assert_eq!(
        result.success_count() + result.failure_count() + result.unfinished.len(),
        4
    );
    assert!(result.wall_clock_secs < 2.0, "{}", result.wall_clock_secs);
}

#[test]
fn transient_write_errors_are_retried() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 1);
    store.fail_next_puts(2, StoreErrorKind::Throttling);

    let config = ConverterConfig::new("raw")
        .with_prefix("data/")
        .with_retry(fast_retry());
    let result = orchestrator(&store, config).run();

    assert_eq!(result.success_count(), 1, "{:?}", result.failures);
    assert_eq!(store.put_calls(), 4);
}

#[test]
fn without_retry_transient_errors_fail_the_object() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 1);
    store.fail_next_puts(1, StoreErrorKind::Throttling);

    let config = ConverterConfig::new("raw")
        .with_prefix("data/")
        .with_retry(RetryConfig::disabled());
    let result = orchestrator(&store, config).run();

    assert_eq!(result.failure_count(), 1);
    assert_eq!(store.put_calls(), 2);
}

#[test]
fn failed_subset_can_be_rerun_from_cache() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 3);
    store.fail_next_puts(2, StoreErrorKind::AccessDenied);

    let config = ConverterConfig::new("raw")
        .with_prefix("data/")
        .with_max_workers(1);
    let orchestrator = orchestrator(&store, config);
    let first = orchestrator.run();
    assert_eq!(first.failed_keys(), ["data/file0.csv"]);

    let second = orchestrator.rerun_failed(&first);
    assert_eq!(second.success_count(), 1);
    assert!(second.successes.contains_key("data/file0.csv"));
    assert_eq!(store.get_calls_for("raw", "data/file0.csv"), 1);
    assert_eq!(second.metrics.cache_hits, 1);
    assert_eq!(second.metrics.cache_misses, 0);
}

#[test]
fn rerun_reads_failures_from_their_own_container() {
    let store = MemoryObjectStore::new();
    store.insert("alt", "extra/late.csv", sample_csv(2));
    store.fail_next_puts(2, StoreErrorKind::AccessDenied);

    let config = ConverterConfig::new("raw")
        .with_prefix("data/")
        .with_max_workers(1);
    let orchestrator = orchestrator(&store, config);
    let first = orchestrator.run_objects(vec![ObjectReference::new("alt", "extra/late.csv")]);
    assert_eq!(first.failed_objects(), [ObjectReference::new("alt", "extra/late.csv")]);

    let second = orchestrator.rerun_failed(&first);
    assert_eq!(second.success_count(), 1, "{:?}", second.failures);
    assert_eq!(second.failures.len(), 0);
    assert_eq!(store.get_calls_for("alt", "extra/late.csv"), 1);
    assert!(store.object("raw", "processed/extra/late.parquet").is_some());
}

#[test]
fn explicit_objects_skip_enumeration() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 3);

    let orchestrator = orchestrator(&store, ConverterConfig::new("raw").with_prefix("data/"));
    let result = orchestrator.run_objects(vec![ObjectReference::new("raw", "data/file2.csv")]);

    assert_eq!(store.list_calls(), 0);
    assert_eq!(result.success_count(), 1);
    assert!(store.object("raw", "processed/file2.parquet").is_some());
    assert!(store.object("raw", "processed/file0.parquet").is_none());
}

#[test]
fn rerunning_a_batch_overwrites_the_same_outputs() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 3);
    let orchestrator = orchestrator(&store, ConverterConfig::new("raw").with_prefix("data/"));

    orchestrator.run();
    let after_first = store.keys("raw");
    let second = orchestrator.run();

    assert_eq!(second.success_count(), 3);
    assert_eq!(store.keys("raw"), after_first);
    assert_eq!(after_first.len(), 9);
}

#[test]
fn outputs_in_the_input_container_are_not_reconverted() {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "", 2);
    let orchestrator = orchestrator(&store, ConverterConfig::new("raw"));

    assert_eq!(orchestrator.run().success_count(), 2);
    let second = orchestrator.run();
    assert_eq!(second.attempted, 2);
    assert!(second.successes.keys().all(|k| !k.starts_with("processed/")));
}

#[test]
fn statistics_and_metrics_summarise_the_run() -> Result<()> {
    let store = MemoryObjectStore::new();
    seed_objects(&store, "raw", "data/", 5);

    let result = orchestrator(&store, ConverterConfig::new("raw").with_prefix("data/")).run();
    let stats = result.statistics();

    assert_eq!(stats.total_files, 5);
    assert!(stats.min_time <= stats.average_time);
    assert!(stats.average_time <= stats.max_time);
    assert!(stats.total_time >= stats.max_time);

    assert_eq!(result.metrics.objects_listed, 5);
    assert_eq!(result.metrics.objects_attempted, 5);
    assert_eq!(result.metrics.cache_misses, 5);
    assert!(result.metrics.bytes_read > 0);
    assert!(result.metrics.bytes_written > result.metrics.bytes_read);

    let json = serde_json::to_value(&result)?;
    assert_eq!(json["attempted"], 5);
    assert!(json["enumeration_error"].is_null());
    Ok(())
}

#[test]
fn invalid_configuration_is_an_error() {
    let store = MemoryObjectStore::new();
    let err = run(ConverterConfig::new(""), Arc::new(store)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
