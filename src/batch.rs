//! Batch orchestration: enumerate inputs and convert them on a bounded pool.
//!
//! The orchestrator owns one rayon pool of `2 × max_workers` threads and
//! keeps at most `max_workers` object tasks in flight: the first window is
//! submitted up front and each completion admits the next object. The extra
//! threads are there so both format writes of every in-flight object can
//! proceed at once.
//!
//! Outcomes come back over a channel and are folded into the result in
//! arrival order. Per-object failures never stop the batch, and a listing
//! failure degrades to an empty result.

use crate::config::{ConfigError, ConverterConfig};
use crate::convert::{ConversionOutcome, ObjectConverter};
use crate::error::EnumerationError;
use crate::io::helpers::store_for;
use crate::io::reader::{CacheStats, reader_for};
use crate::io::store::{ObjectReference, ObjectStore};
use crate::metrics::{BatchMetrics, MetricsSnapshot};
use glob::Pattern;
use ordered_float::OrderedFloat;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Instant;
use tracing::{error, info, warn};

// ============================================================================
// BatchResult
// ============================================================================

/// Everything a batch run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    /// Elapsed seconds per successfully converted key.
    pub successes: BTreeMap<String, f64>,
    /// Failed outcomes, in arrival order.
    pub failures: Vec<ConversionOutcome>,
    /// Objects handed to a worker.
    pub attempted: usize,
    pub wall_clock_secs: f64,
    #[serde(serialize_with = "serialize_enumeration_error")]
    pub enumeration_error: Option<EnumerationError>,
    /// Set when the deadline passed before every object finished.
    pub timed_out: bool,
    /// Objects abandoned or never started because of the deadline.
    pub unfinished: Vec<ObjectReference>,
    pub metrics: MetricsSnapshot,
}

fn serialize_enumeration_error<S: serde::Serializer>(
    error: &Option<EnumerationError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl BatchResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.failures.is_empty()
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Keys worth another run: failures plus anything the deadline cut off.
    #[must_use]
    pub fn failed_keys(&self) -> Vec<String> {
        self.failed_objects().into_iter().map(|o| o.key).collect()
    }

    /// Objects worth another run, each in the container it was read from.
    #[must_use]
    pub fn failed_objects(&self) -> Vec<ObjectReference> {
        self.failures
            .iter()
            .map(ConversionOutcome::object)
            .chain(self.unfinished.iter().cloned())
            .collect()
    }

    /// Timing summary over the successful conversions.
    #[must_use]
    pub fn statistics(&self) -> BatchStatistics {
        BatchStatistics::from_times(self.successes.values().copied())
    }

    fn record(&mut self, outcome: ConversionOutcome) {
        if outcome.success {
            self.successes.insert(outcome.key, outcome.elapsed_secs);
        } else {
            self.failures.push(outcome);
        }
    }
}

/// Aggregate timing over converted objects, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BatchStatistics {
    pub total_files: usize,
    pub total_time: f64,
    pub average_time: f64,
    pub min_time: f64,
    pub max_time: f64,
}

impl BatchStatistics {
    /// All zero for an empty input.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_times(times: impl IntoIterator<Item = f64>) -> Self {
        let times: Vec<OrderedFloat<f64>> = times.into_iter().map(OrderedFloat).collect();
        let (Some(min), Some(max)) = (times.iter().min(), times.iter().max()) else {
            return Self::default();
        };
        let total: f64 = times.iter().map(|t| t.0).sum();
        Self {
            total_files: times.len(),
            total_time: total,
            average_time: total / times.len() as f64,
            min_time: min.0,
            max_time: max.0,
        }
    }
}

// ============================================================================
// BatchOrchestrator
// ============================================================================

/// Runs conversion batches against one store with one configuration.
///
/// The read cache and the worker pool live as long as the orchestrator, so
/// a re-run of failed keys can reuse cached inputs.
pub struct BatchOrchestrator {
    config: ConverterConfig,
    store: Arc<dyn ObjectStore>,
    converter: Arc<ObjectConverter>,
    pool: ThreadPool,
    key_matcher: Option<Pattern>,
}

impl BatchOrchestrator {
    /// Validate `config` and build the pool, reader and converter.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the pool cannot
    /// be started.
    pub fn new(config: ConverterConfig, store: Arc<dyn ObjectStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let key_matcher = config.key_matcher()?;

        let store = store_for(store, &config.retry);
        let reader = reader_for(Arc::clone(&store), config.cache_size);
        let converter = Arc::new(ObjectConverter::new(
            reader,
            Arc::clone(&store),
            config.layout(),
            config.output_container(),
            config.encode_options(),
        ));

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_workers.saturating_mul(2))
            .thread_name(|i| format!("bucketbeam-worker-{i}"))
            .panic_handler(|_| error!("worker task panicked outside a conversion"))
            .build()
            .map_err(|e| ConfigError::Pool(e.to_string()))?;

        Ok(Self {
            config,
            store,
            converter,
            pool,
            key_matcher,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    #[must_use]
    pub fn converter(&self) -> &ObjectConverter {
        &self.converter
    }

    /// List the objects a batch would convert.
    ///
    /// Directory markers are skipped, as are keys rejected by `key_pattern`
    /// and, when writing back into the input container, keys already under
    /// the output prefix.
    ///
    /// # Errors
    /// Returns an error if the gateway listing fails.
    pub fn enumerate(&self) -> Result<Vec<ObjectReference>, EnumerationError> {
        let container = &self.config.input_container;
        let prefix = &self.config.prefix;
        let listed = self
            .store
            .list(container, prefix)
            .map_err(|source| EnumerationError {
                container: container.clone(),
                prefix: prefix.clone(),
                source,
            })?;

        let layout = self.converter.layout();
        let skip_outputs = self.converter.output_container() == container.as_str()
            && !layout.output_prefix().is_empty();

        Ok(listed
            .into_iter()
            .filter(|obj| !obj.key.ends_with('/'))
            .filter(|obj| !(skip_outputs && obj.key.starts_with(layout.output_prefix())))
            .filter(|obj| {
                self.key_matcher.as_ref().is_none_or(|pattern| {
                    let relative = obj.key.strip_prefix(prefix.as_str()).unwrap_or(&obj.key);
                    pattern.matches(relative)
                })
            })
            .collect())
    }

    /// Enumerate the configured prefix and convert every object found.
    pub fn run(&self) -> BatchResult {
        let start = Instant::now();
        let metrics = Arc::new(BatchMetrics::new());
        let cache_before = self.converter.cache_stats();

        let objects = match self.enumerate() {
            Ok(objects) => objects,
            Err(err) => {
                error!(error = %err, "enumeration failed, nothing converted");
                let mut result = BatchResult {
                    enumeration_error: Some(err),
                    ..BatchResult::default()
                };
                self.finish(&mut result, start, &metrics, cache_before);
                return result;
            }
        };

        metrics.record_listed(objects.len());
        if objects.is_empty() {
            warn!(
                container = %self.config.input_container,
                prefix = %self.config.prefix,
                "no objects found"
            );
        } else {
            info!(
                container = %self.config.input_container,
                prefix = %self.config.prefix,
                count = objects.len(),
                "found objects to convert"
            );
        }
        self.process(objects, start, &metrics, cache_before)
    }

    /// Convert an explicit list of objects, skipping enumeration.
    pub fn run_objects(&self, objects: Vec<ObjectReference>) -> BatchResult {
        let start = Instant::now();
        let metrics = Arc::new(BatchMetrics::new());
        let cache_before = self.converter.cache_stats();
        metrics.record_listed(objects.len());
        self.process(objects, start, &metrics, cache_before)
    }

    /// Convert the objects a previous run reported as failed or unfinished.
    pub fn rerun_failed(&self, previous: &BatchResult) -> BatchResult {
        self.run_objects(previous.failed_objects())
    }

    fn process(
        &self,
        objects: Vec<ObjectReference>,
        start: Instant,
        metrics: &Arc<BatchMetrics>,
        cache_before: Option<CacheStats>,
    ) -> BatchResult {
        let deadline = self.config.deadline().map(|limit| start + limit);
        let (tx, rx) = mpsc::channel();
        let mut pending = objects.into_iter();
        let mut in_flight: Vec<ObjectReference> = Vec::new();
        let mut result = BatchResult::default();

        for object in pending.by_ref().take(self.config.max_workers) {
            in_flight.push(object.clone());
            self.submit(object, &tx, metrics);
            result.attempted += 1;
        }

        while !in_flight.is_empty() {
            let Some(outcome) = Self::next_outcome(&rx, deadline) else {
                result.timed_out = true;
                break;
            };
            Self::settle(&mut result, &mut in_flight, outcome);

            if let Some(object) = pending.next() {
                in_flight.push(object.clone());
                self.submit(object, &tx, metrics);
                result.attempted += 1;
            }
        }

        if result.timed_out {
            Self::drain_ready(&rx, &mut result, &mut in_flight);
            let not_started: Vec<ObjectReference> = pending.collect();
            warn!(
                abandoned = in_flight.len(),
                not_started = not_started.len(),
                "deadline reached, reporting completed outcomes only"
            );
            in_flight.sort_by(|a, b| (&a.container, &a.key).cmp(&(&b.container, &b.key)));
            result.unfinished = in_flight;
            result.unfinished.extend(not_started);
        }

        self.finish(&mut result, start, metrics, cache_before);
        result
    }

    /// Record `outcome` and take its object out of the in-flight set.
    fn settle(
        result: &mut BatchResult,
        in_flight: &mut Vec<ObjectReference>,
        outcome: ConversionOutcome,
    ) {
        if let Some(pos) = in_flight.iter().position(|o| outcome.is_for(o)) {
            in_flight.swap_remove(pos);
        }
        result.record(outcome);
    }

    /// Settle outcomes that landed while the last wait was timing out.
    fn drain_ready(
        rx: &Receiver<ConversionOutcome>,
        result: &mut BatchResult,
        in_flight: &mut Vec<ObjectReference>,
    ) {
        for outcome in rx.try_iter() {
            Self::settle(result, in_flight, outcome);
        }
    }

    /// Wait for the next outcome, giving up at the deadline.
    fn next_outcome(
        rx: &Receiver<ConversionOutcome>,
        deadline: Option<Instant>,
    ) -> Option<ConversionOutcome> {
        match deadline {
            None => rx.recv().ok(),
            Some(deadline) => {
                let remaining = deadline.checked_duration_since(Instant::now())?;
                match rx.recv_timeout(remaining) {
                    Ok(outcome) => Some(outcome),
                    Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
                }
            }
        }
    }

    fn submit(
        &self,
        object: ObjectReference,
        tx: &Sender<ConversionOutcome>,
        metrics: &Arc<BatchMetrics>,
    ) {
        let converter = Arc::clone(&self.converter);
        let metrics = Arc::clone(metrics);
        let tx = tx.clone();
        metrics.record_attempt();

        self.pool.spawn(move || {
            let outcome = {
                let _task = metrics.enter_task();
                converter.convert_recording(&object, &metrics)
            };
            // The receiver is gone once a deadline has passed.
            let _ = tx.send(outcome);
        });
    }

    fn finish(
        &self,
        result: &mut BatchResult,
        start: Instant,
        metrics: &BatchMetrics,
        cache_before: Option<CacheStats>,
    ) {
        let cache_after = self.converter.cache_stats();
        let (hits, misses) = match (cache_before, cache_after) {
            (Some(before), Some(after)) => (
                after.hits.saturating_sub(before.hits),
                after.misses.saturating_sub(before.misses),
            ),
            _ => (0, 0),
        };
        result.metrics = metrics.snapshot(hits, misses);
        result.wall_clock_secs = start.elapsed().as_secs_f64();

        info!(
            succeeded = result.success_count(),
            failed = result.failure_count(),
            attempted = result.attempted,
            timed_out = result.timed_out,
            wall_clock_secs = result.wall_clock_secs,
            "batch finished"
        );
    }
}
