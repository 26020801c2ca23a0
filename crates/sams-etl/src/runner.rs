//! Partition orchestrator.
//!
//! Enumerates the partition space, drops checkpointed partitions, and runs
//! download → validate → load → checkpoint for each of the rest. A failing
//! partition is logged and the run moves on; only an authentication failure
//! stops it.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sams_core::{ERRMAX, RetryPolicy, SharedProgress, Shutdown, WorkQueue, fmt_num};

use crate::api::PageSource;
use crate::checkpoint::{Checkpoint, CheckpointStore, CompletionKind};
use crate::counts::ExpectedCounts;
use crate::download::Downloader;
use crate::error::{AuthError, PartitionError};
use crate::load::{LoadReport, Loader};
use crate::partition::{Catalog, EntityType, PartitionFilter, PartitionKey};
use crate::store::DuckStore;
use crate::validate::validate_batch;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub filter: PartitionFilter,
    pub exclude_completed: bool,
    pub bulk: bool,
    pub workers: usize,
    pub page_policy: RetryPolicy,
    pub lock_policy: RetryPolicy,
    /// Directory for the expected-count sidecars; `None` disables them
    pub counts_dir: Option<PathBuf>,
    pub counts_max_age: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            filter: PartitionFilter::default(),
            exclude_completed: true,
            bulk: false,
            workers: 1,
            page_policy: RetryPolicy::default(),
            lock_policy: RetryPolicy::new(3, Duration::from_millis(200)),
            counts_dir: None,
            counts_max_age: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Pending,
    Fetching,
    Validating,
    Loading,
    Done,
    Skipped,
    Failed,
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Fetching => "FETCHING",
            Self::Validating => "VALIDATING",
            Self::Loading => "LOADING",
            Self::Done => "DONE",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

fn enter(key: &PartitionKey, state: PartitionState) {
    log::debug!("{key}: {state}");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionOutcome {
    /// Checkpointed
    Done {
        kind: CompletionKind,
        report: LoadReport,
    },
    /// Loaded what arrived, but retries ran out; not checkpointed
    Degraded { report: LoadReport },
    Failed { reason: String },
    /// Already checkpointed; not touched
    Skipped,
}

#[derive(Debug, Clone)]
pub struct PartitionResult {
    pub key: PartitionKey,
    pub outcome: PartitionOutcome,
    pub expected: Option<u64>,
    pub retrieved: u64,
}

impl PartitionResult {
    pub fn report(&self) -> LoadReport {
        match &self.outcome {
            PartitionOutcome::Done { report, .. } | PartitionOutcome::Degraded { report } => *report,
            _ => LoadReport::default(),
        }
    }
}

/// A run-level failure; partition-level failures end up in [`RunSummary`]
#[derive(Debug)]
pub enum RunError {
    Partition(PartitionError),
    Auth(AuthError),
    Setup(anyhow::Error),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partition(e) => write!(f, "{e}"),
            Self::Auth(e) => write!(f, "{e}"),
            Self::Setup(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for RunError {}

#[derive(Debug)]
pub struct RunSummary {
    pub entity: EntityType,
    pub partitions: Vec<PartitionResult>,
    /// Shutdown was requested before every partition ran
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&PartitionOutcome) -> bool) -> usize {
        self.partitions.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn total(&self) -> usize {
        self.partitions.len()
    }

    pub fn loaded(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                PartitionOutcome::Done {
                    kind: CompletionKind::Loaded,
                    ..
                }
            )
        })
    }

    pub fn empty(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                PartitionOutcome::Done {
                    kind: CompletionKind::Empty,
                    ..
                }
            )
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, PartitionOutcome::Skipped))
    }

    pub fn degraded(&self) -> usize {
        self.count(|o| matches!(o, PartitionOutcome::Degraded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, PartitionOutcome::Failed { .. }))
    }

    /// Record outcomes summed over all partitions
    pub fn records(&self) -> LoadReport {
        let mut total = LoadReport::default();
        for result in &self.partitions {
            total.merge(&result.report());
        }
        total
    }

    /// No failed or degraded partitions and not interrupted
    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.failed() == 0 && self.degraded() == 0
    }

    pub fn log(&self) {
        let records = self.records();
        log::info!(
            "{}: {} partitions: {} loaded, {} empty, {} skipped, {} degraded, {} failed ({:.1}s)",
            self.entity,
            self.total(),
            self.loaded(),
            self.empty(),
            self.skipped(),
            self.degraded(),
            self.failed(),
            self.elapsed.as_secs_f64()
        );
        log::info!(
            "{}: records: {} inserted, {} duplicates, {} rejected, {} failed",
            self.entity,
            fmt_num(records.inserted as usize),
            fmt_num(records.duplicates as usize),
            fmt_num(records.rejected as usize),
            fmt_num(records.failed as usize)
        );
        for result in &self.partitions {
            if let PartitionOutcome::Failed { reason } = &result.outcome {
                log::warn!("{}: failed: {reason}", result.key);
            }
        }
        if self.interrupted {
            log::warn!("{}: run interrupted; remaining partitions left for the next run", self.entity);
        }
    }
}

pub struct Orchestrator<'a> {
    catalog: &'a Catalog,
    source: &'a dyn PageSource,
    store: &'a DuckStore,
    shutdown: Shutdown,
    progress: SharedProgress,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        catalog: &'a Catalog,
        source: &'a dyn PageSource,
        store: &'a DuckStore,
        shutdown: Shutdown,
        progress: SharedProgress,
    ) -> Self {
        Self {
            catalog,
            source,
            store,
            shutdown,
            progress,
        }
    }

    /// Sync every selected partition of `entity`
    pub fn run(&self, entity: EntityType, options: &SyncOptions) -> Result<RunSummary, RunError> {
        let start = Instant::now();
        let partitions = self
            .catalog
            .enumerate(entity, &options.filter)
            .map_err(RunError::Partition)?;

        let completed = if options.exclude_completed {
            CheckpointStore::new(self.store)
                .completed(entity)
                .map_err(RunError::Setup)?
        } else {
            BTreeSet::new()
        };

        let (pending, excluded): (Vec<PartitionKey>, Vec<PartitionKey>) =
            partitions.into_iter().partition(|k| !completed.contains(k));
        for key in &excluded {
            enter(key, PartitionState::Skipped);
        }
        log::info!(
            "{entity}: {} partitions to sync, {} already complete",
            pending.len(),
            excluded.len()
        );

        let counts_path = options
            .counts_dir
            .as_ref()
            .map(|dir| ExpectedCounts::path(dir, entity));
        let mut sidecar = match &counts_path {
            Some(path) => ExpectedCounts::load(path, entity).unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable count sidecar: {e:#}");
                ExpectedCounts::default()
            }),
            None => ExpectedCounts::default(),
        };

        let mut results: Vec<PartitionResult> = excluded
            .into_iter()
            .map(|key| PartitionResult {
                key,
                outcome: PartitionOutcome::Skipped,
                expected: sidecar.get(&key),
                retrieved: 0,
            })
            .collect();

        for key in &pending {
            enter(key, PartitionState::Pending);
        }
        let queue = WorkQueue::new(pending);
        let processed = self.process_queue(entity, &queue, options)?;
        results.extend(processed);
        results.sort_by_key(|r| r.key);

        if let Some(path) = &counts_path {
            for result in &results {
                if let Some(expected) = result.expected {
                    sidecar.set(result.key, expected);
                }
            }
            if ExpectedCounts::is_stale(path, options.counts_max_age) {
                match sidecar.save(path) {
                    Ok(()) => log::info!("Refreshed {} ({} partitions)", path.display(), sidecar.len()),
                    Err(e) => log::warn!("Failed to refresh count sidecar: {e:#}"),
                }
            }
        }

        let summary = RunSummary {
            entity,
            partitions: results,
            interrupted: self.shutdown.is_requested(),
            elapsed: start.elapsed(),
        };
        summary.log();
        Ok(summary)
    }

    fn process_queue(
        &self,
        entity: EntityType,
        queue: &WorkQueue<PartitionKey>,
        options: &SyncOptions,
    ) -> Result<Vec<PartitionResult>, RunError> {
        let results = Mutex::new(Vec::with_capacity(queue.total()));
        let fatal: Mutex<Option<AuthError>> = Mutex::new(None);
        let overall = self.progress.run_bar(entity.table(), queue.total());

        let worker = || {
            loop {
                if self.shutdown.is_requested() {
                    break;
                }
                if fatal.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
                    break;
                }
                let Some(key) = queue.next() else { break };
                match self.process(key, options) {
                    Ok(result) => results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(result),
                    Err(e) => {
                        log::error!("{key}: {e}; aborting run");
                        *fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                        break;
                    }
                }
                overall.inc(1);
            }
        };

        let workers = options.workers.clamp(1, queue.total().max(1));
        if workers == 1 {
            worker();
        } else {
            log::info!("{entity}: running {} partitions on {workers} workers", queue.total());
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| RunError::Setup(anyhow::anyhow!("Failed to create thread pool: {e}")))?;
            pool.scope(|s| {
                for _ in 0..workers {
                    s.spawn(|_| worker());
                }
            });
        }
        overall.finish_and_clear();

        if let Some(e) = fatal.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(RunError::Auth(e));
        }
        Ok(results.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    /// One partition, start to finish. Only auth failures escape.
    fn process(&self, key: &PartitionKey, options: &SyncOptions) -> Result<PartitionResult, AuthError> {
        let pb = self.progress.partition_bar(&key.to_string());

        enter(key, PartitionState::Fetching);
        let download = Downloader::new(self.source, options.page_policy, &self.shutdown).download(key, &pb);
        let download = match download {
            Ok(d) => d,
            Err(e) => {
                pb.finish_and_clear();
                return Err(e);
            }
        };
        let retrieved = download.records.len() as u64;
        let result = |outcome: PartitionOutcome| PartitionResult {
            key: *key,
            outcome,
            expected: download.expected,
            retrieved,
        };

        enter(key, PartitionState::Validating);
        let missing = match validate_batch(key, &download.records) {
            Ok(report) => report,
            Err(e) => {
                pb.finish_and_clear();
                enter(key, PartitionState::Failed);
                log::error!("{key}: validation failed, nothing loaded: {e}");
                return Ok(result(PartitionOutcome::Failed {
                    reason: e.to_string(),
                }));
            }
        };
        missing.log(key);

        if download.records.is_empty() {
            pb.finish_and_clear();
            if download.degraded {
                log::warn!("{key}: degraded with no records; will retry next run");
                return Ok(result(PartitionOutcome::Degraded {
                    report: LoadReport::default(),
                }));
            }
            let report = LoadReport::default();
            return Ok(result(self.complete(key, CompletionKind::Empty, download.expected, 0, report)));
        }

        enter(key, PartitionState::Loading);
        pb.set_message("loading");
        let batch_policy = RetryPolicy::new(ERRMAX, options.lock_policy.base_delay);
        let loader = Loader::new(self.store, options.lock_policy, batch_policy);
        let outcomes = if options.bulk {
            loader.load_bulk(key, &download.records)
        } else {
            loader.load(key, &download.records)
        };
        let report = LoadReport::tally(&outcomes);
        pb.finish_and_clear();

        if download.degraded {
            log::warn!(
                "{key}: degraded, loaded {} of {retrieved} fetched records; left for the next run",
                report.inserted
            );
            return Ok(result(PartitionOutcome::Degraded { report }));
        }
        if report.failed == report.total() {
            enter(key, PartitionState::Failed);
            log::error!("{key}: every record failed to load");
            return Ok(result(PartitionOutcome::Failed {
                reason: format!("all {} records failed to load", report.failed),
            }));
        }

        Ok(result(self.complete(key, CompletionKind::Loaded, download.expected, retrieved, report)))
    }

    fn complete(
        &self,
        key: &PartitionKey,
        kind: CompletionKind,
        expected: Option<u64>,
        retrieved: u64,
        report: LoadReport,
    ) -> PartitionOutcome {
        let checkpoint = Checkpoint::new(*key, kind, expected, retrieved, report);
        if let Err(e) = CheckpointStore::new(self.store).mark_complete(&checkpoint) {
            enter(key, PartitionState::Failed);
            log::error!("{key}: {e:#}");
            return PartitionOutcome::Failed {
                reason: format!("{e:#}"),
            };
        }
        enter(key, PartitionState::Done);
        log::info!(
            "{key}: {kind}, {} inserted, {} duplicates, {} rejected, {} failed",
            report.inserted,
            report.duplicates,
            report.rejected,
            report.failed
        );
        PartitionOutcome::Done { kind, report }
    }
}
