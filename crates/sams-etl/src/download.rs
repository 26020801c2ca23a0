//! Per-partition extraction loop

use indicatif::ProgressBar;
use sams_core::{RetryPolicy, Shutdown, retry_with_backoff};
use serde_json::Value;

use crate::api::PageSource;
use crate::error::{ApiError, AuthError};
use crate::partition::PartitionKey;

/// Guard against an upstream that never returns an empty page
const MAX_PAGES: u32 = 100_000;

/// Everything fetched for one partition
#[derive(Debug)]
pub struct PartitionDownload {
    pub partition: PartitionKey,
    /// Tagged records in arrival order
    pub records: Vec<Value>,
    /// Upstream's reported total, if the count call succeeded
    pub expected: Option<u64>,
    pub pages: u32,
    /// Retries ran out (or shutdown interrupted) before the last page
    pub degraded: bool,
}

impl PartitionDownload {
    /// Records upstream claims exist but were not retrieved
    pub fn shortfall(&self) -> Option<u64> {
        let retrieved = self.records.len() as u64;
        self.expected
            .filter(|&expected| expected > retrieved)
            .map(|expected| expected - retrieved)
    }
}

pub struct Downloader<'a> {
    source: &'a dyn PageSource,
    policy: RetryPolicy,
    shutdown: &'a Shutdown,
}

impl<'a> Downloader<'a> {
    pub fn new(source: &'a dyn PageSource, policy: RetryPolicy, shutdown: &'a Shutdown) -> Self {
        Self {
            source,
            policy,
            shutdown,
        }
    }

    /// Fetch every page of a partition.
    ///
    /// API and transport failures never escape: after the retry budget is
    /// spent the download stops, keeps what it has and is marked degraded.
    /// Only an authentication failure is returned as an error.
    pub fn download(&self, partition: &PartitionKey, pb: &ProgressBar) -> Result<PartitionDownload, AuthError> {
        let expected = match self.with_retry(partition, "count", |source| source.fetch_count(partition)) {
            Ok(n) => Some(n),
            Err(ApiError::Auth(e)) => return Err(e),
            Err(e) => {
                log::warn!("{partition}: expected count unavailable: {e}");
                None
            }
        };
        if let Some(n) = expected {
            pb.set_length(n);
        }

        let mut download = PartitionDownload {
            partition: *partition,
            records: Vec::new(),
            expected,
            pages: 0,
            degraded: false,
        };

        if partition.program.paginates(partition.entity) {
            let mut page = 1u32;
            loop {
                if self.shutdown.is_requested() {
                    log::warn!("{partition}: interrupted before page {page}");
                    download.degraded = true;
                    break;
                }
                if page > MAX_PAGES {
                    log::warn!("{partition}: stopped after {MAX_PAGES} pages");
                    download.degraded = true;
                    break;
                }
                let label = format!("page {page}");
                match self.with_retry(partition, &label, |source| source.fetch_page(partition, Some(page))) {
                    Ok(records) if records.is_empty() => break,
                    Ok(records) => {
                        log::debug!("{partition}: page {page}: {} records", records.len());
                        self.accept(&mut download, records, pb);
                        page += 1;
                    }
                    Err(ApiError::Auth(e)) => return Err(e),
                    Err(e) => {
                        log::warn!(
                            "{partition}: degraded, page {page} failed after {} attempts: {e}",
                            self.policy.max_attempts
                        );
                        download.degraded = true;
                        break;
                    }
                }
            }
        } else {
            match self.with_retry(partition, "fetch", |source| source.fetch_page(partition, None)) {
                Ok(records) => self.accept(&mut download, records, pb),
                Err(ApiError::Auth(e)) => return Err(e),
                Err(e) => {
                    log::warn!(
                        "{partition}: degraded, fetch failed after {} attempts: {e}",
                        self.policy.max_attempts
                    );
                    download.degraded = true;
                }
            }
        }

        let retrieved = download.records.len() as u64;
        match download.expected {
            Some(expected) if expected > retrieved => log::warn!(
                "{partition}: retrieved {retrieved} of {expected} expected records (short by {})",
                expected - retrieved
            ),
            Some(expected) if expected < retrieved => log::warn!(
                "{partition}: retrieved {retrieved} records, more than the {expected} reported"
            ),
            _ => {}
        }
        Ok(download)
    }

    fn accept(&self, download: &mut PartitionDownload, records: Vec<Value>, pb: &ProgressBar) {
        let partition = download.partition;
        download.pages += 1;
        pb.inc(records.len() as u64);
        download
            .records
            .extend(records.into_iter().map(|r| tag(r, &partition)));
        pb.set_message(format!("{} pages, {} records", download.pages, download.records.len()));
    }

    fn with_retry<T>(
        &self,
        partition: &PartitionKey,
        what: &str,
        op: impl Fn(&dyn PageSource) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let label = format!("{partition} {what}");
        retry_with_backoff(&label, &self.policy, ApiError::is_retryable, |_| op(self.source))
    }
}

/// Stamp a record with the partition it was fetched for
pub fn tag(mut record: Value, partition: &PartitionKey) -> Value {
    if let Value::Object(obj) = &mut record {
        obj.insert("module".into(), partition.program.api_name().into());
        obj.insert("academic_year".into(), partition.period.into());
        if let Some(variant) = partition.variant {
            obj.insert("admission_type".into(), variant.code().into());
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{AdmissionVariant, EntityType, Program};
    use sams_core::TransportError;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays page results in order; count is fixed
    struct Pages {
        pages: Mutex<VecDeque<Result<usize, ApiError>>>,
        count: u64,
        calls: AtomicUsize,
    }

    impl Pages {
        fn new(pages: Vec<Result<usize, ApiError>>, count: u64) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                count,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PageSource for Pages {
        fn fetch_page(&self, _: &PartitionKey, _: Option<u32>) -> Result<Vec<Value>, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.pages.lock().unwrap().pop_front().unwrap_or(Ok(0));
            next.map(|n| (0..n).map(|i| json!({ "Barcode": i })).collect())
        }

        fn fetch_count(&self, _: &PartitionKey) -> Result<u64, ApiError> {
            Ok(self.count)
        }
    }

    fn timeout() -> Result<usize, ApiError> {
        Err(ApiError::Transport(TransportError::Timeout("t".into())))
    }

    fn run(source: &Pages, key: PartitionKey) -> PartitionDownload {
        let shutdown = Shutdown::new();
        Downloader::new(source, RetryPolicy::immediate(3), &shutdown)
            .download(&key, &ProgressBar::hidden())
            .unwrap()
    }

    fn iti() -> PartitionKey {
        PartitionKey::new(EntityType::Student, Program::Iti, 2022)
    }

    #[test]
    fn stops_at_first_empty_page() {
        let source = Pages::new(vec![Ok(50), Ok(50), Ok(0), Ok(50)], 100);
        let dl = run(&source, iti());
        assert_eq!(dl.records.len(), 100);
        assert_eq!(dl.pages, 2);
        assert!(!dl.degraded);
        assert_eq!(dl.shortfall(), None);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_partition() {
        let source = Pages::new(vec![Ok(0)], 0);
        let dl = run(&source, iti());
        assert!(dl.records.is_empty());
        assert!(!dl.degraded);
    }

    #[test]
    fn exhaustion_keeps_accumulated() {
        let source = Pages::new(vec![Ok(50), timeout(), timeout(), timeout(), Ok(50)], 150);
        let dl = run(&source, iti());
        assert_eq!(dl.records.len(), 50);
        assert!(dl.degraded);
        assert_eq!(dl.shortfall(), Some(100));
        // 1 good page + 3 failed attempts
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn transient_failure_recovers() {
        let source = Pages::new(vec![timeout(), Ok(10), Ok(0)], 10);
        let dl = run(&source, iti());
        assert_eq!(dl.records.len(), 10);
        assert!(!dl.degraded);
    }

    #[test]
    fn non_paginated_single_call() {
        let source = Pages::new(vec![Ok(7), Ok(7)], 7);
        let key = PartitionKey::new(EntityType::Student, Program::Pdis, 2021);
        let dl = run(&source, key);
        assert_eq!(dl.records.len(), 7);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auth_failure_propagates() {
        let source = Pages::new(vec![Err(ApiError::Auth(AuthError::Status(401)))], 0);
        let shutdown = Shutdown::new();
        let result = Downloader::new(&source, RetryPolicy::immediate(3), &shutdown)
            .download(&iti(), &ProgressBar::hidden());
        assert!(matches!(result, Err(AuthError::Status(401))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_stops_between_pages() {
        let source = Pages::new(vec![Ok(5), Ok(5)], 10);
        let shutdown = Shutdown::new();
        shutdown.request();
        let dl = Downloader::new(&source, RetryPolicy::immediate(3), &shutdown)
            .download(&iti(), &ProgressBar::hidden())
            .unwrap();
        assert!(dl.degraded);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn records_are_tagged() {
        let key = PartitionKey::new(EntityType::Institute, Program::Diploma, 2023)
            .with_variant(AdmissionVariant::Fresh);
        let source = Pages::new(vec![Ok(2)], 2);
        let dl = run(&source, key);
        for record in &dl.records {
            assert_eq!(record["module"], "Diploma");
            assert_eq!(record["academic_year"], 2023);
            assert_eq!(record["admission_type"], 1);
        }
    }
}
