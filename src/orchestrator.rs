//! Per-object scan orchestration.
//!
//! Each record of a notification goes through: size check, optional
//! `SCANNING` marker, download, clamscan, verdict tag, cleanup. Records are
//! handled one after another and a failure in one never stops the rest.

use crate::config::Config;
use crate::deadline::ScanDeadline;
use crate::event::{EventError, ObjectRef, S3Event, S3EventRecord};
use crate::scanner::{ScanEngine, ScanOutcome};
use crate::size_guard::{SizeCheck, SizeGuard};
use crate::stager::ObjectStager;
use crate::status::ScanStatus;
use crate::store::ObjectStore;
use crate::tagging::TagMerger;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Why a record was abandoned without a verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The record did not name an object.
    InvalidRecord(EventError),
    /// Object metadata could not be read.
    Metadata(String),
    /// The object could not be downloaded.
    Staging(String),
    /// clamscan could not be run.
    Engine(String),
}

/// Final state of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The verdict was written to the object.
    Tagged(ScanStatus),
    /// The policy left the object untagged. `None` means the scan timed out.
    Untagged { status: Option<ScanStatus> },
    /// A verdict was reached but writing it failed.
    TagFailed(ScanStatus),
    /// Processing stopped before a verdict.
    Aborted(AbortReason),
}

/// Counts of record outcomes for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub records: usize,
    pub tagged: usize,
    pub untagged: usize,
    pub tag_failures: usize,
    pub aborted: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &RecordOutcome) {
        self.records += 1;
        match outcome {
            RecordOutcome::Tagged(_) => self.tagged += 1,
            RecordOutcome::Untagged { .. } => self.untagged += 1,
            RecordOutcome::TagFailed(_) => self.tag_failures += 1,
            RecordOutcome::Aborted(_) => self.aborted += 1,
        }
    }
}

/// Drives scanning of notification records.
pub struct ScanOrchestrator<S, E> {
    store: Arc<S>,
    engine: E,
    size_guard: SizeGuard,
    stager: ObjectStager,
    tags: TagMerger,
    report_all_statuses: bool,
    safety_margin: Duration,
}

impl<S, E> ScanOrchestrator<S, E>
where
    S: ObjectStore,
    E: ScanEngine,
{
    pub fn new(config: &Config, store: Arc<S>, engine: E) -> Self {
        info!(
            only_tag_infected = config.settings.only_tag_infected,
            max_bytes = config.limits.max_bytes,
            tag_name = %config.tagging.tag_name,
            staging_dir = %config.staging.dir.display(),
            "Scan orchestrator initialized"
        );

        Self {
            store,
            engine,
            size_guard: SizeGuard::new(config.limits.max_bytes),
            stager: ObjectStager::new(config.staging.dir.clone()),
            tags: TagMerger::new(config.tagging.tag_name.clone()),
            report_all_statuses: config.settings.report_all_statuses(),
            safety_margin: config.clamscan.safety_margin(),
        }
    }

    /// Process every record of a notification in order.
    pub async fn handle_event(&self, event: &S3Event, deadline: ScanDeadline) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for record in &event.records {
            let outcome = self.process_record(record, deadline).await;
            debug!(outcome = ?outcome, "Record finished");
            summary.record(&outcome);
        }

        info!(
            records = summary.records,
            tagged = summary.tagged,
            untagged = summary.untagged,
            tag_failures = summary.tag_failures,
            aborted = summary.aborted,
            "Notification processed"
        );
        summary
    }

    /// Process a single record. Never fails; problems end up in the outcome.
    pub async fn process_record(
        &self,
        record: &S3EventRecord,
        deadline: ScanDeadline,
    ) -> RecordOutcome {
        let object = match record.object_ref() {
            Ok(object) => object,
            Err(e) => {
                error!(error = %e, "Invalid S3 event: bucket and key must be provided");
                return RecordOutcome::Aborted(AbortReason::InvalidRecord(e));
            }
        };

        info!(bucket = %object.bucket, key = %object.key, "Processing object");
        self.scan_object(&object, deadline).await
    }

    async fn scan_object(&self, object: &ObjectRef, deadline: ScanDeadline) -> RecordOutcome {
        match self.size_guard.check(self.store.as_ref(), object).await {
            Ok(SizeCheck::WithinLimit(size)) => {
                debug!(key = %object.key, size, "Object within size limit");
            }
            Ok(SizeCheck::Exceeded(_)) => {
                return self.write_verdict(object, ScanStatus::FileSizeExceeded).await;
            }
            Err(e) => {
                error!(key = %object.key, error = %e, "Failed to get object metadata");
                return RecordOutcome::Aborted(AbortReason::Metadata(e.to_string()));
            }
        }

        // Marks the object so a bucket policy can deny reads during the scan.
        // Not awaited here; the download starts right away.
        let pending_marker = self
            .report_all_statuses
            .then(|| self.spawn_scanning_marker(object));

        let staged = match self.stager.stage(self.store.as_ref(), object).await {
            Ok(staged) => staged,
            Err(e) => {
                error!(key = %object.key, error = %e, "Error downloading object");
                join_marker(pending_marker).await;
                return RecordOutcome::Aborted(AbortReason::Staging(e.to_string()));
            }
        };

        let budget = deadline.scan_budget(self.safety_margin);
        info!(
            key = %object.key,
            remaining_ms = deadline.remaining().as_millis() as u64,
            budget_ms = budget.as_millis() as u64,
            "Starting scan"
        );
        let result = self.engine.scan(staged.path(), budget).await;
        staged.release().await;

        // The marker must land before the final verdict or it would replace it.
        join_marker(pending_marker).await;

        match result {
            Err(e) => {
                error!(key = %object.key, error = %e, "Error running clamscan");
                RecordOutcome::Aborted(AbortReason::Engine(e.to_string()))
            }
            Ok(ScanOutcome::TimedOut) => {
                error!(key = %object.key, "Scan timed out before a verdict was reached");
                if self.report_all_statuses {
                    self.write_verdict(object, ScanStatus::Error).await
                } else {
                    RecordOutcome::Untagged { status: None }
                }
            }
            Ok(ScanOutcome::Verdict(status)) => {
                info!(key = %object.key, status = %status, "Scan result");
                if self.report_all_statuses || status == ScanStatus::Infected {
                    self.write_verdict(object, status).await
                } else {
                    debug!(
                        key = %object.key,
                        status = %status,
                        "Not tagging object because only infected objects are tagged"
                    );
                    RecordOutcome::Untagged {
                        status: Some(status),
                    }
                }
            }
        }
    }

    async fn write_verdict(&self, object: &ObjectRef, status: ScanStatus) -> RecordOutcome {
        match self.tags.apply(self.store.as_ref(), object, status).await {
            Ok(()) => {
                info!(
                    key = %object.key,
                    tag = %self.tags.tag_name(),
                    status = %status,
                    "Updated object tags"
                );
                RecordOutcome::Tagged(status)
            }
            Err(e) => {
                error!(
                    key = %object.key,
                    status = %status,
                    error = %e,
                    "Error updating object tags"
                );
                RecordOutcome::TagFailed(status)
            }
        }
    }

    fn spawn_scanning_marker(&self, object: &ObjectRef) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let tags = self.tags.clone();
        let object = object.clone();
        tokio::spawn(async move {
            if let Err(e) = tags
                .apply(store.as_ref(), &object, ScanStatus::Scanning)
                .await
            {
                error!(key = %object.key, error = %e, "Failed to set SCANNING tag");
            }
        })
    }
}

async fn join_marker(pending: Option<JoinHandle<()>>) {
    if let Some(handle) = pending {
        if let Err(e) = handle.await {
            warn!(error = %e, "SCANNING tag task did not complete");
        }
    }
}
