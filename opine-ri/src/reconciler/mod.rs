//! Batch Reconciler
//!
//! **[RI-BATCH-010]** Orchestrates the reconciliation sweep: pages through
//! the store on a stable (created_at, guid) cursor, recomputes missing or
//! stale content hashes, runs the abandonment detector, flushes idempotent
//! bulk mutations, and persists a resumable checkpoint after every
//! successful flush.
//!
//! # Ordering and failure isolation
//! Pages are processed in cursor order. Within a page, hashing and
//! classification are pure CPU work over independent records (run off the
//! reactor via `spawn_blocking`); the flush serializes per page so external
//! observers only ever see whole-page mutations. A record-level failure is
//! recorded and never blocks its batch; a batch-level transient failure is
//! retried with backoff and, if the budget is exhausted, recorded - the run
//! still terminates with a complete summary. Only a configuration error
//! (missing survey, held lease) aborts before any write.

pub mod checkpoint;
pub mod lease;
pub mod manual_rejections;
pub mod remediation;

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{
    AbandonUpdate, PageCursor, RecordFailure, RecordFetch, RecordUpdate, ResponseRepository,
    UpdateFields,
};
use crate::error::{ReconcileError, ReconcileResult};
use crate::report::{self, DuplicateReport};
use crate::services::abandonment::AbandonmentDetector;
use crate::services::content_hash::ContentHashComputer;
use crate::services::review_flags::{classify_review, ReviewCriteria, ReviewFlag};
use crate::services::signature::CanonicalSignatureBuilder;

use checkpoint::CheckpointStore;
use lease::ReconcilerLease;

/// Sweep configuration.
///
/// Tunables default from compiled values, may be overridden from the
/// settings table via [`ReconcilerConfig::load_settings`], and finally by
/// the CLI.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub survey_guid: String,
    pub page_size: i64,
    /// Pause between batch flushes to bound sustained store load
    pub batch_delay_ms: u64,
    pub fetch_timeout_ms: u64,
    pub flush_timeout_ms: u64,
    /// Retry budget for transient store errors, per operation
    pub max_lock_wait_ms: u64,
    pub lease_ttl_ms: i64,
    /// Compute and classify only; no writes, no checkpoints, no lease
    pub dry_run: bool,
    /// Start from the persisted checkpoint instead of the beginning
    pub resume: bool,
    /// Recompute current-version digests too and repair mismatches
    pub verify_hashes: bool,
    /// Run the read-only duplicate-report pass after the sweep
    pub with_report: bool,
    /// Stop after this many pages (clean cancellation at a page boundary;
    /// the checkpoint stays behind for a later resume)
    pub max_pages: Option<u64>,
    pub review_criteria: ReviewCriteria,
}

impl ReconcilerConfig {
    pub fn new(survey_guid: impl Into<String>) -> Self {
        Self {
            survey_guid: survey_guid.into(),
            page_size: 500,
            batch_delay_ms: 250,
            fetch_timeout_ms: 5_000,
            flush_timeout_ms: 15_000,
            max_lock_wait_ms: 5_000,
            lease_ttl_ms: 120_000,
            dry_run: false,
            resume: false,
            verify_hashes: false,
            with_report: false,
            max_pages: None,
            review_criteria: ReviewCriteria::default(),
        }
    }

    /// Overlay tunables stored in the settings table
    pub async fn load_settings(&mut self, pool: &sqlx::SqlitePool) -> ReconcileResult<()> {
        self.page_size =
            opine_common::config::setting_i64(pool, "ri_page_size", self.page_size).await?;
        self.batch_delay_ms =
            opine_common::config::setting_i64(pool, "ri_batch_delay_ms", self.batch_delay_ms as i64)
                .await? as u64;
        self.max_lock_wait_ms = opine_common::config::setting_i64(
            pool,
            "ri_max_lock_wait_ms",
            self.max_lock_wait_ms as i64,
        )
        .await? as u64;
        Ok(())
    }
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Initializing,
    Paging,
    Computing,
    Classifying,
    Flushing,
    Reporting,
    Completed,
    Aborted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Final accounting for one sweep. Reduced from per-page outcomes at the
/// end of the run; there are no run-global mutable counters.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub survey_guid: String,
    pub processed: u64,
    pub updated: u64,
    pub pages: u64,
    pub errors: Vec<RecordFailure>,
    /// Records where the approve and reject heuristics fired together -
    /// reported, never silently resolved
    pub review_conflicts: Vec<String>,
    pub duration_ms: u64,
    pub resumed_from_checkpoint: bool,
    pub dry_run: bool,
    /// A run is clean only when its error list is empty
    pub clean: bool,
}

/// Sweep result: summary plus the optional duplicate report
#[derive(Debug)]
pub struct RunOutput {
    pub summary: RunSummary,
    pub report: Option<DuplicateReport>,
}

/// Per-page result, merged into the summary after the page completes
#[derive(Debug, Default)]
struct PageOutcome {
    updates: Vec<RecordUpdate>,
    errors: Vec<RecordFailure>,
    review_conflicts: Vec<String>,
    processed: u64,
}

/// Pure per-page computation: decode checks, hashing, classification.
///
/// No shared mutable state across records; safe to run on a blocking
/// thread while the reactor keeps serving I/O.
fn compute_page(
    page: Vec<RecordFetch>,
    verify_hashes: bool,
    criteria: &ReviewCriteria,
) -> PageOutcome {
    let mut outcome = PageOutcome::default();

    for fetch in page {
        outcome.processed += 1;

        let record = match fetch.parsed {
            Ok(record) => record,
            Err(message) => {
                outcome.errors.push(RecordFailure {
                    guid: fetch.guid,
                    error: message,
                });
                continue;
            }
        };

        let mut fields = UpdateFields::default();

        let needs_hash = verify_hashes
            || ContentHashComputer::is_stale(
                record.content_hash.as_deref(),
                record.content_hash_version,
            );
        if needs_hash {
            match CanonicalSignatureBuilder::build(&record) {
                Ok(signature) => {
                    let digest = ContentHashComputer::digest(&signature);
                    let unchanged = record.content_hash.as_deref() == Some(digest.hash.as_str())
                        && record.content_hash_version == Some(digest.version);
                    if !unchanged {
                        fields.content_hash = Some(digest);
                    }
                }
                Err(e) => {
                    // Isolated to this record; classification below still runs
                    outcome.errors.push(RecordFailure {
                        guid: record.guid.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let classification = AbandonmentDetector::classify(&record);
        if let Some(reason) = classification.reason {
            fields.abandon = Some(AbandonUpdate {
                reason,
                indicators: classification.indicators,
            });
        }

        if let ReviewFlag::Conflict {
            approve_signal,
            reject_signal,
        } = classify_review(&record, criteria)
        {
            debug!(
                guid = %record.guid,
                approve = %approve_signal,
                reject = %reject_signal,
                "Reviewer heuristics disagree"
            );
            outcome.review_conflicts.push(record.guid.clone());
        }

        if !fields.is_empty() {
            outcome.updates.push(RecordUpdate {
                guid: record.guid,
                fields,
            });
        }
    }

    outcome
}

/// Batch Reconciler
pub struct BatchReconciler {
    repo: ResponseRepository,
    config: ReconcilerConfig,
}

impl BatchReconciler {
    pub fn new(repo: ResponseRepository, config: ReconcilerConfig) -> Self {
        Self { repo, config }
    }

    /// Execute one reconciliation sweep.
    ///
    /// Returns a complete summary whether the sweep was clean or partially
    /// failed. Only configuration errors (missing survey, held lease)
    /// abort - and they do so before any write.
    pub async fn run(&self) -> ReconcileResult<RunOutput> {
        let started = Instant::now();
        let mut state = RunState::Initializing;
        info!(survey = %self.config.survey_guid, dry_run = self.config.dry_run, "Reconciliation sweep starting");

        if !self.repo.survey_exists(&self.config.survey_guid).await? {
            transition(&mut state, RunState::Aborted);
            return Err(ReconcileError::Configuration(format!(
                "survey {} does not exist",
                self.config.survey_guid
            )));
        }

        // Dry runs mutate nothing and need no mutual exclusion
        let lease = if self.config.dry_run {
            None
        } else {
            Some(
                ReconcilerLease::acquire(
                    self.repo.pool().clone(),
                    &format!("reconcile:{}", self.config.survey_guid),
                    self.config.lease_ttl_ms,
                )
                .await?,
            )
        };

        let result = self.run_paged(lease.as_ref(), &mut state, started).await;

        if let Some(lease) = lease {
            if let Err(e) = lease.release().await {
                warn!(error = %e, "Failed to release reconciliation lease; it will expire");
            }
        }

        result
    }

    async fn run_paged(
        &self,
        lease: Option<&ReconcilerLease>,
        state: &mut RunState,
        started: Instant,
    ) -> ReconcileResult<RunOutput> {
        let checkpoints = CheckpointStore::new(self.repo.pool().clone());

        let mut cursor = if self.config.resume {
            checkpoints.load(&self.config.survey_guid).await?
        } else {
            None
        };
        let resumed_from_checkpoint = cursor.is_some();
        if let Some(cp) = &cursor {
            info!(cursor = %cp, "Resuming sweep from checkpoint");
        }

        let mut processed = 0u64;
        let mut updated = 0u64;
        let mut pages = 0u64;
        let mut errors: Vec<RecordFailure> = Vec::new();
        let mut review_conflicts: Vec<String> = Vec::new();
        let mut completed = true;

        loop {
            if let Some(max_pages) = self.config.max_pages {
                if pages >= max_pages {
                    info!(pages, "Page budget reached, stopping at page boundary");
                    completed = false;
                    break;
                }
            }

            transition(state, RunState::Paging);
            let position = cursor
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "(start)".to_string());

            let page = match self.fetch_page_with_retry(cursor.as_ref(), &position).await {
                Ok(page) => page,
                Err(e) => {
                    // Terminate with a complete summary; the checkpoint
                    // left behind makes the remainder resumable
                    errors.push(RecordFailure {
                        guid: format!("page-fetch after {}", position),
                        error: e.to_string(),
                    });
                    completed = false;
                    break;
                }
            };

            let next_cursor = match page.last() {
                Some(last) => PageCursor {
                    created_at: last.created_at,
                    guid: last.guid.clone(),
                },
                None => break,
            };

            transition(state, RunState::Computing);
            let verify_hashes = self.config.verify_hashes;
            let criteria = self.config.review_criteria.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                compute_page(page, verify_hashes, &criteria)
            })
            .await
            .map_err(|e| {
                ReconcileError::Common(opine_common::Error::Internal(format!(
                    "page compute task failed: {}",
                    e
                )))
            })?;
            transition(state, RunState::Classifying);

            processed += outcome.processed;
            pages += 1;
            errors.extend(outcome.errors);
            review_conflicts.extend(outcome.review_conflicts);

            transition(state, RunState::Flushing);
            if self.config.dry_run {
                debug!(
                    updates = outcome.updates.len(),
                    "Dry run: skipping batch flush"
                );
            } else if outcome.updates.is_empty() {
                // Nothing to write; still advance the checkpoint so a
                // resume does not revisit this page
                self.save_checkpoint(&checkpoints, &next_cursor, processed)
                    .await;
            } else {
                match self
                    .flush_with_retry(&outcome.updates, &position)
                    .await
                {
                    Ok(flush) => {
                        updated += flush.applied;
                        errors.extend(flush.failures);
                        self.save_checkpoint(&checkpoints, &next_cursor, processed)
                            .await;
                    }
                    Err(e) => {
                        // This batch's writes are lost for this run; the
                        // checkpoint intentionally does not advance
                        warn!(position = %position, error = %e, "Batch flush failed");
                        errors.push(RecordFailure {
                            guid: format!("batch-flush after {}", position),
                            error: e.to_string(),
                        });
                    }
                }
            }

            if let Some(lease) = lease {
                // A failed renewal is survivable: the lease simply expires
                if let Err(e) = lease.renew(self.config.lease_ttl_ms).await {
                    warn!(error = %e, "Lease renewal failed");
                }
            }

            cursor = Some(next_cursor);

            if self.config.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
        }

        transition(state, RunState::Reporting);
        let report = if self.config.with_report {
            match report::build_report(&self.repo, &self.config.survey_guid, Some(&self.repo)).await
            {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!(error = %e, "Duplicate report pass failed");
                    errors.push(RecordFailure {
                        guid: "duplicate-report".to_string(),
                        error: e.to_string(),
                    });
                    None
                }
            }
        } else {
            None
        };

        if completed && !self.config.dry_run {
            if let Err(e) = checkpoints.clear(&self.config.survey_guid).await {
                warn!(error = %e, "Failed to clear checkpoint after clean completion");
            }
        }

        transition(state, RunState::Completed);

        let clean = errors.is_empty();
        let summary = RunSummary {
            survey_guid: self.config.survey_guid.clone(),
            processed,
            updated,
            pages,
            errors,
            review_conflicts,
            duration_ms: started.elapsed().as_millis() as u64,
            resumed_from_checkpoint,
            dry_run: self.config.dry_run,
            clean,
        };

        info!(
            processed = summary.processed,
            updated = summary.updated,
            pages = summary.pages,
            errors = summary.errors.len(),
            clean = summary.clean,
            duration_ms = summary.duration_ms,
            "Reconciliation sweep finished"
        );

        Ok(RunOutput { summary, report })
    }

    /// Checkpoint persistence is best-effort: a failed save means a later
    /// resume revisits an already-flushed page, which the idempotent
    /// mutations make harmless
    async fn save_checkpoint(
        &self,
        checkpoints: &CheckpointStore,
        cursor: &PageCursor,
        processed: u64,
    ) {
        if let Err(e) = checkpoints
            .save(&self.config.survey_guid, cursor, processed)
            .await
        {
            warn!(cursor = %cursor, error = %e, "Failed to persist checkpoint");
        }
    }

    async fn fetch_page_with_retry(
        &self,
        cursor: Option<&PageCursor>,
        position: &str,
    ) -> ReconcileResult<Vec<RecordFetch>> {
        let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
        crate::utils::retry_transient(
            "page fetch",
            position,
            self.config.max_lock_wait_ms,
            || {
                let repo = self.repo.clone();
                let survey = self.config.survey_guid.clone();
                let cursor = cursor.cloned();
                let page_size = self.config.page_size;
                async move {
                    match tokio::time::timeout(
                        timeout,
                        repo.fetch_page(&survey, cursor.as_ref(), page_size),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ReconcileError::timeout(
                            "page fetch",
                            timeout.as_millis() as u64,
                        )),
                    }
                }
            },
        )
        .await
    }

    async fn flush_with_retry(
        &self,
        updates: &[RecordUpdate],
        position: &str,
    ) -> ReconcileResult<crate::db::BulkWriteOutcome> {
        let timeout = Duration::from_millis(self.config.flush_timeout_ms);
        let max_lock_wait_ms = self.config.max_lock_wait_ms;
        crate::utils::retry_transient("batch flush", position, max_lock_wait_ms, || {
            let repo = self.repo.clone();
            async move {
                match tokio::time::timeout(timeout, repo.bulk_update(updates, max_lock_wait_ms))
                    .await
                {
                    Ok(outcome) => Ok(outcome),
                    Err(_) => Err(ReconcileError::timeout(
                        "batch flush",
                        timeout.as_millis() as u64,
                    )),
                }
            }
        })
        .await
    }
}

fn transition(state: &mut RunState, next: RunState) {
    if *state != next {
        debug!(from = %state, to = %next, "Run state transition");
        *state = next;
    }
}
