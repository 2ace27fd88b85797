//! Duplicate remediation
//!
//! **[RI-REM-010]** The explicitly-invoked "act" half of duplicate
//! handling, kept separate from the read-only report pass so detection and
//! action stay decoupled and auditable.
//!
//! Policy: only still-`pending` duplicates are mutated - they become
//! `rejected` with a `duplicate` indicator naming the canonical record.
//! `approved` duplicates are surfaced for manual review instead of being
//! auto-rejected over a reviewer's decision, and already-terminal
//! duplicates need nothing. Abandonment status is never written here; that
//! path belongs to the abandonment detector.

use serde::Serialize;
use tracing::{debug, info};

use crate::db::{RecordFailure, ResponseRepository};
use crate::error::ReconcileResult;
use crate::report::{build_report, DuplicateReport};
use crate::services::content_hash::CONTENT_HASH_VERSION;
use crate::services::grouping::DuplicateGroupResolver;

use super::lease::ReconcilerLease;

/// Accounting for one remediation pass
#[derive(Debug, Clone, Serialize)]
pub struct RemediationSummary {
    pub survey_guid: String,
    pub groups: usize,
    /// Pending duplicates rejected by this pass
    pub rejected: u64,
    /// Approved duplicates left untouched and flagged for manual review
    pub approved_for_review: Vec<String>,
    pub errors: Vec<RecordFailure>,
    pub dry_run: bool,
}

/// Remediation configuration
#[derive(Debug, Clone)]
pub struct RemediationConfig {
    pub survey_guid: String,
    pub dry_run: bool,
    pub max_lock_wait_ms: u64,
    pub lease_ttl_ms: i64,
}

impl RemediationConfig {
    pub fn new(survey_guid: impl Into<String>) -> Self {
        Self {
            survey_guid: survey_guid.into(),
            dry_run: false,
            max_lock_wait_ms: 5_000,
            lease_ttl_ms: 120_000,
        }
    }
}

/// Reject still-pending duplicates across the survey.
///
/// Shares the sweep's lease name so a remediation pass and a sweep never
/// write concurrently. Returns the report it acted on alongside the
/// remediation accounting.
pub async fn remediate_duplicates(
    repo: &ResponseRepository,
    config: &RemediationConfig,
) -> ReconcileResult<(RemediationSummary, DuplicateReport)> {
    let lease = if config.dry_run {
        None
    } else {
        Some(
            ReconcilerLease::acquire(
                repo.pool().clone(),
                &format!("reconcile:{}", config.survey_guid),
                config.lease_ttl_ms,
            )
            .await?,
        )
    };

    let result = remediate_inner(repo, config).await;

    if let Some(lease) = lease {
        let _ = lease.release().await;
    }

    result
}

async fn remediate_inner(
    repo: &ResponseRepository,
    config: &RemediationConfig,
) -> ReconcileResult<(RemediationSummary, DuplicateReport)> {
    let candidates = repo
        .digest_groups(&config.survey_guid, CONTENT_HASH_VERSION)
        .await?;

    let mut members = Vec::new();
    for (digest, _count) in &candidates {
        members.extend(repo.fetch_by_digest(&config.survey_guid, digest).await?);
    }
    let resolution = DuplicateGroupResolver::resolve(members);

    let mut rejected = 0u64;
    let mut approved_for_review = Vec::new();
    let mut errors = Vec::new();

    for group in &resolution.groups {
        for duplicate in &group.duplicates.pending {
            let mut indicators = duplicate.classification_indicators.clone();
            for tag in [
                "duplicate".to_string(),
                format!("duplicate_of:{}", group.canonical.guid),
            ] {
                if !indicators.contains(&tag) {
                    indicators.push(tag);
                }
            }

            if config.dry_run {
                debug!(guid = %duplicate.guid, canonical = %group.canonical.guid, "Dry run: would reject duplicate");
                continue;
            }

            match repo
                .reject_pending(&duplicate.guid, &indicators, config.max_lock_wait_ms)
                .await
            {
                Ok(true) => {
                    rejected += 1;
                    info!(
                        guid = %duplicate.guid,
                        canonical = %group.canonical.guid,
                        digest = %group.digest,
                        "Rejected duplicate response"
                    );
                }
                // Status changed under us (reviewer got there first); the
                // guard declined the write and that is the correct outcome
                Ok(false) => {
                    debug!(guid = %duplicate.guid, "Duplicate no longer pending, skipped")
                }
                Err(e) => errors.push(RecordFailure {
                    guid: duplicate.guid.clone(),
                    error: e.to_string(),
                }),
            }
        }

        for duplicate in &group.duplicates.approved {
            approved_for_review.push(duplicate.guid.clone());
        }
    }

    let summary = RemediationSummary {
        survey_guid: config.survey_guid.clone(),
        groups: resolution.groups.len(),
        rejected,
        approved_for_review,
        errors,
        dry_run: config.dry_run,
    };

    info!(
        groups = summary.groups,
        rejected = summary.rejected,
        approved_for_review = summary.approved_for_review.len(),
        dry_run = summary.dry_run,
        "Duplicate remediation finished"
    );

    // The post-remediation report reflects the store as acted upon
    let report = build_report(repo, &config.survey_guid, Some(repo)).await?;

    Ok((summary, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::{BatchReconciler, ReconcilerConfig};
    use crate::test_support::{seed_pool, ResponseSeed};
    use sqlx::SqlitePool;

    async fn seed_and_sweep() -> SqlitePool {
        let pool = seed_pool().await;
        let t = 1_700_000_000_000;

        // One digest group: canonical pending, one pending dup, one
        // approved dup, one abandoned dup
        for (guid, offset, status) in [
            ("r-a", 0, "pending"),
            ("r-b", 1_000, "pending"),
            ("r-c", 2_000, "approved"),
            ("r-d", 3_000, "abandoned"),
        ] {
            ResponseSeed::new(guid)
                .created_at(t + offset)
                .call_id(Some("call-dup"))
                .status(status)
                .insert(&pool)
                .await;
        }

        let mut cfg = ReconcilerConfig::new("sv-001");
        cfg.batch_delay_ms = 0;
        BatchReconciler::new(ResponseRepository::new(pool.clone()), cfg)
            .run()
            .await
            .unwrap();

        pool
    }

    #[tokio::test]
    async fn test_rejects_pending_keeps_approved() {
        let pool = seed_and_sweep().await;
        let repo = ResponseRepository::new(pool.clone());

        let (summary, _report) =
            remediate_duplicates(&repo, &RemediationConfig::new("sv-001"))
                .await
                .unwrap();

        assert_eq!(summary.groups, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.approved_for_review, vec!["r-c"]);
        assert!(summary.errors.is_empty());

        let (status, indicators): (String, String) = sqlx::query_as(
            "SELECT status, classification_indicators FROM responses WHERE guid = 'r-b'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "rejected");
        let tags: Vec<String> = serde_json::from_str(&indicators).unwrap();
        assert!(tags.contains(&"duplicate".to_string()));
        assert!(tags.contains(&"duplicate_of:r-a".to_string()));

        // Canonical and approved members untouched
        let canonical_status: String =
            sqlx::query_scalar("SELECT status FROM responses WHERE guid = 'r-a'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(canonical_status, "pending");
        let approved_status: String =
            sqlx::query_scalar("SELECT status FROM responses WHERE guid = 'r-c'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(approved_status, "approved");
    }

    #[tokio::test]
    async fn test_second_pass_rejects_nothing() {
        let pool = seed_and_sweep().await;
        let repo = ResponseRepository::new(pool);

        let config = RemediationConfig::new("sv-001");
        remediate_duplicates(&repo, &config).await.unwrap();
        let (second, _) = remediate_duplicates(&repo, &config).await.unwrap();

        assert_eq!(second.rejected, 0);
        assert!(second.errors.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_mutates_nothing() {
        let pool = seed_and_sweep().await;
        let repo = ResponseRepository::new(pool.clone());

        let mut config = RemediationConfig::new("sv-001");
        config.dry_run = true;
        let (summary, _) = remediate_duplicates(&repo, &config).await.unwrap();

        assert_eq!(summary.rejected, 0);
        let status: String =
            sqlx::query_scalar("SELECT status FROM responses WHERE guid = 'r-b'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "pending");
    }
}
