//! Manual rejection import
//!
//! Reviewers reject responses in bulk from spreadsheet exports; the
//! dashboard converts the sheet into a JSON list of `{response_id, reason}`
//! entries. This applies such a list with the same guarded, idempotent
//! write the duplicate remediation uses: only still-`pending` records
//! change, everything else is reported untouched.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::{RecordFailure, ResponseRepository};
use crate::error::{ReconcileError, ReconcileResult};

/// Reason recorded when the sheet's reason cell was blank
const DEFAULT_REASON: &str = "Manual Rejection";

/// One entry of the rejection list
#[derive(Debug, Clone, Deserialize)]
pub struct ManualRejection {
    #[serde(alias = "responseId")]
    pub response_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Envelope shape written by the spreadsheet conversion tool
#[derive(Debug, Deserialize)]
struct RejectionEnvelope {
    data: Vec<ManualRejection>,
}

/// Parse a rejection list: either a bare JSON array or the converter's
/// `{success, data, total}` envelope.
pub fn parse_rejection_list(json: &str) -> ReconcileResult<Vec<ManualRejection>> {
    if let Ok(entries) = serde_json::from_str::<Vec<ManualRejection>>(json) {
        return Ok(entries);
    }
    serde_json::from_str::<RejectionEnvelope>(json)
        .map(|envelope| envelope.data)
        .map_err(|e| ReconcileError::Configuration(format!("unreadable rejection list: {}", e)))
}

/// A record the status guard declined to touch
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRejection {
    pub guid: String,
    pub status: String,
}

/// Accounting for one rejection import
#[derive(Debug, Clone, Serialize)]
pub struct ManualRejectionSummary {
    pub rejected: u64,
    /// Entries whose record was not pending (already reviewed or terminal)
    pub skipped: Vec<SkippedRejection>,
    /// Entries naming a guid the store does not have
    pub unknown: Vec<String>,
    pub errors: Vec<RecordFailure>,
    pub dry_run: bool,
}

/// Apply a reviewer rejection list.
///
/// Per entry: unknown guids and non-pending records are reported, pending
/// records become `rejected` with the reason carried in their indicator
/// list. Re-applying the same list is a no-op.
pub async fn apply_manual_rejections(
    repo: &ResponseRepository,
    entries: &[ManualRejection],
    dry_run: bool,
    max_lock_wait_ms: u64,
) -> ReconcileResult<ManualRejectionSummary> {
    let mut summary = ManualRejectionSummary {
        rejected: 0,
        skipped: Vec::new(),
        unknown: Vec::new(),
        errors: Vec::new(),
        dry_run,
    };

    for entry in entries {
        let reason = entry
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REASON);

        let (status, mut indicators) = match repo.status_and_indicators(&entry.response_id).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                summary.unknown.push(entry.response_id.clone());
                continue;
            }
            Err(e) => {
                summary.errors.push(RecordFailure {
                    guid: entry.response_id.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        if status != "pending" {
            summary.skipped.push(SkippedRejection {
                guid: entry.response_id.clone(),
                status,
            });
            continue;
        }

        for tag in [
            "manual_rejection".to_string(),
            format!("rejection_reason:{}", reason),
        ] {
            if !indicators.contains(&tag) {
                indicators.push(tag);
            }
        }

        if dry_run {
            debug!(guid = %entry.response_id, reason, "Dry run: would reject");
            continue;
        }

        match repo
            .reject_pending(&entry.response_id, &indicators, max_lock_wait_ms)
            .await
        {
            Ok(true) => {
                summary.rejected += 1;
                info!(guid = %entry.response_id, reason, "Rejected response from review list");
            }
            // Raced with a reviewer between the read and the guarded write
            Ok(false) => summary.skipped.push(SkippedRejection {
                guid: entry.response_id.clone(),
                status: "no longer pending".to_string(),
            }),
            Err(e) => summary.errors.push(RecordFailure {
                guid: entry.response_id.clone(),
                error: e.to_string(),
            }),
        }
    }

    info!(
        rejected = summary.rejected,
        skipped = summary.skipped.len(),
        unknown = summary.unknown.len(),
        errors = summary.errors.len(),
        dry_run = summary.dry_run,
        "Manual rejection import finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_pool, ResponseSeed};

    #[test]
    fn test_parse_bare_array() {
        let entries = parse_rejection_list(
            r#"[{"response_id":"r-a","reason":"Too short"},{"response_id":"r-b"}]"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reason.as_deref(), Some("Too short"));
        assert_eq!(entries[1].reason, None);
    }

    #[test]
    fn test_parse_converter_envelope() {
        let entries = parse_rejection_list(
            r#"{"success":true,"data":[{"responseId":"r-a","reason":"Duplicate entry"}],"total":1}"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response_id, "r-a");
    }

    #[test]
    fn test_parse_garbage_is_configuration_error() {
        let err = parse_rejection_list("{not json").unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_apply_rejects_pending_only() {
        let pool = seed_pool().await;
        ResponseSeed::new("r-a").insert(&pool).await;
        ResponseSeed::new("r-b").status("approved").insert(&pool).await;
        let repo = ResponseRepository::new(pool.clone());

        let entries = parse_rejection_list(
            r#"[{"response_id":"r-a","reason":"Too short"},
                {"response_id":"r-b","reason":"Too short"},
                {"response_id":"r-gone"}]"#,
        )
        .unwrap();

        let summary = apply_manual_rejections(&repo, &entries, false, 1_000)
            .await
            .unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].guid, "r-b");
        assert_eq!(summary.unknown, vec!["r-gone"]);
        assert!(summary.errors.is_empty());

        let (status, indicators): (String, String) = sqlx::query_as(
            "SELECT status, classification_indicators FROM responses WHERE guid = 'r-a'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "rejected");
        let tags: Vec<String> = serde_json::from_str(&indicators).unwrap();
        assert!(tags.contains(&"manual_rejection".to_string()));
        assert!(tags.contains(&"rejection_reason:Too short".to_string()));
    }

    #[tokio::test]
    async fn test_blank_reason_gets_default() {
        let pool = seed_pool().await;
        ResponseSeed::new("r-a").insert(&pool).await;
        let repo = ResponseRepository::new(pool.clone());

        let entries =
            parse_rejection_list(r#"[{"response_id":"r-a","reason":"  "}]"#).unwrap();
        apply_manual_rejections(&repo, &entries, false, 1_000)
            .await
            .unwrap();

        let indicators: String = sqlx::query_scalar(
            "SELECT classification_indicators FROM responses WHERE guid = 'r-a'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(indicators.contains("rejection_reason:Manual Rejection"));
    }

    #[tokio::test]
    async fn test_reapplying_list_is_noop() {
        let pool = seed_pool().await;
        ResponseSeed::new("r-a").insert(&pool).await;
        let repo = ResponseRepository::new(pool);

        let entries = parse_rejection_list(r#"[{"response_id":"r-a"}]"#).unwrap();
        apply_manual_rejections(&repo, &entries, false, 1_000)
            .await
            .unwrap();
        let second = apply_manual_rejections(&repo, &entries, false, 1_000)
            .await
            .unwrap();

        assert_eq!(second.rejected, 0);
        assert_eq!(second.skipped.len(), 1);
        assert_eq!(second.skipped[0].status, "rejected");
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let pool = seed_pool().await;
        ResponseSeed::new("r-a").insert(&pool).await;
        let repo = ResponseRepository::new(pool.clone());

        let entries = parse_rejection_list(r#"[{"response_id":"r-a"}]"#).unwrap();
        let summary = apply_manual_rejections(&repo, &entries, true, 1_000)
            .await
            .unwrap();

        assert_eq!(summary.rejected, 0);
        let status: String =
            sqlx::query_scalar("SELECT status FROM responses WHERE guid = 'r-a'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "pending");
    }
}
