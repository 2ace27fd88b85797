//! Response store repository
//!
//! **[RI-STORE-010]** All store traffic for the sweep goes through here:
//! keyset-cursor pagination, the digest group-by, and the unordered bulk
//! update. Offset pagination is deliberately absent - under concurrent
//! inserts it double-counts or skips rows, while a (created_at, guid)
//! cursor visits each record exactly once.

use opine_common::db::models::{ResponseRecord, ResponseRow};
use sqlx::SqlitePool;

use crate::error::{ReconcileError, ReconcileResult};
use crate::services::content_hash::ContentDigest;
use crate::utils::retry_transient;

/// Stable pagination cursor: strictly after (created_at, guid)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: i64,
    pub guid: String,
}

impl std::fmt::Display for PageCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.created_at, self.guid)
    }
}

/// One fetched row: cursor fields always present, the decoded record only
/// when the JSON columns parse. A malformed row still advances the cursor.
#[derive(Debug, Clone)]
pub struct RecordFetch {
    pub guid: String,
    pub created_at: i64,
    pub parsed: Result<ResponseRecord, String>,
}

/// Abandonment correction for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonUpdate {
    pub reason: String,
    pub indicators: Vec<String>,
}

/// Fields-to-set for one record
#[derive(Debug, Clone, Default)]
pub struct UpdateFields {
    pub content_hash: Option<ContentDigest>,
    pub abandon: Option<AbandonUpdate>,
}

impl UpdateFields {
    pub fn is_empty(&self) -> bool {
        self.content_hash.is_none() && self.abandon.is_none()
    }
}

/// One accumulated mutation
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub guid: String,
    pub fields: UpdateFields,
}

/// A record-level write failure, captured without blocking the batch
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecordFailure {
    pub guid: String,
    pub error: String,
}

/// Result of one unordered bulk write
#[derive(Debug, Clone, Default)]
pub struct BulkWriteOutcome {
    /// Records where at least one field actually changed
    pub applied: u64,
    pub failures: Vec<RecordFailure>,
}

const SELECT_COLUMNS: &str = "guid, session_id, survey_guid, interview_mode, status, \
     start_time, end_time, total_time_spent, created_at, answers, audio_signature, \
     location, call_id, call_status, interviewer_ref, sync_metadata, content_hash, \
     content_hash_version, abandoned_reason, classification_indicators";

/// Response store repository
#[derive(Clone)]
pub struct ResponseRepository {
    pool: SqlitePool,
}

impl ResponseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reference-data check: the survey the records belong to must exist
    pub async fn survey_exists(&self, survey_guid: &str) -> ReconcileResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM surveys WHERE guid = ?")
            .bind(survey_guid)
            .fetch_optional(&self.pool)
            .await
            .map_err(ReconcileError::from_store)?;
        Ok(row.is_some())
    }

    /// Fetch one page of records strictly after the cursor.
    ///
    /// **[RI-STORE-020]** Ordering is (created_at, guid) ascending; with a
    /// None cursor the scan starts from the beginning.
    pub async fn fetch_page(
        &self,
        survey_guid: &str,
        after: Option<&PageCursor>,
        limit: i64,
    ) -> ReconcileResult<Vec<RecordFetch>> {
        let rows: Vec<ResponseRow> = match after {
            Some(cursor) => {
                let sql = format!(
                    "SELECT {} FROM responses
                     WHERE survey_guid = ?
                       AND (created_at > ? OR (created_at = ? AND guid > ?))
                     ORDER BY created_at ASC, guid ASC
                     LIMIT ?",
                    SELECT_COLUMNS
                );
                sqlx::query_as(&sql)
                    .bind(survey_guid)
                    .bind(cursor.created_at)
                    .bind(cursor.created_at)
                    .bind(&cursor.guid)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM responses
                     WHERE survey_guid = ?
                     ORDER BY created_at ASC, guid ASC
                     LIMIT ?",
                    SELECT_COLUMNS
                );
                sqlx::query_as(&sql)
                    .bind(survey_guid)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(ReconcileError::from_store)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let guid = row.guid.clone();
                let created_at = row.created_at;
                let parsed = row.into_record().map_err(|e| e.to_string());
                RecordFetch {
                    guid,
                    created_at,
                    parsed,
                }
            })
            .collect())
    }

    /// Store-side group-by: digests shared by at least two records, with
    /// member counts. Only current-version digests participate.
    pub async fn digest_groups(
        &self,
        survey_guid: &str,
        hash_version: i64,
    ) -> ReconcileResult<Vec<(String, i64)>> {
        sqlx::query_as(
            "SELECT content_hash, COUNT(*) AS members FROM responses
             WHERE survey_guid = ? AND content_hash IS NOT NULL
               AND content_hash_version = ?
             GROUP BY content_hash
             HAVING COUNT(*) >= 2
             ORDER BY content_hash",
        )
        .bind(survey_guid)
        .bind(hash_version)
        .fetch_all(&self.pool)
        .await
        .map_err(ReconcileError::from_store)
    }

    /// All members of one digest group.
    ///
    /// Rows whose JSON columns fail to decode are logged and skipped here;
    /// such rows cannot carry a current-version digest computed by this
    /// engine in the first place.
    pub async fn fetch_by_digest(
        &self,
        survey_guid: &str,
        digest: &str,
    ) -> ReconcileResult<Vec<ResponseRecord>> {
        let sql = format!(
            "SELECT {} FROM responses
             WHERE survey_guid = ? AND content_hash = ?
             ORDER BY created_at ASC, guid ASC",
            SELECT_COLUMNS
        );
        let rows: Vec<ResponseRow> = sqlx::query_as(&sql)
            .bind(survey_guid)
            .bind(digest)
            .fetch_all(&self.pool)
            .await
            .map_err(ReconcileError::from_store)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match row.into_record() {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable group member"),
            }
        }
        Ok(records)
    }

    /// Guids still lacking a digest (reported, never silently dropped)
    pub async fn fetch_hash_missing(&self, survey_guid: &str) -> ReconcileResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT guid FROM responses
             WHERE survey_guid = ? AND content_hash IS NULL
             ORDER BY guid",
        )
        .bind(survey_guid)
        .fetch_all(&self.pool)
        .await
        .map_err(ReconcileError::from_store)?;
        Ok(rows.into_iter().map(|(guid,)| guid).collect())
    }

    /// Guids whose digest was computed under a stale formula version
    pub async fn fetch_hash_stale(
        &self,
        survey_guid: &str,
        hash_version: i64,
    ) -> ReconcileResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT guid FROM responses
             WHERE survey_guid = ? AND content_hash IS NOT NULL
               AND (content_hash_version IS NULL OR content_hash_version != ?)
             ORDER BY guid",
        )
        .bind(survey_guid)
        .bind(hash_version)
        .fetch_all(&self.pool)
        .await
        .map_err(ReconcileError::from_store)?;
        Ok(rows.into_iter().map(|(guid,)| guid).collect())
    }

    /// Apply a batch of updates as an unordered bulk write.
    ///
    /// **[RI-STORE-030]** Each record's update executes independently: a
    /// failure is captured as `{guid, error}` and the rest of the batch
    /// continues. Lock contention on individual statements retries within
    /// `max_lock_wait_ms`.
    ///
    /// Abandonment corrections carry a status guard (`status !=
    /// 'abandoned'`) so re-applying them is a no-op, which is what makes
    /// re-running a sweep after a crash safe.
    pub async fn bulk_update(
        &self,
        updates: &[RecordUpdate],
        max_lock_wait_ms: u64,
    ) -> BulkWriteOutcome {
        let mut outcome = BulkWriteOutcome::default();
        let now = opine_common::time::now_millis();

        for update in updates {
            match self.apply_one(update, now, max_lock_wait_ms).await {
                Ok(changed) => {
                    if changed {
                        outcome.applied += 1;
                    }
                }
                Err(e) => outcome.failures.push(RecordFailure {
                    guid: update.guid.clone(),
                    error: e.to_string(),
                }),
            }
        }

        outcome
    }

    /// Apply one record's fields; returns whether any row actually changed
    async fn apply_one(
        &self,
        update: &RecordUpdate,
        now: i64,
        max_lock_wait_ms: u64,
    ) -> ReconcileResult<bool> {
        let mut changed = false;

        if let Some(digest) = &update.fields.content_hash {
            let rows = retry_transient("content hash write", &update.guid, max_lock_wait_ms, || {
                let pool = self.pool.clone();
                let guid = update.guid.clone();
                let hash = digest.hash.clone();
                let version = digest.version;
                async move {
                    sqlx::query(
                        "UPDATE responses
                         SET content_hash = ?, content_hash_version = ?, updated_at = ?
                         WHERE guid = ?",
                    )
                    .bind(&hash)
                    .bind(version)
                    .bind(now)
                    .bind(&guid)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(ReconcileError::from_store)
                }
            })
            .await?;
            changed |= rows > 0;
        }

        if let Some(abandon) = &update.fields.abandon {
            let indicators_json = serde_json::to_string(&abandon.indicators)
                .map_err(|e| ReconcileError::RecordCompute {
                    guid: update.guid.clone(),
                    message: format!("indicator serialization: {}", e),
                })?;

            let rows = retry_transient("abandonment write", &update.guid, max_lock_wait_ms, || {
                let pool = self.pool.clone();
                let guid = update.guid.clone();
                let reason = abandon.reason.clone();
                let indicators = indicators_json.clone();
                async move {
                    sqlx::query(
                        "UPDATE responses
                         SET status = 'abandoned', abandoned_reason = ?,
                             classification_indicators = ?, updated_at = ?
                         WHERE guid = ? AND status != 'abandoned'",
                    )
                    .bind(&reason)
                    .bind(&indicators)
                    .bind(now)
                    .bind(&guid)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected())
                    .map_err(ReconcileError::from_store)
                }
            })
            .await?;
            changed |= rows > 0;
        }

        Ok(changed)
    }

    /// Current status and indicator list for one record; None when the
    /// guid does not exist
    pub async fn status_and_indicators(
        &self,
        guid: &str,
    ) -> ReconcileResult<Option<(String, Vec<String>)>> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT status, classification_indicators FROM responses WHERE guid = ?",
        )
        .bind(guid)
        .fetch_optional(&self.pool)
        .await
        .map_err(ReconcileError::from_store)?;

        match row {
            None => Ok(None),
            Some((status, indicators)) => {
                let indicators = match indicators.as_deref() {
                    Some(json) if !json.is_empty() => {
                        serde_json::from_str(json).map_err(|e| ReconcileError::RecordCompute {
                            guid: guid.to_string(),
                            message: format!("classification_indicators: {}", e),
                        })?
                    }
                    _ => Vec::new(),
                };
                Ok(Some((status, indicators)))
            }
        }
    }

    /// Guarded rejection write, shared by duplicate remediation and the
    /// manual rejection import.
    ///
    /// The status guard keeps this idempotent and confines it to records a
    /// reviewer has not touched in the meantime.
    pub async fn reject_pending(
        &self,
        guid: &str,
        indicators: &[String],
        max_lock_wait_ms: u64,
    ) -> ReconcileResult<bool> {
        let indicators_json =
            serde_json::to_string(indicators).map_err(|e| ReconcileError::RecordCompute {
                guid: guid.to_string(),
                message: format!("indicator serialization: {}", e),
            })?;
        let now = opine_common::time::now_millis();

        let rows = retry_transient("duplicate rejection", guid, max_lock_wait_ms, || {
            let pool = self.pool.clone();
            let guid = guid.to_string();
            let indicators = indicators_json.clone();
            async move {
                sqlx::query(
                    "UPDATE responses
                     SET status = 'rejected', classification_indicators = ?, updated_at = ?
                     WHERE guid = ? AND status = 'pending'",
                )
                .bind(&indicators)
                .bind(now)
                .bind(&guid)
                .execute(&pool)
                .await
                .map(|r| r.rows_affected())
                .map_err(ReconcileError::from_store)
            }
        })
        .await?;

        Ok(rows > 0)
    }

    /// Identity lookup for report enrichment only - never an input to
    /// hashing or grouping
    pub async fn interviewer_display_name(
        &self,
        ref_code: &str,
    ) -> ReconcileResult<Option<String>> {
        sqlx::query_scalar("SELECT display_name FROM interviewers WHERE ref_code = ?")
            .bind(ref_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(ReconcileError::from_store)
    }
}
