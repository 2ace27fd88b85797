//! Resumable sweep checkpoints
//!
//! **[RI-BATCH-030]** After each successful batch flush the sweep persists
//! its cursor, so a crash mid-run resumes from the last flushed page
//! instead of restarting from zero. One checkpoint row per survey.

use sqlx::SqlitePool;

use crate::db::PageCursor;
use crate::error::{ReconcileError, ReconcileResult};

pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the persisted cursor for a survey, if any
    pub async fn load(&self, survey_guid: &str) -> ReconcileResult<Option<PageCursor>> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT cursor_created_at, cursor_guid FROM integrity_checkpoints
             WHERE survey_guid = ?",
        )
        .bind(survey_guid)
        .fetch_optional(&self.pool)
        .await
        .map_err(ReconcileError::from_store)?;

        Ok(row.map(|(created_at, guid)| PageCursor { created_at, guid }))
    }

    /// Persist the cursor after a successful batch flush
    pub async fn save(
        &self,
        survey_guid: &str,
        cursor: &PageCursor,
        processed: u64,
    ) -> ReconcileResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO integrity_checkpoints
             (survey_guid, cursor_created_at, cursor_guid, processed, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(survey_guid)
        .bind(cursor.created_at)
        .bind(&cursor.guid)
        .bind(processed as i64)
        .bind(opine_common::time::now_millis())
        .execute(&self.pool)
        .await
        .map_err(ReconcileError::from_store)?;
        Ok(())
    }

    /// Remove the checkpoint once a sweep completes cleanly
    pub async fn clear(&self, survey_guid: &str) -> ReconcileResult<()> {
        sqlx::query("DELETE FROM integrity_checkpoints WHERE survey_guid = ?")
            .bind(survey_guid)
            .execute(&self.pool)
            .await
            .map_err(ReconcileError::from_store)?;
        Ok(())
    }
}
