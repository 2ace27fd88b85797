//! Database initialization
//!
//! Opens (or creates) the shared sqlite store and applies the idempotent
//! schema. The `responses` table is owned by the collection platform; the
//! integrity columns on it and the `integrity_*` tables are owned by the
//! Response Integrity engine.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Increase connection pool size for concurrent write operations.
    // The reconciliation sweep shares the store with live interview uploads.
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer. The sweep pages through
    // the store while the API continues to insert responses.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Busy timeout bounds how long a writer waits on a held lock
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Apply the full schema (idempotent - safe to call multiple times).
///
/// Split out from [`init_database`] so tests can run against an in-memory
/// pool without touching the filesystem.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_settings_table(pool).await?;
    create_surveys_table(pool).await?;
    create_interviewers_table(pool).await?;
    create_responses_table(pool).await?;
    create_integrity_checkpoints_table(pool).await?;
    create_integrity_leases_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Key/value runtime settings shared by all services
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_surveys_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS surveys (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_interviewers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interviewers (
            ref_code TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            member_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Interview response records.
///
/// `content_hash`, `content_hash_version`, `abandoned_reason` and
/// `classification_indicators` are written only by the integrity engine.
async fn create_responses_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS responses (
            guid TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            survey_guid TEXT NOT NULL,
            interview_mode TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            start_time INTEGER,
            end_time INTEGER,
            total_time_spent INTEGER,
            created_at INTEGER NOT NULL,
            answers TEXT,
            audio_signature TEXT,
            location TEXT,
            call_id TEXT,
            call_status TEXT,
            interviewer_ref TEXT,
            sync_metadata TEXT,
            content_hash TEXT,
            content_hash_version INTEGER,
            abandoned_reason TEXT,
            classification_indicators TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Keyset pagination scans (created_at, guid) per survey
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_responses_cursor
         ON responses (survey_guid, created_at, guid)",
    )
    .execute(pool)
    .await?;

    // Digest group-by and member lookups
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_responses_hash
         ON responses (survey_guid, content_hash)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Resumable sweep cursor, one row per survey
async fn create_integrity_checkpoints_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS integrity_checkpoints (
            survey_guid TEXT PRIMARY KEY,
            cursor_created_at INTEGER NOT NULL,
            cursor_guid TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Run mutual-exclusion leases (one reconciliation sweep at a time)
async fn create_integrity_leases_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS integrity_leases (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
