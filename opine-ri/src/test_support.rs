//! Shared fixtures for in-module tests

use opine_common::db::init_schema;
use sqlx::SqlitePool;

/// In-memory pool with the full schema and reference data applied
pub async fn seed_pool() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    init_schema(&pool).await.unwrap();

    for (guid, name) in [("sv-001", "Household Survey"), ("sv-other", "Pilot")] {
        sqlx::query("INSERT INTO surveys (guid, name, active, created_at) VALUES (?, ?, 1, ?)")
            .bind(guid)
            .bind(name)
            .bind(1_699_000_000_000i64)
            .execute(&pool)
            .await
            .unwrap();
    }

    sqlx::query(
        "INSERT INTO interviewers (ref_code, display_name, member_id) VALUES ('INT-7', 'Asha Rao', 'm-7')",
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

/// Response row builder with workable defaults (a pending CATI interview)
pub struct ResponseSeed {
    guid: String,
    survey_guid: String,
    interview_mode: String,
    status: String,
    start_time: Option<i64>,
    end_time: Option<i64>,
    total_time_spent: Option<i64>,
    created_at: i64,
    answers: Option<String>,
    audio_signature: Option<String>,
    location: Option<String>,
    call_id: Option<String>,
    call_status: Option<String>,
    interviewer_ref: Option<String>,
    sync_metadata: Option<String>,
    content_hash: Option<String>,
    content_hash_version: Option<i64>,
    abandoned_reason: Option<String>,
}

impl ResponseSeed {
    pub fn new(guid: &str) -> Self {
        Self {
            guid: guid.to_string(),
            survey_guid: "sv-001".to_string(),
            interview_mode: "cati".to_string(),
            status: "pending".to_string(),
            start_time: Some(1_700_000_040_000),
            end_time: Some(1_700_000_640_000),
            total_time_spent: Some(600),
            created_at: 1_700_000_700_000,
            answers: Some(
                r#"[{"question_id":"q1","response":"yes"},{"question_id":"q2","response":"no"},
                    {"question_id":"q3","response":"a"},{"question_id":"q4","response":"b"},
                    {"question_id":"q5","response":"c"}]"#
                    .to_string(),
            ),
            audio_signature: None,
            location: None,
            call_id: Some(format!("call-{}", guid)),
            call_status: None,
            interviewer_ref: Some("INT-7".to_string()),
            sync_metadata: None,
            content_hash: None,
            content_hash_version: None,
            abandoned_reason: None,
        }
    }

    pub fn survey(mut self, survey: &str) -> Self {
        self.survey_guid = survey.to_string();
        self
    }

    pub fn mode(mut self, mode: &str) -> Self {
        self.interview_mode = mode.to_string();
        self
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn created_at(mut self, millis: i64) -> Self {
        self.created_at = millis;
        self
    }

    pub fn start_time(mut self, millis: Option<i64>) -> Self {
        self.start_time = millis;
        self
    }

    pub fn total_time(mut self, secs: Option<i64>) -> Self {
        self.total_time_spent = secs;
        self
    }

    pub fn answers_json(mut self, json: &str) -> Self {
        self.answers = Some(json.to_string());
        self
    }

    pub fn call_id(mut self, call_id: Option<&str>) -> Self {
        self.call_id = call_id.map(str::to_string);
        self
    }

    pub fn call_status(mut self, status: &str) -> Self {
        self.call_status = Some(status.to_string());
        self
    }

    pub fn sync_metadata_json(mut self, json: &str) -> Self {
        self.sync_metadata = Some(json.to_string());
        self
    }

    pub fn abandoned_reason(mut self, reason: &str) -> Self {
        self.abandoned_reason = Some(reason.to_string());
        self
    }

    pub fn hash(mut self, hash: &str, version: i64) -> Self {
        self.content_hash = Some(hash.to_string());
        self.content_hash_version = Some(version);
        self
    }

    pub async fn insert(self, pool: &SqlitePool) {
        sqlx::query(
            r#"
            INSERT INTO responses (
                guid, session_id, survey_guid, interview_mode, status,
                start_time, end_time, total_time_spent, created_at, answers,
                audio_signature, location, call_id, call_status, interviewer_ref,
                sync_metadata, content_hash, content_hash_version,
                abandoned_reason, classification_indicators, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
            "#,
        )
        .bind(&self.guid)
        .bind(format!("s-{}", self.guid))
        .bind(&self.survey_guid)
        .bind(&self.interview_mode)
        .bind(&self.status)
        .bind(self.start_time)
        .bind(self.end_time)
        .bind(self.total_time_spent)
        .bind(self.created_at)
        .bind(&self.answers)
        .bind(&self.audio_signature)
        .bind(&self.location)
        .bind(&self.call_id)
        .bind(&self.call_status)
        .bind(&self.interviewer_ref)
        .bind(&self.sync_metadata)
        .bind(&self.content_hash)
        .bind(self.content_hash_version)
        .bind(&self.abandoned_reason)
        .bind(self.created_at)
        .execute(pool)
        .await
        .unwrap();
    }
}
