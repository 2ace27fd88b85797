//! Database models
//!
//! **[RI-DM-010]** Interview responses carry three kinds of fields:
//! classification fields written by the platform, mode-specific signature
//! material synced from the client, and integrity fields written only by the
//! Response Integrity engine.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Interview collection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterviewMode {
    /// Computer-assisted personal interview (field device, audio + GPS)
    Capi,
    /// Computer-assisted telephone interview (call center)
    Cati,
}

impl InterviewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewMode::Capi => "capi",
            InterviewMode::Cati => "cati",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "capi" => Some(InterviewMode::Capi),
            "cati" => Some(InterviewMode::Cati),
            _ => None,
        }
    }
}

/// Response lifecycle status.
///
/// The platform writes new statuses over time; values this build does not
/// know are preserved verbatim as [`ResponseStatus::Other`] rather than
/// rejected, so a sweep never drops rows it merely doesn't recognize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Pending,
    Approved,
    Rejected,
    Abandoned,
    Terminated,
    #[serde(untagged)]
    Other(String),
}

impl ResponseStatus {
    /// Terminal statuses are authoritative: nothing downgrades them
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseStatus::Abandoned | ResponseStatus::Terminated)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Approved => "approved",
            ResponseStatus::Rejected => "rejected",
            ResponseStatus::Abandoned => "abandoned",
            ResponseStatus::Terminated => "terminated",
            ResponseStatus::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => ResponseStatus::Pending,
            "approved" => ResponseStatus::Approved,
            "rejected" => ResponseStatus::Rejected,
            "abandoned" => ResponseStatus::Abandoned,
            "terminated" => ResponseStatus::Terminated,
            other => ResponseStatus::Other(other.to_string()),
        }
    }
}

/// One answered question, in submission order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerPair {
    pub question_id: String,
    pub response: serde_json::Value,
}

/// CAPI audio recording metadata (stored, not decoded content)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSignature {
    pub duration_secs: f64,
    pub file_size_kb: f64,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub bitrate_kbps: Option<f64>,
}

/// GPS fix captured at interview start (CAPI)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Client sync metadata bag, modeled as explicit optional fields.
///
/// **[RI-DM-020]** The mobile client writes these during offline sync; the
/// engine reads them with a fixed precedence order (see the abandonment
/// detector) instead of probing for ad hoc keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncMetadata {
    #[serde(default)]
    pub abandoned: Option<bool>,
    #[serde(default)]
    pub abandoned_reason: Option<String>,
}

/// A submitted interview response
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    pub guid: String,
    pub session_id: String,
    pub survey_guid: String,
    pub interview_mode: InterviewMode,
    pub status: ResponseStatus,
    /// Interview start, epoch ms (client clock, jitter-prone)
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// Seconds the interviewer spent in the questionnaire
    pub total_time_spent: Option<i64>,
    /// Server receipt time, epoch ms (cursor key, never hashed)
    pub created_at: i64,
    pub answers: Vec<AnswerPair>,
    pub audio_signature: Option<AudioSignature>,
    pub location: Option<GeoPoint>,
    pub call_id: Option<String>,
    pub call_status: Option<String>,
    /// Logged-in identity at submission. Excluded from hashing so the same
    /// interview re-submitted under another login still collides.
    pub interviewer_ref: Option<String>,
    pub sync_metadata: SyncMetadata,
    pub content_hash: Option<String>,
    pub content_hash_version: Option<i64>,
    pub abandoned_reason: Option<String>,
    pub classification_indicators: Vec<String>,
}

/// Raw row shape of the `responses` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResponseRow {
    pub guid: String,
    pub session_id: String,
    pub survey_guid: String,
    pub interview_mode: String,
    pub status: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub total_time_spent: Option<i64>,
    pub created_at: i64,
    pub answers: Option<String>,
    pub audio_signature: Option<String>,
    pub location: Option<String>,
    pub call_id: Option<String>,
    pub call_status: Option<String>,
    pub interviewer_ref: Option<String>,
    pub sync_metadata: Option<String>,
    pub content_hash: Option<String>,
    pub content_hash_version: Option<i64>,
    pub abandoned_reason: Option<String>,
    pub classification_indicators: Option<String>,
}

impl ResponseRow {
    /// Decode the JSON columns into a typed record.
    ///
    /// Fails per row, never per page: the caller records the malformed guid
    /// and keeps going.
    pub fn into_record(self) -> Result<ResponseRecord> {
        let malformed = |field: &str, e: &dyn std::fmt::Display| Error::MalformedRecord {
            guid: self.guid.clone(),
            message: format!("{}: {}", field, e),
        };

        let interview_mode = InterviewMode::parse(&self.interview_mode)
            .ok_or_else(|| malformed("interview_mode", &self.interview_mode))?;

        let answers: Vec<AnswerPair> = match &self.answers {
            Some(json) if !json.is_empty() => {
                serde_json::from_str(json).map_err(|e| malformed("answers", &e))?
            }
            _ => Vec::new(),
        };

        let audio_signature: Option<AudioSignature> = match &self.audio_signature {
            Some(json) if !json.is_empty() => {
                Some(serde_json::from_str(json).map_err(|e| malformed("audio_signature", &e))?)
            }
            _ => None,
        };

        let location: Option<GeoPoint> = match &self.location {
            Some(json) if !json.is_empty() => {
                Some(serde_json::from_str(json).map_err(|e| malformed("location", &e))?)
            }
            _ => None,
        };

        let sync_metadata: SyncMetadata = match &self.sync_metadata {
            Some(json) if !json.is_empty() => {
                serde_json::from_str(json).map_err(|e| malformed("sync_metadata", &e))?
            }
            _ => SyncMetadata::default(),
        };

        let classification_indicators: Vec<String> = match &self.classification_indicators {
            Some(json) if !json.is_empty() => {
                serde_json::from_str(json).map_err(|e| malformed("classification_indicators", &e))?
            }
            _ => Vec::new(),
        };

        Ok(ResponseRecord {
            guid: self.guid,
            session_id: self.session_id,
            survey_guid: self.survey_guid,
            interview_mode,
            status: ResponseStatus::parse(&self.status),
            start_time: self.start_time,
            end_time: self.end_time,
            total_time_spent: self.total_time_spent,
            created_at: self.created_at,
            answers,
            audio_signature,
            location,
            call_id: self.call_id,
            call_status: self.call_status,
            interviewer_ref: self.interviewer_ref,
            sync_metadata,
            content_hash: self.content_hash,
            content_hash_version: self.content_hash_version,
            abandoned_reason: self.abandoned_reason,
            classification_indicators,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Survey {
    pub guid: String,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interviewer {
    pub ref_code: String,
    pub display_name: String,
    pub member_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_row() -> ResponseRow {
        ResponseRow {
            guid: "r-001".to_string(),
            session_id: "s-001".to_string(),
            survey_guid: "sv-001".to_string(),
            interview_mode: "capi".to_string(),
            status: "pending".to_string(),
            start_time: Some(1_700_000_000_000),
            end_time: Some(1_700_000_900_000),
            total_time_spent: Some(900),
            created_at: 1_700_000_901_000,
            answers: Some(r#"[{"question_id":"q1","response":"yes"}]"#.to_string()),
            audio_signature: None,
            location: None,
            call_id: None,
            call_status: None,
            interviewer_ref: Some("INT-7".to_string()),
            sync_metadata: None,
            content_hash: None,
            content_hash_version: None,
            abandoned_reason: None,
            classification_indicators: None,
        }
    }

    #[test]
    fn test_into_record_decodes_json_columns() {
        let mut row = base_row();
        row.audio_signature = Some(
            r#"{"duration_secs":614.2,"file_size_kb":4812.7,"format":"m4a","codec":"aac","bitrate_kbps":64.0}"#
                .to_string(),
        );
        row.location = Some(r#"{"lat":12.9716,"lon":77.5946}"#.to_string());
        row.sync_metadata = Some(r#"{"abandoned":true}"#.to_string());

        let record = row.into_record().unwrap();
        assert_eq!(record.interview_mode, InterviewMode::Capi);
        assert_eq!(record.status, ResponseStatus::Pending);
        assert_eq!(record.answers.len(), 1);
        assert_eq!(record.answers[0].question_id, "q1");
        assert!((record.audio_signature.unwrap().duration_secs - 614.2).abs() < 1e-9);
        assert_eq!(record.sync_metadata.abandoned, Some(true));
    }

    #[test]
    fn test_into_record_malformed_answers() {
        let mut row = base_row();
        row.answers = Some("{not json".to_string());

        let err = row.into_record().unwrap_err();
        match err {
            Error::MalformedRecord { guid, .. } => assert_eq!(guid, "r-001"),
            other => panic!("Expected MalformedRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_into_record_unknown_mode_rejected() {
        let mut row = base_row();
        row.interview_mode = "cawi".to_string();
        assert!(row.into_record().is_err());
    }

    #[test]
    fn test_unknown_status_preserved() {
        let mut row = base_row();
        row.status = "quarantined".to_string();
        let record = row.into_record().unwrap();
        assert_eq!(
            record.status,
            ResponseStatus::Other("quarantined".to_string())
        );
        assert!(!record.status.is_terminal());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ResponseStatus::Abandoned.is_terminal());
        assert!(ResponseStatus::Terminated.is_terminal());
        assert!(!ResponseStatus::Pending.is_terminal());
        assert!(!ResponseStatus::Approved.is_terminal());
        assert!(!ResponseStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_status_roundtrip() {
        for s in ["pending", "approved", "rejected", "abandoned", "terminated"] {
            assert_eq!(ResponseStatus::parse(s).as_str(), s);
        }
    }
}
