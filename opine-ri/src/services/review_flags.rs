//! Reviewer-flag classification
//!
//! Two independent heuristics advise the review queue: a duration-based
//! "looks complete, should be approved" check and a completeness-based
//! "should be rejected" check. They were written separately and can fire
//! on the same record; when that happens the record is reported as an
//! anomaly rather than silently resolved either way - no status is
//! written for conflicted records.

use opine_common::db::models::{ResponseRecord, ResponseStatus};

/// Per-survey review thresholds
#[derive(Debug, Clone)]
pub struct ReviewCriteria {
    /// An interview at or above this duration with a recorded end time is
    /// an approval candidate
    pub min_duration_secs: i64,
    /// An interview with fewer answers than this is a rejection candidate
    pub min_answer_count: usize,
}

impl Default for ReviewCriteria {
    fn default() -> Self {
        Self {
            min_duration_secs: 180,
            min_answer_count: 5,
        }
    }
}

/// Outcome of the reviewer heuristics for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewFlag {
    /// No heuristic fired (or the record is not pending review)
    None,
    /// Duration heuristic: looks like a completed, reviewable interview
    ShouldApprove,
    /// Completeness heuristic: too few answers to be a real interview
    ShouldReject { reason: String },
    /// Both heuristics fired - reportable anomaly, nothing is written
    Conflict {
        approve_signal: String,
        reject_signal: String,
    },
}

/// Run both reviewer heuristics against a pending record.
///
/// Only `pending` records are review candidates; everything else returns
/// [`ReviewFlag::None`].
pub fn classify_review(record: &ResponseRecord, criteria: &ReviewCriteria) -> ReviewFlag {
    if record.status != ResponseStatus::Pending {
        return ReviewFlag::None;
    }

    let approve_signal = match (record.total_time_spent, record.end_time) {
        (Some(duration), Some(_)) if duration >= criteria.min_duration_secs => Some(format!(
            "duration {}s >= {}s with recorded end time",
            duration, criteria.min_duration_secs
        )),
        _ => None,
    };

    let reject_signal = if record.answers.len() < criteria.min_answer_count {
        Some(format!(
            "only {} answers, minimum {}",
            record.answers.len(),
            criteria.min_answer_count
        ))
    } else {
        None
    };

    match (approve_signal, reject_signal) {
        (Some(approve_signal), Some(reject_signal)) => ReviewFlag::Conflict {
            approve_signal,
            reject_signal,
        },
        (Some(_), None) => ReviewFlag::ShouldApprove,
        (None, Some(reason)) => ReviewFlag::ShouldReject { reason },
        (None, None) => ReviewFlag::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opine_common::db::models::{AnswerPair, InterviewMode, SyncMetadata};

    fn record(duration: Option<i64>, answer_count: usize) -> ResponseRecord {
        ResponseRecord {
            guid: "r-001".to_string(),
            session_id: "s-001".to_string(),
            survey_guid: "sv-001".to_string(),
            interview_mode: InterviewMode::Capi,
            status: ResponseStatus::Pending,
            start_time: Some(1_700_000_040_000),
            end_time: Some(1_700_000_640_000),
            total_time_spent: duration,
            created_at: 1_700_000_700_000,
            answers: (0..answer_count)
                .map(|i| AnswerPair {
                    question_id: format!("q{}", i),
                    response: serde_json::json!("x"),
                })
                .collect(),
            audio_signature: None,
            location: None,
            call_id: None,
            call_status: None,
            interviewer_ref: None,
            sync_metadata: SyncMetadata::default(),
            content_hash: None,
            content_hash_version: None,
            abandoned_reason: None,
            classification_indicators: Vec::new(),
        }
    }

    #[test]
    fn test_approve_only() {
        let flag = classify_review(&record(Some(600), 12), &ReviewCriteria::default());
        assert_eq!(flag, ReviewFlag::ShouldApprove);
    }

    #[test]
    fn test_reject_only() {
        let flag = classify_review(&record(Some(30), 2), &ReviewCriteria::default());
        match flag {
            ReviewFlag::ShouldReject { reason } => assert!(reason.contains("2 answers")),
            other => panic!("Expected ShouldReject, got {:?}", other),
        }
    }

    #[test]
    fn test_simultaneous_triggers_are_a_conflict() {
        // Long enough to look complete, too few answers to keep - the
        // heuristics disagree and neither wins
        let flag = classify_review(&record(Some(600), 2), &ReviewCriteria::default());
        assert!(matches!(flag, ReviewFlag::Conflict { .. }));
    }

    #[test]
    fn test_neither_heuristic() {
        let flag = classify_review(&record(Some(30), 12), &ReviewCriteria::default());
        assert_eq!(flag, ReviewFlag::None);
    }

    #[test]
    fn test_non_pending_records_skipped() {
        let mut r = record(Some(600), 2);
        r.status = ResponseStatus::Approved;
        assert_eq!(
            classify_review(&r, &ReviewCriteria::default()),
            ReviewFlag::None
        );
    }

    #[test]
    fn test_missing_end_time_blocks_approval() {
        let mut r = record(Some(600), 12);
        r.end_time = None;
        assert_eq!(
            classify_review(&r, &ReviewCriteria::default()),
            ReviewFlag::None
        );
    }
}
