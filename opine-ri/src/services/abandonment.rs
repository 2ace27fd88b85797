//! Abandonment Detector
//!
//! **[RI-AB-010]** Recognizes responses that should be terminal
//! ("abandoned") from multi-source signals: the record's own
//! `abandoned_reason` field, the client sync metadata bag, and for CATI
//! interviews the telephony call status.
//!
//! Pure and side-effect free - safe to run in dry-run/report-only mode.
//! Signals are evaluated in a fixed precedence order: the first match
//! becomes the single reported reason, while every match is retained in
//! `indicators` for audit.

use opine_common::db::models::{InterviewMode, ResponseRecord, ResponseStatus};

/// Call statuses that mean the call was actually answered. Anything else
/// present on a CATI record (busy, no_answer, dropped, ...) disqualifies it.
const ANSWERED_CALL_STATUSES: [&str; 2] = ["call_connected", "success"];

/// Classification result for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonmentClassification {
    pub should_abandon: bool,
    /// First matching signal, None when no signal fired
    pub reason: Option<String>,
    /// Every matching signal, in precedence order
    pub indicators: Vec<String>,
}

impl AbandonmentClassification {
    fn untouched() -> Self {
        Self {
            should_abandon: false,
            reason: None,
            indicators: Vec::new(),
        }
    }
}

/// Abandonment Detector
pub struct AbandonmentDetector;

impl AbandonmentDetector {
    /// Classify one record.
    ///
    /// **[RI-AB-020]** Precedence:
    /// 1. explicit `abandoned_reason` field, present and non-empty
    /// 2. `sync_metadata.abandoned == true`
    /// 3. `sync_metadata.abandoned_reason` present
    /// 4. CATI only: call status present and not in the answered allow-list
    ///
    /// Records already `abandoned` are never re-flagged: that status is
    /// authoritative once set and there is no downgrade path. Records with
    /// no indicator at all are left untouched.
    pub fn classify(record: &ResponseRecord) -> AbandonmentClassification {
        if record.status == ResponseStatus::Abandoned {
            return AbandonmentClassification::untouched();
        }

        let mut reason: Option<String> = None;
        let mut indicators: Vec<String> = Vec::new();

        if let Some(field_reason) = record.abandoned_reason.as_deref() {
            if !field_reason.trim().is_empty() {
                indicators.push("abandoned_reason_field".to_string());
                reason.get_or_insert_with(|| field_reason.to_string());
            }
        }

        if record.sync_metadata.abandoned == Some(true) {
            indicators.push("sync_metadata_abandoned".to_string());
            reason.get_or_insert_with(|| "Marked abandoned during sync".to_string());
        }

        if let Some(meta_reason) = record.sync_metadata.abandoned_reason.as_deref() {
            if !meta_reason.trim().is_empty() {
                indicators.push("sync_metadata_abandoned_reason".to_string());
                reason.get_or_insert_with(|| meta_reason.to_string());
            }
        }

        if record.interview_mode == InterviewMode::Cati {
            if let Some(call_status) = record.call_status.as_deref() {
                if !call_status.is_empty()
                    && !ANSWERED_CALL_STATUSES.contains(&call_status)
                {
                    indicators.push(format!("call_status:{}", call_status));
                    reason.get_or_insert_with(|| format!("Call status: {}", call_status));
                }
            }
        }

        AbandonmentClassification {
            should_abandon: reason.is_some(),
            reason,
            indicators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opine_common::db::models::SyncMetadata;

    fn record(mode: InterviewMode) -> ResponseRecord {
        ResponseRecord {
            guid: "r-001".to_string(),
            session_id: "s-001".to_string(),
            survey_guid: "sv-001".to_string(),
            interview_mode: mode,
            status: ResponseStatus::Pending,
            start_time: Some(1_700_000_040_000),
            end_time: None,
            total_time_spent: Some(45),
            created_at: 1_700_000_700_000,
            answers: Vec::new(),
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
    fn test_no_indicator_leaves_record_untouched() {
        let classification = AbandonmentDetector::classify(&record(InterviewMode::Capi));
        assert!(!classification.should_abandon);
        assert_eq!(classification.reason, None);
        assert!(classification.indicators.is_empty());
    }

    #[test]
    fn test_explicit_field_wins_over_call_status() {
        let mut r = record(InterviewMode::Cati);
        r.abandoned_reason = Some("x".to_string());
        r.call_status = Some("busy".to_string());

        let classification = AbandonmentDetector::classify(&r);
        assert!(classification.should_abandon);
        assert_eq!(classification.reason.as_deref(), Some("x"));
        // Both signals retained for audit
        assert_eq!(
            classification.indicators,
            vec!["abandoned_reason_field", "call_status:busy"]
        );
    }

    #[test]
    fn test_busy_call_status_flags_cati() {
        let mut r = record(InterviewMode::Cati);
        r.call_status = Some("busy".to_string());

        let classification = AbandonmentDetector::classify(&r);
        assert!(classification.should_abandon);
        assert_eq!(classification.reason.as_deref(), Some("Call status: busy"));
    }

    #[test]
    fn test_answered_call_statuses_do_not_flag() {
        for status in ANSWERED_CALL_STATUSES {
            let mut r = record(InterviewMode::Cati);
            r.call_status = Some(status.to_string());
            assert!(!AbandonmentDetector::classify(&r).should_abandon);
        }
    }

    #[test]
    fn test_call_status_ignored_for_capi() {
        // A CAPI record has no status-based signal beyond the field and
        // metadata checks, even if a stray call_status value is present
        let mut r = record(InterviewMode::Capi);
        r.call_status = Some("busy".to_string());
        assert!(!AbandonmentDetector::classify(&r).should_abandon);
    }

    #[test]
    fn test_sync_metadata_flag() {
        let mut r = record(InterviewMode::Capi);
        r.sync_metadata.abandoned = Some(true);

        let classification = AbandonmentDetector::classify(&r);
        assert!(classification.should_abandon);
        assert_eq!(
            classification.reason.as_deref(),
            Some("Marked abandoned during sync")
        );
        assert_eq!(classification.indicators, vec!["sync_metadata_abandoned"]);
    }

    #[test]
    fn test_sync_metadata_reason_beats_call_status() {
        let mut r = record(InterviewMode::Cati);
        r.sync_metadata.abandoned_reason = Some("Respondent hung up".to_string());
        r.call_status = Some("dropped".to_string());

        let classification = AbandonmentDetector::classify(&r);
        assert_eq!(
            classification.reason.as_deref(),
            Some("Respondent hung up")
        );
        assert_eq!(
            classification.indicators,
            vec!["sync_metadata_abandoned_reason", "call_status:dropped"]
        );
    }

    #[test]
    fn test_blank_field_reason_is_no_signal() {
        let mut r = record(InterviewMode::Capi);
        r.abandoned_reason = Some("   ".to_string());
        assert!(!AbandonmentDetector::classify(&r).should_abandon);
    }

    #[test]
    fn test_already_abandoned_never_reflagged() {
        let mut r = record(InterviewMode::Cati);
        r.status = ResponseStatus::Abandoned;
        r.abandoned_reason = Some("x".to_string());
        r.call_status = Some("busy".to_string());

        let classification = AbandonmentDetector::classify(&r);
        assert!(!classification.should_abandon);
        assert!(classification.indicators.is_empty());
    }
}
