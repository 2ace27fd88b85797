//! Canonical Signature Builder
//!
//! **[RI-SIG-010]** Turns a response record into a deterministic,
//! identity-excluding signature string used as content-hash input.
//!
//! Two submissions of the same real-world interview can differ in logged-in
//! identity (multi-device logins), server receipt time (offline-sync
//! retries), and start-time seconds (clock jitter). The signature therefore:
//! - never includes `interviewer_ref` or `created_at`
//! - truncates `start_time` to whole minutes
//! - truncates the audio signature to whole seconds/KB and rounds GPS to
//!   4 decimal places (~11 m)
//!
//! Every field is length-prefixed (`len:value,`) so a value containing a
//! delimiter cannot forge a colliding signature, and missing mode-specific
//! data is encoded as an explicit empty field so signatures of different
//! shapes never collide with signatures that have data.

use crate::error::{ReconcileError, ReconcileResult};
use opine_common::db::models::{InterviewMode, ResponseRecord};

/// Sorted question ids beyond this count do not participate in the
/// signature. Interviews sharing a question set and the other coarse fields
/// can therefore collide; widening this requires a content-hash version
/// bump and backfill.
pub const SIGNATURE_QUESTION_LIMIT: usize = 20;

/// GPS coordinates are rounded to this many decimal places (~11 m)
const GPS_DECIMALS: usize = 4;

/// Normalized, identity-excluding hash input for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalSignature(String);

impl CanonicalSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Length-prefixed field encoder.
///
/// `field("ab")` emits `2:ab,` - the byte-length prefix makes the encoding
/// unambiguous under concatenation.
#[derive(Default)]
struct SignatureEncoder {
    buf: String,
}

impl SignatureEncoder {
    fn field(&mut self, value: &str) {
        self.buf.push_str(&value.len().to_string());
        self.buf.push(':');
        self.buf.push_str(value);
        self.buf.push(',');
    }

    /// Explicit empty marker for absent data
    fn empty(&mut self) {
        self.field("");
    }

    fn finish(self) -> String {
        self.buf
    }
}

/// Canonical Signature Builder
pub struct CanonicalSignatureBuilder;

impl CanonicalSignatureBuilder {
    /// Build the canonical signature for a record.
    ///
    /// Pure and total over well-formed records; non-finite numeric input
    /// surfaces as a per-record compute error.
    ///
    /// **[RI-SIG-020]** Field order: survey ref, start minute, answer count,
    /// response signature, mode marker, mode extension.
    pub fn build(record: &ResponseRecord) -> ReconcileResult<CanonicalSignature> {
        let mut enc = SignatureEncoder::default();

        enc.field(&record.survey_guid);

        // Whole-minute start time tolerates sync jitter within a minute;
        // crossing a minute boundary intentionally changes the signature.
        match record.start_time {
            Some(millis) => enc.field(&millis.div_euclid(60_000).to_string()),
            None => enc.empty(),
        }

        enc.field(&record.answers.len().to_string());
        enc.field(&Self::response_signature(record));
        enc.field(record.interview_mode.as_str());

        match record.interview_mode {
            InterviewMode::Capi => {
                match &record.audio_signature {
                    Some(audio) => {
                        let mut sub = SignatureEncoder::default();
                        sub.field(&truncate_whole(record, "audio duration", audio.duration_secs)?);
                        sub.field(&truncate_whole(record, "audio size", audio.file_size_kb)?);
                        sub.field(audio.format.as_deref().unwrap_or(""));
                        sub.field(audio.codec.as_deref().unwrap_or(""));
                        match audio.bitrate_kbps {
                            Some(kbps) => sub.field(&truncate_whole(record, "audio bitrate", kbps)?),
                            None => sub.empty(),
                        }
                        enc.field(&sub.finish());
                    }
                    None => enc.empty(),
                }
                match &record.location {
                    Some(point) => {
                        if !point.lat.is_finite() || !point.lon.is_finite() {
                            return Err(compute_error(record, "non-finite GPS coordinates"));
                        }
                        let mut sub = SignatureEncoder::default();
                        sub.field(&format!("{:.*}", GPS_DECIMALS, point.lat));
                        sub.field(&format!("{:.*}", GPS_DECIMALS, point.lon));
                        enc.field(&sub.finish());
                    }
                    None => enc.empty(),
                }
            }
            InterviewMode::Cati => match &record.call_id {
                Some(call_id) => enc.field(call_id),
                None => enc.empty(),
            },
        }

        Ok(CanonicalSignature(enc.finish()))
    }

    /// Sorted question-id signature, capped at [`SIGNATURE_QUESTION_LIMIT`].
    ///
    /// Answer values do not participate - only which questions were asked.
    fn response_signature(record: &ResponseRecord) -> String {
        let mut question_ids: Vec<&str> = record
            .answers
            .iter()
            .map(|a| a.question_id.as_str())
            .collect();
        question_ids.sort_unstable();

        let mut sub = SignatureEncoder::default();
        for question_id in question_ids.into_iter().take(SIGNATURE_QUESTION_LIMIT) {
            sub.field(question_id);
        }
        sub.finish()
    }
}

fn truncate_whole(record: &ResponseRecord, field: &str, value: f64) -> ReconcileResult<String> {
    if !value.is_finite() {
        return Err(compute_error(record, &format!("non-finite {}", field)));
    }
    Ok((value.trunc() as i64).to_string())
}

fn compute_error(record: &ResponseRecord, message: &str) -> ReconcileError {
    ReconcileError::RecordCompute {
        guid: record.guid.clone(),
        message: message.to_string(),
    }
}
