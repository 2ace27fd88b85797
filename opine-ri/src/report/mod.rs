//! Duplicate report
//!
//! **[RI-REP-010]** Read-only structured output of the duplicate-report
//! pass: a JSON document for the dashboard plus a CSV mirror (one row per
//! record) for spreadsheet review. Interviewer references are resolved to
//! display names for the report only - identity never participates in
//! hashing or grouping.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;

use opine_common::db::models::ResponseRecord;

use crate::db::ResponseRepository;
use crate::error::{ReconcileError, ReconcileResult};
use crate::services::content_hash::CONTENT_HASH_VERSION;
use crate::services::grouping::{DuplicateGroup, DuplicateGroupResolver};

/// Identity-lookup collaborator, report enrichment only
#[async_trait]
pub trait InterviewerDirectory: Sync {
    async fn display_name(&self, ref_code: &str) -> ReconcileResult<Option<String>>;
}

#[async_trait]
impl InterviewerDirectory for ResponseRepository {
    async fn display_name(&self, ref_code: &str) -> ReconcileResult<Option<String>> {
        self.interviewer_display_name(ref_code).await
    }
}

/// One record as it appears in the report
#[derive(Debug, Clone, Serialize)]
pub struct ReportRecord {
    pub guid: String,
    pub session_id: String,
    pub status: String,
    pub interview_mode: String,
    pub created_at: i64,
    pub start_time: Option<i64>,
    pub total_time_spent: Option<i64>,
    pub interviewer_ref: Option<String>,
    pub interviewer_name: Option<String>,
}

/// Duplicates of one group, bucketed by status
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportBuckets {
    pub abandoned_or_terminated: Vec<ReportRecord>,
    pub rejected: Vec<ReportRecord>,
    pub pending: Vec<ReportRecord>,
    pub approved: Vec<ReportRecord>,
    pub other: Vec<ReportRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportGroup {
    pub digest: String,
    pub canonical: ReportRecord,
    pub duplicates: ReportBuckets,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryCounts {
    pub abandoned_or_terminated: usize,
    pub rejected: usize,
    pub pending: usize,
    pub approved: usize,
    pub other: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_groups: usize,
    pub total_duplicates: usize,
    pub by_category: CategoryCounts,
}

/// The structured duplicate report
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateReport {
    pub generated_at: String,
    pub survey_guid: String,
    pub summary: ReportSummary,
    pub groups: Vec<ReportGroup>,
    /// Records with no digest at all - reported, never silently dropped
    pub hash_missing: Vec<String>,
    /// Records whose digest predates the current formula version
    pub hash_stale: Vec<String>,
}

/// Build the duplicate report for one survey.
///
/// Uses the store-side group-by to find candidate digests, then resolves
/// canonical/duplicate structure per group. Read-only throughout.
pub async fn build_report(
    repo: &ResponseRepository,
    survey_guid: &str,
    directory: Option<&dyn InterviewerDirectory>,
) -> ReconcileResult<DuplicateReport> {
    let candidates = repo.digest_groups(survey_guid, CONTENT_HASH_VERSION).await?;

    let mut members: Vec<ResponseRecord> = Vec::new();
    for (digest, _count) in &candidates {
        members.extend(repo.fetch_by_digest(survey_guid, digest).await?);
    }

    let resolution = DuplicateGroupResolver::resolve(members);

    // Resolve each distinct interviewer reference once
    let mut names: HashMap<String, Option<String>> = HashMap::new();
    if let Some(directory) = directory {
        for group in &resolution.groups {
            for record in std::iter::once(&group.canonical).chain(group_duplicates(group)) {
                if let Some(ref_code) = &record.interviewer_ref {
                    if !names.contains_key(ref_code) {
                        names.insert(ref_code.clone(), directory.display_name(ref_code).await?);
                    }
                }
            }
        }
    }

    let mut by_category = CategoryCounts::default();
    let mut total_duplicates = 0usize;
    let groups: Vec<ReportGroup> = resolution
        .groups
        .iter()
        .map(|group| {
            by_category.abandoned_or_terminated += group.duplicates.abandoned_or_terminated.len();
            by_category.rejected += group.duplicates.rejected.len();
            by_category.pending += group.duplicates.pending.len();
            by_category.approved += group.duplicates.approved.len();
            by_category.other += group.duplicates.other.len();
            total_duplicates += group.duplicates.len();

            ReportGroup {
                digest: group.digest.clone(),
                canonical: report_record(&group.canonical, &names),
                duplicates: ReportBuckets {
                    abandoned_or_terminated: records(&group.duplicates.abandoned_or_terminated, &names),
                    rejected: records(&group.duplicates.rejected, &names),
                    pending: records(&group.duplicates.pending, &names),
                    approved: records(&group.duplicates.approved, &names),
                    other: records(&group.duplicates.other, &names),
                },
            }
        })
        .collect();

    // Full-store accounting, not just the fetched group members
    let hash_missing = repo.fetch_hash_missing(survey_guid).await?;
    let hash_stale = repo.fetch_hash_stale(survey_guid, CONTENT_HASH_VERSION).await?;

    Ok(DuplicateReport {
        generated_at: opine_common::time::now().to_rfc3339(),
        survey_guid: survey_guid.to_string(),
        summary: ReportSummary {
            total_groups: groups.len(),
            total_duplicates,
            by_category,
        },
        groups,
        hash_missing,
        hash_stale,
    })
}

fn group_duplicates(group: &DuplicateGroup) -> impl Iterator<Item = &ResponseRecord> {
    group
        .duplicates
        .abandoned_or_terminated
        .iter()
        .chain(group.duplicates.rejected.iter())
        .chain(group.duplicates.pending.iter())
        .chain(group.duplicates.approved.iter())
        .chain(group.duplicates.other.iter())
}

fn records(
    members: &[ResponseRecord],
    names: &HashMap<String, Option<String>>,
) -> Vec<ReportRecord> {
    members.iter().map(|r| report_record(r, names)).collect()
}

fn report_record(
    record: &ResponseRecord,
    names: &HashMap<String, Option<String>>,
) -> ReportRecord {
    let interviewer_name = record
        .interviewer_ref
        .as_ref()
        .and_then(|r| names.get(r).cloned().flatten());

    ReportRecord {
        guid: record.guid.clone(),
        session_id: record.session_id.clone(),
        status: record.status.as_str().to_string(),
        interview_mode: record.interview_mode.as_str().to_string(),
        created_at: record.created_at,
        start_time: record.start_time,
        total_time_spent: record.total_time_spent,
        interviewer_ref: record.interviewer_ref.clone(),
        interviewer_name,
    }
}

/// Pretty JSON for the dashboard / archival
pub fn render_json(report: &DuplicateReport) -> ReconcileResult<String> {
    serde_json::to_string_pretty(report).map_err(|e| {
        ReconcileError::Common(opine_common::Error::Internal(format!(
            "report serialization: {}",
            e
        )))
    })
}

const CSV_HEADER: &str = "digest,role,category,guid,session_id,status,interview_mode,\
created_at,start_time,total_time_spent,interviewer_ref,interviewer_name";

/// CSV mirror: one row per record (canonical and duplicates alike)
pub fn render_csv(report: &DuplicateReport) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for group in &report.groups {
        csv_row(&mut out, &group.digest, "canonical", "canonical", &group.canonical);
        let buckets = [
            ("abandoned_or_terminated", &group.duplicates.abandoned_or_terminated),
            ("rejected", &group.duplicates.rejected),
            ("pending", &group.duplicates.pending),
            ("approved", &group.duplicates.approved),
            ("other", &group.duplicates.other),
        ];
        for (category, members) in buckets {
            for member in members {
                csv_row(&mut out, &group.digest, "duplicate", category, member);
            }
        }
    }

    out
}

fn csv_row(out: &mut String, digest: &str, role: &str, category: &str, record: &ReportRecord) {
    let fields = [
        digest.to_string(),
        role.to_string(),
        category.to_string(),
        record.guid.clone(),
        record.session_id.clone(),
        record.status.clone(),
        record.interview_mode.clone(),
        record.created_at.to_string(),
        record.start_time.map(|v| v.to_string()).unwrap_or_default(),
        record
            .total_time_spent
            .map(|v| v.to_string())
            .unwrap_or_default(),
        record.interviewer_ref.clone().unwrap_or_default(),
        record.interviewer_name.clone().unwrap_or_default(),
    ];

    let row: Vec<String> = fields.iter().map(|f| csv_escape(f)).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Quote fields containing delimiters; double embedded quotes
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
