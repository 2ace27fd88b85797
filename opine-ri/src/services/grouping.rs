//! Duplicate Group Resolver
//!
//! **[RI-DUP-010]** Groups records sharing a content digest, picks one
//! canonical record per group, and partitions the rest by their current
//! status so remediation can treat "duplicate but already rejected"
//! differently from "duplicate still pending".
//!
//! The resolver is a read-only view: it never mutates records, and its
//! output is independent of input iteration order. Canonical-ness is
//! re-derived on every resolve rather than stored, so it stays correct as
//! new records arrive.

use std::collections::BTreeMap;

use opine_common::db::models::{ResponseRecord, ResponseStatus};

use super::content_hash::CONTENT_HASH_VERSION;

/// Duplicates of one group, partitioned by current status
#[derive(Debug, Clone, Default)]
pub struct DuplicateBuckets {
    pub abandoned_or_terminated: Vec<ResponseRecord>,
    pub rejected: Vec<ResponseRecord>,
    pub pending: Vec<ResponseRecord>,
    pub approved: Vec<ResponseRecord>,
    pub other: Vec<ResponseRecord>,
}

impl DuplicateBuckets {
    fn push(&mut self, record: ResponseRecord) {
        match &record.status {
            ResponseStatus::Abandoned | ResponseStatus::Terminated => {
                self.abandoned_or_terminated.push(record)
            }
            ResponseStatus::Rejected => self.rejected.push(record),
            ResponseStatus::Pending => self.pending.push(record),
            ResponseStatus::Approved => self.approved.push(record),
            ResponseStatus::Other(_) => self.other.push(record),
        }
    }

    pub fn len(&self) -> usize {
        self.abandoned_or_terminated.len()
            + self.rejected.len()
            + self.pending.len()
            + self.approved.len()
            + self.other.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every duplicate is already in a terminal status
    fn all_terminal(&self) -> bool {
        self.rejected.is_empty()
            && self.pending.is_empty()
            && self.approved.is_empty()
            && self.other.is_empty()
    }
}

/// Records sharing one digest: the canonical member plus bucketed duplicates
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub digest: String,
    pub canonical: ResponseRecord,
    pub duplicates: DuplicateBuckets,
}

/// Output of one resolve pass
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Groups with at least one non-terminal member, sorted by digest
    pub groups: Vec<DuplicateGroup>,
    /// Records whose digest was never computed - reported, not dropped
    pub hash_missing: Vec<String>,
    /// Records whose digest was computed under a stale formula version;
    /// excluded from grouping so incompatible hashes are never compared
    pub hash_stale: Vec<String>,
}

/// Duplicate Group Resolver
pub struct DuplicateGroupResolver;

impl DuplicateGroupResolver {
    /// Resolve duplicate groups over a set of records.
    ///
    /// **[RI-DUP-020]** Canonical = earliest `created_at`, tie-broken by
    /// lexicographically smallest `guid`. Groups where the canonical and
    /// every duplicate are already terminal carry nothing actionable and
    /// are excluded.
    pub fn resolve(records: Vec<ResponseRecord>) -> Resolution {
        let mut by_digest: BTreeMap<String, Vec<ResponseRecord>> = BTreeMap::new();
        let mut hash_missing = Vec::new();
        let mut hash_stale = Vec::new();

        for record in records {
            match (&record.content_hash, record.content_hash_version) {
                (Some(digest), Some(CONTENT_HASH_VERSION)) => {
                    by_digest.entry(digest.clone()).or_default().push(record);
                }
                (Some(_), _) => hash_stale.push(record.guid),
                (None, _) => hash_missing.push(record.guid),
            }
        }

        hash_missing.sort_unstable();
        hash_stale.sort_unstable();

        let mut groups = Vec::new();
        for (digest, mut members) in by_digest {
            if members.len() < 2 {
                continue;
            }

            // Stable canonical ordering regardless of input order
            members.sort_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.guid.cmp(&b.guid))
            });

            let mut iter = members.into_iter();
            let canonical = iter.next().expect("group has >= 2 members");

            let mut duplicates = DuplicateBuckets::default();
            for duplicate in iter {
                duplicates.push(duplicate);
            }

            if canonical.status.is_terminal() && duplicates.all_terminal() {
                continue;
            }

            groups.push(DuplicateGroup {
                digest,
                canonical,
                duplicates,
            });
        }

        Resolution {
            groups,
            hash_missing,
            hash_stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opine_common::db::models::{InterviewMode, SyncMetadata};

    const DAY_MS: i64 = 86_400_000;

    fn record(guid: &str, digest: Option<&str>, created_at: i64, status: ResponseStatus) -> ResponseRecord {
        ResponseRecord {
            guid: guid.to_string(),
            session_id: format!("s-{}", guid),
            survey_guid: "sv-001".to_string(),
            interview_mode: InterviewMode::Cati,
            status,
            start_time: Some(created_at - 600_000),
            end_time: None,
            total_time_spent: Some(600),
            created_at,
            answers: Vec::new(),
            audio_signature: None,
            location: None,
            call_id: None,
            call_status: None,
            interviewer_ref: None,
            sync_metadata: SyncMetadata::default(),
            content_hash: digest.map(str::to_string),
            content_hash_version: digest.map(|_| CONTENT_HASH_VERSION),
            abandoned_reason: None,
            classification_indicators: Vec::new(),
        }
    }

    #[test]
    fn test_three_pending_duplicates_earliest_is_canonical() {
        let t = 1_700_000_000_000;
        let records = vec![
            record("r-b", Some("d1"), t + DAY_MS, ResponseStatus::Pending),
            record("r-a", Some("d1"), t, ResponseStatus::Pending),
            record("r-c", Some("d1"), t + 2 * DAY_MS, ResponseStatus::Pending),
        ];

        let resolution = DuplicateGroupResolver::resolve(records);
        assert_eq!(resolution.groups.len(), 1);

        let group = &resolution.groups[0];
        assert_eq!(group.canonical.guid, "r-a");
        assert_eq!(group.duplicates.pending.len(), 2);
        assert_eq!(group.duplicates.pending[0].guid, "r-b");
        assert_eq!(group.duplicates.pending[1].guid, "r-c");
    }

    #[test]
    fn test_canonical_stable_under_input_order() {
        let t = 1_700_000_000_000;
        let base = vec![
            record("r-a", Some("d1"), t + DAY_MS, ResponseStatus::Pending),
            record("r-b", Some("d1"), t, ResponseStatus::Approved),
            record("r-c", Some("d1"), t + 2 * DAY_MS, ResponseStatus::Rejected),
            record("r-d", Some("d2"), t, ResponseStatus::Pending),
            record("r-e", Some("d2"), t, ResponseStatus::Pending),
        ];

        // Every rotation and the reversal must produce identical output
        let mut orderings: Vec<Vec<ResponseRecord>> = Vec::new();
        for i in 0..base.len() {
            let mut rotated = base.clone();
            rotated.rotate_left(i);
            orderings.push(rotated);
        }
        let mut reversed = base.clone();
        reversed.reverse();
        orderings.push(reversed);

        for ordering in orderings {
            let resolution = DuplicateGroupResolver::resolve(ordering);
            assert_eq!(resolution.groups.len(), 2);
            assert_eq!(resolution.groups[0].digest, "d1");
            assert_eq!(resolution.groups[0].canonical.guid, "r-b");
            // d2 ties on created_at - smallest guid wins
            assert_eq!(resolution.groups[1].digest, "d2");
            assert_eq!(resolution.groups[1].canonical.guid, "r-d");
        }
    }

    #[test]
    fn test_all_terminal_group_excluded() {
        let t = 1_700_000_000_000;
        let records = vec![
            record("r-a", Some("d1"), t, ResponseStatus::Abandoned),
            record("r-b", Some("d1"), t + DAY_MS, ResponseStatus::Abandoned),
        ];

        let resolution = DuplicateGroupResolver::resolve(records);
        assert!(resolution.groups.is_empty());
    }

    #[test]
    fn test_terminal_canonical_with_pending_duplicate_included() {
        let t = 1_700_000_000_000;
        let records = vec![
            record("r-a", Some("d1"), t, ResponseStatus::Abandoned),
            record("r-b", Some("d1"), t + DAY_MS, ResponseStatus::Pending),
        ];

        let resolution = DuplicateGroupResolver::resolve(records);
        assert_eq!(resolution.groups.len(), 1);
        assert_eq!(resolution.groups[0].duplicates.pending.len(), 1);
    }

    #[test]
    fn test_singleton_digest_not_a_group() {
        let records = vec![record(
            "r-a",
            Some("d1"),
            1_700_000_000_000,
            ResponseStatus::Pending,
        )];
        let resolution = DuplicateGroupResolver::resolve(records);
        assert!(resolution.groups.is_empty());
    }

    #[test]
    fn test_missing_hash_reported_not_dropped() {
        let t = 1_700_000_000_000;
        let records = vec![
            record("r-a", Some("d1"), t, ResponseStatus::Pending),
            record("r-b", Some("d1"), t + 1, ResponseStatus::Pending),
            record("r-z", None, t, ResponseStatus::Pending),
            record("r-y", None, t, ResponseStatus::Pending),
        ];

        let resolution = DuplicateGroupResolver::resolve(records);
        assert_eq!(resolution.groups.len(), 1);
        assert_eq!(resolution.hash_missing, vec!["r-y", "r-z"]);
    }

    #[test]
    fn test_stale_version_excluded_from_grouping() {
        let t = 1_700_000_000_000;
        let mut stale = record("r-old", Some("d1"), t, ResponseStatus::Pending);
        stale.content_hash_version = Some(1);
        let records = vec![
            stale,
            record("r-a", Some("d1"), t + 1, ResponseStatus::Pending),
            record("r-b", Some("d1"), t + 2, ResponseStatus::Pending),
        ];

        let resolution = DuplicateGroupResolver::resolve(records);
        assert_eq!(resolution.hash_stale, vec!["r-old"]);
        // The stale record does not join the group
        assert_eq!(resolution.groups[0].duplicates.len(), 1);
    }

    #[test]
    fn test_buckets_partition_by_status() {
        let t = 1_700_000_000_000;
        let records = vec![
            record("r-a", Some("d1"), t, ResponseStatus::Pending),
            record("r-b", Some("d1"), t + 1, ResponseStatus::Approved),
            record("r-c", Some("d1"), t + 2, ResponseStatus::Rejected),
            record("r-d", Some("d1"), t + 3, ResponseStatus::Terminated),
            record("r-e", Some("d1"), t + 4, ResponseStatus::Other("quarantined".into())),
            record("r-f", Some("d1"), t + 5, ResponseStatus::Pending),
        ];

        let resolution = DuplicateGroupResolver::resolve(records);
        let buckets = &resolution.groups[0].duplicates;
        assert_eq!(buckets.approved.len(), 1);
        assert_eq!(buckets.rejected.len(), 1);
        assert_eq!(buckets.abandoned_or_terminated.len(), 1);
        assert_eq!(buckets.other.len(), 1);
        assert_eq!(buckets.pending.len(), 1);
        assert_eq!(buckets.len(), 5);
    }
}
