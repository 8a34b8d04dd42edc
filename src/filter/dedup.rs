use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::sequence::SequenceRecord;

/// Hit identifiers produced by one profile search, or the reason it produced none.
#[derive(Debug, Clone)]
pub struct ProfileHits {
    /// Profile label (usually the profile file name).
    pub profile: String,
    /// Hit identifiers in report order, or the failure message.
    pub outcome: Result<Vec<String>, String>,
}

impl ProfileHits {
    /// Successful search.
    pub fn found(profile: impl Into<String>, hits: Vec<String>) -> Self {
        Self {
            profile: profile.into(),
            outcome: Ok(hits),
        }
    }

    /// Search that produced no output.
    pub fn failed(profile: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            outcome: Err(message.into()),
        }
    }
}

/// Merged hit identifiers with duplicate accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupSummary {
    /// Multiplicity of every identifier across all successful profiles.
    pub counts: BTreeMap<String, usize>,
    /// Total hits before deduplication.
    pub total_hits: usize,
    /// `total_hits - unique.len()`.
    pub duplicate_count: usize,
    /// Profiles that contributed.
    pub profiles_used: Vec<String>,
    /// Profiles that failed, with their messages.
    pub profiles_failed: Vec<(String, String)>,
}

impl DedupSummary {
    /// Distinct identifiers.
    pub fn unique(&self) -> BTreeSet<String> {
        self.counts.keys().cloned().collect()
    }

    /// Number of distinct identifiers.
    pub fn unique_count(&self) -> usize {
        self.counts.len()
    }
}

/// Raised when no profile produced output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllProfilesFailed {
    /// Message of the last failing profile.
    pub last_error: String,
}

/// Merge per-profile hit lists. Failed profiles are skipped unless all failed.
pub fn merge_hits(profiles: &[ProfileHits]) -> Result<DedupSummary, AllProfilesFailed> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_hits = 0;
    let mut profiles_used = Vec::new();
    let mut profiles_failed = Vec::new();

    for profile in profiles {
        match &profile.outcome {
            Ok(hits) => {
                info!(profile = %profile.profile, hits = hits.len(), "profile search merged");
                total_hits += hits.len();
                for hit in hits {
                    *counts.entry(hit.clone()).or_default() += 1;
                }
                profiles_used.push(profile.profile.clone());
            }
            Err(message) => {
                warn!(profile = %profile.profile, %message, "profile search failed, excluded from merge");
                profiles_failed.push((profile.profile.clone(), message.clone()));
            }
        }
    }

    if profiles_used.is_empty() {
        let last_error = profiles_failed
            .last()
            .map(|(_, message)| message.clone())
            .unwrap_or_else(|| "no profile searches were run".to_string());
        return Err(AllProfilesFailed { last_error });
    }

    let duplicate_count = total_hits - counts.len();
    Ok(DedupSummary {
        counts,
        total_hits,
        duplicate_count,
        profiles_used,
        profiles_failed,
    })
}

/// Keep records whose primary id is an exact member of `ids`.
pub fn select_by_id(records: &[SequenceRecord], ids: &BTreeSet<String>) -> Vec<SequenceRecord> {
    records
        .iter()
        .filter(|record| ids.contains(&record.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn counts_duplicates_within_and_across_profiles() {
        let profiles = vec![
            ProfileHits::found("a.hmm", ids(&["x", "y", "x"])),
            ProfileHits::found("b.hmm", ids(&["y", "z"])),
        ];
        let summary = merge_hits(&profiles).expect("merge succeeds");
        assert_eq!(summary.total_hits, 5);
        assert_eq!(summary.unique_count(), 3);
        assert_eq!(summary.duplicate_count, 2);
        assert_eq!(summary.counts["x"], 2);
    }

    #[test]
    fn failed_profile_is_excluded() {
        let profiles = vec![
            ProfileHits::failed("a.hmm", "bad profile"),
            ProfileHits::found("b.hmm", ids(&["y"])),
        ];
        let summary = merge_hits(&profiles).expect("merge succeeds");
        assert_eq!(summary.profiles_used, vec!["b.hmm".to_string()]);
        assert_eq!(summary.profiles_failed.len(), 1);
    }

    #[test]
    fn all_failed_reports_last_error() {
        let profiles = vec![
            ProfileHits::failed("a.hmm", "first"),
            ProfileHits::failed("b.hmm", "second"),
        ];
        let err = merge_hits(&profiles).unwrap_err();
        assert_eq!(err.last_error, "second");
    }

    #[test]
    fn selection_is_exact() {
        let records = vec![
            SequenceRecord::new("Gene1", "", "MK"),
            SequenceRecord::new("gene1", "", "MK"),
        ];
        let wanted: BTreeSet<String> = ["gene1".to_string()].into_iter().collect();
        let selected = select_by_id(&records, &wanted);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "gene1");
    }
}
