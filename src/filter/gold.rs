use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::FilterError;
use crate::sequence::{gold_key, SequenceRecord};

/// Deleted ids listed in the filter log and stats.
pub const DELETED_PREVIEW_LIMIT: usize = 50;

/// Column header written above raw homology-search rows.
pub const HIT_TABLE_HEADER: &str = "qseqid\tsseqid\tpident\tqcovs";

/// Leading columns of a hit row; later columns are ignored.
const HIT_COLUMNS: usize = 4;

/// Reference identifiers keyed with [`gold_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoldStandardSet {
    ids: BTreeSet<String>,
}

impl GoldStandardSet {
    /// Parse a reference list: one identifier per line, `#` lines ignored.
    pub fn parse(text: &str) -> Self {
        let ids = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(gold_key)
            .filter(|key| !key.is_empty())
            .collect();
        Self { ids }
    }

    /// Load a reference list from disk.
    pub fn load(path: &Path) -> Result<Self, FilterError> {
        let text = std::fs::read_to_string(path).map_err(|source| FilterError::GoldList {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Number of reference keys.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether a homology-search subject id refers to a reference entry.
    ///
    /// Exact key membership, or substring containment in either direction,
    /// tolerating database decorations such as `sp|Q9XYZ1|NAME_ARATH`.
    pub fn matches(&self, subject_id: &str) -> bool {
        let cleaned = gold_key(subject_id);
        if cleaned.is_empty() {
            return false;
        }
        if self.ids.contains(&cleaned) {
            return true;
        }
        self.ids
            .iter()
            .any(|gold| cleaned.contains(gold.as_str()) || gold.contains(cleaned.as_str()))
    }
}

impl<S: AsRef<str>> FromIterator<S> for GoldStandardSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let ids = iter
            .into_iter()
            .map(|raw| gold_key(raw.as_ref()))
            .filter(|key| !key.is_empty())
            .collect();
        Self { ids }
    }
}

/// One pairwise comparison row from the homology search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomologyHit {
    /// Query sequence id.
    pub query_id: String,
    /// Database subject id.
    pub subject_id: String,
    /// Percent identity, 0..=100.
    pub percent_identity: f64,
    /// Query coverage, 0..=100.
    pub query_coverage: f64,
}

impl HomologyHit {
    /// Construct a hit row.
    pub fn new(
        query_id: impl Into<String>,
        subject_id: impl Into<String>,
        percent_identity: f64,
        query_coverage: f64,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            subject_id: subject_id.into(),
            percent_identity,
            query_coverage,
        }
    }
}

/// Parse tab-separated `qseqid sseqid pident qcovs` rows.
///
/// Blank lines, `#` comments and the column header are ignored. Malformed
/// rows are skipped and counted in the second tuple element.
pub fn parse_hits(text: &str) -> (Vec<HomologyHit>, usize) {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .quoting(false)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut hits = Vec::new();
    let mut skipped = 0;
    for row in reader.records() {
        let record = match row {
            Ok(record) => record,
            Err(err) => {
                warn!(%err, "skipping unreadable homology row");
                skipped += 1;
                continue;
            }
        };
        let columns: StringRecord = record.iter().take(HIT_COLUMNS).collect();
        if columns.iter().eq(HIT_TABLE_HEADER.split('\t')) {
            continue;
        }
        match columns.deserialize::<HomologyHit>(None) {
            Ok(hit) => hits.push(hit),
            Err(err) => {
                let line = record.position().map(|position| position.line());
                warn!(?line, %err, "skipping malformed homology row");
                skipped += 1;
            }
        }
    }
    (hits, skipped)
}

/// Why a query was kept or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    /// Subject not in the reference list.
    NoGoldMatch,
    /// Identity below threshold.
    LowIdentity,
    /// Coverage below threshold.
    LowCoverage,
    /// No hit rows for the query.
    NoHits,
    /// At least one hit passed every condition.
    Valid,
}

impl FilterReason {
    /// Stable label used in logs.
    pub fn label(self) -> &'static str {
        match self {
            FilterReason::NoGoldMatch => "no_gold_match",
            FilterReason::LowIdentity => "low_identity",
            FilterReason::LowCoverage => "low_coverage",
            FilterReason::NoHits => "no_hits",
            FilterReason::Valid => "valid",
        }
    }
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-query classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDecision {
    /// Whether the query survives.
    pub kept: bool,
    /// Accumulated reasons; exactly `{valid}` when kept.
    pub reasons: BTreeSet<FilterReason>,
}

impl FilterDecision {
    fn valid() -> Self {
        Self {
            kept: true,
            reasons: BTreeSet::from([FilterReason::Valid]),
        }
    }

    fn no_hits() -> Self {
        Self {
            kept: false,
            reasons: BTreeSet::from([FilterReason::NoHits]),
        }
    }

    /// Comma-joined reason labels.
    pub fn reason_labels(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.label())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Classifies queries against a reference list with identity and coverage
/// thresholds.
#[derive(Debug, Clone)]
pub struct GoldStandardFilter {
    gold: GoldStandardSet,
    min_identity: f64,
    min_coverage: f64,
}

/// Result of applying the filter to a record batch.
#[derive(Debug, Clone)]
pub struct GoldFilterOutcome {
    /// Surviving records, in input order.
    pub kept: Vec<SequenceRecord>,
    /// Decision for every input record, in input order.
    pub decisions: Vec<(String, FilterDecision)>,
    /// Hit rows the decisions were derived from.
    pub hits: Vec<HomologyHit>,
    /// Identity threshold used.
    pub min_identity: f64,
    /// Coverage threshold used.
    pub min_coverage: f64,
}

impl GoldStandardFilter {
    /// Create a filter.
    pub fn new(gold: GoldStandardSet, min_identity: f64, min_coverage: f64) -> Self {
        Self {
            gold,
            min_identity,
            min_coverage,
        }
    }

    /// Reference set in use.
    pub fn gold(&self) -> &GoldStandardSet {
        &self.gold
    }

    /// Fold hit rows in arrival order into per-query decisions.
    ///
    /// A passing hit marks its query valid and later rows cannot demote it;
    /// failing rows accumulate reasons until then.
    pub fn evaluate<'a, I>(&self, hits: I) -> BTreeMap<String, FilterDecision>
    where
        I: IntoIterator<Item = &'a HomologyHit>,
    {
        let mut decisions: BTreeMap<String, FilterDecision> = BTreeMap::new();
        for hit in hits {
            let match_ok = self.gold.matches(&hit.subject_id);
            let identity_ok = hit.percent_identity >= self.min_identity;
            let coverage_ok = hit.query_coverage >= self.min_coverage;

            let decision = decisions
                .entry(hit.query_id.clone())
                .or_insert_with(|| FilterDecision {
                    kept: false,
                    reasons: BTreeSet::new(),
                });
            if decision.kept {
                continue;
            }
            if match_ok && identity_ok && coverage_ok {
                debug!(query = %hit.query_id, subject = %hit.subject_id, "valid gold hit");
                *decision = FilterDecision::valid();
                continue;
            }
            if !match_ok {
                decision.reasons.insert(FilterReason::NoGoldMatch);
            }
            if !identity_ok {
                decision.reasons.insert(FilterReason::LowIdentity);
            }
            if !coverage_ok {
                decision.reasons.insert(FilterReason::LowCoverage);
            }
        }
        decisions
    }

    /// Classify every record; records without hit rows get `no_hits`.
    pub fn apply(&self, records: &[SequenceRecord], hits: Vec<HomologyHit>) -> GoldFilterOutcome {
        let by_query = self.evaluate(&hits);
        let mut kept = Vec::new();
        let mut decisions = Vec::with_capacity(records.len());
        for record in records {
            let decision = by_query
                .get(&record.id)
                .cloned()
                .unwrap_or_else(FilterDecision::no_hits);
            if decision.kept {
                kept.push(record.clone());
            }
            decisions.push((record.id.clone(), decision));
        }
        GoldFilterOutcome {
            kept,
            decisions,
            hits,
            min_identity: self.min_identity,
            min_coverage: self.min_coverage,
        }
    }
}

impl GoldFilterOutcome {
    /// Input record count.
    pub fn total_in(&self) -> usize {
        self.decisions.len()
    }

    /// Removed records with their reasons, sorted by id.
    pub fn deleted(&self) -> Vec<(&str, &FilterDecision)> {
        let mut deleted: Vec<(&str, &FilterDecision)> = self
            .decisions
            .iter()
            .filter(|(_, decision)| !decision.kept)
            .map(|(id, decision)| (id.as_str(), decision))
            .collect();
        deleted.sort_by(|a, b| a.0.cmp(b.0));
        deleted
    }

    /// Human-readable filter log.
    pub fn render_log(&self) -> String {
        let deleted = self.deleted();
        let mut lines = vec![
            "--- BLAST Filter Summary ---".to_string(),
            format!(
                "Filters: Min P-Ident >= {}% | Min Q-Covs >= {}%",
                self.min_identity, self.min_coverage
            ),
            format!("Total sequences in: {}", self.total_in()),
            format!("Sequences Kept (passed all filters): {}", self.kept.len()),
            format!("Sequences Deleted (failed filters): {}", deleted.len()),
        ];

        if !deleted.is_empty() {
            lines.push(String::new());
            lines.push("--- Deleted Sequences (no match in gold list OR failed quality check) ---".to_string());
            lines.extend(
                deleted
                    .iter()
                    .take(DELETED_PREVIEW_LIMIT)
                    .map(|(id, decision)| format!("  {id} [{}]", decision.reason_labels())),
            );
            if deleted.len() > DELETED_PREVIEW_LIMIT {
                lines.push(format!("  ... and {} more.", deleted.len() - DELETED_PREVIEW_LIMIT));
            }
        }

        lines.push(String::new());
        lines.push("--- Raw Hit Table ---".to_string());
        let mut log = lines.join("\n");
        log.push('\n');
        log.push_str(&render_hit_table(&self.hits));
        log
    }
}

/// Render hit rows as a TSV table with header.
pub fn render_hit_table(hits: &[HomologyHit]) -> String {
    let mut table = format!("{HIT_TABLE_HEADER}\n");
    for hit in hits {
        table.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            hit.query_id, hit.subject_id, hit.percent_identity, hit.query_coverage
        ));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(gold: &[&str]) -> GoldStandardFilter {
        GoldStandardFilter::new(gold.iter().collect(), 30.0, 50.0)
    }

    #[test]
    fn gold_list_skips_comments_and_blank_lines() {
        let set = GoldStandardSet::parse("# header\n\nAT1G01010.1 desc\nat2g02020\n");
        assert_eq!(set.len(), 2);
        assert!(set.matches("AT2G02020.4"));
    }

    #[test]
    fn decorated_subject_matches_by_containment() {
        let set: GoldStandardSet = ["Q9XYZ1"].iter().collect();
        assert!(set.matches("sp|Q9XYZ1|F6H_ARATH"));
        assert!(!set.matches("sp|P12345|OTHER"));
    }

    #[test]
    fn later_valid_hit_rescues_query() {
        let hits = vec![
            HomologyHit::new("q1", "OTHER1", 10.0, 10.0),
            HomologyHit::new("q1", "AT1G01010.1", 90.0, 90.0),
            HomologyHit::new("q1", "OTHER2", 10.0, 10.0),
        ];
        let decisions = filter(&["AT1G01010"]).evaluate(&hits);
        let decision = &decisions["q1"];
        assert!(decision.kept);
        assert_eq!(decision.reasons, BTreeSet::from([FilterReason::Valid]));
    }

    #[test]
    fn failing_hits_accumulate_reasons() {
        let hits = vec![
            HomologyHit::new("q1", "AT1G01010", 10.0, 90.0),
            HomologyHit::new("q1", "NOPE", 90.0, 10.0),
        ];
        let decisions = filter(&["AT1G01010"]).evaluate(&hits);
        assert_eq!(
            decisions["q1"].reasons,
            BTreeSet::from([
                FilterReason::NoGoldMatch,
                FilterReason::LowIdentity,
                FilterReason::LowCoverage
            ])
        );
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let (hits, skipped) = parse_hits("qseqid\tsseqid\tpident\tqcovs\nq1\ts1\t99.5\t80\nq2\ts2\tnan?\nq3\n");
        assert_eq!(hits.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn extra_columns_and_comments_are_ignored() {
        let text = "# BLASTP 2.14\nq1\tAT1G01010.1\t88.2\t91\t1e-50\t410\n\n  q2 \t s2 \t 40 \t 60 \n";
        let (hits, skipped) = parse_hits(text);
        assert_eq!(skipped, 0);
        assert_eq!(
            hits,
            vec![
                HomologyHit::new("q1", "AT1G01010.1", 88.2, 91.0),
                HomologyHit::new("q2", "s2", 40.0, 60.0),
            ]
        );
    }

    #[test]
    fn duplicate_record_ids_share_one_decision() {
        let records = [
            SequenceRecord::new("q1", "first copy", "MKVLA"),
            SequenceRecord::new("q1", "second copy", "MKVLAG"),
            SequenceRecord::new("q2", "", "MKV"),
        ];
        let hits = vec![HomologyHit::new("q1", "AT1G01010.2", 95.0, 80.0)];
        let outcome = filter(&["AT1G01010"]).apply(&records, hits);

        assert_eq!(outcome.kept.len(), 2);
        assert!(outcome.kept.iter().all(|record| record.id == "q1"));
        let labels: Vec<(&str, String)> = outcome
            .decisions
            .iter()
            .map(|(id, decision)| (id.as_str(), decision.reason_labels()))
            .collect();
        assert_eq!(
            labels,
            vec![("q1", "valid".to_string()), ("q1", "valid".to_string()), ("q2", "no_hits".to_string())]
        );
    }

    #[test]
    fn log_caps_deleted_preview() {
        let records: Vec<SequenceRecord> = (0..60)
            .map(|i| SequenceRecord::new(format!("q{i:02}"), "", "MK"))
            .collect();
        let outcome = filter(&["AT1G01010"]).apply(&records, Vec::new());
        let log = outcome.render_log();
        assert!(log.contains("Sequences Deleted (failed filters): 60"));
        assert!(log.contains("  q49 [no_hits]"));
        assert!(!log.contains("  q50 [no_hits]"));
        assert!(log.contains("... and 10 more."));
    }
}
