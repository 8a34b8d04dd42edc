use serde::{Deserialize, Serialize};

use crate::sequence::SequenceRecord;

/// Summary statistics over residue lengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LengthStats {
    /// Number of records.
    pub count: usize,
    /// Arithmetic mean length.
    pub mean: f64,
    /// Median length; average of the two middle values for even counts.
    pub median: f64,
    /// Sample standard deviation, 0 for a single record.
    pub stdev: f64,
    /// Shortest length.
    pub min: usize,
    /// Longest length.
    pub max: usize,
}

impl LengthStats {
    /// Compute statistics, or `None` for an empty collection.
    pub fn compute(records: &[SequenceRecord]) -> Option<Self> {
        Self::from_lengths(records.iter().map(SequenceRecord::len).collect())
    }

    /// Compute statistics from raw lengths.
    pub fn from_lengths(mut lengths: Vec<usize>) -> Option<Self> {
        if lengths.is_empty() {
            return None;
        }
        lengths.sort_unstable();
        let count = lengths.len();
        let mean = lengths.iter().sum::<usize>() as f64 / count as f64;
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (lengths[mid - 1] + lengths[mid]) as f64 / 2.0
        } else {
            lengths[mid] as f64
        };
        let stdev = if count <= 1 {
            0.0
        } else {
            let sum_sq: f64 = lengths
                .iter()
                .map(|&len| {
                    let delta = len as f64 - mean;
                    delta * delta
                })
                .sum();
            (sum_sq / (count - 1) as f64).sqrt()
        };
        Some(Self {
            count,
            mean,
            median,
            stdev,
            min: lengths[0],
            max: lengths[count - 1],
        })
    }
}

/// Records split by a minimum-length threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthFilterOutcome {
    /// Threshold applied (inclusive).
    pub min_length: usize,
    /// Records with at least `min_length` residues, in input order.
    pub kept: Vec<SequenceRecord>,
    /// Removed `(id, length)` pairs, shortest first.
    pub deleted: Vec<(String, usize)>,
}

/// Keep records whose length is at least `min_length`.
pub fn filter_by_length(records: &[SequenceRecord], min_length: usize) -> LengthFilterOutcome {
    let (kept, short): (Vec<&SequenceRecord>, Vec<&SequenceRecord>) =
        records.iter().partition(|record| record.len() >= min_length);
    let mut deleted: Vec<(String, usize)> = short
        .into_iter()
        .map(|record| (record.id.clone(), record.len()))
        .collect();
    deleted.sort_by_key(|(_, len)| *len);
    LengthFilterOutcome {
        min_length,
        kept: kept.into_iter().cloned().collect(),
        deleted,
    }
}

impl LengthFilterOutcome {
    /// Input record count.
    pub fn total_in(&self) -> usize {
        self.kept.len() + self.deleted.len()
    }

    /// Human-readable filter log.
    pub fn render_log(&self) -> String {
        let mut lines = vec![
            "--- Length Filter Summary ---".to_string(),
            format!("Threshold: Remove sequences < {} aa", self.min_length),
            format!("Total sequences in: {}", self.total_in()),
            format!("Sequences Kept: {}", self.kept.len()),
            format!("Sequences Deleted: {}", self.deleted.len()),
        ];
        if !self.deleted.is_empty() {
            lines.push(String::new());
            lines.push("--- Deleted Sequences (too short) ---".to_string());
            lines.extend(
                self.deleted
                    .iter()
                    .map(|(id, len)| format!("  {id} (Length: {len} aa)")),
            );
        }
        lines.iter().map(|line| format!("{line}\n")).collect()
    }
}
