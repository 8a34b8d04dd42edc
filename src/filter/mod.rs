//! Record filters: fuzzy extraction, hit merging, gold-standard homology
//! filtering and length filtering.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

mod dedup;
mod extract;
mod gold;
mod length;

pub use dedup::{merge_hits, select_by_id, AllProfilesFailed, DedupSummary, ProfileHits};
pub use extract::{Extraction, FuzzyExtractor};
pub use gold::{
    parse_hits, render_hit_table, FilterDecision, FilterReason, GoldFilterOutcome,
    GoldStandardFilter, GoldStandardSet, HomologyHit, DELETED_PREVIEW_LIMIT, HIT_TABLE_HEADER,
};
pub use length::{filter_by_length, LengthFilterOutcome, LengthStats};

/// Errors raised by filters that read their own inputs.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The reference list could not be read.
    #[error("failed to read gold standard list {}: {source}", path.display())]
    GoldList {
        /// Reference list path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}
