//! # phylokit
//!
//! Orchestration and filtering engine for a homology-filtered phylogenetics
//! workflow: clean FASTA headers, search protein domains, keep candidates
//! that hit a curated gold-standard list, drop short sequences, then hand
//! off to alignment, trimming and tree inference.
//!
//! ## Layout
//!
//! 1. **sequence**: FASTA records and identifier normalization
//! 2. **filter**: fuzzy extraction, hit merging, gold-standard and length filters
//! 3. **layout**: lane assignment for overlapping annotation intervals
//! 4. **tools**: external-tool invocations and report parsing
//! 5. **pipeline**: stage sequencing, run records and detached tree jobs
//!
//! ## Usage Example
//!
//! ```ignore
//! use phylokit::pipeline::{Orchestrator, PipelineConfig};
//! use phylokit::tools::SystemRunner;
//!
//! let config = PipelineConfig::new("proteome.fasta", "results/run1")
//!     .with_profiles(["PF03171.hmm"])
//!     .with_min_length(80);
//! let run = Orchestrator::new(SystemRunner).run(&config)?;
//! assert!(run.is_completed());
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod filter;   // Record filters
pub mod layout;   // Interval lane layout
pub mod pipeline; // Stage orchestration
pub mod sequence; // FASTA records and identifiers
pub mod tools;    // External tool boundary

pub use filter::{FuzzyExtractor, GoldStandardFilter, GoldStandardSet, LengthStats};
pub use pipeline::{Orchestrator, PipelineConfig, PipelineRun, StageName, StageResult};
pub use sequence::{normalize, SequenceRecord};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use filter::FilterError;
use pipeline::{ConfigError, FailureKind};
use sequence::SequenceError;
use tools::ToolError;

/// Errors surfaced by the pipeline.
///
/// Stage-local errors are converted to failed [`StageResult`]s; only
/// configuration problems and run-directory I/O escape
/// [`Orchestrator::run`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed input or options, or a required reference missing.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ConfigError),

    /// A stage input contained no sequences.
    #[error("no sequences found in {}", path.display())]
    NoSequences {
        /// Offending file.
        path: PathBuf,
    },

    /// An external tool exited unsuccessfully or left no output.
    #[error("{tool} failed: {message}")]
    Invocation {
        /// Tool name.
        tool: String,
        /// Captured diagnostic text.
        message: String,
    },

    /// The process boundary itself failed (spawn, wait, timeout).
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Every sub-search of a stage failed.
    #[error("all {attempted} searches failed; last error: {last_error}")]
    PartialCoverage {
        /// Number of searches attempted.
        attempted: usize,
        /// Message of the last failure.
        last_error: String,
    },

    /// FASTA input or output failed.
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// A filter input could not be read.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// An artifact could not be read or written.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The run halted before the requested stage.
    #[error("run halted at stage {0}")]
    Halted(StageName),
}

impl PipelineError {
    /// Wrap an I/O error with a description of the operation.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }

    /// Failure class recorded in a failed [`StageResult`].
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Validation(_) | PipelineError::NoSequences { .. } | PipelineError::Halted(_) => {
                FailureKind::Validation
            }
            PipelineError::Invocation { .. } | PipelineError::Tool(_) => FailureKind::Invocation,
            PipelineError::PartialCoverage { .. } => FailureKind::PartialCoverage,
            PipelineError::Sequence(_) | PipelineError::Filter(_) | PipelineError::Io { .. } => {
                FailureKind::Io
            }
        }
    }
}
