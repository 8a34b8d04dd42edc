use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Stage statistics, serialized into the run summary.
pub type StageStats = BTreeMap<String, serde_json::Value>;

/// Fixed pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Reduce headers to their primary id.
    CleanHeaders,
    /// Profile-HMM domain search and hit merge.
    DomainSearch,
    /// Homology filter against the gold-standard list.
    GoldFilter,
    /// Length statistics.
    LengthStats,
    /// Minimum-length filter.
    LengthFilter,
    /// Multiple sequence alignment.
    Alignment,
    /// Alignment trimming.
    Trimming,
    /// Tree inference.
    Tree,
}

impl StageName {
    /// Every stage, in execution order.
    pub const ALL: [StageName; 8] = [
        StageName::CleanHeaders,
        StageName::DomainSearch,
        StageName::GoldFilter,
        StageName::LengthStats,
        StageName::LengthFilter,
        StageName::Alignment,
        StageName::Trimming,
        StageName::Tree,
    ];

    /// Snake-case name.
    pub fn label(self) -> &'static str {
        match self {
            StageName::CleanHeaders => "clean_headers",
            StageName::DomainSearch => "domain_search",
            StageName::GoldFilter => "gold_filter",
            StageName::LengthStats => "length_stats",
            StageName::LengthFilter => "length_filter",
            StageName::Alignment => "alignment",
            StageName::Trimming => "trimming",
            StageName::Tree => "tree",
        }
    }

    /// Artifact file prefix.
    pub fn step_id(self) -> &'static str {
        match self {
            StageName::CleanHeaders => "step1",
            StageName::DomainSearch => "step2",
            StageName::GoldFilter => "step2_5",
            StageName::LengthStats => "step2_7",
            StageName::LengthFilter => "step2_8",
            StageName::Alignment => "step3",
            StageName::Trimming => "step4",
            StageName::Tree => "step5",
        }
    }

    /// Stages that are skipped rather than run when their input is absent.
    pub fn is_optional(self) -> bool {
        matches!(self, StageName::DomainSearch | StageName::GoldFilter)
    }

    /// Whether a successful run moves `current_file` to this stage's output.
    pub fn produces_chain_file(self) -> bool {
        !matches!(self, StageName::LengthStats)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure taxonomy carried by failed stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed input or missing required reference.
    Validation,
    /// External tool failed or left no output.
    Invocation,
    /// Every sub-search of a stage failed.
    PartialCoverage,
    /// A file could not be read or written.
    Io,
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageResult {
    /// The stage ran and produced its output.
    Succeeded {
        /// Primary output.
        output_path: Option<PathBuf>,
        /// One-line summary.
        message: String,
        /// Stage statistics.
        stats: StageStats,
        /// Tool command line, when one was issued.
        invocation_text: Option<String>,
    },
    /// An optional stage whose input was never supplied.
    Skipped {
        /// Why it did not run.
        message: String,
    },
    /// The stage ran and failed.
    Failed {
        /// Failure class.
        kind: FailureKind,
        /// Diagnostic text.
        message: String,
        /// Statistics gathered before the failure.
        stats: StageStats,
        /// Tool command line, when one was issued.
        invocation_text: Option<String>,
    },
}

impl StageResult {
    /// Successful result.
    pub fn succeeded(output_path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        StageResult::Succeeded {
            output_path: Some(output_path.into()),
            message: message.into(),
            stats: StageStats::new(),
            invocation_text: None,
        }
    }

    /// Skip marker.
    pub fn skipped(message: impl Into<String>) -> Self {
        StageResult::Skipped {
            message: message.into(),
        }
    }

    /// Failure built from an error.
    pub fn failed(error: &PipelineError, invocation_text: Option<String>) -> Self {
        StageResult::Failed {
            kind: error.kind(),
            message: error.to_string(),
            stats: StageStats::new(),
            invocation_text,
        }
    }

    /// Attach a statistic. No-op on skipped results.
    pub fn with_stat(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let Some(stats) = self.stats_mut() {
            stats.insert(key.to_string(), value.into());
        }
        self
    }

    /// Attach every top-level field of a serializable summary as a statistic.
    pub fn with_stats_of<T: Serialize>(mut self, summary: &T) -> Self {
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(summary) {
            for (key, value) in fields {
                self = self.with_stat(&key, value);
            }
        }
        self
    }

    /// Attach the command line that was issued.
    pub fn with_invocation(mut self, text: Option<String>) -> Self {
        match &mut self {
            StageResult::Succeeded {
                invocation_text, ..
            }
            | StageResult::Failed {
                invocation_text, ..
            } => *invocation_text = text,
            StageResult::Skipped { .. } => {}
        }
        self
    }

    fn stats_mut(&mut self) -> Option<&mut StageStats> {
        match self {
            StageResult::Succeeded { stats, .. } | StageResult::Failed { stats, .. } => Some(stats),
            StageResult::Skipped { .. } => None,
        }
    }

    /// Succeeded or skipped.
    pub fn is_success(&self) -> bool {
        !self.is_failure()
    }

    /// Ran and failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, StageResult::Failed { .. })
    }

    /// Skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, StageResult::Skipped { .. })
    }

    /// Primary output of a successful stage.
    pub fn output_path(&self) -> Option<&Path> {
        match self {
            StageResult::Succeeded { output_path, .. } => output_path.as_deref(),
            _ => None,
        }
    }

    /// Summary or diagnostic text.
    pub fn message(&self) -> &str {
        match self {
            StageResult::Succeeded { message, .. }
            | StageResult::Skipped { message }
            | StageResult::Failed { message, .. } => message,
        }
    }

    /// Statistics, absent for skipped stages.
    pub fn stats(&self) -> Option<&StageStats> {
        match self {
            StageResult::Succeeded { stats, .. } | StageResult::Failed { stats, .. } => Some(stats),
            StageResult::Skipped { .. } => None,
        }
    }

    /// Issued command line.
    pub fn invocation_text(&self) -> Option<&str> {
        match self {
            StageResult::Succeeded {
                invocation_text, ..
            }
            | StageResult::Failed {
                invocation_text, ..
            } => invocation_text.as_deref(),
            StageResult::Skipped { .. } => None,
        }
    }

    /// Failure class of a failed stage.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            StageResult::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
