//! Pipeline orchestration
//!
//! Stages run strictly in [`StageName`] order:
//! - header cleaning, length statistics, length filter, alignment, trimming
//!   and tree inference are mandatory; a failure halts the run
//! - domain search and gold-standard filtering are skipped when their inputs
//!   are not configured, and halt the run when they execute and fail
//!
//! Every executed stage leaves exactly one [`StageResult`] in the
//! [`PipelineRun`], and `current_file` only advances on success.

mod config;
mod jobs;
mod orchestrator;
mod params;
mod run;
mod stage;

pub use config::{
    is_safe_path, AlignmentConfig, ConfigError, DomainSearchConfig, GoldFilterConfig,
    LengthFilterConfig, PipelineConfig, ToolConfig, TreeConfig, TrimConfig,
};
pub use jobs::{PollStatus, RunId, TreeArtifacts, TreeJobs, TreeSummary, FAILURE_LOG_LINES};
pub use orchestrator::Orchestrator;
pub use params::{ParamsRecord, PARAMS_FILE};
pub use run::{PipelineRun, RunState, RUN_SUMMARY_FILE};
pub use stage::{FailureKind, StageName, StageResult, StageStats};
