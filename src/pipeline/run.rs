use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{StageName, StageResult};

/// File the finished run is serialized to.
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    /// Created, nothing executed.
    Pending,
    /// Executing (or last executed) the given stage.
    Running(StageName),
    /// Halted by a failed stage.
    Failed(StageName),
    /// Every stage finished.
    Completed,
}

/// Record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Directory holding every artifact.
    pub working_dir: PathBuf,
    /// Input of the next stage.
    pub current_file: PathBuf,
    /// Lifecycle state.
    pub state: RunState,
    /// One result per executed stage, in pipeline order.
    pub stage_results: BTreeMap<StageName, StageResult>,
    /// Command lines issued, in order.
    pub invocation_log: Vec<String>,
}

impl PipelineRun {
    /// Start a run reading `input`.
    pub fn new(working_dir: impl Into<PathBuf>, input: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            current_file: input.into(),
            state: RunState::Pending,
            stage_results: BTreeMap::new(),
            invocation_log: Vec::new(),
        }
    }

    /// Mark `stage` as executing.
    pub fn begin(&mut self, stage: StageName) {
        self.state = RunState::Running(stage);
    }

    /// Store a stage outcome, log its invocation and advance `current_file`.
    ///
    /// A failed result moves the run to [`RunState::Failed`].
    pub fn record(&mut self, stage: StageName, result: StageResult) {
        if let Some(text) = result.invocation_text() {
            self.invocation_log.push(text.to_string());
        }
        if stage.produces_chain_file() {
            if let Some(output) = result.output_path() {
                self.current_file = output.to_path_buf();
            }
        }
        if result.is_failure() {
            self.state = RunState::Failed(stage);
        }
        self.stage_results.insert(stage, result);
    }

    /// Mark the run complete unless a stage failed.
    pub fn complete(&mut self) {
        if !self.is_failed() {
            self.state = RunState::Completed;
        }
    }

    /// Whether a stage failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, RunState::Failed(_))
    }

    /// Whether every stage finished.
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Result of `stage`, if it executed.
    pub fn result(&self, stage: StageName) -> Option<&StageResult> {
        self.stage_results.get(&stage)
    }

    /// Stage that halted the run.
    pub fn failed_stage(&self) -> Option<StageName> {
        match self.state {
            RunState::Failed(stage) => Some(stage),
            _ => None,
        }
    }

    /// Path of the run summary.
    pub fn summary_path(&self) -> PathBuf {
        self.working_dir.join(RUN_SUMMARY_FILE)
    }

    /// Serialize to `run_summary.json` in the working directory.
    pub fn write_summary(&self) -> io::Result<PathBuf> {
        let path = self.summary_path();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Load a previously written summary.
    pub fn read_summary(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_stage_does_not_advance_current_file() {
        let mut run = PipelineRun::new("/w", "/w/in.fa");
        run.record(
            StageName::LengthStats,
            StageResult::succeeded("/w/step2_7_length_stats.json", "ok"),
        );
        assert_eq!(run.current_file, PathBuf::from("/w/in.fa"));
        run.record(
            StageName::LengthFilter,
            StageResult::succeeded("/w/step2_8_length_filtered.fasta", "ok"),
        );
        assert_eq!(run.current_file, PathBuf::from("/w/step2_8_length_filtered.fasta"));
    }

    #[test]
    fn skip_leaves_current_file() {
        let mut run = PipelineRun::new("/w", "/w/in.fa");
        run.record(StageName::DomainSearch, StageResult::skipped("none"));
        assert_eq!(run.current_file, PathBuf::from("/w/in.fa"));
        assert!(!run.is_failed());
    }

    #[test]
    fn failure_is_terminal_state() {
        let mut run = PipelineRun::new("/w", "/w/in.fa");
        let err = crate::PipelineError::Invocation {
            tool: "mafft".to_string(),
            message: "boom".to_string(),
        };
        run.record(
            StageName::Alignment,
            StageResult::failed(&err, Some("mafft in.fa".to_string())),
        );
        run.complete();
        assert_eq!(run.failed_stage(), Some(StageName::Alignment));
        assert_eq!(run.invocation_log, vec!["mafft in.fa".to_string()]);
    }

    #[test]
    fn summary_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut run = PipelineRun::new(dir.path(), dir.path().join("in.fa"));
        run.record(StageName::CleanHeaders, StageResult::succeeded(dir.path().join("a.fa"), "ok"));
        run.complete();
        let path = run.write_summary().expect("write");
        assert_eq!(PipelineRun::read_summary(&path).expect("read"), run);
    }
}
