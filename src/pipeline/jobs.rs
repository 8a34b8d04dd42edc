use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{FailureKind, StageResult};
use crate::tools::reports::{BootstrapSummary, IqtreeSummary};
use crate::tools::ProcessHandle;

/// Log lines returned with a failed poll.
pub const FAILURE_LOG_LINES: usize = 20;

/// Opaque handle for a detached tree inference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    fn generate(working_dir: &Path, sequence: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(working_dir.to_string_lossy().as_bytes());
        hasher.update(&sequence.to_le_bytes());
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        hasher.update(&nanos.to_le_bytes());
        let hex = hasher.finalize().to_hex();
        Self(hex.as_str()[..16].to_string())
    }

    /// Hex string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Artifacts a detached tree inference is expected to leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeArtifacts {
    /// Tree file whose existence marks success.
    pub treefile: PathBuf,
    /// Tool log parsed for the summary.
    pub tool_log: PathBuf,
    /// Full report, if the tool writes one.
    pub report: PathBuf,
    /// Captured stdout and stderr of the process.
    pub console_log: PathBuf,
}

/// Headline results of a finished tree inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSummary {
    /// Model and likelihood figures.
    pub inference: IqtreeSummary,
    /// Branch support distribution.
    pub bootstrap: BootstrapSummary,
}

impl TreeSummary {
    /// Read the summary from a finished job's artifacts.
    pub fn collect(artifacts: &TreeArtifacts) -> Self {
        let log = fs::read_to_string(&artifacts.tool_log)
            .or_else(|_| fs::read_to_string(&artifacts.report))
            .unwrap_or_default();
        let tree = fs::read_to_string(&artifacts.treefile).unwrap_or_default();
        Self {
            inference: IqtreeSummary::parse(&log),
            bootstrap: BootstrapSummary::from_newick(&tree),
        }
    }
}

/// Answer to a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Still running.
    Running,
    /// Exited successfully and produced the tree.
    Completed {
        /// Existing output artifacts, tree first.
        outputs: Vec<PathBuf>,
        /// Parsed figures.
        summary: TreeSummary,
    },
    /// Exited unsuccessfully, or without the tree.
    Failed {
        /// Why the job is considered failed.
        reason: String,
        /// Tail of the console log.
        last_log_lines: Vec<String>,
    },
    /// Unknown id, or already reported.
    NotFound,
}

impl PollStatus {
    /// Stage result for a terminal poll, `None` while running or unknown.
    pub fn to_stage_result(&self, invocation_text: Option<String>) -> Option<StageResult> {
        match self {
            PollStatus::Completed { outputs, summary } => {
                let treefile = outputs.first()?;
                Some(
                    StageResult::succeeded(treefile, "IQ-TREE completed")
                        .with_stats_of(summary)
                        .with_invocation(invocation_text),
                )
            }
            PollStatus::Failed {
                reason,
                last_log_lines,
            } => Some(
                StageResult::Failed {
                    kind: FailureKind::Invocation,
                    message: reason.clone(),
                    stats: Default::default(),
                    invocation_text,
                }
                .with_stat("last_log_lines", last_log_lines.clone()),
            ),
            PollStatus::Running | PollStatus::NotFound => None,
        }
    }
}

#[derive(Debug)]
struct TreeJob {
    handle: Box<dyn ProcessHandle>,
    artifacts: TreeArtifacts,
}

/// Registry of detached tree inferences.
///
/// The outer lock only guards the id map; each job has its own lock, so polls
/// of different ids never wait on each other's process checks.
#[derive(Debug, Default)]
pub struct TreeJobs {
    jobs: Mutex<HashMap<RunId, Arc<Mutex<TreeJob>>>>,
    sequence: AtomicU64,
}

impl TreeJobs {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a started process and return its id.
    pub fn register(
        &self,
        working_dir: &Path,
        handle: Box<dyn ProcessHandle>,
        artifacts: TreeArtifacts,
    ) -> RunId {
        let mut jobs = self.jobs.lock();
        let id = loop {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let candidate = RunId::generate(working_dir, sequence);
            if !jobs.contains_key(&candidate) {
                break candidate;
            }
        };
        jobs.insert(id.clone(), Arc::new(Mutex::new(TreeJob { handle, artifacts })));
        info!(run_id = %id, "tree inference registered");
        id
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether no job is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check a job. A terminal answer is returned once; the entry is then
    /// dropped and later polls see [`PollStatus::NotFound`].
    pub fn poll(&self, id: &RunId) -> PollStatus {
        let Some(job) = self.jobs.lock().get(id).map(Arc::clone) else {
            return PollStatus::NotFound;
        };
        let mut job = job.lock();

        let exited = match job.handle.try_finished() {
            Ok(None) => return PollStatus::Running,
            Ok(Some(success)) => Ok(success),
            Err(err) => Err(format!("could not check tree inference process: {err}")),
        };

        // Another poller may have reported this job while we waited on its lock.
        if self.jobs.lock().remove(id).is_none() {
            return PollStatus::NotFound;
        }

        let artifacts = &job.artifacts;
        let reason = match exited {
            Ok(true) if artifacts.treefile.exists() => {
                let outputs = [&artifacts.treefile, &artifacts.report, &artifacts.tool_log]
                    .into_iter()
                    .filter(|path| path.exists())
                    .cloned()
                    .collect();
                info!(run_id = %id, "tree inference completed");
                return PollStatus::Completed {
                    outputs,
                    summary: TreeSummary::collect(artifacts),
                };
            }
            Ok(true) => format!(
                "process exited successfully but {} was not produced",
                artifacts.treefile.display()
            ),
            Ok(false) => "tree inference exited with an error".to_string(),
            Err(message) => message,
        };
        warn!(run_id = %id, %reason, "tree inference failed");
        PollStatus::Failed {
            reason,
            last_log_lines: tail_lines(&artifacts.console_log, FAILURE_LOG_LINES),
        }
    }
}

fn tail_lines(path: &Path, count: usize) -> Vec<String> {
    let text = fs::read_to_string(path).unwrap_or_default();
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].iter().map(|line| line.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug)]
    struct Scripted(Vec<Option<bool>>);

    impl ProcessHandle for Scripted {
        fn try_finished(&mut self) -> io::Result<Option<bool>> {
            Ok(if self.0.len() > 1 {
                self.0.remove(0)
            } else {
                self.0[0]
            })
        }
    }

    fn artifacts(dir: &Path) -> TreeArtifacts {
        TreeArtifacts {
            treefile: dir.join("t.treefile"),
            tool_log: dir.join("t.log"),
            report: dir.join("t.iqtree"),
            console_log: dir.join("t.console.log"),
        }
    }

    #[test]
    fn tail_keeps_last_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log");
        let text: String = (0..30).map(|i| format!("line {i}\n")).collect();
        fs::write(&path, text).expect("write");
        let tail = tail_lines(&path, 20);
        assert_eq!(tail.len(), 20);
        assert_eq!(tail[0], "line 10");
    }

    #[test]
    fn unknown_id_is_not_found() {
        let jobs = TreeJobs::new();
        assert_eq!(jobs.poll(&RunId::from("feedface".to_string())), PollStatus::NotFound);
    }

    #[test]
    fn running_job_stays_registered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jobs = TreeJobs::new();
        let id = jobs.register(dir.path(), Box::new(Scripted(vec![None, Some(false)])), artifacts(dir.path()));
        assert_eq!(jobs.poll(&id), PollStatus::Running);
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs.poll(&id), PollStatus::Failed { .. }));
        assert!(jobs.is_empty());
    }

    #[test]
    fn ids_are_unique_and_short() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jobs = TreeJobs::new();
        let a = jobs.register(dir.path(), Box::new(Scripted(vec![None])), artifacts(dir.path()));
        let b = jobs.register(dir.path(), Box::new(Scripted(vec![None])), artifacts(dir.path()));
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 16);
    }
}
