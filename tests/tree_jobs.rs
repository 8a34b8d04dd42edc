mod common;

use std::path::PathBuf;
use std::thread;

use common::{write_fasta, ScriptedHandle, ScriptedRunner};
use phylokit::pipeline::{
    FailureKind, Orchestrator, PipelineConfig, PollStatus, RunId, RunState, StageName, TreeArtifacts, TreeJobs,
    FAILURE_LOG_LINES,
};
use phylokit::tools::ToolKind;
use phylokit::PipelineError;

fn config(dir: &tempfile::TempDir) -> PipelineConfig {
    let long: String = "MKT".repeat(30);
    let input = write_fasta(
        dir.path(),
        "input.fasta",
        &[("seqA desc", long.as_str()), ("seqB", long.as_str()), ("seqC", long.as_str())],
    );
    PipelineConfig::new(input, dir.path().join("run"))
}

#[test]
fn detached_tree_reports_completion_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let orchestrator = Orchestrator::new(ScriptedRunner::new().with_tree_polls(2));

    let mut run = orchestrator.run_until_tree(&config).expect("run starts");
    assert_eq!(run.state, RunState::Running(StageName::Trimming));
    assert!(run.result(StageName::Tree).is_none());

    let id = orchestrator.start_tree(&config, &mut run).expect("tree starts");
    assert_eq!(id.as_str().len(), 16);
    assert_eq!(orchestrator.poll_tree(&id), PollStatus::Running);
    assert_eq!(orchestrator.poll_tree(&id), PollStatus::Running);

    let status = orchestrator.poll_tree(&id);
    let PollStatus::Completed { outputs, summary } = &status else {
        panic!("expected completion, got {status:?}");
    };
    assert_eq!(outputs[0], config.working_dir.join("step5_tree.treefile"));
    assert_eq!(summary.inference.model.as_deref(), Some("LG+G4"));
    assert_eq!(summary.bootstrap.count, 2);
    assert_eq!(summary.bootstrap.strong, 1);
    assert_eq!(summary.bootstrap.moderate, 1);

    assert_eq!(orchestrator.poll_tree(&id), PollStatus::NotFound);
    assert!(orchestrator.jobs().is_empty());

    assert!(orchestrator.finish_tree(&config, &mut run, &status));
    assert!(run.is_completed());
    let tree = run.result(StageName::Tree).expect("tree recorded");
    assert!(tree.is_success());
    assert!(tree.invocation_text().is_some_and(|text| text.starts_with("iqtree")));
    assert_eq!(run.current_file, config.working_dir.join("step5_tree.treefile"));
    assert!(run.summary_path().exists());
}

#[test]
fn failed_tree_returns_the_log_tail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let orchestrator = Orchestrator::new(ScriptedRunner::new().failing(ToolKind::Iqtree));

    let mut run = orchestrator.run_until_tree(&config).expect("run starts");
    let id = orchestrator.start_tree(&config, &mut run).expect("tree starts");

    let status = orchestrator.poll_tree(&id);
    let PollStatus::Failed { last_log_lines, .. } = &status else {
        panic!("expected failure, got {status:?}");
    };
    assert_eq!(last_log_lines.len(), FAILURE_LOG_LINES);
    assert_eq!(last_log_lines.first().map(String::as_str), Some("console line 6"));
    assert_eq!(last_log_lines.last().map(String::as_str), Some("console line 25"));

    assert!(orchestrator.finish_tree(&config, &mut run, &status));
    assert_eq!(run.failed_stage(), Some(StageName::Tree));
    assert!(!run.is_completed());
}

#[test]
fn clean_exit_without_tree_file_is_a_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let orchestrator = Orchestrator::new(ScriptedRunner::new().without_treefile());

    let mut run = orchestrator.run_until_tree(&config).expect("run starts");
    let id = orchestrator.start_tree(&config, &mut run).expect("tree starts");

    match orchestrator.poll_tree(&id) {
        PollStatus::Failed { reason, .. } => assert!(reason.contains("was not produced"), "{reason}"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn tree_cannot_start_after_a_failed_stage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let orchestrator = Orchestrator::new(ScriptedRunner::new().failing(ToolKind::Clipkit));

    let mut run = orchestrator.run_until_tree(&config).expect("run starts");
    let err = orchestrator
        .start_tree(&config, &mut run)
        .expect_err("halted run");

    assert!(matches!(err, PipelineError::Halted(StageName::Trimming)));
    assert_eq!(orchestrator.runner().calls_to(ToolKind::Iqtree), 0);
    assert!(orchestrator.jobs().is_empty());
}

#[test]
fn launch_failure_is_recorded_as_a_failed_tree_stage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let orchestrator = Orchestrator::new(ScriptedRunner::new().refusing_spawn());

    let mut run = orchestrator.run_until_tree(&config).expect("run starts");
    let logged_before = run.invocation_log.len();
    let err = orchestrator
        .start_tree(&config, &mut run)
        .expect_err("spawn fails");

    assert!(matches!(err, PipelineError::Tool(_)), "{err}");
    assert_eq!(run.failed_stage(), Some(StageName::Tree));
    let tree = run.result(StageName::Tree).expect("tree recorded");
    assert_eq!(tree.failure_kind(), Some(FailureKind::Invocation));
    assert!(tree.invocation_text().is_some_and(|text| text.starts_with("iqtree")));
    assert_eq!(run.invocation_log.len(), logged_before + 1);
    assert!(run.invocation_log.last().is_some_and(|text| text.starts_with("iqtree")));
    assert!(orchestrator.jobs().is_empty());

    let summary = std::fs::read_to_string(run.summary_path()).expect("summary written");
    assert!(summary.contains("could not start iqtree"), "{summary}");
}

#[test]
fn unknown_ids_are_not_found_and_change_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config(&dir);
    let orchestrator = Orchestrator::new(ScriptedRunner::new());
    let mut run = orchestrator.run_until_tree(&config).expect("run starts");
    let before = run.clone();

    let status = orchestrator.poll_tree(&RunId::from("0123456789abcdef".to_string()));
    assert_eq!(status, PollStatus::NotFound);
    assert!(!orchestrator.finish_tree(&config, &mut run, &status));
    assert_eq!(run, before);
}

#[test]
fn concurrent_polls_reap_each_job_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let jobs = TreeJobs::new();
    let ids: Vec<RunId> = (0..8)
        .map(|index| {
            let stem = dir.path().join(format!("job{index}"));
            let artifacts = TreeArtifacts {
                treefile: PathBuf::from(format!("{}.treefile", stem.display())),
                tool_log: PathBuf::from(format!("{}.log", stem.display())),
                report: PathBuf::from(format!("{}.iqtree", stem.display())),
                console_log: PathBuf::from(format!("{}.console.log", stem.display())),
            };
            std::fs::write(&artifacts.treefile, common::TREE_NEWICK).expect("write tree");
            let handle = ScriptedHandle {
                polls_left: index % 3,
                success: true,
            };
            jobs.register(dir.path(), Box::new(handle), artifacts)
        })
        .collect();
    assert_eq!(jobs.len(), ids.len());

    let completions: usize = thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    let mut completed = 0;
                    for _ in 0..4 {
                        for id in &ids {
                            if matches!(jobs.poll(id), PollStatus::Completed { .. }) {
                                completed += 1;
                            }
                        }
                    }
                    completed
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("poller thread"))
            .sum()
    });

    assert_eq!(completions, ids.len());
    assert!(jobs.is_empty());
}
