use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{error, info, info_span, warn};

use super::config::database_present;
use super::{
    ConfigError, ParamsRecord, PipelineConfig, PipelineRun, PollStatus, RunId, StageName,
    StageResult, TreeArtifacts, TreeJobs, TreeSummary,
};
use crate::filter::{
    filter_by_length, merge_hits, parse_hits, select_by_id, GoldStandardFilter, GoldStandardSet,
    LengthStats, ProfileHits, DELETED_PREVIEW_LIMIT, HIT_TABLE_HEADER,
};
use crate::sequence::{self, read_path, write_path, SequenceRecord};
use crate::tools::reports::{parse_tblout_ids, TrimSummary};
use crate::tools::{self, HmmsearchOutputs, Invocation, IqtreeParams, ToolOutput, ToolRunner};
use crate::PipelineError;

/// Drives the fixed stage sequence for one run at a time and owns the
/// registry of detached tree inferences.
#[derive(Debug)]
pub struct Orchestrator<R> {
    runner: Arc<R>,
    jobs: TreeJobs,
}

impl<R: ToolRunner> Orchestrator<R> {
    /// Create an orchestrator executing tools with `runner`.
    pub fn new(runner: R) -> Self {
        Self::with_runner(Arc::new(runner))
    }

    /// Create an orchestrator sharing an existing runner.
    pub fn with_runner(runner: Arc<R>) -> Self {
        Self {
            runner,
            jobs: TreeJobs::new(),
        }
    }

    /// Tool runner in use.
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Detached tree registry.
    pub fn jobs(&self) -> &TreeJobs {
        &self.jobs
    }

    /// Run every stage, tree inference included.
    ///
    /// Only configuration problems and failure to create the working
    /// directory return `Err`; stage failures are recorded in the run.
    pub fn run(&self, config: &PipelineConfig) -> Result<PipelineRun, PipelineError> {
        self.execute(config, StageName::Tree)
    }

    /// Run every stage up to and including trimming, leaving tree inference
    /// to [`Orchestrator::start_tree`].
    pub fn run_until_tree(&self, config: &PipelineConfig) -> Result<PipelineRun, PipelineError> {
        self.execute(config, StageName::Trimming)
    }

    fn execute(&self, config: &PipelineConfig, last: StageName) -> Result<PipelineRun, PipelineError> {
        config.validate()?;
        fs::create_dir_all(&config.working_dir).map_err(|source| {
            PipelineError::io(
                format!("creating working directory {}", config.working_dir.display()),
                source,
            )
        })?;

        let mut run = PipelineRun::new(&config.working_dir, &config.input);
        info!(
            input = %config.input.display(),
            working_dir = %config.working_dir.display(),
            "pipeline started"
        );

        for stage in StageName::ALL.into_iter().filter(|stage| *stage <= last) {
            run.begin(stage);
            let span = info_span!("stage", name = stage.label());
            let _entered = span.enter();

            let result = match ParamsRecord::new(config, stage).write(&config.working_dir) {
                Ok(_) => self.run_stage(stage, config, &run.current_file),
                Err(source) => {
                    StageResult::failed(&PipelineError::io("writing parameter record", source), None)
                }
            };
            log_result(stage, &result);
            run.record(stage, result);
            if run.is_failed() {
                break;
            }
        }

        if last == StageName::Tree {
            run.complete();
        }
        persist_summary(&run);
        Ok(run)
    }

    fn run_stage(&self, stage: StageName, config: &PipelineConfig, input: &Path) -> StageResult {
        let mut cx = StageContext {
            runner: self.runner.as_ref(),
            config,
            input,
            invocations: Vec::new(),
        };
        let outcome = match stage {
            StageName::CleanHeaders => cx.clean_headers(),
            StageName::DomainSearch => cx.domain_search(),
            StageName::GoldFilter => cx.gold_filter(),
            StageName::LengthStats => cx.length_stats(),
            StageName::LengthFilter => cx.length_filter(),
            StageName::Alignment => cx.alignment(),
            StageName::Trimming => cx.trimming(),
            StageName::Tree => cx.tree(),
        };
        let invocation_text = cx.invocation_text();
        match outcome {
            Ok(result) => with_output_digest(result).with_invocation(invocation_text),
            Err(err) => StageResult::failed(&err, invocation_text),
        }
    }

    /// Launch tree inference detached on the run's current file.
    ///
    /// A launch failure is recorded in `run` as a failed tree stage before
    /// the error is returned.
    pub fn start_tree(
        &self,
        config: &PipelineConfig,
        run: &mut PipelineRun,
    ) -> Result<RunId, PipelineError> {
        if let Some(stage) = run.failed_stage() {
            return Err(PipelineError::Halted(stage));
        }
        ParamsRecord::new(config, StageName::Tree)
            .write(&run.working_dir)
            .map_err(|source| PipelineError::io("writing parameter record", source))?;

        let (invocation, artifacts) = tree_invocation(config, &run.current_file);
        let invocation = prepare(config, invocation, config.tools.tree_timeout());
        run.begin(StageName::Tree);
        let handle = match self.runner.spawn(&invocation, &artifacts.console_log) {
            Ok(handle) => handle,
            Err(err) => {
                let err = PipelineError::from(err);
                let result = StageResult::failed(&err, Some(invocation.display()));
                log_result(StageName::Tree, &result);
                run.record(StageName::Tree, result);
                persist_summary(run);
                return Err(err);
            }
        };
        let id = self.jobs.register(&run.working_dir, handle, artifacts);
        info!(run_id = %id, command = %invocation.display(), "tree inference started");
        Ok(id)
    }

    /// Check a detached tree inference.
    pub fn poll_tree(&self, id: &RunId) -> PollStatus {
        self.jobs.poll(id)
    }

    /// Record a terminal poll answer in `run`. Returns `false` for
    /// [`PollStatus::Running`] and [`PollStatus::NotFound`].
    pub fn finish_tree(
        &self,
        config: &PipelineConfig,
        run: &mut PipelineRun,
        status: &PollStatus,
    ) -> bool {
        let (invocation, _) = tree_invocation(config, &run.current_file);
        let invocation = prepare(config, invocation, config.tools.tree_timeout());
        let Some(result) = status.to_stage_result(Some(invocation.display())) else {
            return false;
        };
        let result = if result.is_failure() {
            result
        } else {
            with_output_digest(result)
        };
        log_result(StageName::Tree, &result);
        run.record(StageName::Tree, result);
        run.complete();
        persist_summary(run);
        true
    }
}

fn log_result(stage: StageName, result: &StageResult) {
    match result {
        StageResult::Succeeded { message, .. } => info!(stage = stage.label(), %message, "stage succeeded"),
        StageResult::Skipped { message } => info!(stage = stage.label(), %message, "stage skipped"),
        StageResult::Failed { message, kind, .. } => {
            error!(stage = stage.label(), ?kind, %message, "stage failed")
        }
    }
}

fn persist_summary(run: &PipelineRun) {
    if let Err(err) = run.write_summary() {
        warn!(path = %run.summary_path().display(), %err, "could not write run summary");
    }
}

fn with_output_digest(result: StageResult) -> StageResult {
    let digest = result
        .output_path()
        .and_then(|path| fs::read(path).ok())
        .map(|bytes| blake3::hash(&bytes).to_hex().to_string());
    match digest {
        Some(digest) => result.with_stat("output_blake3", digest),
        None => result,
    }
}

fn prepare(config: &PipelineConfig, invocation: Invocation, timeout: Duration) -> Invocation {
    invocation
        .with_timeout(timeout)
        .in_conda_env(config.tools.conda_env.as_deref())
}

fn tree_invocation(config: &PipelineConfig, input: &Path) -> (Invocation, TreeArtifacts) {
    let prefix = config.working_dir.join("step5_tree");
    let params = IqtreeParams {
        model: &config.tree.model,
        bootstrap: config.tree.bootstrap,
        threads: config.tools.threads,
        bnni: config.tree.bnni,
    };
    let artifacts = TreeArtifacts {
        treefile: tools::iqtree_treefile(&prefix),
        tool_log: tools::iqtree_log(&prefix),
        report: tools::iqtree_report(&prefix),
        console_log: config.working_dir.join("step5_tree.console.log"),
    };
    (tools::iqtree(input, &prefix, &params), artifacts)
}

struct StageContext<'a, R> {
    runner: &'a R,
    config: &'a PipelineConfig,
    input: &'a Path,
    invocations: Vec<String>,
}

impl<R: ToolRunner> StageContext<'_, R> {
    fn artifact(&self, name: &str) -> PathBuf {
        self.config.working_dir.join(name)
    }

    fn invocation_text(&self) -> Option<String> {
        if self.invocations.is_empty() {
            None
        } else {
            Some(self.invocations.join("\n"))
        }
    }

    fn read_input(&self) -> Result<Vec<SequenceRecord>, PipelineError> {
        Ok(read_path(self.input)?)
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<(), PipelineError> {
        fs::write(path, text)
            .map_err(|source| PipelineError::io(format!("writing {}", path.display()), source))
    }

    fn invoke(&mut self, invocation: Invocation, timeout: Duration) -> Result<ToolOutput, PipelineError> {
        let invocation = prepare(self.config, invocation, timeout);
        info!(command = %invocation.display(), "invoking external tool");
        self.invocations.push(invocation.display());
        Ok(self.runner.run(&invocation)?)
    }

    fn clean_headers(&mut self) -> Result<StageResult, PipelineError> {
        let records = self.read_input()?;
        let cleaned: Vec<SequenceRecord> = records.iter().map(SequenceRecord::with_clean_header).collect();
        let output = self.artifact("step1_cleaned.fasta");
        write_path(&output, &cleaned)?;

        let count = cleaned.len();
        let log = format!(
            "Cleaned {count} sequences\nInput: {}\nOutput: {}\n",
            self.input.display(),
            output.display()
        );
        self.write_text(&self.artifact("step1.log"), &log)?;
        Ok(StageResult::succeeded(&output, format!("Cleaned {count} sequences")).with_stat("sequences", count))
    }

    fn domain_search(&mut self) -> Result<StageResult, PipelineError> {
        let config = self.config;
        let profiles = &config.domain_search.profiles;
        if profiles.is_empty() {
            return Ok(StageResult::skipped("no domain profiles supplied"));
        }

        let mut searches = Vec::with_capacity(profiles.len());
        for (index, profile) in profiles.iter().enumerate() {
            let label = profile
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("profile_{index}"));
            info!(profile = %label, index = index + 1, total = profiles.len(), "running domain search");

            let outputs = HmmsearchOutputs::in_dir(
                &config.working_dir,
                &format!("step2_hmmsearch_{index}_{label}"),
            );
            let invocation = tools::hmmsearch(
                profile,
                self.input,
                &outputs,
                config.domain_search.cut_ga,
                config.tools.threads,
            );
            let hits = match self.invoke(invocation, config.tools.timeout()) {
                Ok(output) if output.success => match fs::read_to_string(&outputs.tblout) {
                    Ok(table) => ProfileHits::found(&label, parse_tblout_ids(&table)),
                    Err(err) => ProfileHits::failed(
                        &label,
                        format!("could not read {}: {err}", outputs.tblout.display()),
                    ),
                },
                Ok(output) => ProfileHits::failed(&label, output.diagnostic()),
                Err(err) => ProfileHits::failed(&label, err.to_string()),
            };
            searches.push(hits);
        }

        let summary = merge_hits(&searches).map_err(|failed| PipelineError::PartialCoverage {
            attempted: searches.len(),
            last_error: failed.last_error,
        })?;

        let records = self.read_input()?;
        let selected = select_by_id(&records, &summary.unique());
        let output = self.artifact("step2_hmm_hits.fasta");
        write_path(&output, &selected)?;

        let mut lines = vec![format!("Profiles searched: {}", searches.len())];
        lines.extend(
            summary
                .profiles_failed
                .iter()
                .map(|(profile, message)| format!("  FAILED {profile}: {message}")),
        );
        lines.push(format!("Total hits: {}", summary.total_hits));
        lines.push(format!("Unique hits: {}", summary.unique_count()));
        lines.push(format!("Duplicates removed: {}", summary.duplicate_count));
        lines.push(format!("Sequences extracted: {}", selected.len()));
        let log: String = lines.iter().map(|line| format!("{line}\n")).collect();
        self.write_text(&self.artifact("step2.log"), &log)?;

        let message = format!(
            "Found {} unique hits from {} profile(s) (removed {} duplicates)",
            summary.unique_count(),
            searches.len(),
            summary.duplicate_count
        );
        Ok(StageResult::succeeded(&output, message)
            .with_stat("total_hits", summary.total_hits)
            .with_stat("unique_hits", summary.unique_count())
            .with_stat("duplicates", summary.duplicate_count)
            .with_stat("profiles_used", summary.profiles_used.clone())
            .with_stat("profiles_failed", summary.profiles_failed.len())
            .with_stat("extracted", selected.len()))
    }

    fn gold_filter(&mut self) -> Result<StageResult, PipelineError> {
        let config = self.config;
        let options = &config.gold_filter;
        let Some(gold_list) = &options.gold_list else {
            return Ok(StageResult::skipped("no gold standard list supplied"));
        };
        let database = match &options.database {
            Some(database) if database_present(database) => database,
            Some(database) => {
                return Err(ConfigError::Missing {
                    field: "gold_filter.database",
                    path: database.clone(),
                }
                .into())
            }
            None => {
                return Err(ConfigError::Required {
                    field: "gold_filter.database",
                }
                .into())
            }
        };

        let gold = GoldStandardSet::load(gold_list)?;
        info!(ids = gold.len(), "gold standard list loaded");

        let invocation = tools::blastp(
            self.input,
            database,
            options.evalue,
            options.max_target_seqs,
            config.tools.threads,
        );
        let output = self.invoke(invocation, config.tools.timeout())?;
        if !output.success {
            return Err(PipelineError::Invocation {
                tool: "blastp".to_string(),
                message: output.diagnostic(),
            });
        }
        self.write_text(
            &self.artifact("step2_5_blast_raw.tsv"),
            &format!("{HIT_TABLE_HEADER}\n{}", output.stdout),
        )?;

        let (hits, malformed) = parse_hits(&output.stdout);
        let hit_rows = hits.len();
        let records = self.read_input()?;
        let gold_ids = gold.len();
        let outcome = GoldStandardFilter::new(gold, options.min_identity, options.min_coverage)
            .apply(&records, hits);

        let filtered = self.artifact("step2_5_filtered.fasta");
        write_path(&filtered, &outcome.kept)?;
        self.write_text(&self.artifact("step2_5_blast_filter.log"), &outcome.render_log())?;

        let deleted = outcome.deleted();
        let preview: Vec<serde_json::Value> = deleted
            .iter()
            .take(DELETED_PREVIEW_LIMIT)
            .map(|(id, decision)| json!({ "id": id, "reasons": decision.reasons }))
            .collect();
        let message = format!(
            "Filtered to {} sequences (from {})",
            outcome.kept.len(),
            outcome.total_in()
        );
        Ok(StageResult::succeeded(&filtered, message)
            .with_stat("total_in", outcome.total_in())
            .with_stat("kept", outcome.kept.len())
            .with_stat("deleted", deleted.len())
            .with_stat("deleted_ids", preview)
            .with_stat("gold_ids", gold_ids)
            .with_stat("hit_rows", hit_rows)
            .with_stat("malformed_rows", malformed))
    }

    fn length_stats(&mut self) -> Result<StageResult, PipelineError> {
        let records = self.read_input()?;
        let stats = LengthStats::compute(&records).ok_or_else(|| PipelineError::NoSequences {
            path: self.input.to_path_buf(),
        })?;
        let output = self.artifact("step2_7_length_stats.json");
        let json = serde_json::to_string_pretty(&stats)
            .map_err(|source| PipelineError::io("serializing length statistics", source.into()))?;
        self.write_text(&output, &json)?;
        Ok(StageResult::succeeded(&output, format!("Calculated stats for {} sequences", stats.count))
            .with_stats_of(&stats))
    }

    fn length_filter(&mut self) -> Result<StageResult, PipelineError> {
        let records = self.read_input()?;
        let min_length = self.config.length_filter.min_length;
        let outcome = filter_by_length(&records, min_length);

        let output = self.artifact("step2_8_length_filtered.fasta");
        write_path(&output, &outcome.kept)?;
        self.write_text(&self.artifact("step2_8_length_filter.log"), &outcome.render_log())?;

        let message = format!(
            "Kept {} sequences (removed {} shorter than {min_length})",
            outcome.kept.len(),
            outcome.deleted.len()
        );
        Ok(StageResult::succeeded(&output, message)
            .with_stat("total_in", outcome.total_in())
            .with_stat("kept", outcome.kept.len())
            .with_stat("deleted", outcome.deleted.len())
            .with_stat("threshold", min_length)
            .with_stat("deleted_with_lengths", json!(outcome.deleted)))
    }

    fn alignment(&mut self) -> Result<StageResult, PipelineError> {
        let invocation = tools::mafft(self.input, self.config.alignment.maxiterate);
        let output = self.invoke(invocation, self.config.tools.timeout())?;
        self.write_text(&self.artifact("step3_mafft.log"), &output.stderr)?;

        if !output.success || output.stdout.trim().is_empty() {
            let message = if output.success {
                "alignment output is empty".to_string()
            } else {
                output.diagnostic()
            };
            return Err(PipelineError::Invocation {
                tool: "mafft".to_string(),
                message,
            });
        }

        let aligned = self.artifact("step3_alignment.fasta");
        self.write_text(&aligned, &output.stdout)?;
        let sequences = sequence::parse(&output.stdout).len();
        Ok(StageResult::succeeded(&aligned, "MAFFT alignment completed")
            .with_stat("aligned_sequences", sequences))
    }

    fn trimming(&mut self) -> Result<StageResult, PipelineError> {
        let mode = self.config.trimming.mode;
        let trimmed = self.artifact("step4_trimmed.fasta");
        let invocation = tools::clipkit(self.input, &trimmed, mode);
        let output = self.invoke(invocation, self.config.tools.timeout())?;

        let log = format!("{}{}", output.stdout, output.stderr);
        self.write_text(&self.artifact("step4_clipkit.log"), &log)?;
        if !output.success {
            return Err(PipelineError::Invocation {
                tool: "clipkit".to_string(),
                message: output.diagnostic(),
            });
        }
        if !trimmed.exists() {
            return Err(PipelineError::Invocation {
                tool: "clipkit".to_string(),
                message: format!("{} was not produced", trimmed.display()),
            });
        }

        Ok(StageResult::succeeded(&trimmed, "ClipKIT trimming completed")
            .with_stat("mode", mode.as_str())
            .with_stats_of(&TrimSummary::parse(&log)))
    }

    fn tree(&mut self) -> Result<StageResult, PipelineError> {
        let (invocation, artifacts) = tree_invocation(self.config, self.input);
        let output = self.invoke(invocation, self.config.tools.tree_timeout())?;
        self.write_text(&artifacts.console_log, &format!("{}{}", output.stdout, output.stderr))?;
        if !output.success {
            return Err(PipelineError::Invocation {
                tool: "iqtree".to_string(),
                message: output.diagnostic(),
            });
        }
        if !artifacts.treefile.exists() {
            return Err(PipelineError::Invocation {
                tool: "iqtree".to_string(),
                message: format!("{} was not produced", artifacts.treefile.display()),
            });
        }
        let summary = TreeSummary::collect(&artifacts);
        Ok(StageResult::succeeded(&artifacts.treefile, "IQ-TREE completed").with_stats_of(&summary))
    }
}
