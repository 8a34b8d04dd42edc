use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use phylokit::filter::{filter_by_length, parse_hits, FuzzyExtractor, GoldStandardFilter, GoldStandardSet, LengthStats};
use phylokit::layout::{layout, max_depth, Interval};
use phylokit::pipeline::{Orchestrator, PipelineConfig, PipelineRun, PollStatus, StageName};
use phylokit::sequence::{read_path, write_path};
use phylokit::tools::{SystemRunner, TrimMode};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "phylokit", about = "Homology-filtered phylogenetics pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline: clean, search, filter, align, trim, infer.
    Run(RunArgs),
    /// Extract records whose identifiers match a list, tolerating version suffixes.
    Extract {
        /// FASTA to search.
        input: PathBuf,
        /// Requested identifiers, one per line.
        ids: PathBuf,
        /// Output FASTA.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Report length statistics and drop sequences below a minimum length.
    Lengths {
        /// Input FASTA.
        input: PathBuf,
        /// Minimum length to keep.
        #[arg(long, default_value_t = 50)]
        min_length: usize,
        /// Output FASTA for kept sequences (statistics only when absent).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Filter sequences against a gold-standard list using a precomputed hit table.
    GoldFilter {
        /// Input FASTA.
        input: PathBuf,
        /// Tab-separated hits (`qseqid sseqid pident qcovs`).
        hits: PathBuf,
        /// Gold-standard identifiers, one per line.
        gold_list: PathBuf,
        /// Minimum percent identity.
        #[arg(long, default_value_t = 30.0)]
        min_identity: f64,
        /// Minimum query coverage.
        #[arg(long, default_value_t = 50.0)]
        min_coverage: f64,
        /// Output FASTA for kept sequences.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Assign `start end` intervals (one pair per line) to non-overlapping lanes.
    Lanes {
        /// Interval file.
        intervals: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input FASTA (may come from --config instead).
    input: Option<PathBuf>,
    /// JSON pipeline configuration; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory receiving the timestamped run directory.
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,
    /// Profile HMM for the domain search (repeatable).
    #[arg(short, long = "profile")]
    profiles: Vec<PathBuf>,
    /// Gold-standard identifier list.
    #[arg(long)]
    gold_list: Option<PathBuf>,
    /// Formatted protein database for the homology search.
    #[arg(long)]
    blast_db: Option<PathBuf>,
    /// Minimum percent identity for the gold-standard filter.
    #[arg(long)]
    min_identity: Option<f64>,
    /// Minimum query coverage for the gold-standard filter.
    #[arg(long)]
    min_coverage: Option<f64>,
    /// Minimum sequence length.
    #[arg(long)]
    min_length: Option<usize>,
    /// MAFFT refinement iterations.
    #[arg(long)]
    maxiterate: Option<u32>,
    /// ClipKIT mode (kpic-gappy, gappy, kpic).
    #[arg(long)]
    trim_mode: Option<TrimMode>,
    /// Substitution model, `MFP` for model selection.
    #[arg(long)]
    model: Option<String>,
    /// Ultrafast bootstrap replicates.
    #[arg(long)]
    bootstrap: Option<u32>,
    /// Threads handed to each tool.
    #[arg(long)]
    threads: Option<usize>,
    /// Skip NNI optimization of bootstrap trees.
    #[arg(long)]
    no_bnni: bool,
    /// Search without the profiles' gathering thresholds.
    #[arg(long)]
    no_cut_ga: bool,
    /// Run every tool inside this conda environment.
    #[arg(long)]
    conda_env: Option<String>,
    /// Start tree inference detached and poll it until it finishes.
    #[arg(long)]
    detach: bool,
    /// Seconds between polls of a detached tree inference.
    #[arg(long, default_value_t = 30)]
    poll_interval: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_pipeline(args)?,
        Commands::Extract { input, ids, output } => run_extract(&input, &ids, &output)?,
        Commands::Lengths {
            input,
            min_length,
            output,
        } => run_lengths(&input, min_length, output.as_deref())?,
        Commands::GoldFilter {
            input,
            hits,
            gold_list,
            min_identity,
            min_coverage,
            output,
        } => run_gold_filter(&input, &hits, &gold_list, min_identity, min_coverage, &output)?,
        Commands::Lanes { intervals } => run_lanes(&intervals)?,
    }

    Ok(())
}

fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    let working_dir = args
        .output_dir
        .join(format!("phylo_pipeline_{}", Local::now().format("%Y%m%d_%H%M%S")));

    let mut config = match &args.config {
        Some(path) => {
            let mut config = PipelineConfig::from_json_path(path)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            if let Some(input) = &args.input {
                config.input = input.clone();
            }
            if config.working_dir.as_os_str().is_empty() {
                config.working_dir = working_dir;
            }
            config
        }
        None => {
            let Some(input) = &args.input else {
                bail!("an input FASTA is required when no --config is given");
            };
            PipelineConfig::new(input, working_dir)
        }
    };

    if !args.profiles.is_empty() {
        config = config.with_profiles(args.profiles.iter().cloned());
    }
    if let Some(gold_list) = &args.gold_list {
        let database = args.blast_db.clone().or_else(|| config.gold_filter.database.clone());
        config = config.with_gold_list(gold_list, database);
    } else if let Some(database) = &args.blast_db {
        config.gold_filter.database = Some(database.clone());
    }
    if let Some(min_identity) = args.min_identity {
        config.gold_filter.min_identity = min_identity;
    }
    if let Some(min_coverage) = args.min_coverage {
        config.gold_filter.min_coverage = min_coverage;
    }
    if let Some(min_length) = args.min_length {
        config = config.with_min_length(min_length);
    }
    if let Some(maxiterate) = args.maxiterate {
        config.alignment.maxiterate = maxiterate;
    }
    if let Some(mode) = args.trim_mode {
        config.trimming.mode = mode;
    }
    if let Some(model) = &args.model {
        config.tree.model = model.clone();
    }
    if let Some(bootstrap) = args.bootstrap {
        config.tree.bootstrap = bootstrap;
    }
    if let Some(threads) = args.threads {
        config = config.with_threads(threads);
    }
    if args.no_bnni {
        config.tree.bnni = false;
    }
    if args.no_cut_ga {
        config.domain_search.cut_ga = false;
    }
    if args.conda_env.is_some() {
        config = config.with_conda_env(args.conda_env.clone());
    }
    Ok(config)
}

fn run_pipeline(args: RunArgs) -> Result<()> {
    let config = build_config(&args)?;
    let orchestrator = Orchestrator::new(SystemRunner);

    let run = if args.detach {
        let mut run = orchestrator
            .run_until_tree(&config)
            .context("pipeline could not start")?;
        if !run.is_failed() {
            let id = orchestrator
                .start_tree(&config, &mut run)
                .context("failed to start tree inference")?;
            println!("Tree inference running as {id}");
            loop {
                let status = orchestrator.poll_tree(&id);
                if matches!(status, PollStatus::Running) {
                    thread::sleep(Duration::from_secs(args.poll_interval));
                    continue;
                }
                if !orchestrator.finish_tree(&config, &mut run, &status) {
                    warn!(run_id = %id, "tree job vanished from the registry");
                }
                break;
            }
        }
        run
    } else {
        orchestrator.run(&config).context("pipeline could not start")?
    };

    print_run(&run);
    if let Some(stage) = run.failed_stage() {
        bail!("pipeline failed at stage {stage}");
    }
    Ok(())
}

fn print_run(run: &PipelineRun) {
    println!("Working directory: {}", run.working_dir.display());
    for stage in StageName::ALL {
        let Some(result) = run.result(stage) else {
            continue;
        };
        let status = if result.is_skipped() {
            "SKIPPED"
        } else if result.is_failure() {
            "FAILED"
        } else {
            "OK"
        };
        println!("{:<14}\t{status}\t{}", stage.label(), result.message());
    }
    println!("Final output: {}", run.current_file.display());
    println!("Summary: {}", run.summary_path().display());
}

fn read_id_list(path: &Path) -> Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read id list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn run_extract(input: &Path, ids_path: &Path, output: &Path) -> Result<()> {
    let extractor = FuzzyExtractor::new(read_id_list(ids_path)?);
    let extraction = extractor
        .extract_path(input)
        .with_context(|| format!("extraction from {} failed", input.display()))?;
    write_path(output, &extraction.extracted)
        .with_context(|| format!("failed to write {}", output.display()))?;

    info!(
        requested = extractor.requested_len(),
        matched = extraction.matched.len(),
        extracted = extraction.extracted.len(),
        "extraction finished"
    );
    println!(
        "Extracted {} records ({} of {} identifiers matched)",
        extraction.extracted.len(),
        extraction.matched.len(),
        extractor.requested_len()
    );
    for id in &extraction.unmatched {
        println!("unmatched\t{id}");
    }
    Ok(())
}

fn run_lengths(input: &Path, min_length: usize, output: Option<&Path>) -> Result<()> {
    let records = read_path(input).with_context(|| format!("failed to read {}", input.display()))?;
    let Some(stats) = LengthStats::compute(&records) else {
        bail!("no sequences found in {}", input.display());
    };
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Some(output) = output {
        let outcome = filter_by_length(&records, min_length);
        write_path(output, &outcome.kept).with_context(|| format!("failed to write {}", output.display()))?;
        print!("{}", outcome.render_log());
    }
    Ok(())
}

fn run_gold_filter(
    input: &Path,
    hits_path: &Path,
    gold_list: &Path,
    min_identity: f64,
    min_coverage: f64,
    output: &Path,
) -> Result<()> {
    let records = read_path(input).with_context(|| format!("failed to read {}", input.display()))?;
    let gold = GoldStandardSet::load(gold_list)?;
    let table = fs::read_to_string(hits_path)
        .with_context(|| format!("failed to read hit table {}", hits_path.display()))?;
    let (hits, malformed) = parse_hits(&table);
    if malformed > 0 {
        warn!(malformed, "skipped malformed hit rows");
    }

    let outcome = GoldStandardFilter::new(gold, min_identity, min_coverage).apply(&records, hits);
    write_path(output, &outcome.kept).with_context(|| format!("failed to write {}", output.display()))?;
    print!("{}", outcome.render_log());
    Ok(())
}

fn run_lanes(path: &Path) -> Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read intervals {}", path.display()))?;
    let mut intervals = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(start), Some(end)) = (fields.next(), fields.next()) else {
            bail!("expected `start end` on line {}", line_no + 1);
        };
        let start: u64 = start
            .parse()
            .with_context(|| format!("invalid start '{start}' on line {}", line_no + 1))?;
        let end: u64 = end
            .parse()
            .with_context(|| format!("invalid end '{end}' on line {}", line_no + 1))?;
        intervals.push(Interval::new(start, end));
    }

    let lanes = layout(&intervals);
    println!("lanes={}\tmax_depth={}", lanes.len(), max_depth(&intervals));
    for (index, lane) in lanes.iter().enumerate() {
        let spans: Vec<String> = lane
            .iter()
            .map(|interval| format!("{}-{}", interval.start, interval.end))
            .collect();
        println!("lane {index}\t{}", spans.join(" "));
    }
    Ok(())
}
