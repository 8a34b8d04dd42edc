use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Invocation, ToolKind};

/// Tabular format requested from blastp; matches [`crate::filter::HIT_TABLE_HEADER`].
pub const BLAST_OUTFMT: &str = "6 qseqid sseqid pident qcovs";

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Files written by one hmmsearch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HmmsearchOutputs {
    /// Per-sequence table (`--tblout`).
    pub tblout: PathBuf,
    /// Per-domain table (`--domtblout`).
    pub domtblout: PathBuf,
    /// Human-readable report (`-o`).
    pub report: PathBuf,
}

impl HmmsearchOutputs {
    /// Output set named `<stem>.{tbl,domtbl,out}` inside `dir`.
    pub fn in_dir(dir: &Path, stem: &str) -> Self {
        Self {
            tblout: dir.join(format!("{stem}.tbl")),
            domtblout: dir.join(format!("{stem}.domtbl")),
            report: dir.join(format!("{stem}.out")),
        }
    }
}

/// `hmmsearch [--cut_ga] --tblout T --domtblout D -o O --cpu N profile seqs`
pub fn hmmsearch(
    profile: &Path,
    sequences: &Path,
    outputs: &HmmsearchOutputs,
    cut_ga: bool,
    cpu: usize,
) -> Invocation {
    let mut inv = Invocation::new(ToolKind::Hmmsearch);
    if cut_ga {
        inv = inv.arg("--cut_ga");
    }
    inv.arg("--tblout")
        .arg(path_arg(&outputs.tblout))
        .arg("--domtblout")
        .arg(path_arg(&outputs.domtblout))
        .arg("-o")
        .arg(path_arg(&outputs.report))
        .arg("--cpu")
        .arg(cpu.to_string())
        .arg(path_arg(profile))
        .arg(path_arg(sequences))
}

/// blastp against a reference database; the hit table is written to stdout.
pub fn blastp(
    query: &Path,
    database: &Path,
    evalue: f64,
    max_target_seqs: usize,
    threads: usize,
) -> Invocation {
    Invocation::new(ToolKind::Blastp)
        .arg("-query")
        .arg(path_arg(query))
        .arg("-db")
        .arg(path_arg(database))
        .arg("-evalue")
        .arg(evalue.to_string())
        .arg("-max_target_seqs")
        .arg(max_target_seqs.to_string())
        .arg("-num_threads")
        .arg(threads.to_string())
        .arg("-outfmt")
        .arg(BLAST_OUTFMT)
}

/// mafft; the alignment is written to stdout.
pub fn mafft(input: &Path, maxiterate: u32) -> Invocation {
    Invocation::new(ToolKind::Mafft)
        .arg("--maxiterate")
        .arg(maxiterate.to_string())
        .arg(path_arg(input))
}

/// ClipKIT trimming strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrimMode {
    /// Keep parsimony-informative and constant sites, drop gappy ones.
    #[default]
    KpicGappy,
    /// Drop gappy sites only.
    Gappy,
    /// Keep parsimony-informative and constant sites.
    Kpic,
}

impl TrimMode {
    /// Value passed to `-m`.
    pub fn as_str(self) -> &'static str {
        match self {
            TrimMode::KpicGappy => "kpic-gappy",
            TrimMode::Gappy => "gappy",
            TrimMode::Kpic => "kpic",
        }
    }
}

impl fmt::Display for TrimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TrimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kpic-gappy" => Ok(TrimMode::KpicGappy),
            "gappy" => Ok(TrimMode::Gappy),
            "kpic" => Ok(TrimMode::Kpic),
            other => Err(format!("unknown trim mode '{other}' (expected kpic-gappy, gappy or kpic)")),
        }
    }
}

/// `clipkit input -o output -m mode -l`; the log goes to stderr.
pub fn clipkit(input: &Path, output: &Path, mode: TrimMode) -> Invocation {
    Invocation::new(ToolKind::Clipkit)
        .arg(path_arg(input))
        .arg("-o")
        .arg(path_arg(output))
        .arg("-m")
        .arg(mode.as_str())
        .arg("-l")
}

/// IQ-TREE inference parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqtreeParams<'a> {
    /// Substitution model or `MFP` for ModelFinder.
    pub model: &'a str,
    /// Ultrafast bootstrap replicates.
    pub bootstrap: u32,
    /// Worker threads.
    pub threads: usize,
    /// Optimize bootstrap trees by NNI.
    pub bnni: bool,
}

/// Path of the tree IQ-TREE writes for `prefix`.
pub fn iqtree_treefile(prefix: &Path) -> PathBuf {
    with_suffix(prefix, ".treefile")
}

/// Path of the IQ-TREE log for `prefix`.
pub fn iqtree_log(prefix: &Path) -> PathBuf {
    with_suffix(prefix, ".log")
}

/// Path of the IQ-TREE report for `prefix`.
pub fn iqtree_report(prefix: &Path) -> PathBuf {
    with_suffix(prefix, ".iqtree")
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut raw = prefix.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// `iqtree -s input -pre prefix -m model -B n -T threads [-bnni]`
pub fn iqtree(input: &Path, prefix: &Path, params: &IqtreeParams<'_>) -> Invocation {
    let inv = Invocation::new(ToolKind::Iqtree)
        .arg("-s")
        .arg(path_arg(input))
        .arg("-pre")
        .arg(path_arg(prefix))
        .arg("-m")
        .arg(params.model)
        .arg("-B")
        .arg(params.bootstrap.to_string())
        .arg("-T")
        .arg(params.threads.to_string());
    if params.bnni {
        inv.arg("-bnni")
    } else {
        inv
    }
}
