#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use phylokit::tools::{self, Invocation, ProcessHandle, ToolError, ToolKind, ToolOutput, ToolRunner};

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("PHYLOKIT_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set PHYLOKIT_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Write `(header, residues)` pairs as FASTA and return the path.
pub fn write_fasta(dir: &Path, name: &str, records: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let text: String = records
        .iter()
        .map(|(header, residues)| format!(">{header}\n{residues}\n"))
        .collect();
    fs::write(&path, text).expect("write fasta fixture");
    path
}

pub fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, lines.join("\n") + "\n").expect("write fixture");
    path
}

pub const TREE_NEWICK: &str = "((seqA:0.1,seqB:0.2)98:0.05,(seqC:0.3,seqD:0.1)72:0.04,seqE:0.2);\n";

pub const TREE_LOG: &str = "\
Best-fit model: LG+G4 chosen according to BIC
Log-likelihood of the tree: -1234.5678
Total tree length (sum of branch lengths): 0.9900
Total CPU time used: 12.5 seconds
Total wall-clock time used: 3.2 seconds
";

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .map(String::as_str)
}

/// Stands in for the external tools: writes the files each tool would
/// produce and answers with canned output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    failing: HashSet<ToolKind>,
    domain_hits: Vec<String>,
    hit_table: String,
    tree_polls_before_exit: usize,
    skip_treefile: bool,
    refuse_spawn: bool,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, tool: ToolKind) -> Self {
        self.failing.insert(tool);
        self
    }

    pub fn with_domain_hits(mut self, ids: &[&str]) -> Self {
        self.domain_hits = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn with_hit_table(mut self, rows: &[&str]) -> Self {
        self.hit_table = rows.iter().map(|row| format!("{row}\n")).collect();
        self
    }

    /// Polls answering `Running` before a detached tree job exits.
    pub fn with_tree_polls(mut self, polls: usize) -> Self {
        self.tree_polls_before_exit = polls;
        self
    }

    /// Exit successfully without writing the tree file.
    pub fn without_treefile(mut self) -> Self {
        self.skip_treefile = true;
        self
    }

    /// Fail detached launches as if the program were not installed.
    pub fn refusing_spawn(mut self) -> Self {
        self.refuse_spawn = true;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn calls_to(&self, tool: ToolKind) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|invocation| invocation.tool == tool)
            .count()
    }

    fn write_tree_outputs(&self, args: &[String]) {
        let prefix = PathBuf::from(value_after(args, "-pre").expect("iqtree prefix"));
        if !self.skip_treefile {
            fs::write(tools::iqtree_treefile(&prefix), TREE_NEWICK).expect("write treefile");
        }
        fs::write(tools::iqtree_log(&prefix), TREE_LOG).expect("write tree log");
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        self.invocations.lock().push(invocation.clone());
        let args = &invocation.args;
        if self.failing.contains(&invocation.tool) {
            return Ok(ToolOutput::failed(1, format!("{} crashed", invocation.tool)));
        }

        match invocation.tool {
            ToolKind::Hmmsearch => {
                let tblout = value_after(args, "--tblout").expect("tblout path");
                let mut table = String::from("# target name  accession  query name\n");
                for id in &self.domain_hits {
                    table.push_str(&format!("{id}  -  PF00001  -  1e-30\n"));
                }
                fs::write(tblout, table).expect("write tblout");
                for flag in ["--domtblout", "-o"] {
                    fs::write(value_after(args, flag).expect("output path"), "").expect("write output");
                }
                Ok(ToolOutput::ok(""))
            }
            ToolKind::Blastp => Ok(ToolOutput::ok(self.hit_table.clone())),
            ToolKind::Mafft => {
                let input = args.last().expect("mafft input");
                let text = fs::read_to_string(input).expect("read mafft input");
                Ok(ToolOutput::ok(text))
            }
            ToolKind::Clipkit => {
                let output = value_after(args, "-o").expect("clipkit output");
                // The input path is the first argument after any conda prefix.
                let input = args
                    .iter()
                    .position(|arg| arg == "clipkit")
                    .map_or(0, |index| index + 1);
                fs::copy(&args[input], output).expect("copy alignment");
                Ok(ToolOutput::ok(
                    "Number of sites kept: 120\nNumber of sites trimmed: 30\n",
                ))
            }
            ToolKind::Iqtree => {
                self.write_tree_outputs(args);
                Ok(ToolOutput::ok("IQ-TREE finished\n"))
            }
        }
    }

    fn spawn(
        &self,
        invocation: &Invocation,
        log_path: &Path,
    ) -> Result<Box<dyn ProcessHandle>, ToolError> {
        self.invocations.lock().push(invocation.clone());
        if self.refuse_spawn {
            return Err(ToolError::Spawn {
                program: invocation.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "program not found"),
            });
        }
        let success = !self.failing.contains(&invocation.tool);
        let console: String = (1..=25).map(|line| format!("console line {line}\n")).collect();
        fs::write(log_path, console).map_err(|source| ToolError::LogFile {
            path: log_path.to_path_buf(),
            source,
        })?;
        if success {
            self.write_tree_outputs(&invocation.args);
        }
        Ok(Box::new(ScriptedHandle {
            polls_left: self.tree_polls_before_exit,
            success,
        }))
    }
}

/// Process handle that exits after a fixed number of polls.
#[derive(Debug)]
pub struct ScriptedHandle {
    pub polls_left: usize,
    pub success: bool,
}

impl ProcessHandle for ScriptedHandle {
    fn try_finished(&mut self) -> io::Result<Option<bool>> {
        if self.polls_left == 0 {
            return Ok(Some(self.success));
        }
        self.polls_left -= 1;
        Ok(None)
    }
}
