use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default wall-clock limit for external tools.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7200);

/// External program kinds the pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Profile HMM domain search.
    Hmmsearch,
    /// Protein homology search.
    Blastp,
    /// Multiple sequence alignment.
    Mafft,
    /// Alignment trimming.
    Clipkit,
    /// Phylogenetic inference.
    Iqtree,
}

impl ToolKind {
    /// Executable name.
    pub fn program(self) -> &'static str {
        match self {
            ToolKind::Hmmsearch => "hmmsearch",
            ToolKind::Blastp => "blastp",
            ToolKind::Mafft => "mafft",
            ToolKind::Clipkit => "clipkit",
            ToolKind::Iqtree => "iqtree",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// One external process invocation as an argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Tool being run.
    pub tool: ToolKind,
    /// Program actually executed (`conda` when wrapped).
    pub program: String,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Wall-clock limit.
    pub timeout: Duration,
}

impl Invocation {
    /// Invoke `tool` directly.
    pub fn new(tool: ToolKind) -> Self {
        Self {
            tool,
            program: tool.program().to_string(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run through `conda run -n <env>` when an environment is given.
    pub fn in_conda_env(mut self, env: Option<&str>) -> Self {
        if let Some(env) = env {
            let mut args = vec![
                "run".to_string(),
                "-n".to_string(),
                env.to_string(),
                self.program,
            ];
            args.append(&mut self.args);
            self.program = "conda".to_string();
            self.args = args;
        }
        self
    }

    /// Shell-quoted rendering for audit logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '+' | ','));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conda_prefix_wraps_program() {
        let inv = Invocation::new(ToolKind::Mafft)
            .args(["--maxiterate", "1000", "in.fasta"])
            .in_conda_env(Some("bio"));
        assert_eq!(inv.program, "conda");
        assert_eq!(inv.args[..4], ["run", "-n", "bio", "mafft"]);
        assert_eq!(inv.display(), "conda run -n bio mafft --maxiterate 1000 in.fasta");
    }

    #[test]
    fn display_quotes_spaces() {
        let inv = Invocation::new(ToolKind::Blastp).args(["-outfmt", "6 qseqid sseqid pident qcovs"]);
        assert_eq!(inv.display(), "blastp -outfmt '6 qseqid sseqid pident qcovs'");
    }
}
