use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::TrimMode;

/// Extensions of a formatted protein database.
const PROTEIN_DB_SUFFIXES: &[&str] = &[".pin", ".psq", ".phr", ".pal"];

static SAFE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w\-./]+$").expect("path pattern is valid"));

static MODEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+\-*]+$").expect("model pattern is valid"));

static ENV_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w\-.]+$").expect("environment pattern is valid"));

/// Problems found while loading or validating a [`PipelineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Numeric option outside its allowed range.
    #[error("{field} = {value} is out of range ({expected})")]
    OutOfRange {
        /// Option name.
        field: &'static str,
        /// Rejected value.
        value: String,
        /// Allowed range.
        expected: &'static str,
    },

    /// Path contains characters outside `[A-Za-z0-9_./-]` or a `..` component.
    #[error("{field} path {} contains unsupported characters or traversal", path.display())]
    UnsafePath {
        /// Option name.
        field: &'static str,
        /// Rejected path.
        path: PathBuf,
    },

    /// Required file does not exist.
    #[error("{field} {} does not exist", path.display())]
    Missing {
        /// Option name.
        field: &'static str,
        /// Missing path.
        path: PathBuf,
    },

    /// Required option was not set.
    #[error("{field} is required")]
    Required {
        /// Option name.
        field: &'static str,
    },

    /// Substitution model name with unsupported characters.
    #[error("invalid substitution model '{0}'")]
    InvalidModel(String),

    /// Conda environment name with unsupported characters.
    #[error("invalid conda environment name '{0}'")]
    InvalidEnvironment(String),

    /// Config file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Config file is not valid JSON for [`PipelineConfig`].
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// Options for the profile-HMM domain search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainSearchConfig {
    /// Profile files; the stage is skipped when empty.
    pub profiles: Vec<PathBuf>,
    /// Use the profiles' gathering thresholds.
    pub cut_ga: bool,
}

impl Default for DomainSearchConfig {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            cut_ga: true,
        }
    }
}

/// Options for the gold-standard homology filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldFilterConfig {
    /// Reference list; the stage is skipped when absent.
    pub gold_list: Option<PathBuf>,
    /// Homology-search database (path prefix of the formatted database).
    pub database: Option<PathBuf>,
    /// Minimum percent identity.
    pub min_identity: f64,
    /// Minimum query coverage.
    pub min_coverage: f64,
    /// E-value cutoff passed to the search.
    pub evalue: f64,
    /// Hits retained per query by the search.
    pub max_target_seqs: usize,
}

impl Default for GoldFilterConfig {
    fn default() -> Self {
        Self {
            gold_list: None,
            database: None,
            min_identity: 30.0,
            min_coverage: 50.0,
            evalue: 1e-5,
            max_target_seqs: 5,
        }
    }
}

/// Options for the length filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LengthFilterConfig {
    /// Shortest length kept (inclusive).
    pub min_length: usize,
}

impl Default for LengthFilterConfig {
    fn default() -> Self {
        Self { min_length: 50 }
    }
}

/// Options for multiple sequence alignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Iterative refinement cycles.
    pub maxiterate: u32,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self { maxiterate: 1000 }
    }
}

/// Options for alignment trimming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// Trimming strategy.
    pub mode: TrimMode,
}

/// Options for tree inference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Substitution model, `MFP` runs ModelFinder.
    pub model: String,
    /// Ultrafast bootstrap replicates.
    pub bootstrap: u32,
    /// Optimize bootstrap trees by NNI.
    pub bnni: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            model: "MFP".to_string(),
            bootstrap: 1000,
            bnni: true,
        }
    }
}

/// How external tools are launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Run tools through `conda run -n <env>`.
    pub conda_env: Option<String>,
    /// Threads forwarded to multi-threaded tools.
    pub threads: usize,
    /// Wall-clock limit per tool, in seconds.
    pub timeout_secs: u64,
    /// Wall-clock limit for tree inference, in seconds.
    pub tree_timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            conda_env: None,
            threads: 4,
            timeout_secs: 7200,
            tree_timeout_secs: 14400,
        }
    }
}

impl ToolConfig {
    /// Limit for ordinary tools.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Limit for tree inference.
    pub fn tree_timeout(&self) -> Duration {
        Duration::from_secs(self.tree_timeout_secs)
    }
}

/// Every option of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Input FASTA.
    pub input: PathBuf,
    /// Directory receiving every stage artifact.
    pub working_dir: PathBuf,
    /// Domain search options.
    #[serde(default)]
    pub domain_search: DomainSearchConfig,
    /// Gold-standard filter options.
    #[serde(default)]
    pub gold_filter: GoldFilterConfig,
    /// Length filter options.
    #[serde(default)]
    pub length_filter: LengthFilterConfig,
    /// Alignment options.
    #[serde(default)]
    pub alignment: AlignmentConfig,
    /// Trimming options.
    #[serde(default)]
    pub trimming: TrimConfig,
    /// Tree inference options.
    #[serde(default)]
    pub tree: TreeConfig,
    /// Tool launching options.
    #[serde(default)]
    pub tools: ToolConfig,
}

impl PipelineConfig {
    /// Defaults for every stage.
    pub fn new(input: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            working_dir: working_dir.into(),
            domain_search: DomainSearchConfig::default(),
            gold_filter: GoldFilterConfig::default(),
            length_filter: LengthFilterConfig::default(),
            alignment: AlignmentConfig::default(),
            trimming: TrimConfig::default(),
            tree: TreeConfig::default(),
            tools: ToolConfig::default(),
        }
    }

    /// Load from a JSON file.
    pub fn from_json_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Set domain-search profiles.
    pub fn with_profiles<I, P>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.domain_search.profiles = profiles.into_iter().map(Into::into).collect();
        self
    }

    /// Set the reference list and the homology database it is checked against.
    pub fn with_gold_list(mut self, gold_list: impl Into<PathBuf>, database: Option<PathBuf>) -> Self {
        self.gold_filter.gold_list = Some(gold_list.into());
        self.gold_filter.database = database;
        self
    }

    /// Set the identity and coverage thresholds.
    pub fn with_thresholds(mut self, min_identity: f64, min_coverage: f64) -> Self {
        self.gold_filter.min_identity = min_identity;
        self.gold_filter.min_coverage = min_coverage;
        self
    }

    /// Set the minimum sequence length.
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.length_filter.min_length = min_length;
        self
    }

    /// Run tools inside a conda environment.
    pub fn with_conda_env(mut self, env: Option<String>) -> Self {
        self.tools.conda_env = env;
        self
    }

    /// Set the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.tools.threads = threads;
        self
    }

    /// Check every option before any stage runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gold = &self.gold_filter;
        check_percent("gold_filter.min_identity", gold.min_identity)?;
        check_percent("gold_filter.min_coverage", gold.min_coverage)?;
        if !(gold.evalue.is_finite() && gold.evalue > 0.0) {
            return Err(out_of_range("gold_filter.evalue", gold.evalue, "> 0"));
        }
        check_at_least_one("gold_filter.max_target_seqs", gold.max_target_seqs as u64)?;
        check_at_least_one("length_filter.min_length", self.length_filter.min_length as u64)?;
        check_at_least_one("alignment.maxiterate", u64::from(self.alignment.maxiterate))?;
        check_at_least_one("tree.bootstrap", u64::from(self.tree.bootstrap))?;
        check_at_least_one("tools.threads", self.tools.threads as u64)?;
        check_at_least_one("tools.timeout_secs", self.tools.timeout_secs)?;
        check_at_least_one("tools.tree_timeout_secs", self.tools.tree_timeout_secs)?;

        if !MODEL_NAME.is_match(&self.tree.model) {
            return Err(ConfigError::InvalidModel(self.tree.model.clone()));
        }
        if let Some(env) = &self.tools.conda_env {
            if !ENV_NAME.is_match(env) {
                return Err(ConfigError::InvalidEnvironment(env.clone()));
            }
        }

        check_safe("input", &self.input)?;
        check_exists("input", &self.input)?;
        check_safe("working_dir", &self.working_dir)?;
        for profile in &self.domain_search.profiles {
            check_safe("domain_search.profiles", profile)?;
            check_exists("domain_search.profiles", profile)?;
        }
        if let Some(list) = &gold.gold_list {
            check_exists("gold_filter.gold_list", list)?;
            let database = gold.database.as_deref().ok_or(ConfigError::Required {
                field: "gold_filter.database",
            })?;
            if !database_present(database) {
                return Err(ConfigError::Missing {
                    field: "gold_filter.database",
                    path: database.to_path_buf(),
                });
            }
        }
        if let Some(database) = &gold.database {
            check_safe("gold_filter.database", database)?;
        }
        Ok(())
    }
}

fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::OutOfRange {
        field,
        value: value.to_string(),
        expected,
    }
}

fn check_percent(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(out_of_range(field, value, "0..=100"))
    }
}

fn check_at_least_one(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value >= 1 {
        Ok(())
    } else {
        Err(out_of_range(field, value, ">= 1"))
    }
}

/// Whether a formatted database exists at `prefix` (the prefix itself or its index files).
pub(crate) fn database_present(prefix: &Path) -> bool {
    prefix.exists()
        || PROTEIN_DB_SUFFIXES.iter().any(|suffix| {
            let mut raw: OsString = prefix.as_os_str().to_os_string();
            raw.push(suffix);
            PathBuf::from(raw).exists()
        })
}

/// Whether `path` may be handed to an external tool.
pub fn is_safe_path(path: &Path) -> bool {
    let Some(text) = path.to_str() else {
        return false;
    };
    SAFE_PATH.is_match(text) && !path.components().any(|c| c == Component::ParentDir)
}

fn check_safe(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if is_safe_path(path) {
        Ok(())
    } else {
        Err(ConfigError::UnsafePath {
            field,
            path: path.to_path_buf(),
        })
    }
}

fn check_exists(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConfigError::Missing {
            field,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_input() -> (tempfile::TempDir, PipelineConfig) {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("in.fasta");
        std::fs::write(&input, ">a\nMK\n").expect("write input");
        let config = PipelineConfig::new(input, dir.path().join("run"));
        (dir, config)
    }

    #[test]
    fn defaults_validate() {
        let (_dir, config) = config_with_input();
        config.validate().expect("defaults are valid");
        assert!(config.domain_search.cut_ga);
        assert_eq!(config.tools.tree_timeout(), Duration::from_secs(14400));
    }

    #[test]
    fn rejects_out_of_range_identity() {
        let (_dir, config) = config_with_input();
        let err = config.with_thresholds(130.0, 50.0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "gold_filter.min_identity", .. }));
    }

    #[test]
    fn rejects_shell_metacharacters_in_model() {
        let (_dir, mut config) = config_with_input();
        config.tree.model = "LG;rm".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidModel(_))));
    }

    #[test]
    fn rejects_traversal() {
        assert!(!is_safe_path(Path::new("data/../secret.fa")));
        assert!(!is_safe_path(Path::new("my file.fa")));
        assert!(is_safe_path(Path::new("/tmp/run_1/in-put.fa")));
    }

    #[test]
    fn missing_gold_list_is_a_validation_error() {
        let (dir, config) = config_with_input();
        let config = config.with_gold_list(dir.path().join("absent.txt"), None);
        assert!(matches!(config.validate(), Err(ConfigError::Missing { field: "gold_filter.gold_list", .. })));
    }

    #[test]
    fn gold_list_needs_a_formatted_database() {
        let (dir, config) = config_with_input();
        let gold = dir.path().join("gold.txt");
        std::fs::write(&gold, "AT1G01010\n").expect("write gold list");

        let without = config.clone().with_gold_list(&gold, None);
        assert!(matches!(without.validate(), Err(ConfigError::Required { field: "gold_filter.database" })));

        let absent = config.clone().with_gold_list(&gold, Some(dir.path().join("refdb")));
        assert!(matches!(absent.validate(), Err(ConfigError::Missing { field: "gold_filter.database", .. })));

        std::fs::write(dir.path().join("refdb.psq"), "").expect("write db index");
        let present = config.with_gold_list(&gold, Some(dir.path().join("refdb")));
        present.validate().expect("index file satisfies the database prefix");
    }

    #[test]
    fn json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"input":"in.fa","working_dir":"out","trimming":{"mode":"gappy"}}"#)
                .expect("parse");
        assert_eq!(config.trimming.mode, TrimMode::Gappy);
        assert_eq!(config.length_filter.min_length, 50);
    }
}
