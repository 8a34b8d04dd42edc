use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use super::{PipelineConfig, StageName};

/// Parameter record file name.
pub const PARAMS_FILE: &str = "params.json";

/// Options in effect for a run, written before each stage.
#[derive(Debug, Serialize)]
pub struct ParamsRecord<'a> {
    /// Input of the run.
    pub input: &'a Path,
    /// Every option.
    pub config: &'a PipelineConfig,
    /// Stage about to execute.
    pub next_stage: StageName,
    /// Local time, RFC 3339.
    pub timestamp: String,
}

impl<'a> ParamsRecord<'a> {
    /// Snapshot for `next_stage`, timestamped now.
    pub fn new(config: &'a PipelineConfig, next_stage: StageName) -> Self {
        Self {
            input: &config.input,
            config,
            next_stage,
            timestamp: Local::now().to_rfc3339(),
        }
    }

    /// Overwrite `params.json` in `dir`.
    pub fn write(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join(PARAMS_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}
