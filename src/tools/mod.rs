//! External tool boundary
//!
//! The pipeline never builds shell strings: each tool call is an
//! [`Invocation`] (program plus argv) executed by a [`ToolRunner`]. Reports
//! the tools leave behind are parsed in [`reports`].

mod commands;
mod invocation;
pub mod reports;
mod runner;

pub use commands::{
    blastp, clipkit, hmmsearch, iqtree, iqtree_log, iqtree_report, iqtree_treefile, mafft,
    HmmsearchOutputs, IqtreeParams, TrimMode, BLAST_OUTFMT,
};
pub use invocation::{Invocation, ToolKind, DEFAULT_TIMEOUT};
pub use runner::{ProcessHandle, SystemRunner, ToolError, ToolOutput, ToolRunner};
