use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Sequence ids from an hmmsearch `--tblout` table, in report order.
pub fn parse_tblout_ids(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Site accounting lines pulled from a ClipKIT log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimSummary {
    /// Last line mentioning kept sites.
    pub sites_kept: Option<String>,
    /// Last line mentioning trimmed sites.
    pub sites_trimmed: Option<String>,
}

impl TrimSummary {
    /// Scan a ClipKIT log.
    pub fn parse(log: &str) -> Self {
        let mut summary = Self::default();
        for line in log.lines() {
            let lowered = line.to_lowercase();
            if lowered.contains("kept") {
                summary.sites_kept = Some(line.trim().to_string());
            }
            if lowered.contains("trimmed") {
                summary.sites_trimmed = Some(line.trim().to_string());
            }
        }
        summary
    }
}

macro_rules! log_pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect("IQ-TREE log pattern is valid"));
    };
}

log_pattern!(BEST_MODEL, r"Best-fit model:\s+(\S+)");
log_pattern!(LOG_LIKELIHOOD, r"Log-likelihood of the tree:\s+([-\d.]+)");
log_pattern!(AIC, r"Akaike information criterion \(AIC\) score:\s+([-\d.]+)");
log_pattern!(BIC, r"Bayesian information criterion \(BIC\) score:\s+([-\d.]+)");
log_pattern!(TREE_LENGTH, r"Total tree length \(sum of branch lengths\):\s+([\d.]+)");
log_pattern!(CPU_TIME, r"Total CPU time used:\s+([\d.]+)");
log_pattern!(WALL_TIME, r"Total wall-clock time used:\s+([\d.]+)");

static SUPPORT_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\)(\d+(?:\.\d+)?)[:),;]").expect("support value pattern is valid")
});

/// Headline numbers from an IQ-TREE log or report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IqtreeSummary {
    /// Model chosen by ModelFinder.
    pub model: Option<String>,
    /// Final tree log-likelihood.
    pub log_likelihood: Option<f64>,
    /// Akaike information criterion.
    pub aic: Option<f64>,
    /// Bayesian information criterion.
    pub bic: Option<f64>,
    /// Sum of branch lengths.
    pub total_tree_length: Option<f64>,
    /// CPU seconds.
    pub cpu_time: Option<f64>,
    /// Wall-clock seconds.
    pub wall_time: Option<f64>,
}

fn capture_f64(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

impl IqtreeSummary {
    /// Parse whichever fields are present.
    pub fn parse(log: &str) -> Self {
        Self {
            model: BEST_MODEL
                .captures(log)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string()),
            log_likelihood: capture_f64(&LOG_LIKELIHOOD, log),
            aic: capture_f64(&AIC, log),
            bic: capture_f64(&BIC, log),
            total_tree_length: capture_f64(&TREE_LENGTH, log),
            cpu_time: capture_f64(&CPU_TIME, log),
            wall_time: capture_f64(&WALL_TIME, log),
        }
    }
}

/// Branch support values (numbers right after a closing parenthesis).
pub fn support_values(newick: &str) -> Vec<f64> {
    SUPPORT_VALUE
        .captures_iter(newick)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Distribution of branch supports in a tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSummary {
    /// Number of supported branches.
    pub count: usize,
    /// Mean support.
    pub mean: f64,
    /// Median support.
    pub median: f64,
    /// Lowest support.
    pub min: f64,
    /// Highest support.
    pub max: f64,
    /// Branches with support >= 95.
    pub strong: usize,
    /// Branches with 70 <= support < 95.
    pub moderate: usize,
    /// Branches with support < 70.
    pub weak: usize,
}

impl BootstrapSummary {
    /// Summarize the supports in a Newick string; all zero when none are present.
    pub fn from_newick(newick: &str) -> Self {
        let mut values = support_values(newick);
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(f64::total_cmp);
        let count = values.len();
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        };
        Self {
            count,
            mean: values.iter().sum::<f64>() / count as f64,
            median,
            min: values[0],
            max: values[count - 1],
            strong: values.iter().filter(|&&v| v >= 95.0).count(),
            moderate: values.iter().filter(|&&v| (70.0..95.0).contains(&v)).count(),
            weak: values.iter().filter(|&&v| v < 70.0).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tblout_skips_comment_lines() {
        let text = "# target name  accession\nseqA - PF03171 7.1e-20\nseqB - PF03171 1e-5\n#\n";
        assert_eq!(parse_tblout_ids(text), vec!["seqA", "seqB"]);
    }

    #[test]
    fn iqtree_log_fields() {
        let log = "Best-fit model: LG+G4 chosen according to BIC\n\
                   Log-likelihood of the tree: -1234.5678 (s.e. 12.3)\n\
                   Akaike information criterion (AIC) score: 2500.1\n\
                   Total tree length (sum of branch lengths): 3.21\n\
                   Total wall-clock time used: 12.5 sec\n";
        let summary = IqtreeSummary::parse(log);
        assert_eq!(summary.model.as_deref(), Some("LG+G4"));
        assert_eq!(summary.log_likelihood, Some(-1234.5678));
        assert_eq!(summary.aic, Some(2500.1));
        assert_eq!(summary.bic, None);
        assert_eq!(summary.wall_time, Some(12.5));
    }

    #[test]
    fn bootstrap_bins() {
        let tree = "((a:0.1,b:0.2)100:0.3,(c:0.1,d:0.1)72:0.2,(e:0.1,f:0.1)40:0.1);";
        let summary = BootstrapSummary::from_newick(tree);
        assert_eq!(summary.count, 3);
        assert_eq!((summary.strong, summary.moderate, summary.weak), (1, 1, 1));
        assert_eq!(summary.median, 72.0);
        assert_eq!(summary.max, 100.0);
    }

    #[test]
    fn clipkit_lines() {
        let summary = TrimSummary::parse("Number of sites kept: 120\nNumber of sites trimmed: 30\n");
        assert_eq!(summary.sites_kept.as_deref(), Some("Number of sites kept: 120"));
        assert_eq!(summary.sites_trimmed.as_deref(), Some("Number of sites trimmed: 30"));
    }
}
