use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::sequence::{normalize, FastaReader, NormalizedId, SequenceError, SequenceRecord};

/// Description keys whose values are treated as alternative identifiers.
const RECOGNIZED_KEYS: &[&str] = &["id", "locus", "gene", "transcript", "mrna", "protein", "pacid"];

/// Characters trimmed from the end of description tokens.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', ')', ']', '}', '"', '\''];

static GENE_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][\w.\-]*$").expect("gene token pattern is valid")
});

/// Outcome of a fuzzy extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Matched records, in source order, each at most once.
    pub extracted: Vec<SequenceRecord>,
    /// Requested strings that found a record.
    pub matched: BTreeSet<String>,
    /// Requested strings with no record.
    pub unmatched: BTreeSet<String>,
}

/// Finds records for a set of requested identifiers, tolerating case and
/// version-suffix differences and identifiers buried in header descriptions.
#[derive(Debug, Clone)]
pub struct FuzzyExtractor {
    requested: Vec<String>,
    exact: HashSet<String>,
    fuzzy: HashMap<NormalizedId, String>,
}

impl FuzzyExtractor {
    /// Build the exact and normalized indexes. On normalized collisions the
    /// first requested string wins.
    pub fn new<I, S>(requested: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut exact = HashSet::new();
        let mut fuzzy = HashMap::new();
        for id in requested {
            let id = id.into();
            if !exact.insert(id.clone()) {
                continue;
            }
            fuzzy.entry(normalize(&id)).or_insert_with(|| id.clone());
            ordered.push(id);
        }
        Self {
            requested: ordered,
            exact,
            fuzzy,
        }
    }

    /// Number of distinct requested identifiers.
    pub fn requested_len(&self) -> usize {
        self.requested.len()
    }

    /// Resolve one record to the requested string it satisfies, if any.
    ///
    /// Candidates are tried in order (primary id, recognized `key=value`
    /// values, gene-like description tokens); the first hit wins.
    pub fn match_record(&self, record: &SequenceRecord) -> Option<&str> {
        candidate_tokens(record)
            .into_iter()
            .find_map(|candidate| self.lookup(&candidate))
    }

    fn lookup(&self, candidate: &str) -> Option<&str> {
        if let Some(hit) = self.exact.get(candidate) {
            return Some(hit.as_str());
        }
        self.fuzzy.get(&normalize(candidate)).map(String::as_str)
    }

    /// Run over an in-memory collection.
    pub fn extract(&self, records: &[SequenceRecord]) -> Extraction {
        let mut state = ExtractionState::default();
        for record in records {
            state.observe(self, record);
        }
        state.finish(self)
    }

    /// Stream records from a reader. A read failure anywhere discards all
    /// progress and returns the error.
    pub fn extract_reader<R: Read>(&self, reader: R) -> Result<Extraction, SequenceError> {
        let mut state = ExtractionState::default();
        for record in FastaReader::new(reader) {
            state.observe(self, &record?);
        }
        Ok(state.finish(self))
    }

    /// Stream records from a FASTA file.
    pub fn extract_path(&self, path: &Path) -> Result<Extraction, SequenceError> {
        let file = File::open(path).map_err(|source| SequenceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        self.extract_reader(file)
    }
}

#[derive(Debug, Default)]
struct ExtractionState {
    extracted: Vec<SequenceRecord>,
    matched: BTreeSet<String>,
}

impl ExtractionState {
    fn observe(&mut self, extractor: &FuzzyExtractor, record: &SequenceRecord) {
        if let Some(hit) = extractor.match_record(record) {
            debug!(record = %record.id, requested = hit, "identifier matched");
            self.matched.insert(hit.to_string());
            self.extracted.push(record.clone());
        }
    }

    fn finish(self, extractor: &FuzzyExtractor) -> Extraction {
        let unmatched = extractor
            .requested
            .iter()
            .filter(|id| !self.matched.contains(*id))
            .cloned()
            .collect();
        Extraction {
            extracted: self.extracted,
            matched: self.matched,
            unmatched,
        }
    }
}

fn split_description(description: &str) -> impl Iterator<Item = &str> {
    description
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '|'))
        .filter(|piece| !piece.is_empty())
}

/// Header tokens that may carry the identifier, in evaluation order.
fn candidate_tokens(record: &SequenceRecord) -> Vec<String> {
    let mut candidates = vec![record.id.clone()];

    for piece in split_description(&record.description) {
        if let Some((key, value)) = piece.split_once('=') {
            if RECOGNIZED_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
                let value = value
                    .trim_matches(|c| c == '"' || c == '\'')
                    .trim_end_matches(TRAILING_PUNCTUATION);
                if !value.is_empty() {
                    candidates.push(value.to_string());
                }
            }
        }
    }

    for piece in split_description(&record.description) {
        let token = piece.trim_end_matches(TRAILING_PUNCTUATION);
        if GENE_LIKE.is_match(token) {
            candidates.push(token.to_string());
        }
    }

    candidates
}
