use serde::{Deserialize, Serialize};

/// Residue letters that never occur in nucleotide alphabets.
const PROTEIN_ONLY: &[u8] = b"EFILPQ";

/// Gaps and ambiguity codes ignored during alphabet detection.
const IGNORED: &[u8] = b"XNBZ-";

/// Residue alphabet inferred from a record's letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceKind {
    /// DNA or RNA.
    Nucleotide,
    /// Amino acids.
    Protein,
}

/// Classify residues as protein when any protein-only letter is present.
pub fn detect_kind(residues: &str) -> SequenceKind {
    let is_protein = residues
        .bytes()
        .map(|b| b.to_ascii_uppercase())
        .filter(|b| !IGNORED.contains(b) && !b.is_ascii_whitespace())
        .any(|b| PROTEIN_ONLY.contains(&b));
    if is_protein {
        SequenceKind::Protein
    } else {
        SequenceKind::Nucleotide
    }
}

/// One parsed FASTA record. Immutable once parsed; filters build new vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// First whitespace-delimited token of the header.
    pub id: String,
    /// Remainder of the header line, possibly empty.
    pub description: String,
    /// Concatenated residue lines with whitespace removed.
    pub residues: String,
    /// Inferred alphabet.
    pub kind: SequenceKind,
}

impl SequenceRecord {
    /// Construct a record, inferring its kind from the residues.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        residues: impl Into<String>,
    ) -> Self {
        let residues = residues.into();
        let kind = detect_kind(&residues);
        Self {
            id: id.into(),
            description: description.into(),
            residues,
            kind,
        }
    }

    /// Residue count.
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    /// Whether the record carries no residues.
    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// Copy of the record with the description dropped.
    pub fn with_clean_header(&self) -> Self {
        Self {
            id: self.id.clone(),
            description: String::new(),
            residues: self.residues.clone(),
            kind: self.kind,
        }
    }

    /// Header text without the leading `>`.
    pub fn header(&self) -> String {
        if self.description.is_empty() {
            self.id.clone()
        } else {
            format!("{} {}", self.id, self.description)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_protein_letters() {
        assert_eq!(detect_kind("MKLVEQ"), SequenceKind::Protein);
        assert_eq!(detect_kind("acgtn-acgu"), SequenceKind::Nucleotide);
    }

    #[test]
    fn ambiguity_codes_do_not_force_protein() {
        assert_eq!(detect_kind("ACGTXXBZNN"), SequenceKind::Nucleotide);
    }

    #[test]
    fn header_omits_empty_description() {
        let record = SequenceRecord::new("seq1", "", "ACGT");
        assert_eq!(record.header(), "seq1");
        let record = SequenceRecord::new("seq1", "some gene", "ACGT");
        assert_eq!(record.header(), "seq1 some gene");
        assert_eq!(record.with_clean_header().header(), "seq1");
    }
}
