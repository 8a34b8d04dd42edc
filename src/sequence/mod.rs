//! Sequence records, the FASTA exchange format shared by every stage, and the
//! identifier canonicalisation rules used to cross-reference IDs emitted by
//! heterogeneous upstream tools.

mod fasta;
mod identifier;
mod record;

pub use fasta::{parse, read_path, serialize, write_path, FastaReader, SequenceError, LINE_WIDTH};
pub use identifier::{gold_key, normalize, NormalizedId};
pub use record::{detect_kind, SequenceKind, SequenceRecord};
