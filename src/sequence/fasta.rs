use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bio::io::fasta;
use thiserror::Error;

use super::SequenceRecord;

/// Residues written per line by [`serialize`] and [`write_path`].
pub const LINE_WIDTH: usize = 60;

/// Errors raised while reading or writing FASTA.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// The source could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A record could not be read (I/O failure, invalid UTF-8 or malformed layout).
    #[error("failed to read record {record}: {source}")]
    Read {
        /// 1-based index of the record being read.
        record: usize,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The destination could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Streaming FASTA reader yielding one [`SequenceRecord`] per header.
///
/// Stops after the first error.
pub struct FastaReader<R: Read> {
    records: fasta::Records<BufReader<R>>,
    read: usize,
}

impl<R: Read> FastaReader<R> {
    /// Wrap any byte source.
    pub fn new(reader: R) -> Self {
        Self {
            records: fasta::Reader::new(reader).records(),
            read: 0,
        }
    }
}

impl<R: Read> std::fmt::Debug for FastaReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastaReader").field("read", &self.read).finish()
    }
}

fn to_sequence_record(record: &fasta::Record) -> SequenceRecord {
    let residues: String = String::from_utf8_lossy(record.seq())
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let description = record.desc().map(str::trim).unwrap_or_default();
    SequenceRecord::new(record.id(), description, residues)
}

impl<R: Read> Iterator for FastaReader<R> {
    type Item = Result<SequenceRecord, SequenceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.records.next()?;
        self.read += 1;
        Some(match next {
            Ok(record) => Ok(to_sequence_record(&record)),
            Err(source) => Err(SequenceError::Read {
                record: self.read,
                source,
            }),
        })
    }
}

/// Parse FASTA text into records, in file order. Leading blank lines are
/// tolerated; malformed input yields the records read before the fault.
pub fn parse(text: &str) -> Vec<SequenceRecord> {
    FastaReader::new(text.trim_start().as_bytes())
        .map_while(Result::ok)
        .collect()
}

/// Read every record from a FASTA file. Any read failure discards the whole file.
pub fn read_path(path: &Path) -> Result<Vec<SequenceRecord>, SequenceError> {
    let file = File::open(path).map_err(|source| SequenceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    FastaReader::new(file).collect()
}

fn write_records<W: Write>(writer: &mut W, records: &[SequenceRecord], line_width: usize) -> io::Result<()> {
    let width = line_width.max(1);
    for record in records {
        writeln!(writer, ">{}", record.header())?;
        let bytes = record.residues.as_bytes();
        for chunk in bytes.chunks(width) {
            writer.write_all(chunk)?;
            writer.write_all(b"\n")?;
        }
    }
    writer.flush()
}

/// Render records as FASTA text wrapped at `line_width` residues per line.
pub fn serialize(records: &[SequenceRecord], line_width: usize) -> String {
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_records(&mut buffer, records, line_width);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Write records to `path` using [`LINE_WIDTH`].
pub fn write_path(path: &Path, records: &[SequenceRecord]) -> Result<(), SequenceError> {
    let to_error = |source| SequenceError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(to_error)?;
    let mut writer = BufWriter::new(file);
    write_records(&mut writer, records, LINE_WIDTH).map_err(to_error)
}
