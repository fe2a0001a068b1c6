use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};

/// Column width used when writing sequence data.
pub const LINE_WIDTH: usize = 60;

/// One named sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub sequence: String,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("sequence data before the first '>' header")]
    DataBeforeHeader,

    #[error("'>' header with an empty name")]
    EmptyName,

    #[error("record '{0}' contains non-ASCII sequence data")]
    NonAscii(String),
}

/// Read all records from a FASTA file.
///
/// The record name is the first whitespace-delimited token of the header;
/// the rest of the header line is ignored. Blank lines are skipped.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let file = fs::File::open(path).with_context(|| format!("opening FASTA file {path:?}"))?;
    parse(io::BufReader::new(file)).with_context(|| format!("parsing FASTA file {path:?}"))
}

fn parse(reader: impl BufRead) -> Result<Vec<Record>> {
    let mut records: Vec<Record> = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            let name = header.split_whitespace().next().ok_or(Error::EmptyName)?;
            records.push(Record {
                name: name.to_owned(),
                sequence: String::new(),
            });
        } else {
            let record = records.last_mut().ok_or(Error::DataBeforeHeader)?;
            if !line.is_ascii() {
                return Err(Error::NonAscii(record.name.clone()).into());
            }
            record.sequence.push_str(line);
        }
    }
    Ok(records)
}

/// Write one record, wrapping the sequence at [`LINE_WIDTH`] columns.
pub fn write_record(writer: &mut impl Write, name: &str, sequence: &str) -> io::Result<()> {
    writeln!(writer, ">{name}")?;
    // sequences are validated as ASCII on the way in, so byte chunks are
    // character chunks.
    for chunk in sequence.as_bytes().chunks(LINE_WIDTH) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
