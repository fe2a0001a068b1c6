use std::path::Path;

use anyhow::{Context, Result};

use crate::fasta::{self, Record};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("alignment contains no records")]
    Empty,

    #[error("record '{name}' has length {actual}, expected {expected}")]
    UnequalLengths {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("taxon '{0}' not present in the alignment")]
    UnknownTaxon(String),
}

/// A multiple-sequence alignment: a non-empty set of records, all of the
/// same length.
#[derive(Debug)]
pub struct Msa {
    records: Vec<Record>,
}

impl Msa {
    pub fn new(records: Vec<Record>) -> Result<Self, Error> {
        let Some(first) = records.first() else {
            return Err(Error::Empty);
        };
        let expected = first.sequence.len();
        for record in &records {
            if record.sequence.len() != expected {
                return Err(Error::UnequalLengths {
                    name: record.name.clone(),
                    expected,
                    actual: record.sequence.len(),
                });
            }
        }
        Ok(Self { records })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let records = fasta::read_records(path)?;
        Self::new(records).with_context(|| format!("reading alignment {path:?}"))
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn sequence_of(&self, taxon: &str) -> Result<&str, Error> {
        self.records
            .iter()
            .find(|record| record.name == taxon)
            .map(|record| record.sequence.as_str())
            .ok_or_else(|| Error::UnknownTaxon(taxon.to_owned()))
    }

    /// Mask bases of `taxon` that no member of `group` corroborates.
    ///
    /// A position is kept when any group member carries the same base
    /// (case-insensitively) at that column; otherwise it becomes a lowercase
    /// `n`. Gaps and already-masked positions are left untouched. All other
    /// records pass through unchanged.
    pub fn filter_singletons(&self, taxon: &str, group: &[String]) -> Result<Msa, Error> {
        let focal = self.sequence_of(taxon)?.as_bytes();
        let others: Vec<&[u8]> = group
            .iter()
            .map(|name| self.sequence_of(name).map(str::as_bytes))
            .collect::<Result<_, Error>>()?;

        let masked: String = focal
            .iter()
            .enumerate()
            .map(|(column, &base)| {
                if matches!(base, b'N' | b'n' | b'-' | b'.')
                    || others
                        .iter()
                        .any(|other| other[column].eq_ignore_ascii_case(&base))
                {
                    base as char
                } else {
                    'n'
                }
            })
            .collect();

        let records = self
            .records
            .iter()
            .map(|record| {
                if record.name == taxon {
                    Record {
                        name: record.name.clone(),
                        sequence: masked.clone(),
                    }
                } else {
                    record.clone()
                }
            })
            .collect();
        // lengths are unchanged, so this cannot fail.
        Msa::new(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, sequence: &str) -> Record {
        Record {
            name: name.to_owned(),
            sequence: sequence.to_owned(),
        }
    }

    fn group(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn unequal_lengths_are_rejected() {
        let err = Msa::new(vec![record("a", "ACGT"), record("b", "AC")]).unwrap_err();
        assert!(matches!(err, Error::UnequalLengths { .. }));
    }

    #[test]
    fn empty_alignment_is_rejected() {
        assert!(matches!(Msa::new(Vec::new()), Err(Error::Empty)));
    }

    #[test]
    fn uncorroborated_bases_are_masked() -> Result<(), Error> {
        let msa = Msa::new(vec![
            record("focal", "ACGT"),
            record("x", "AGGA"),
            record("y", "TCGA"),
        ])?;

        let filtered = msa.filter_singletons("focal", &group(&["x", "y"]))?;
        // A corroborated by x, C by y, G by both; T by neither.
        assert_eq!(filtered.records()[0].sequence, "ACGn");
        // the comparison records are untouched:
        assert_eq!(filtered.records()[1].sequence, "AGGA");
        Ok(())
    }

    #[test]
    fn gaps_and_masked_positions_pass_through() -> Result<(), Error> {
        let msa = Msa::new(vec![record("focal", "-N.nA"), record("x", "CCCCC")])?;

        let filtered = msa.filter_singletons("focal", &group(&["x"]))?;
        assert_eq!(filtered.records()[0].sequence, "-N.nn");
        Ok(())
    }

    #[test]
    fn corroboration_is_case_insensitive() -> Result<(), Error> {
        let msa = Msa::new(vec![record("focal", "acgt"), record("x", "ACGA")])?;

        let filtered = msa.filter_singletons("focal", &group(&["x"]))?;
        assert_eq!(filtered.records()[0].sequence, "acgn");
        Ok(())
    }

    #[test]
    fn unknown_taxon_is_an_error() -> Result<(), Error> {
        let msa = Msa::new(vec![record("a", "ACGT")])?;
        assert!(matches!(
            msa.filter_singletons("missing", &group(&["a"])),
            Err(Error::UnknownTaxon(_))
        ));
        assert!(matches!(
            msa.filter_singletons("a", &group(&["missing"])),
            Err(Error::UnknownTaxon(_))
        ));
        Ok(())
    }
}
