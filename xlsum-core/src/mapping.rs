//! Mapping table and per-destination accumulators
//!
//! A mapping file is plain text, one `<source>;<destination>` pair per
//! non-empty line. Loading the table also seeds one zero accumulator per
//! distinct destination, so every destination is written even if no input
//! file ever contributes to it.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("mapping line {line}: expected '<source>;<destination>', got '{content}'")]
    MalformedLine { line: usize, content: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Source address text → ordered, deduplicated destination labels.
/// Built once by [`load_mappings`], read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    mapping: BTreeMap<String, Vec<String>>,
}

impl MappingTable {
    /// Register a destination for a source, ignoring exact duplicates
    pub fn insert(&mut self, source: &str, destination: &str) {
        let destinations = self.mapping.entry(source.to_string()).or_default();
        if !destinations.iter().any(|d| d == destination) {
            destinations.push(destination.to_string());
        }
    }

    pub fn destinations(&self, source: &str) -> Option<&[String]> {
        self.mapping.get(source).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.mapping.iter().map(|(s, d)| (s.as_str(), d.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}

/// One running sum per destination label
#[derive(Debug, Clone, Default)]
pub struct Accumulators {
    sums: BTreeMap<String, f64>,
}

impl Accumulators {
    /// Ensure a zero-initialized sum exists for a destination
    pub fn seed(&mut self, destination: &str) {
        self.sums.entry(destination.to_string()).or_insert(0.0);
    }

    pub fn add(&mut self, destination: &str, value: f64) {
        *self.sums.entry(destination.to_string()).or_insert(0.0) += value;
    }

    pub fn get(&self, destination: &str) -> Option<f64> {
        self.sums.get(destination).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.sums.iter().map(|(d, v)| (d.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }
}

/// Load a mapping file into a table plus seeded accumulators.
///
/// Returns whether the file existed; a missing file is an explicit no-op,
/// not an error. Loading mutates the table and sums in place, so on a read
/// failure or malformed line everything parsed up to that point is kept.
/// The first malformed line aborts the rest of the load; fields past the
/// second are ignored.
pub fn load_mappings_into<P: AsRef<Path>>(
    path: P,
    table: &mut MappingTable,
    sums: &mut Accumulators,
) -> Result<bool, MappingError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(false);
    }

    let file = File::open(path)?;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let mut fields: Vec<&str> = line.split(';').collect();
        // trailing empty fields do not count, so "A1;" is malformed
        while fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }
        if fields.len() < 2 {
            return Err(MappingError::MalformedLine {
                line: index + 1,
                content: line.to_string(),
            });
        }

        let (source, destination) = (fields[0], fields[1]);
        sums.seed(destination);
        table.insert(source, destination);
    }

    Ok(true)
}
