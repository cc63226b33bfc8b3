//! Three-phase aggregation engine: load, read-and-sum, write
//!
//! The phases always run in order and are not transactional: a failure is
//! logged and recorded, and the remaining phases still run with whatever
//! state exists. A read failure halfway through the input directory keeps
//! the sums accumulated so far, and the write phase persists them.

use crate::accessor::{WorkbookAccessor, XlsxAccessor};
use crate::mapping::{self, Accumulators, MappingError, MappingTable};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// The run phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Load,
    Aggregate,
    Write,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Load => "load",
            Phase::Aggregate => "aggregate",
            Phase::Write => "write",
        };
        f.write_str(name)
    }
}

/// One failed phase inside an otherwise completed run
#[derive(Debug, Clone, Serialize)]
pub struct PhaseError {
    pub phase: Phase,
    pub message: String,
}

/// Outcome of a full run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub files_read: usize,
    pub destinations: usize,
    pub malformed_addresses: u32,
    pub results: BTreeMap<String, f64>,
    pub errors: Vec<PhaseError>,
    pub succeeded: bool,
}

/// Mapping-driven aggregation over a folder of workbooks
pub struct Calculator<A: WorkbookAccessor = XlsxAccessor> {
    config_path: PathBuf,
    input_dir: PathBuf,
    output_path: PathBuf,
    evaluate: bool,
    mappings: MappingTable,
    sums: Accumulators,
    files_read: usize,
    accessor: A,
}

impl Calculator<XlsxAccessor> {
    pub fn new(
        config_path: impl Into<PathBuf>,
        input_dir: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self::with_accessor(config_path, input_dir, output_path, XlsxAccessor::default())
    }
}

impl<A: WorkbookAccessor> Calculator<A> {
    pub fn with_accessor(
        config_path: impl Into<PathBuf>,
        input_dir: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        accessor: A,
    ) -> Self {
        Self {
            config_path: config_path.into(),
            input_dir: input_dir.into(),
            output_path: output_path.into(),
            evaluate: false,
            mappings: MappingTable::default(),
            sums: Accumulators::default(),
            files_read: 0,
            accessor,
        }
    }

    /// Re-evaluate output formulas before saving
    pub fn evaluate_output(mut self, evaluate: bool) -> Self {
        self.evaluate = evaluate;
        self
    }

    /// Phase 1: populate the mapping table and seed the accumulators.
    /// On failure, everything parsed before the failing line is kept.
    pub fn load_mappings(&mut self) -> Result<(), MappingError> {
        let found =
            mapping::load_mappings_into(&self.config_path, &mut self.mappings, &mut self.sums)?;
        if found {
            log::info!(
                "loaded {} source mappings for {} destinations",
                self.mappings.len(),
                self.sums.len()
            );
        } else {
            log::warn!(
                "mapping file {} not found, no mappings loaded",
                self.config_path.display()
            );
        }
        Ok(())
    }

    /// Phase 2: scan every input file, summing each mapped source into all
    /// of its destination accumulators
    pub fn read_and_sum(&mut self) -> Result<()> {
        if self.mappings.is_empty() {
            log::info!("no mappings loaded, nothing to aggregate");
            return Ok(());
        }

        let entries = fs::read_dir(&self.input_dir).with_context(|| {
            format!("Failed to list input directory {}", self.input_dir.display())
        })?;
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("Failed to list input directory {}", self.input_dir.display())
            })?;
            files.push(entry.path());
        }
        files.sort();

        for path in files {
            log::info!("reading {}", path.display());
            self.accessor
                .open(&path)
                .with_context(|| format!("Failed to open input workbook {}", path.display()))?;
            for (source, destinations) in self.mappings.iter() {
                let value = self
                    .accessor
                    .read_numeric(source)
                    .with_context(|| format!("Failed to read '{}' from {}", source, path.display()))?;
                for destination in destinations {
                    self.sums.add(destination, value);
                }
            }
            self.files_read += 1;
        }
        Ok(())
    }

    /// Phase 3: write every accumulator to its destination address and save
    pub fn write_results(&mut self) -> Result<()> {
        if self.sums.is_empty() {
            log::info!(
                "no accumulators to write, leaving {} untouched",
                self.output_path.display()
            );
            return Ok(());
        }

        log::info!("loading output workbook {}", self.output_path.display());
        self.accessor.open(&self.output_path).with_context(|| {
            format!("Failed to open output workbook {}", self.output_path.display())
        })?;

        log::info!("writing {} results", self.sums.len());
        for (destination, sum) in self.sums.iter() {
            self.accessor.write_numeric(destination, sum).with_context(|| {
                format!("Failed to write '{}' into {}", destination, self.output_path.display())
            })?;
        }

        if self.evaluate {
            log::info!("re-evaluating output formulas");
            self.accessor.evaluate_formulas()?;
        }

        log::info!("saving {}", self.output_path.display());
        self.accessor
            .save(&self.output_path)
            .with_context(|| format!("Failed to save {}", self.output_path.display()))?;
        Ok(())
    }

    /// Run all three phases in order, logging and recording each failure
    pub fn run(&mut self) -> RunReport {
        let mut errors = Vec::new();

        log::info!("reading the mapping file");
        if let Err(err) = self.load_mappings() {
            log::error!("error reading the mapping file: {err}");
            errors.push(PhaseError {
                phase: Phase::Load,
                message: err.to_string(),
            });
        }

        log::info!("reading input workbooks");
        if let Err(err) = self.read_and_sum() {
            log::error!("error reading input workbooks: {err:#}");
            errors.push(PhaseError {
                phase: Phase::Aggregate,
                message: format!("{err:#}"),
            });
        }

        log::info!("writing results");
        if let Err(err) = self.write_results() {
            log::error!("error writing results: {err:#}");
            errors.push(PhaseError {
                phase: Phase::Write,
                message: format!("{err:#}"),
            });
        }

        let succeeded = errors.is_empty();
        RunReport {
            files_read: self.files_read,
            destinations: self.sums.len(),
            malformed_addresses: self.accessor.malformed_addresses(),
            results: self
                .sums
                .iter()
                .map(|(destination, sum)| (destination.to_string(), sum))
                .collect(),
            errors,
            succeeded,
        }
    }

    /// Sums accumulated so far, keyed by destination label
    pub fn sums(&self) -> &Accumulators {
        &self.sums
    }
}
