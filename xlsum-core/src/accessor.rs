//! Workbook access with a sheet/row cursor
//!
//! Mapping tables tend to reference many cells of the same sheet, often the
//! same row, in consecutive calls. The accessor keeps the last-resolved
//! sheet and row in a cursor so repeated nearby accesses skip the name
//! lookup; the cursor is owned by the accessor instance and reset whenever
//! a new workbook is opened.

use crate::address::{CellAddress, column_index_to_letters};
use crate::formula;
use crate::reader::{self, CellValue, Workbook};
use crate::writer::{self, CellUpdate, WorkbookUpdates};
use anyhow::{Context, Result};
use std::path::Path;

/// Contract over one open workbook at a time
pub trait WorkbookAccessor {
    /// Open the workbook at `path`, releasing any previously held one
    fn open(&mut self, path: &Path) -> Result<()>;

    /// Numeric value at `address`; a malformed address reads as zero
    fn read_numeric(&mut self, address: &str) -> Result<f64>;

    /// Overwrite the cell at `address` with `value`; a malformed address is
    /// skipped. The destination sheet must already exist, rows and cells
    /// are created as needed.
    fn write_numeric(&mut self, address: &str, value: f64) -> Result<()>;

    /// Persist the open workbook to `path` and release it
    fn save(&mut self, path: &Path) -> Result<()>;

    /// Recompute formula cells; individual failures are logged and skipped
    fn evaluate_formulas(&mut self) -> Result<()>;

    /// Addresses skipped so far by the zero-on-read / skip-on-write paths
    fn malformed_addresses(&self) -> u32;
}

/// Last-resolved sheet and row; the row is cleared on any sheet change
#[derive(Debug, Default)]
struct Cursor {
    sheet: Option<usize>,
    row: Option<u32>,
}

/// XLSX-backed accessor: reads through calamine, collects writes as pending
/// cell updates and applies them on save
#[derive(Debug, Default)]
pub struct XlsxAccessor {
    workbook: Option<Workbook>,
    cursor: Cursor,
    updates: WorkbookUpdates,
    malformed: u32,
}

impl XlsxAccessor {
    fn release(&mut self) {
        self.workbook = None;
        self.cursor = Cursor::default();
        self.updates = WorkbookUpdates::default();
    }

    fn workbook(&self) -> Result<&Workbook> {
        self.workbook.as_ref().context("No workbook open")
    }

    /// Move the cursor to the address, re-resolving the sheet only when it
    /// differs from the cached one. Returns the sheet index.
    fn resolve(&mut self, addr: &CellAddress) -> Result<usize> {
        let workbook = self.workbook.as_ref().context("No workbook open")?;
        let cached = self
            .cursor
            .sheet
            .filter(|&idx| workbook.sheets[idx].name == addr.sheet);
        let sheet_idx = match cached {
            Some(idx) => idx,
            None => {
                let idx = workbook.sheet_index(&addr.sheet).with_context(|| {
                    format!(
                        "Sheet '{}' not found in {}",
                        addr.sheet,
                        workbook.path.display()
                    )
                })?;
                self.cursor.sheet = Some(idx);
                self.cursor.row = None;
                idx
            }
        };
        if self.cursor.row != Some(addr.row) {
            self.cursor.row = Some(addr.row);
        }
        Ok(sheet_idx)
    }
}

impl WorkbookAccessor for XlsxAccessor {
    fn open(&mut self, path: &Path) -> Result<()> {
        if self.workbook.is_some() {
            self.release();
        }
        self.workbook = Some(reader::read_workbook(path)?);
        Ok(())
    }

    fn read_numeric(&mut self, address: &str) -> Result<f64> {
        let addr = match CellAddress::parse(address) {
            Ok(addr) => addr,
            Err(err) => {
                self.malformed += 1;
                log::warn!("reading 0 for unparseable address: {err}");
                return Ok(0.0);
            }
        };
        let sheet_idx = self.resolve(&addr)?;
        let workbook = self.workbook()?;
        let value = workbook.sheets[sheet_idx]
            .cell(addr.row, addr.col)
            .map(|c| c.value.numeric_or_zero())
            .unwrap_or(0.0);
        Ok(value)
    }

    fn write_numeric(&mut self, address: &str, value: f64) -> Result<()> {
        let addr = match CellAddress::parse(address) {
            Ok(addr) => addr,
            Err(err) => {
                self.malformed += 1;
                log::warn!("skipping write for unparseable address: {err}");
                return Ok(());
            }
        };
        let sheet_idx = self.resolve(&addr)?;
        let workbook = self.workbook.as_mut().context("No workbook open")?;
        let sheet = &mut workbook.sheets[sheet_idx];
        let cell = sheet
            .rows
            .entry(addr.row)
            .or_default()
            .entry(addr.col)
            .or_default();
        cell.value = CellValue::Number(value);
        cell.formula = None;
        let sheet_name = sheet.name.clone();
        self.updates.set(
            &sheet_name,
            addr.row,
            addr.col,
            CellUpdate {
                value,
                keep_formula: false,
            },
        );
        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        let source = self.workbook()?.path.clone();
        writer::save_workbook(&source, path, &self.updates)?;
        self.release();
        Ok(())
    }

    fn evaluate_formulas(&mut self) -> Result<()> {
        let workbook = self.workbook()?;

        let mut results: Vec<(String, usize, u32, u32, f64)> = Vec::new();
        for (sheet_idx, sheet) in workbook.sheets.iter().enumerate() {
            for (&row, cells) in &sheet.rows {
                for (&col, cell) in cells {
                    let Some(formula_text) = &cell.formula else {
                        continue;
                    };
                    match formula::evaluate(sheet, formula_text) {
                        Ok(value) => {
                            results.push((sheet.name.clone(), sheet_idx, row, col, value));
                        }
                        Err(err) => log::warn!(
                            "error evaluating cell {}{} in sheet {}: {}",
                            column_index_to_letters(col),
                            row + 1,
                            sheet.name,
                            err
                        ),
                    }
                }
            }
        }

        let workbook = self.workbook.as_mut().context("No workbook open")?;
        for &(_, sheet_idx, row, col, value) in &results {
            if let Some(cell) = workbook.sheets[sheet_idx]
                .rows
                .get_mut(&row)
                .and_then(|r| r.get_mut(&col))
            {
                cell.value = CellValue::Number(value);
            }
        }
        for (sheet_name, _, row, col, value) in results {
            self.updates.set(
                &sheet_name,
                row,
                col,
                CellUpdate {
                    value,
                    keep_formula: true,
                },
            );
        }
        Ok(())
    }

    fn malformed_addresses(&self) -> u32 {
        self.malformed
    }
}
