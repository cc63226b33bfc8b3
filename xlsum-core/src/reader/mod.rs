//! Workbook reader built on calamine

use anyhow::{Context, Result};
use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use std::collections::BTreeMap;
use std::path::Path;

pub mod workbook;

pub use workbook::{Cell, CellValue, Sheet, SheetRow, Workbook};

/// Read a workbook from a file path
pub fn read_workbook<P: AsRef<Path>>(path: P) -> Result<Workbook> {
    let path = path.as_ref();
    let mut excel: Sheets<_> = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook: {}", path.display()))?;

    let sheet_names = excel.sheet_names();
    let mut sheets = Vec::new();

    for sheet_name in &sheet_names {
        // Get both values and formulas; either range may be missing
        let range = excel.worksheet_range(sheet_name).ok();
        let formula_range = excel.worksheet_formula(sheet_name).ok();

        sheets.push(parse_sheet(
            sheet_name,
            range.as_ref(),
            formula_range.as_ref(),
        ));
    }

    Ok(Workbook {
        path: path.to_path_buf(),
        sheets,
    })
}

fn parse_sheet(
    name: &str,
    range: Option<&Range<Data>>,
    formula_range: Option<&Range<String>>,
) -> Sheet {
    let mut rows: BTreeMap<u32, SheetRow> = BTreeMap::new();

    if let Some(r) = range {
        let (start_row, start_col) = r.start().unwrap_or((0, 0));
        for (rel_row, row_cells) in r.rows().enumerate() {
            for (rel_col, data) in row_cells.iter().enumerate() {
                if matches!(data, Data::Empty) {
                    continue;
                }
                let row = start_row + rel_row as u32;
                let col = start_col + rel_col as u32;
                rows.entry(row).or_default().insert(
                    col,
                    Cell {
                        value: parse_cell_value(data),
                        formula: None,
                    },
                );
            }
        }
    }

    // Formulas attach beside the cached values rather than replacing them
    if let Some(f) = formula_range {
        let (start_row, start_col) = f.start().unwrap_or((0, 0));
        for (rel_row, row_cells) in f.rows().enumerate() {
            for (rel_col, formula) in row_cells.iter().enumerate() {
                if formula.is_empty() {
                    continue;
                }
                let row = start_row + rel_row as u32;
                let col = start_col + rel_col as u32;
                rows.entry(row).or_default().entry(col).or_default().formula =
                    Some(formula.clone());
            }
        }
    }

    Sheet {
        name: name.to_string(),
        rows,
    }
}

fn parse_cell_value(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Boolean(*b),
        Data::Error(e) => CellValue::Error(format!("{:?}", e)),
        Data::Empty => CellValue::Empty,
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) => CellValue::Text(s.clone()),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}
