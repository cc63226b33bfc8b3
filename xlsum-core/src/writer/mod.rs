//! Writer module for persisting cell updates into workbook files

mod xlsx_writer;

pub use xlsx_writer::{CellUpdate, SheetUpdates, WorkbookUpdates, apply_updates_xlsx};

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Persist `updates` from the workbook at `source` into `dest`.
///
/// The rewritten archive goes to a `_tmp` sibling first, then the original
/// is deleted and the temp file renamed over it, so an interrupted save
/// never leaves `dest` half-written.
pub fn save_workbook(source: &Path, dest: &Path, updates: &WorkbookUpdates) -> Result<()> {
    match source.extension().and_then(|s| s.to_str()) {
        Some("xlsx") => {}
        Some("ods") => anyhow::bail!("ODS format not yet supported for writing"),
        _ => anyhow::bail!("Unsupported file format: {}", source.display()),
    }

    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid destination path {}", dest.display()))?;
    let tmp = dest.with_file_name(format!("{file_name}_tmp"));

    apply_updates_xlsx(source, &tmp, updates)?;

    if dest.exists() {
        fs::remove_file(dest)
            .with_context(|| format!("Failed to remove {}", dest.display()))?;
    }
    fs::rename(&tmp, dest)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}
