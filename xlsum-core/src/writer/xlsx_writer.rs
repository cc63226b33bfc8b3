//! XLSX writer: applies pending cell updates to worksheet parts
//!
//! The source archive is streamed entry-by-entry into the output archive;
//! only worksheet parts with pending updates are rewritten, everything else
//! (styles, shared strings, relationships) is copied through untouched.

use crate::address::column_index_to_letters;
use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Write};
use std::path::Path;
use zip::{ZipArchive, ZipWriter, write::FileOptions};

/// A single pending cell write
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellUpdate {
    pub value: f64,
    /// Refresh only the cached `<v>` of a formula cell, keeping its `<f>`
    pub keep_formula: bool,
}

/// Pending updates for one sheet: (row, col) → update, both zero-based
pub type SheetUpdates = BTreeMap<(u32, u32), CellUpdate>;

/// Pending updates for a whole workbook, keyed by sheet name
#[derive(Debug, Clone, Default)]
pub struct WorkbookUpdates {
    sheets: HashMap<String, SheetUpdates>,
}

impl WorkbookUpdates {
    pub fn set(&mut self, sheet: &str, row: u32, col: u32, update: CellUpdate) {
        self.sheets
            .entry(sheet.to_string())
            .or_default()
            .insert((row, col), update);
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    fn for_sheet(&self, name: &str) -> Option<&SheetUpdates> {
        self.sheets.get(name)
    }
}

/// Copy an XLSX file, rewriting the worksheet parts that have updates
pub fn apply_updates_xlsx(input: &Path, output: &Path, updates: &WorkbookUpdates) -> Result<()> {
    let file =
        File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let reader = BufReader::new(file);
    let mut archive = ZipArchive::new(reader)?;

    let output_file =
        File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let mut zip_writer = ZipWriter::new(output_file);

    // Resolve which worksheet part belongs to each updated sheet name
    let workbook_xml = read_file_from_zip(&mut archive, "xl/workbook.xml")?;
    let sheet_info = parse_sheet_info(&workbook_xml)?;
    let mut part_updates: HashMap<String, &SheetUpdates> = HashMap::new();
    for (name, id) in &sheet_info {
        if let Some(cells) = updates.for_sheet(name) {
            part_updates.insert(format!("xl/worksheets/sheet{}.xml", id), cells);
        }
    }

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();

        if let Some(cells) = part_updates.get(&name) {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            let rewritten = rewrite_sheet_xml(&content, cells)?;
            zip_writer.start_file(&name, FileOptions::<()>::default())?;
            zip_writer.write_all(rewritten.as_bytes())?;
        } else {
            // Copy file as is
            zip_writer.start_file(&name, FileOptions::<()>::default())?;
            let mut buffer = Vec::new();
            file.read_to_end(&mut buffer)?;
            zip_writer.write_all(&buffer)?;
        }
    }

    zip_writer.finish()?;
    Ok(())
}

fn read_file_from_zip(archive: &mut ZipArchive<BufReader<File>>, filename: &str) -> Result<String> {
    let mut file = archive
        .by_name(filename)
        .with_context(|| format!("Missing {} in workbook archive", filename))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

fn parse_sheet_info(workbook_xml: &str) -> Result<Vec<(String, usize)>> {
    let mut reader = Reader::from_str(workbook_xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"sheet" => {
                let mut name = String::new();
                let mut sheet_id = 0;

                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"name" => {
                            name = String::from_utf8(attr.value.to_vec())?;
                        }
                        b"sheetId" => {
                            sheet_id = String::from_utf8(attr.value.to_vec())?.parse()?;
                        }
                        _ => {}
                    }
                }

                sheets.push((name, sheet_id));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("Error parsing XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

/// Merge sorted pending cells into an existing `<sheetData>` tree
fn rewrite_sheet_xml(xml: &str, updates: &SheetUpdates) -> Result<String> {
    // re-key by 1-based row to match the r attribute of <row> elements
    let mut pending: BTreeMap<u32, BTreeMap<u32, CellUpdate>> = BTreeMap::new();
    for (&(row, col), &update) in updates {
        pending.entry(row + 1).or_default().insert(col, update);
    }

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    // row number plus its remaining updates, while inside an updated <row>
    let mut current_row: Option<(u32, BTreeMap<u32, CellUpdate>)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"row" => {
                let row_num = row_attr(&e)?;
                flush_rows_before(&mut writer, &mut pending, row_num)?;
                current_row = pending.remove(&row_num).map(|cells| (row_num, cells));
                writer.write_event(Event::Start(e))?;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"row" => {
                let row_num = row_attr(&e)?;
                flush_rows_before(&mut writer, &mut pending, row_num)?;
                if let Some(cells) = pending.remove(&row_num) {
                    writer.write_event(Event::Start(e))?;
                    write_cells(&mut writer, row_num, &cells)?;
                    writer.write_event(Event::End(BytesEnd::new("row")))?;
                } else {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"row" => {
                if let Some((row_num, cells)) = current_row.take() {
                    write_cells(&mut writer, row_num, &cells)?;
                }
                writer.write_event(Event::End(e))?;
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"c" && current_row.is_some() => {
                let (col, _) = cell_ref_attr(&e)?;
                let update = if let Some((row_num, cells)) = current_row.as_mut() {
                    let row_num = *row_num;
                    flush_cells_before(&mut writer, row_num, cells, col)?;
                    cells.remove(&col)
                } else {
                    None
                };
                if let Some(update) = update {
                    rewrite_existing_cell(&mut reader, &mut writer, &e, update)?;
                } else {
                    writer.write_event(Event::Start(e))?;
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"c" && current_row.is_some() => {
                let (col, _) = cell_ref_attr(&e)?;
                let update = if let Some((row_num, cells)) = current_row.as_mut() {
                    let row_num = *row_num;
                    flush_cells_before(&mut writer, row_num, cells, col)?;
                    cells.remove(&col)
                } else {
                    None
                };
                if let Some(update) = update {
                    writer.write_event(Event::Start(clean_cell_attrs(&e)?))?;
                    write_value(&mut writer, update.value)?;
                    writer.write_event(Event::End(BytesEnd::new("c")))?;
                } else {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"sheetData" => {
                flush_all_rows(&mut writer, &mut pending)?;
                writer.write_event(Event::End(e))?;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"sheetData" && !pending.is_empty() => {
                writer.write_event(Event::Start(e))?;
                flush_all_rows(&mut writer, &mut pending)?;
                writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
            }
            Ok(Event::Eof) => break,
            Ok(e) => writer.write_event(e)?,
            Err(e) => return Err(anyhow::anyhow!("Error parsing sheet XML: {}", e)),
        }
        buf.clear();
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

/// Replace the content of an existing `<c>` element, preserving its `<f>`
/// when the update only refreshes a cached formula value
fn rewrite_existing_cell<R: std::io::BufRead>(
    reader: &mut Reader<R>,
    writer: &mut Writer<Cursor<Vec<u8>>>,
    start: &BytesStart<'_>,
    update: CellUpdate,
) -> Result<()> {
    writer.write_event(Event::Start(clean_cell_attrs(start)?))?;

    let mut buf = Vec::new();
    let mut in_formula = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"f" && update.keep_formula => {
                in_formula = true;
                writer.write_event(Event::Start(e))?;
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"f" && update.keep_formula => {
                in_formula = false;
                writer.write_event(Event::End(e))?;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"f" && update.keep_formula => {
                writer.write_event(Event::Empty(e))?;
            }
            Ok(Event::Text(t)) if in_formula => {
                writer.write_event(Event::Text(t))?;
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"c" => {
                write_value(writer, update.value)?;
                writer.write_event(Event::End(e))?;
                return Ok(());
            }
            Ok(Event::Eof) => anyhow::bail!("Unexpected end of sheet XML inside a cell"),
            Ok(_) => {} // old <v>/<is> content is dropped
            Err(e) => return Err(anyhow::anyhow!("Error parsing sheet XML: {}", e)),
        }
        buf.clear();
    }
}

/// Copy a cell's attributes, dropping the type so the new value is numeric
fn clean_cell_attrs(start: &BytesStart<'_>) -> Result<BytesStart<'static>> {
    let mut elem = BytesStart::new("c");
    for attr in start.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"t" {
            elem.push_attribute(attr);
        }
    }
    Ok(elem)
}

fn flush_rows_before(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    pending: &mut BTreeMap<u32, BTreeMap<u32, CellUpdate>>,
    before: u32,
) -> Result<()> {
    let rows: Vec<u32> = pending.range(..before).map(|(&r, _)| r).collect();
    for row_num in rows {
        if let Some(cells) = pending.remove(&row_num) {
            write_row(writer, row_num, &cells)?;
        }
    }
    Ok(())
}

fn flush_all_rows(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    pending: &mut BTreeMap<u32, BTreeMap<u32, CellUpdate>>,
) -> Result<()> {
    for (row_num, cells) in std::mem::take(pending) {
        write_row(writer, row_num, &cells)?;
    }
    Ok(())
}

fn flush_cells_before(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    row_num: u32,
    cells: &mut BTreeMap<u32, CellUpdate>,
    before: u32,
) -> Result<()> {
    let cols: Vec<u32> = cells.range(..before).map(|(&c, _)| c).collect();
    for col in cols {
        if let Some(update) = cells.remove(&col) {
            write_cell(writer, row_num, col, update)?;
        }
    }
    Ok(())
}

fn write_row(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    row_num: u32,
    cells: &BTreeMap<u32, CellUpdate>,
) -> Result<()> {
    let mut elem = BytesStart::new("row");
    elem.push_attribute(("r", row_num.to_string().as_str()));
    writer.write_event(Event::Start(elem))?;
    write_cells(writer, row_num, cells)?;
    writer.write_event(Event::End(BytesEnd::new("row")))?;
    Ok(())
}

fn write_cells(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    row_num: u32,
    cells: &BTreeMap<u32, CellUpdate>,
) -> Result<()> {
    for (&col, &update) in cells {
        write_cell(writer, row_num, col, update)?;
    }
    Ok(())
}

fn write_cell(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    row_num: u32,
    col: u32,
    update: CellUpdate,
) -> Result<()> {
    let cell_ref = format!("{}{}", column_index_to_letters(col), row_num);
    let mut elem = BytesStart::new("c");
    elem.push_attribute(("r", cell_ref.as_str()));
    writer.write_event(Event::Start(elem))?;
    write_value(writer, update.value)?;
    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

fn write_value(writer: &mut Writer<Cursor<Vec<u8>>>, value: f64) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("v")))?;
    writer.write_event(Event::Text(BytesText::new(&value.to_string())))?;
    writer.write_event(Event::End(BytesEnd::new("v")))?;
    Ok(())
}

/// Row number (1-based) from a `<row>` element
fn row_attr(e: &BytesStart<'_>) -> Result<u32> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"r" {
            return Ok(String::from_utf8(attr.value.to_vec())?.parse()?);
        }
    }
    anyhow::bail!("Row element without an r attribute")
}

/// (zero-based column, 1-based row) from a `<c>` element's r attribute
fn cell_ref_attr(e: &BytesStart<'_>) -> Result<(u32, u32)> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"r" {
            let text = String::from_utf8(attr.value.to_vec())?;
            return parse_cell_ref(&text)
                .with_context(|| format!("Invalid cell reference '{}'", text));
        }
    }
    anyhow::bail!("Cell element without an r attribute")
}

fn parse_cell_ref(text: &str) -> Option<(u32, u32)> {
    let split = text.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = text.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some((crate::address::column_letters_to_index(letters), row))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates_of(cells: &[(u32, u32, f64, bool)]) -> SheetUpdates {
        cells
            .iter()
            .map(|&(row, col, value, keep_formula)| {
                ((row, col), CellUpdate { value, keep_formula })
            })
            .collect()
    }

    #[test]
    fn overwrites_an_existing_cell() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c></row></sheetData></worksheet>"#;
        let out = rewrite_sheet_xml(xml, &updates_of(&[(0, 0, 42.0, false)])).unwrap();
        assert!(out.contains(r#"<c r="A1"><v>42</v></c>"#), "got: {out}");
        assert!(!out.contains(r#"t="s""#));
    }

    #[test]
    fn inserts_cells_into_an_existing_row() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="B1"><v>1</v></c></row></sheetData></worksheet>"#;
        let out =
            rewrite_sheet_xml(xml, &updates_of(&[(0, 0, 5.0, false), (0, 3, 7.0, false)])).unwrap();
        let a1 = out.find(r#"<c r="A1"><v>5</v></c>"#).unwrap();
        let b1 = out.find(r#"<c r="B1"><v>1</v></c>"#).unwrap();
        let d1 = out.find(r#"<c r="D1"><v>7</v></c>"#).unwrap();
        assert!(a1 < b1 && b1 < d1, "got: {out}");
    }

    #[test]
    fn inserts_missing_rows_in_order() {
        let xml = r#"<worksheet><sheetData><row r="2"><c r="A2"><v>1</v></c></row></sheetData></worksheet>"#;
        let out =
            rewrite_sheet_xml(xml, &updates_of(&[(0, 0, 1.5, false), (3, 1, 9.0, false)])).unwrap();
        let r1 = out.find(r#"<row r="1"><c r="A1"><v>1.5</v></c></row>"#).unwrap();
        let r2 = out.find(r#"<row r="2">"#).unwrap();
        let r4 = out.find(r#"<row r="4"><c r="B4"><v>9</v></c></row>"#).unwrap();
        assert!(r1 < r2 && r2 < r4, "got: {out}");
    }

    #[test]
    fn expands_an_empty_sheet_data() {
        let xml = r#"<worksheet><sheetData/></worksheet>"#;
        let out = rewrite_sheet_xml(xml, &updates_of(&[(1, 2, 3.0, false)])).unwrap();
        assert!(
            out.contains(r#"<sheetData><row r="2"><c r="C2"><v>3</v></c></row></sheetData>"#),
            "got: {out}"
        );
    }

    #[test]
    fn keeps_the_formula_when_refreshing_a_cached_value() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1"><f>B1+C1</f><v>0</v></c></row></sheetData></worksheet>"#;
        let out = rewrite_sheet_xml(xml, &updates_of(&[(0, 0, 12.0, true)])).unwrap();
        assert!(
            out.contains(r#"<c r="A1"><f>B1+C1</f><v>12</v></c>"#),
            "got: {out}"
        );
    }

    #[test]
    fn drops_the_formula_on_a_plain_overwrite() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1"><f>B1+C1</f><v>0</v></c></row></sheetData></worksheet>"#;
        let out = rewrite_sheet_xml(xml, &updates_of(&[(0, 0, 12.0, false)])).unwrap();
        assert!(out.contains(r#"<c r="A1"><v>12</v></c>"#), "got: {out}");
        assert!(!out.contains("<f>"));
    }

    #[test]
    fn untouched_rows_pass_through() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</v></c></row><row r="2"><c r="A2"><v>2</v></c></row></sheetData></worksheet>"#;
        let out = rewrite_sheet_xml(xml, &updates_of(&[(0, 0, 9.0, false)])).unwrap();
        assert!(out.contains(r#"<row r="2"><c r="A2"><v>2</v></c></row>"#), "got: {out}");
    }
}
