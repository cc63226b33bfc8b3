//! Shared fixture helper: builds minimal valid XLSX files with cell data

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use xlsum_core::address::column_letters_to_index;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// One fixture cell, addressed by its A1-style reference
pub enum MockCell<'a> {
    Number(&'a str, f64),
    Text(&'a str, &'a str),
    /// Formula text plus its cached value
    Formula(&'a str, &'a str, f64),
}

impl MockCell<'_> {
    fn cell_ref(&self) -> &str {
        match self {
            MockCell::Number(r, _) | MockCell::Text(r, _) | MockCell::Formula(r, _, _) => r,
        }
    }

    fn to_xml(&self) -> String {
        match self {
            MockCell::Number(r, v) => format!(r#"<c r="{r}"><v>{v}</v></c>"#),
            MockCell::Text(r, t) => {
                format!(r#"<c r="{r}" t="inlineStr"><is><t>{t}</t></is></c>"#)
            }
            MockCell::Formula(r, f, v) => format!(r#"<c r="{r}"><f>{f}</f><v>{v}</v></c>"#),
        }
    }
}

fn ref_position(cell_ref: &str) -> (u32, u32) {
    let split = cell_ref
        .find(|c: char| c.is_ascii_digit())
        .expect("cell ref needs a row number");
    let (letters, digits) = cell_ref.split_at(split);
    (digits.parse().unwrap(), column_letters_to_index(letters))
}

/// Create a minimal valid XLSX file with the given sheets and cells
pub fn create_mock_xlsx(path: &Path, sheets: &[(&str, Vec<MockCell<'_>>)]) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

    // 1. [Content_Types].xml
    zip.start_file("[Content_Types].xml", options)?;
    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
"#,
    );
    for (i, _) in sheets.iter().enumerate() {
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            i + 1
        ));
    }
    content_types.push_str("</Types>");
    zip.write_all(content_types.as_bytes())?;

    // 2. _rels/.rels
    zip.start_file("_rels/.rels", options)?;
    zip.write_all(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#.as_bytes())?;

    // 3. xl/workbook.xml
    zip.start_file("xl/workbook.xml", options)?;
    let mut workbook_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets>
"#,
    );
    for (i, (name, _)) in sheets.iter().enumerate() {
        workbook_xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            name,
            i + 1,
            i + 1
        ));
    }
    workbook_xml.push_str("</sheets></workbook>");
    zip.write_all(workbook_xml.as_bytes())?;

    // 4. xl/_rels/workbook.xml.rels
    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    let mut rels_xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
"#,
    );
    for (i, _) in sheets.iter().enumerate() {
        rels_xml.push_str(&format!(
            r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
            i + 1,
            i + 1
        ));
    }
    rels_xml.push_str("</Relationships>");
    zip.write_all(rels_xml.as_bytes())?;

    // 5. worksheets
    for (i, (_, cells)) in sheets.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;

        let mut rows: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();
        for cell in cells {
            let (row, col) = ref_position(cell.cell_ref());
            rows.entry(row).or_default().insert(col, cell.to_xml());
        }

        let mut sheet_xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        );
        if rows.is_empty() {
            sheet_xml.push_str("<sheetData/>");
        } else {
            sheet_xml.push_str("<sheetData>");
            for (row, cells) in &rows {
                sheet_xml.push_str(&format!(r#"<row r="{row}">"#));
                for cell_xml in cells.values() {
                    sheet_xml.push_str(cell_xml);
                }
                sheet_xml.push_str("</row>");
            }
            sheet_xml.push_str("</sheetData>");
        }
        sheet_xml.push_str("</worksheet>");
        zip.write_all(sheet_xml.as_bytes())?;
    }

    zip.finish()?;
    Ok(())
}
