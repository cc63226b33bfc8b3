//! Cell address parsing and column letter conversion

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

static COORD_REF: OnceLock<Regex> = OnceLock::new();

fn coord_regex() -> &'static Regex {
    COORD_REF.get_or_init(|| Regex::new(r"(?i)([a-z]+)([0-9]+)").unwrap())
}

/// Failure to resolve a textual address to a (sheet, column, row) triple.
///
/// Both variants have the same observable outcome: no coordinate pair.
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("address '{0}' has no bracketed coordinate")]
    MissingBrackets(String),
    #[error("no column/row coordinate found in '{0}'")]
    NoCoordinate(String),
}

/// A resolved cell location: sheet name plus zero-based column and row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellAddress {
    pub sheet: String,
    pub col: u32,
    pub row: u32,
}

impl CellAddress {
    /// Parse the `SheetName[B3]` textual form.
    ///
    /// The part before the first `[` is the sheet name (sheet names never
    /// contain brackets), the bracket interior holds the coordinate. Column
    /// letters are case-insensitive and the row number is 1-based in text.
    /// The coordinate is located by searching the interior, so decorated
    /// forms like `$B$3` still resolve to `B3`.
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let (sheet, rest) = text
            .split_once('[')
            .ok_or_else(|| AddressError::MissingBrackets(text.to_string()))?;
        let (interior, _) = rest
            .split_once(']')
            .ok_or_else(|| AddressError::MissingBrackets(text.to_string()))?;

        let caps = coord_regex()
            .captures(interior)
            .ok_or_else(|| AddressError::NoCoordinate(text.to_string()))?;

        let col = column_letters_to_index(&caps[1]);
        let row: u32 = caps[2]
            .parse()
            .map_err(|_| AddressError::NoCoordinate(text.to_string()))?;
        if row == 0 {
            return Err(AddressError::NoCoordinate(text.to_string()));
        }

        Ok(Self {
            sheet: sheet.to_string(),
            col,
            row: row - 1,
        })
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}{}]",
            self.sheet,
            column_index_to_letters(self.col),
            self.row + 1
        )
    }
}

/// Convert column letters to a zero-based index (A=0, Z=25, AA=26, ...)
pub fn column_letters_to_index(letters: &str) -> u32 {
    letters.chars().fold(0u32, |acc, c| {
        acc * 26 + u32::from(c.to_ascii_uppercase() as u8 - b'A') + 1
    }) - 1
}

/// Convert a zero-based column index to canonical uppercase letters
pub fn column_index_to_letters(mut col: u32) -> String {
    let mut result = String::new();
    loop {
        result.insert(0, (b'A' + (col % 26) as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    result
}
