//! Arithmetic formula evaluation
//!
//! Covers the subset needed to refresh simple aggregation workbooks:
//! numeric literals, `+ - * /`, parentheses, same-sheet cell references and
//! `SUM` over ranges and scalar arguments. Anything beyond that is an
//! error, reported per cell by the caller and never fatal to a pass.

use crate::reader::Sheet;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

static CELL_REF: OnceLock<Regex> = OnceLock::new();
static RANGE_REF: OnceLock<Regex> = OnceLock::new();

fn cell_regex() -> &'static Regex {
    CELL_REF.get_or_init(|| Regex::new(r"^\$?([A-Za-z]+)\$?([0-9]+)").unwrap())
}

fn range_regex() -> &'static Regex {
    RANGE_REF
        .get_or_init(|| Regex::new(r"^\$?([A-Za-z]+)\$?([0-9]+):\$?([A-Za-z]+)\$?([0-9]+)").unwrap())
}

#[derive(Debug, Error)]
pub enum FormulaError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("unexpected token at '{0}'")]
    UnexpectedToken(String),
    #[error("unsupported function '{0}'")]
    UnsupportedFunction(String),
    #[error("unsupported reference '{0}'")]
    UnsupportedReference(String),
    #[error("division by zero")]
    DivisionByZero,
}

/// Evaluate a formula (with or without the leading `=`) against one sheet
pub fn evaluate(sheet: &Sheet, formula: &str) -> Result<f64, FormulaError> {
    let input = formula.trim().trim_start_matches('=');
    let mut parser = Parser {
        input,
        pos: 0,
        sheet,
    };
    let value = parser.expr()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(FormulaError::UnexpectedToken(parser.snippet()));
    }
    Ok(value)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    sheet: &'a Sheet,
}

impl Parser<'_> {
    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn snippet(&self) -> String {
        self.rest().chars().take(16).collect()
    }

    fn expr(&mut self) -> Result<f64, FormulaError> {
        let mut value = self.term()?;
        loop {
            self.skip_ws();
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, FormulaError> {
        let mut value = self.factor()?;
        loop {
            self.skip_ws();
            if self.eat('*') {
                value *= self.factor()?;
            } else if self.eat('/') {
                let divisor = self.factor()?;
                if divisor == 0.0 {
                    return Err(FormulaError::DivisionByZero);
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn factor(&mut self) -> Result<f64, FormulaError> {
        self.skip_ws();
        if self.eat('-') {
            return Ok(-self.factor()?);
        }
        if self.eat('(') {
            let value = self.expr()?;
            self.skip_ws();
            if !self.eat(')') {
                return Err(FormulaError::UnexpectedEnd);
            }
            return Ok(value);
        }

        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some('\'') => Err(FormulaError::UnsupportedReference(self.snippet())),
            Some(c) if c.is_ascii_alphabetic() || c == '$' => self.reference_or_function(),
            Some(c) => Err(FormulaError::UnexpectedChar(c)),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<f64, FormulaError> {
        let digits: String = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        self.pos += digits.len();
        digits
            .parse()
            .map_err(|_| FormulaError::UnexpectedToken(digits))
    }

    fn reference_or_function(&mut self) -> Result<f64, FormulaError> {
        // ranges are only meaningful inside SUM
        if let Some(m) = range_regex().find(self.rest()) {
            return Err(FormulaError::UnsupportedReference(m.as_str().to_string()));
        }

        if let Some(caps) = cell_regex().captures(self.rest()) {
            let matched = caps.get(0).map_or("", |m| m.as_str()).to_string();
            let after = &self.rest()[matched.len()..];
            match after.chars().next() {
                // something like LOG10(...) lexes as a cell ref plus '('
                Some('(') => return Err(FormulaError::UnsupportedFunction(matched)),
                Some('!') => return Err(FormulaError::UnsupportedReference(matched)),
                _ => {}
            }
            let (row, col) = cell_from_captures(&caps)?;
            self.pos += matched.len();
            return Ok(self.cell_value(row, col));
        }

        let ident: String = self
            .rest()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic() || c.is_ascii_digit() || *c == '.')
            .collect();
        if ident.is_empty() {
            return Err(FormulaError::UnexpectedToken(self.snippet()));
        }
        self.pos += ident.len();
        self.skip_ws();
        if !self.eat('(') {
            return Err(FormulaError::UnsupportedReference(ident));
        }
        if ident.eq_ignore_ascii_case("SUM") {
            self.sum_args()
        } else {
            Err(FormulaError::UnsupportedFunction(ident))
        }
    }

    fn sum_args(&mut self) -> Result<f64, FormulaError> {
        let mut total = 0.0;
        self.skip_ws();
        if self.eat(')') {
            return Ok(total);
        }
        loop {
            self.skip_ws();
            let range = match range_regex().captures(self.rest()) {
                Some(caps) => Some((
                    caps.get(0).map_or(0, |m| m.len()),
                    corner_from_captures(&caps, 1, 2)?,
                    corner_from_captures(&caps, 3, 4)?,
                )),
                None => None,
            };
            if let Some((len, start, end)) = range {
                self.pos += len;
                total += self.range_sum(start, end);
            } else {
                total += self.expr()?;
            }
            self.skip_ws();
            if self.eat(',') || self.eat(';') {
                continue;
            }
            if self.eat(')') {
                return Ok(total);
            }
            return Err(FormulaError::UnexpectedToken(self.snippet()));
        }
    }

    fn range_sum(&self, start: (u32, u32), end: (u32, u32)) -> f64 {
        let (row_lo, row_hi) = min_max(start.0, end.0);
        let (col_lo, col_hi) = min_max(start.1, end.1);

        let mut total = 0.0;
        for (_, cells) in self.sheet.rows.range(row_lo..=row_hi) {
            for (_, cell) in cells.range(col_lo..=col_hi) {
                total += cell.value.numeric_or_zero();
            }
        }
        total
    }

    fn cell_value(&self, row: u32, col: u32) -> f64 {
        self.sheet
            .cell(row, col)
            .map(|c| c.value.numeric_or_zero())
            .unwrap_or(0.0)
    }
}

fn cell_from_captures(caps: &regex::Captures<'_>) -> Result<(u32, u32), FormulaError> {
    corner_from_captures(caps, 1, 2)
}

fn corner_from_captures(
    caps: &regex::Captures<'_>,
    letters_group: usize,
    digits_group: usize,
) -> Result<(u32, u32), FormulaError> {
    let letters = caps.get(letters_group).map_or("", |m| m.as_str());
    let digits = caps.get(digits_group).map_or("", |m| m.as_str());
    let row: u32 = digits
        .parse()
        .map_err(|_| FormulaError::UnsupportedReference(format!("{letters}{digits}")))?;
    if row == 0 {
        return Err(FormulaError::UnsupportedReference(format!(
            "{letters}{digits}"
        )));
    }
    Ok((row - 1, crate::address::column_letters_to_index(letters)))
}

fn min_max(a: u32, b: u32) -> (u32, u32) {
    if a <= b { (a, b) } else { (b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{Cell, CellValue};
    use std::collections::BTreeMap;

    fn sheet_with(cells: &[(u32, u32, f64)]) -> Sheet {
        let mut rows: BTreeMap<u32, BTreeMap<u32, Cell>> = BTreeMap::new();
        for &(row, col, value) in cells {
            rows.entry(row).or_default().insert(
                col,
                Cell {
                    value: CellValue::Number(value),
                    formula: None,
                },
            );
        }
        Sheet {
            name: "Sheet1".to_string(),
            rows,
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let sheet = sheet_with(&[]);
        assert_eq!(evaluate(&sheet, "1+2*3").unwrap(), 7.0);
        assert_eq!(evaluate(&sheet, "(1+2)*3").unwrap(), 9.0);
        assert_eq!(evaluate(&sheet, "-4+10").unwrap(), 6.0);
        assert_eq!(evaluate(&sheet, "10/4").unwrap(), 2.5);
        assert_eq!(evaluate(&sheet, "= 1 + 2").unwrap(), 3.0);
    }

    #[test]
    fn cell_references_resolve() {
        let sheet = sheet_with(&[(0, 0, 2.0), (1, 1, 5.0)]);
        assert_eq!(evaluate(&sheet, "A1+B2").unwrap(), 7.0);
        assert_eq!(evaluate(&sheet, "$A$1*2").unwrap(), 4.0);
        // absent cells read as zero
        assert_eq!(evaluate(&sheet, "Z99").unwrap(), 0.0);
    }

    #[test]
    fn sum_over_ranges_and_scalars() {
        let sheet = sheet_with(&[(0, 0, 1.0), (1, 0, 2.0), (2, 0, 3.0), (0, 1, 10.0)]);
        assert_eq!(evaluate(&sheet, "SUM(A1:A3)").unwrap(), 6.0);
        assert_eq!(evaluate(&sheet, "SUM(A1:A3,B1,5)").unwrap(), 21.0);
        assert_eq!(evaluate(&sheet, "sum(A3:A1)").unwrap(), 6.0);
        assert_eq!(evaluate(&sheet, "SUM()").unwrap(), 0.0);
    }

    #[test]
    fn unsupported_constructs_are_errors() {
        let sheet = sheet_with(&[]);
        assert!(matches!(
            evaluate(&sheet, "VLOOKUP(A1,B1:C9,2)"),
            Err(FormulaError::UnsupportedFunction(_))
        ));
        assert!(matches!(
            evaluate(&sheet, "Other!A1"),
            Err(FormulaError::UnsupportedReference(_))
        ));
        assert!(matches!(
            evaluate(&sheet, "A1:B2"),
            Err(FormulaError::UnsupportedReference(_))
        ));
        assert!(matches!(
            evaluate(&sheet, "1/0"),
            Err(FormulaError::DivisionByZero)
        ));
        assert!(matches!(
            evaluate(&sheet, "1+"),
            Err(FormulaError::UnexpectedEnd)
        ));
        assert!(matches!(
            evaluate(&sheet, "1 2"),
            Err(FormulaError::UnexpectedToken(_))
        ));
    }
}
