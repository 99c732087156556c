//! Cell reference parsing and formatting.
//!
//! Provides bidirectional conversion between spreadsheet-style cell references
//! (e.g., "A1", "B2", "AA100") and zero-indexed column/row coordinates, plus
//! [`Region`], the rectangle a template command governs.
//!
//! # Examples
//!
//! ```ignore
//! let cell = CellRef::from_str("B3").unwrap();
//! assert_eq!(cell.col, 1);  // 0-indexed
//! assert_eq!(cell.row, 2);
//! assert_eq!(cell.to_string(), "B3");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// A reference to a cell by column and row indices (0-indexed).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(col: usize, row: usize) -> CellRef {
        CellRef { row, col }
    }

    /// Parse a cell reference from spreadsheet notation (e.g., "A1", "B2", "AA10").
    /// Returns None if the input is invalid.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(name: &str) -> Option<CellRef> {
        Self::parse_a1(name)
    }

    fn parse_a1(name: &str) -> Option<CellRef> {
        let caps = a1_re().captures(name)?;
        let letters = &caps["letters"];
        let numbers = &caps["numbers"];

        let mut col_acc = 0usize;
        for c in letters.to_ascii_uppercase().bytes() {
            let digit = (c - b'A') as usize + 1;
            col_acc = col_acc.checked_mul(26)?.checked_add(digit)?;
        }
        let col = col_acc.checked_sub(1)?;

        let row = numbers.parse::<usize>().ok()?.checked_sub(1)?;

        Some(CellRef::new(col, row))
    }

    /// Convert column index to spreadsheet-style letters (0 -> A, 25 -> Z, 26 -> AA).
    pub fn col_to_letters(col: usize) -> String {
        let mut result = String::new();
        let mut n = col as u128 + 1;
        while n > 0 {
            n -= 1;
            result.insert(0, (b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        result
    }
}

fn a1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?<letters>[A-Za-z]+)(?<numbers>[0-9]+)$").expect("A1 regex must compile")
    })
}

impl std::str::FromStr for CellRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_a1(s).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row + 1)
    }
}

/// A rectangular block of cells, inclusive on both corners.
///
/// The start corner is the anchor cell of a command, the end corner is its
/// declared `lastCell`. A region whose end lies above or left of its start is
/// representable but not [`valid`](Region::is_valid).
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub start: CellRef,
    pub end: CellRef,
}

impl Region {
    pub fn new(start: CellRef, end: CellRef) -> Region {
        Region { start, end }
    }

    pub fn single(at: CellRef) -> Region {
        Region {
            start: at.clone(),
            end: at,
        }
    }

    /// Region of `rows` x `cols` cells anchored at `start`. None for an empty size.
    pub fn with_size(start: &CellRef, rows: usize, cols: usize) -> Option<Region> {
        if rows == 0 || cols == 0 {
            return None;
        }
        let end = CellRef::new(
            start.col.checked_add(cols - 1)?,
            start.row.checked_add(rows - 1)?,
        );
        Some(Region::new(start.clone(), end))
    }

    /// Parse "A1:B2". A lone "A1" parses as a single-cell region.
    pub fn parse(text: &str) -> Option<Region> {
        match text.split_once(':') {
            Some((start, end)) => Some(Region::new(
                CellRef::from_str(start.trim())?,
                CellRef::from_str(end.trim())?,
            )),
            None => CellRef::from_str(text.trim()).map(Region::single),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.end.row >= self.start.row && self.end.col >= self.start.col
    }

    pub fn rows(&self) -> usize {
        (self.end.row + 1).saturating_sub(self.start.row)
    }

    pub fn cols(&self) -> usize {
        (self.end.col + 1).saturating_sub(self.start.col)
    }

    pub fn cell_count(&self) -> usize {
        self.rows().saturating_mul(self.cols())
    }

    pub fn spans_row(&self, row: usize) -> bool {
        row >= self.start.row && row <= self.end.row
    }

    pub fn spans_col(&self, col: usize) -> bool {
        col >= self.start.col && col <= self.end.col
    }

    pub fn contains(&self, at: &CellRef) -> bool {
        self.spans_row(at.row) && self.spans_col(at.col)
    }

    pub fn contains_region(&self, other: &Region) -> bool {
        self.contains(&other.start) && self.contains(&other.end)
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// Iterate every coordinate row by row.
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        (self.start.row..=self.end.row)
            .flat_map(move |row| (self.start.col..=self.end.col).map(move |col| CellRef::new(col, row)))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::{CellRef, Region};

    #[test]
    fn test_parse_a1_overflow_returns_none() {
        let huge = format!("{}1", "Z".repeat(40));
        assert!(CellRef::from_str(&huge).is_none());
    }

    #[test]
    fn test_col_to_letters_handles_max_usize() {
        let letters = CellRef::col_to_letters(usize::MAX);
        assert!(!letters.is_empty());
        assert!(letters.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn test_from_str_multi_letter_columns() {
        assert_eq!(CellRef::from_str("AA1").unwrap().col, 26);
        assert_eq!(CellRef::from_str("BA1").unwrap().col, 52);
        assert_eq!(CellRef::from_str("a10").unwrap(), CellRef::new(0, 9));
        assert!(CellRef::from_str("A0").is_none());
    }

    #[test]
    fn test_region_geometry() {
        let region = Region::parse("B2:D5").unwrap();
        assert_eq!(region.rows(), 4);
        assert_eq!(region.cols(), 3);
        assert!(region.contains(&CellRef::new(1, 1)));
        assert!(!region.contains(&CellRef::new(0, 1)));
        assert!(region.contains_region(&Region::parse("C3:D4").unwrap()));
        assert!(region.intersects(&Region::parse("D5:E6").unwrap()));
        assert!(!region.intersects(&Region::parse("E1:E9").unwrap()));
        assert_eq!(region.to_string(), "B2:D5");
        assert_eq!(region.cells().count(), 12);
    }

    #[test]
    fn test_region_validity() {
        assert!(!Region::parse("C3:B3").unwrap().is_valid());
        assert!(Region::parse("C3").unwrap().is_valid());
        assert!(Region::with_size(&CellRef::new(0, 0), 0, 3).is_none());
        assert_eq!(
            Region::with_size(&CellRef::new(1, 1), 2, 3).unwrap().to_string(),
            "B2:D3"
        );
        assert!(Region::with_size(&CellRef::new(1, 1), usize::MAX, 1).is_none());
        assert!(Region::with_size(&CellRef::new(0, 0), usize::MAX, 1).is_some());
    }
}
