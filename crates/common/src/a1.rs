// Spreadsheet cell addressing: 1-based (row, col) pairs and A1 notation.

use std::fmt;

/// A 1-based cell coordinate on a worksheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// A1 notation, e.g. `(3, 28)` → `AB3`.
    pub fn to_a1(self) -> String {
        format!("{}{}", column_letters(self.col), self.row)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// Bijective base-26 column label for a 1-based column index.
///
/// Column 0 has no label and maps to an empty string.
pub fn column_letters(col: usize) -> String {
    let mut n = col;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Range covering a single cell on a named worksheet: `'Sheet name'!B7`.
pub fn sheet_range(worksheet: &str, cell: CellRef) -> String {
    format!("'{}'!{}", worksheet.replace('\'', "''"), cell.to_a1())
}
