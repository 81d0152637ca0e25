// Raw worksheet rows and row-level validation errors.
//
// A fetched worksheet is a header row followed by data rows. `SheetRow`
// gives typed tables explicit key lookup against that header; anything a
// table cannot accept becomes a `RowError` and the row is dropped from the
// snapshot (never from the sheet itself).

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("column `{0}` is missing from the worksheet header")]
    MissingColumn(String),

    #[error("column `{0}` is not part of this table's schema")]
    UnknownColumn(String),

    #[error("required field `{0}` is empty")]
    EmptyField(String),

    #[error("column `{column}` has unexpected value `{value}`")]
    InvalidValue { column: String, value: String },

    #[error("`{value}` is not a schedule date (expected day.month.year hour:minute)")]
    InvalidDate { value: String },

    #[error("{labels} button labels do not match {answers} button answers")]
    ButtonMismatch { labels: usize, answers: usize },

    #[error("uid `{0}` already appears earlier in the worksheet")]
    DuplicateUid(String),

    #[error("column `{0}` cannot be written through this table")]
    ReadOnlyColumn(String),
}

/// One data row of a fetched worksheet, addressed by header name.
#[derive(Debug, Clone, Copy)]
pub struct SheetRow<'a> {
    number: usize,
    header: &'a [String],
    cells: &'a [String],
}

impl<'a> SheetRow<'a> {
    /// `number` is the 1-based remote row this data came from.
    pub fn new(number: usize, header: &'a [String], cells: &'a [String]) -> Self {
        Self { number, header, cells }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    /// Cell value under `column`. Trailing cells the remote omitted read as
    /// empty; a column absent from the header is an error.
    pub fn get(&self, column: &str) -> Result<&'a str, RowError> {
        let idx = self
            .header
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| RowError::MissingColumn(column.to_string()))?;
        Ok(self.cells.get(idx).map(|s| s.as_str()).unwrap_or(""))
    }

    /// Like `get`, but an empty cell is an error.
    pub fn require(&self, column: &str) -> Result<&'a str, RowError> {
        let value = self.get(column)?;
        if value.is_empty() {
            return Err(RowError::EmptyField(column.to_string()));
        }
        Ok(value)
    }

    /// All `(column, value)` pairs, header order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let cells = self.cells;
        self.header
            .iter()
            .enumerate()
            .map(move |(idx, name)| (name.as_str(), cells.get(idx).map(|s| s.as_str()).unwrap_or("")))
    }

    /// Fails when the header carries a column outside `known`.
    pub fn ensure_closed_schema(&self, known: &[&str]) -> Result<(), RowError> {
        match self.header.iter().find(|name| !name.is_empty() && !known.contains(&name.as_str())) {
            Some(unknown) => Err(RowError::UnknownColumn(unknown.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn get_reads_by_header_name() {
        let header = strings(&["key", "value"]);
        let cells = strings(&["greeting", "hello"]);
        let row = SheetRow::new(2, &header, &cells);
        assert_eq!(row.get("value"), Ok("hello"));
        assert_eq!(row.number(), 2);
    }

    #[test]
    fn short_rows_read_trailing_cells_as_empty() {
        let header = strings(&["key", "value"]);
        let cells = strings(&["greeting"]);
        let row = SheetRow::new(2, &header, &cells);
        assert_eq!(row.get("value"), Ok(""));
        assert_eq!(row.require("value"), Err(RowError::EmptyField("value".into())));
    }

    #[test]
    fn missing_column_is_an_error() {
        let header = strings(&["key"]);
        let cells = strings(&["greeting"]);
        let row = SheetRow::new(2, &header, &cells);
        assert_eq!(row.get("value"), Err(RowError::MissingColumn("value".into())));
    }

    #[test]
    fn closed_schema_rejects_unknown_header_columns() {
        let header = strings(&["key", "value", "comment"]);
        let cells = strings(&["a", "b", "c"]);
        let row = SheetRow::new(2, &header, &cells);
        assert_eq!(
            row.ensure_closed_schema(&["key", "value"]),
            Err(RowError::UnknownColumn("comment".into()))
        );
        assert!(row.ensure_closed_schema(&["key", "value", "comment"]).is_ok());
    }

    #[test]
    fn closed_schema_ignores_blank_header_cells() {
        let header = strings(&["key", "", "value"]);
        let cells = strings(&["a", "", "b"]);
        let row = SheetRow::new(2, &header, &cells);
        assert!(row.ensure_closed_schema(&["key", "value"]).is_ok());
    }

    #[test]
    fn iter_pairs_header_with_cells() {
        let header = strings(&["a", "b", "c"]);
        let cells = strings(&["1", "2"]);
        let row = SheetRow::new(5, &header, &cells);
        let pairs: Vec<_> = row.iter().collect();
        assert_eq!(pairs, vec![("a", "1"), ("b", "2"), ("c", "")]);
    }
}
