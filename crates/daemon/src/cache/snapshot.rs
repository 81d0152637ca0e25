// Immutable table snapshots.
//
// A snapshot is built from one full fetch and never mutated once published.
// Writes clone the current snapshot, patch the clone and publish it in one
// step; readers holding the previous `Arc` keep a complete, consistent view.

use std::collections::HashMap;

use sheetbot_common::a1::CellRef;
use sheetbot_common::row::{RowError, SheetRow};
use tracing::debug;

use super::{CacheError, Table};
use crate::remote::CellWrite;

/// A record plus the remote row it lives on.
#[derive(Debug, Clone)]
pub struct Entry<R> {
    pub row: usize,
    pub record: R,
}

/// A data row that failed validation during a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRow {
    pub row: usize,
    pub error: RowError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Created,
    Updated,
}

pub struct Snapshot<T: Table> {
    header: Vec<String>,
    entries: Vec<Entry<T::Record>>,
    index: HashMap<String, usize>,
    next_row: usize,
    views: T::Views,
}

impl<T: Table> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            header: self.header.clone(),
            entries: self.entries.clone(),
            index: self.index.clone(),
            next_row: self.next_row,
            views: self.views.clone(),
        }
    }
}

impl<T: Table> std::fmt::Debug for Snapshot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("header", &self.header)
            .field("records", &self.entries.len())
            .field("next_row", &self.next_row)
            .finish()
    }
}

impl<T: Table> Snapshot<T> {
    /// Build from every row of the worksheet, header rows included.
    ///
    /// The first row is the header; the remaining `header_rows - 1` rows are
    /// operator notes and skipped. Blank rows are skipped silently, invalid
    /// rows are reported in the returned list. Either way they keep their
    /// row numbers, so surviving records stay addressable.
    pub fn build(table: &T, rows: Vec<Vec<String>>) -> Result<(Self, Vec<DroppedRow>), CacheError> {
        let header_rows = table.header_rows().max(1);
        let mut rows = rows.into_iter();
        let header: Vec<String> = match rows.next() {
            Some(header) if header.iter().any(|c| !c.is_empty()) => {
                header.into_iter().map(|c| c.trim().to_string()).collect()
            }
            _ => return Err(CacheError::MissingHeader { table: table.name().to_string() }),
        };
        if let Some(uid_column) = table.uid_column() {
            if !header.iter().any(|c| c == uid_column) {
                return Err(CacheError::Row(RowError::MissingColumn(uid_column.to_string())));
            }
        }

        let mut entries = Vec::new();
        let mut index = HashMap::new();
        let mut dropped = Vec::new();
        let mut last_row = header_rows;

        for (offset, cells) in rows.enumerate().skip(header_rows - 1) {
            // offset 0 is the row right under the header
            let number = offset + 2;
            last_row = number;
            if cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            let row = SheetRow::new(number, &header, &cells);
            let record = match table.parse_row(&row) {
                Ok(record) => record,
                Err(error) => {
                    dropped.push(DroppedRow { row: number, error });
                    continue;
                }
            };
            let uid = table.uid(&record);
            if index.contains_key(&uid) {
                dropped.push(DroppedRow { row: number, error: RowError::DuplicateUid(uid) });
                continue;
            }
            index.insert(uid, entries.len());
            entries.push(Entry { row: number, record });
        }

        for row in &dropped {
            debug!(table = %table.name(), row = row.row, error = %row.error, "dropped row");
        }

        let views = table.views(&entries);
        let snapshot = Self { header, entries, index, next_row: last_row + 1, views };
        Ok((snapshot, dropped))
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry<T::Record>] {
        &self.entries
    }

    pub fn records(&self) -> impl Iterator<Item = &T::Record> {
        self.entries.iter().map(|e| &e.record)
    }

    pub fn get(&self, uid: &str) -> Option<&T::Record> {
        self.index.get(uid).map(|&idx| &self.entries[idx].record)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.index.contains_key(uid)
    }

    /// Remote row of the record with `uid`.
    pub fn row_of(&self, uid: &str) -> Option<usize> {
        self.index.get(uid).map(|&idx| self.entries[idx].row)
    }

    /// 1-based remote column of a header name.
    pub fn column_of(&self, column: &str) -> Option<usize> {
        self.header.iter().position(|name| name == column).map(|idx| idx + 1)
    }

    /// Row the next created record will be written to.
    pub fn next_row(&self) -> usize {
        self.next_row
    }

    pub fn views(&self) -> &T::Views {
        &self.views
    }

    /// Records at the given positions, as stored in a view.
    pub fn pick<'a>(&'a self, positions: &'a [usize]) -> impl Iterator<Item = &'a T::Record> + 'a {
        positions.iter().filter_map(|&idx| self.entries.get(idx).map(|e| &e.record))
    }

    fn require_column(&self, column: &str) -> Result<usize, CacheError> {
        self.column_of(column)
            .ok_or_else(|| CacheError::Row(RowError::MissingColumn(column.to_string())))
    }

    /// Patch one field of an existing record. `None` when the uid is absent.
    pub(crate) fn set_field(
        &mut self,
        table: &T,
        uid: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<CellRef>, CacheError> {
        let Some(&idx) = self.index.get(uid) else {
            return Ok(None);
        };
        if table.uid_column() == Some(column) {
            return Err(CacheError::Row(RowError::ReadOnlyColumn(column.to_string())));
        }
        let col = self.require_column(column)?;
        let entry = &mut self.entries[idx];
        table.set_cell(&mut entry.record, column, value)?;
        let cell = CellRef::new(entry.row, col);
        self.views = table.views(&self.entries);
        Ok(Some(cell))
    }

    /// Create or patch the record with `uid`. Returns the cells whose value
    /// actually changed; a created record also writes its uid.
    pub(crate) fn upsert(
        &mut self,
        table: &T,
        uid: &str,
        fields: &[(String, String)],
    ) -> Result<(UpsertKind, Vec<CellWrite>), CacheError> {
        let mut columns = Vec::with_capacity(fields.len());
        for (column, _) in fields {
            columns.push(self.require_column(column)?);
        }

        let Some(&idx) = self.index.get(uid) else {
            let unsupported = || CacheError::CreateUnsupported { table: table.name().to_string() };
            let uid_column = table.uid_column().ok_or_else(unsupported)?;
            let uid_col = self.require_column(uid_column)?;
            let record = table.blank(uid).ok_or_else(unsupported)?;
            let row = self.next_row;
            let mut entry = Entry { row, record };
            let mut writes = vec![CellWrite::new(row, uid_col, uid)];
            for ((column, value), col) in fields.iter().zip(&columns) {
                if column == uid_column {
                    continue;
                }
                table.set_cell(&mut entry.record, column, value)?;
                if !value.is_empty() {
                    writes.push(CellWrite::new(row, *col, value.clone()));
                }
            }
            self.index.insert(uid.to_string(), self.entries.len());
            self.entries.push(entry);
            self.next_row += 1;
            self.views = table.views(&self.entries);
            return Ok((UpsertKind::Created, writes));
        };

        let entry = &mut self.entries[idx];
        let mut writes = Vec::new();
        for ((column, value), col) in fields.iter().zip(&columns) {
            if table.cell(&entry.record, column).as_deref().unwrap_or("") == value {
                continue;
            }
            if table.uid_column() == Some(column.as_str()) {
                return Err(CacheError::Row(RowError::ReadOnlyColumn(column.clone())));
            }
            table.set_cell(&mut entry.record, column, value)?;
            writes.push(CellWrite::new(entry.row, *col, value.clone()));
        }
        if !writes.is_empty() {
            self.views = table.views(&self.entries);
        }
        Ok((UpsertKind::Updated, writes))
    }
}
