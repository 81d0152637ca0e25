// In-memory worksheet: a `RemoteTable` backed by a grid of strings.
//
// Records every call it receives and supports simple fault injection
// (slow fetches, slow or failing writes) so the cache's consistency
// protocol can be exercised without a network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use sheetbot_common::a1::CellRef;

use super::{CellWrite, RemoteError, RemoteTable};

/// A call observed by the in-memory worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Fetch,
    Cell { write: CellWrite, during_fetch: bool },
    Batch { writes: Vec<CellWrite>, during_fetch: bool },
}

impl RemoteCall {
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Fetch)
    }

    pub fn during_fetch(&self) -> bool {
        match self {
            Self::Fetch => false,
            Self::Cell { during_fetch, .. } | Self::Batch { during_fetch, .. } => *during_fetch,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemorySheet {
    rows: Mutex<Vec<Vec<String>>>,
    calls: Mutex<Vec<RemoteCall>>,
    fetch_delay: Mutex<Duration>,
    write_delay: Mutex<Duration>,
    fail_writes: AtomicBool,
    fail_fetches: AtomicBool,
    fetching: AtomicBool,
    fetch_count: AtomicUsize,
}

impl MemorySheet {
    pub fn new<S: AsRef<str>>(rows: &[Vec<S>]) -> Self {
        let sheet = Self::default();
        sheet.replace_rows(rows);
        sheet
    }

    /// Replace the whole grid, as an operator editing the sheet would.
    pub fn replace_rows<S: AsRef<str>>(&self, rows: &[Vec<S>]) {
        let grid = rows
            .iter()
            .map(|row| row.iter().map(|c| c.as_ref().to_string()).collect())
            .collect();
        *self.rows.lock().expect("memory sheet rows lock poisoned") = grid;
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().expect("memory sheet rows lock poisoned").clone()
    }

    /// Value at a 1-based coordinate; cells never written read as empty.
    pub fn cell(&self, row: usize, col: usize) -> String {
        let rows = self.rows.lock().expect("memory sheet rows lock poisoned");
        row.checked_sub(1)
            .and_then(|r| rows.get(r))
            .and_then(|cells| col.checked_sub(1).and_then(|c| cells.get(c)))
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().expect("memory sheet calls lock poisoned").clone()
    }

    pub fn write_calls(&self) -> Vec<RemoteCall> {
        self.calls().into_iter().filter(RemoteCall::is_write).collect()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching.load(Ordering::SeqCst)
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().expect("memory sheet delay lock poisoned") = delay;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().expect("memory sheet delay lock poisoned") = delay;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().expect("memory sheet calls lock poisoned").push(call);
    }

    fn apply(&self, write: &CellWrite) {
        let mut rows = self.rows.lock().expect("memory sheet rows lock poisoned");
        let (r, c) = (write.cell.row.saturating_sub(1), write.cell.col.saturating_sub(1));
        if rows.len() <= r {
            rows.resize_with(r + 1, Vec::new);
        }
        let cells = &mut rows[r];
        if cells.len() <= c {
            cells.resize(c + 1, String::new());
        }
        cells[c] = write.value.clone();
    }

    async fn before_write(&self) -> Result<bool, RemoteError> {
        let delay = *self.write_delay.lock().expect("memory sheet delay lock poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Injected("write rejected".into()));
        }
        Ok(self.is_fetching())
    }
}

impl RemoteTable for MemorySheet {
    async fn fetch_all_rows(&self) -> Result<Vec<Vec<String>>, RemoteError> {
        self.record(RemoteCall::Fetch);
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.fetching.store(true, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock().expect("memory sheet delay lock poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = if self.fail_fetches.load(Ordering::SeqCst) {
            Err(RemoteError::Injected("fetch rejected".into()))
        } else {
            Ok(self.rows())
        };
        self.fetching.store(false, Ordering::SeqCst);
        result
    }

    async fn write_cell(&self, cell: CellRef, value: &str) -> Result<(), RemoteError> {
        let write = CellWrite { cell, value: value.to_string() };
        let during_fetch = self.before_write().await?;
        self.apply(&write);
        self.record(RemoteCall::Cell { write, during_fetch });
        Ok(())
    }

    async fn write_batch(&self, writes: &[CellWrite]) -> Result<(), RemoteError> {
        let during_fetch = self.before_write().await?;
        for write in writes {
            self.apply(write);
        }
        self.record(RemoteCall::Batch { writes: writes.to_vec(), during_fetch });
        Ok(())
    }
}
