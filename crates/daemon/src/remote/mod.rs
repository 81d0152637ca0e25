// Remote worksheet access.
//
// The cache only depends on this contract: fetch every row of one worksheet,
// write one cell, write a batch of cells. Coordinates are 1-based. The
// Google Sheets implementation lives in `sheets`; `memory` backs tests and
// local dry runs.

pub mod memory;
pub mod sheets;

use std::future::Future;

use sheetbot_common::a1::CellRef;
use thiserror::Error;

/// One cell write in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub cell: CellRef,
    pub value: String,
}

impl CellWrite {
    pub fn new(row: usize, col: usize, value: impl Into<String>) -> Self {
        Self { cell: CellRef::new(row, col), value: value.into() }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("authorization failed: {0}")]
    Auth(#[from] crate::auth::AuthError),

    #[error("request to the spreadsheet service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("spreadsheet service returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("worksheet `{0}` was not found")]
    WorksheetNotFound(String),

    #[error("invalid spreadsheet link `{0}`")]
    InvalidLink(String),

    /// Raised by the in-memory remote when a fault is injected.
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Read/write access to a single worksheet.
///
/// All methods return `Send` futures so caches can be driven from spawned
/// tasks on a multi-threaded runtime.
pub trait RemoteTable: Send + Sync + 'static {
    /// Re-establish the session before a full fetch.
    fn reconnect(&self) -> impl Future<Output = Result<(), RemoteError>> + Send {
        async { Ok(()) }
    }

    /// Every row of the worksheet, header rows included, in sheet order.
    /// Trailing empty cells may be omitted.
    fn fetch_all_rows(&self) -> impl Future<Output = Result<Vec<Vec<String>>, RemoteError>> + Send;

    fn write_cell(
        &self,
        cell: CellRef,
        value: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    fn write_batch(
        &self,
        writes: &[CellWrite],
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

impl<R: RemoteTable> RemoteTable for std::sync::Arc<R> {
    fn reconnect(&self) -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).reconnect()
    }

    fn fetch_all_rows(&self) -> impl Future<Output = Result<Vec<Vec<String>>, RemoteError>> + Send {
        (**self).fetch_all_rows()
    }

    fn write_cell(
        &self,
        cell: CellRef,
        value: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).write_cell(cell, value)
    }

    fn write_batch(
        &self,
        writes: &[CellWrite],
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).write_batch(writes)
    }
}
