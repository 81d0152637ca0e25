// In-memory mirror of one worksheet.
//
// `TableCache` owns the current snapshot of a table, refreshes it wholesale
// from the remote, and patches it record by record on writes. Every write
// goes through the table's `WriteGuard`, so a refresh never overlaps a
// remote write and two writes to one uid never overlap each other.
//
// What a table looks like (its record type, columns, validation rules and
// derived views) is described by an implementation of `Table`.

pub mod guard;
pub mod refresh;
pub mod snapshot;

use std::sync::Arc;
use std::time::Duration;

use sheetbot_common::row::{RowError, SheetRow};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::attachment::{Attachment, PendingAttachment};
use crate::remote::{RemoteError, RemoteTable};
use guard::WriteGuard;
pub use snapshot::{DroppedRow, Entry, Snapshot, UpsertKind};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Row(#[from] RowError),

    #[error("worksheet for `{table}` has no header row")]
    MissingHeader { table: String },

    #[error("safety-critical table `{table}` is unusable: {reason}")]
    Critical { table: String, reason: String },

    #[error("records cannot be created in `{table}`")]
    CreateUnsupported { table: String },

    #[error("failed to encode attachment descriptor: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CacheError {
    /// Errors that must stop the process rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Critical { .. })
    }
}

/// Shape and rules of one worksheet.
pub trait Table: Send + Sync + 'static {
    type Record: Clone + Send + Sync + 'static;
    type Views: Clone + Send + Sync + 'static;

    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Column holding the unique identifier. `None` when the remote row
    /// number itself identifies a record.
    fn uid_column(&self) -> Option<&str>;

    /// Header plus operator note rows above the data.
    fn header_rows(&self) -> usize {
        1
    }

    /// A critical table that ends up empty or malformed stops the bot.
    fn is_critical(&self) -> bool {
        false
    }

    fn parse_row(&self, row: &SheetRow<'_>) -> Result<Self::Record, RowError>;

    fn uid(&self, record: &Self::Record) -> String;

    /// Current cell text for `column`, `None` for columns the record
    /// does not carry.
    fn cell(&self, record: &Self::Record, column: &str) -> Option<String>;

    fn set_cell(&self, record: &mut Self::Record, column: &str, value: &str) -> Result<(), RowError>;

    /// Empty record for a newly created uid. `None` for tables that are
    /// never appended to by the bot.
    fn blank(&self, _uid: &str) -> Option<Self::Record> {
        None
    }

    /// Derived views, recomputed after every refresh and every mutation.
    fn views(&self, entries: &[Entry<Self::Record>]) -> Self::Views;
}

/// Result of `update_field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUpdate {
    Written,
    NotFound,
}

/// Result of `batch_upsert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub kind: UpsertKind,
    /// Upload the caller still has to run for an attached file.
    pub attachment: Option<PendingAttachment>,
}

pub struct TableCache<T: Table, R> {
    table: T,
    remote: R,
    state: watch::Sender<Arc<Snapshot<T>>>,
    guard: WriteGuard,
}

impl<T: Table, R: RemoteTable> TableCache<T, R> {
    /// Connect, fetch the worksheet once and publish the first snapshot.
    pub async fn initialize(table: T, remote: R, retry_interval: Duration) -> Result<Self, CacheError> {
        remote.reconnect().await?;
        let rows = remote.fetch_all_rows().await?;
        let (snapshot, dropped) = Snapshot::build(&table, rows)?;
        check_critical(&table, &snapshot, &dropped)?;

        info!(table = %table.name(), records = snapshot.len(), dropped = dropped.len(), "initialized table");
        let guard = WriteGuard::new(table.name(), retry_interval);
        let (state, _) = watch::channel(Arc::new(snapshot));
        Ok(Self { table, remote, state, guard })
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// The current snapshot. Stays valid and unchanged for as long as the
    /// caller holds it.
    pub fn snapshot(&self) -> Arc<Snapshot<T>> {
        self.state.borrow().clone()
    }

    /// Notified whenever a new snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot<T>>> {
        self.state.subscribe()
    }

    pub fn in_flight(&self) -> Vec<String> {
        self.guard.in_flight()
    }

    pub fn is_refreshing(&self) -> bool {
        self.guard.is_refreshing()
    }

    /// Replace the snapshot with a fresh fetch. Waits for outstanding writes
    /// and holds off new ones until the new snapshot is published. On error
    /// the previous snapshot stays in place.
    pub async fn refresh(&self) -> Result<usize, CacheError> {
        info!(table = %self.table.name(), "prepared to refresh whole table");
        let _permit = self.guard.refresh().await;

        self.remote.reconnect().await?;
        let rows = self.remote.fetch_all_rows().await?;
        let (snapshot, dropped) = Snapshot::build(&self.table, rows)?;
        check_critical(&self.table, &snapshot, &dropped)?;

        let records = snapshot.len();
        self.state.send_replace(Arc::new(snapshot));
        info!(table = %self.table.name(), records, dropped = dropped.len(), "refreshed whole table");
        Ok(records)
    }

    /// Set one field of an existing record, locally and then on the remote.
    pub async fn update_field(&self, uid: &str, column: &str, value: &str) -> Result<FieldUpdate, CacheError> {
        info!(table = %self.table.name(), uid, column, "prepared to update field");
        let _permit = self.guard.write(uid).await;

        let mut patched = Ok(None);
        self.state.send_if_modified(|current| {
            let mut next = Snapshot::clone(current);
            patched = next.set_field(&self.table, uid, column, value);
            let changed = matches!(patched, Ok(Some(_)));
            if changed {
                *current = Arc::new(next);
            }
            changed
        });
        let Some(cell) = patched? else {
            info!(table = %self.table.name(), uid, "no record to update");
            return Ok(FieldUpdate::NotFound);
        };

        self.remote.write_cell(cell, value).await?;
        info!(table = %self.table.name(), uid, column, cell = %cell, "updated field");
        Ok(FieldUpdate::Written)
    }

    /// Create the record `uid` or patch the listed fields of an existing one,
    /// then write every changed cell in a single batch.
    ///
    /// An attachment is stored as a JSON descriptor in its column; the
    /// returned outcome carries the upload for the caller to run.
    pub async fn batch_upsert<K, V>(
        &self,
        uid: &str,
        fields: impl IntoIterator<Item = (K, V)>,
        attachment: Option<Attachment>,
    ) -> Result<UpsertOutcome, CacheError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields: Vec<(String, String)> =
            fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let pending = match attachment {
            Some(attachment) => {
                fields.push((attachment.column.clone(), attachment.descriptor()?));
                Some(attachment.pending())
            }
            None => None,
        };
        let columns: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        info!(table = %self.table.name(), uid, ?columns, "prepared to upsert record");

        let _permit = self.guard.write(uid).await;

        let mut patched = Err(CacheError::CreateUnsupported { table: self.table.name().to_string() });
        self.state.send_if_modified(|current| {
            let mut next = Snapshot::clone(current);
            patched = next.upsert(&self.table, uid, &fields);
            let changed = matches!(&patched, Ok((_, writes)) if !writes.is_empty());
            if changed {
                *current = Arc::new(next);
            }
            changed
        });
        let (kind, writes) = patched?;

        if !writes.is_empty() {
            self.remote.write_batch(&writes).await?;
        }
        info!(table = %self.table.name(), uid, ?kind, cells = writes.len(), "upserted record");
        Ok(UpsertOutcome { kind, attachment: pending })
    }
}

fn check_critical<T: Table>(table: &T, snapshot: &Snapshot<T>, dropped: &[DroppedRow]) -> Result<(), CacheError> {
    if !table.is_critical() {
        return Ok(());
    }
    let reason = if let Some(bad) = dropped.first() {
        format!("row {}: {}", bad.row, bad.error)
    } else if snapshot.is_empty() {
        "no valid rows".to_string()
    } else {
        return Ok(());
    };
    error!(table = %table.name(), %reason, "safety-critical table failed validation");
    Err(CacheError::Critical { table: table.name().to_string(), reason })
}
