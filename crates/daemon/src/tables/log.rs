// Append-only activity log worksheet.
//
// Not cached: each entry locates the first free row from the first column
// and writes timestamp, chat id and message there in one batch. Appends are
// serialized so two entries never claim the same row.

use chrono::Local;
use sheetbot_common::row::RowError;
use tokio::sync::Mutex;
use tracing::info;

use crate::cache::CacheError;
use crate::remote::{CellWrite, RemoteTable};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogColumns {
    timestamp: usize,
    chat_id: usize,
    message: usize,
}

#[derive(Debug)]
pub struct LogSheet<R> {
    remote: R,
    columns: LogColumns,
    append: Mutex<()>,
}

impl<R: RemoteTable> LogSheet<R> {
    /// Locate the `timestamp`, `chat_id` and `message` columns in the header.
    pub async fn initialize(remote: R) -> Result<Self, CacheError> {
        remote.reconnect().await?;
        let rows = remote.fetch_all_rows().await?;
        let header = rows.first().map(Vec::as_slice).unwrap_or_default();
        let find = |name: &str| {
            header
                .iter()
                .position(|c| c.trim() == name)
                .map(|idx| idx + 1)
                .ok_or_else(|| CacheError::Row(RowError::MissingColumn(name.to_string())))
        };
        let columns = LogColumns {
            timestamp: find("timestamp")?,
            chat_id: find("chat_id")?,
            message: find("message")?,
        };
        info!(table = "logs", "initialized log sheet");
        Ok(Self { remote, columns, append: Mutex::new(()) })
    }

    pub async fn write(&self, chat_id: &str, message: &str) -> Result<(), CacheError> {
        let _append = self.append.lock().await;
        let rows = self.remote.fetch_all_rows().await?;
        let used = rows
            .iter()
            .filter(|row| row.first().is_some_and(|c| !c.is_empty()))
            .count();
        let row = used + 1;
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.remote
            .write_batch(&[
                CellWrite::new(row, self.columns.timestamp, timestamp),
                CellWrite::new(row, self.columns.chat_id, chat_id),
                CellWrite::new(row, self.columns.message, message),
            ])
            .await?;
        info!(table = "logs", chat_id, message, "wrote log entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemorySheet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn appends_under_the_last_entry() {
        let sheet = Arc::new(MemorySheet::new(&[
            vec!["timestamp", "chat_id", "message"],
            vec!["2024-01-01 00:00:00", "", "Started an application"],
        ]));
        let log = LogSheet::initialize(sheet.clone()).await.unwrap();
        log.write("", "Stopped an application").await.unwrap();
        log.write("42", "hello").await.unwrap();

        assert_eq!(sheet.cell(3, 3), "Stopped an application");
        assert_eq!(sheet.cell(4, 2), "42");
        assert_eq!(sheet.cell(4, 3), "hello");
        assert!(!sheet.cell(4, 1).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_entries_take_separate_rows() {
        let sheet = Arc::new(MemorySheet::new(&[vec!["timestamp", "chat_id", "message"]]));
        let log = LogSheet::initialize(sheet.clone()).await.unwrap();
        sheet.set_write_delay(Duration::from_secs(2));

        let (first, second) = tokio::join!(log.write("1", "first"), log.write("2", "second"));
        first.unwrap();
        second.unwrap();

        let mut messages = vec![sheet.cell(2, 3), sheet.cell(3, 3)];
        messages.sort();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn columns_are_found_by_name() {
        let sheet = Arc::new(MemorySheet::new(&[vec!["message", "timestamp", "chat_id"]]));
        let log = LogSheet::initialize(sheet.clone()).await.unwrap();
        log.write("7", "hi").await.unwrap();
        assert_eq!(sheet.cell(2, 1), "hi");
        assert_eq!(sheet.cell(2, 3), "7");
    }

    #[tokio::test]
    async fn missing_column_fails_initialization() {
        let sheet = Arc::new(MemorySheet::new(&[vec!["timestamp", "message"]]));
        let result = LogSheet::initialize(sheet).await;
        assert!(matches!(result, Err(CacheError::Row(RowError::MissingColumn(c))) if c == "chat_id"));
    }
}
