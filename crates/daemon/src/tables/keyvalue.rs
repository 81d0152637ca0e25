// Key/value worksheets: the i18n vocabulary sheet and the settings sheet.

use std::time::Duration;

use sheetbot_common::row::{RowError, SheetRow};
use sheetbot_common::vocabulary::Vocabulary;

use crate::cache::{Entry, Snapshot, Table};

const COLUMNS: &[&str] = &["key", "value"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct KeyValueTable {
    name: String,
}

impl KeyValueTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Table for KeyValueTable {
    type Record = KeyValue;
    type Views = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn uid_column(&self) -> Option<&str> {
        Some("key")
    }

    fn parse_row(&self, row: &SheetRow<'_>) -> Result<KeyValue, RowError> {
        row.ensure_closed_schema(COLUMNS)?;
        Ok(KeyValue { key: row.require("key")?.to_string(), value: row.get("value")?.to_string() })
    }

    fn uid(&self, record: &KeyValue) -> String {
        record.key.clone()
    }

    fn cell(&self, record: &KeyValue, column: &str) -> Option<String> {
        match column {
            "key" => Some(record.key.clone()),
            "value" => Some(record.value.clone()),
            _ => None,
        }
    }

    fn set_cell(&self, record: &mut KeyValue, column: &str, value: &str) -> Result<(), RowError> {
        match column {
            "value" => record.value = value.to_string(),
            other => return Err(RowError::ReadOnlyColumn(other.to_string())),
        }
        Ok(())
    }

    fn blank(&self, uid: &str) -> Option<KeyValue> {
        Some(KeyValue { key: uid.to_string(), value: String::new() })
    }

    fn views(&self, _entries: &[Entry<KeyValue>]) {}
}

impl Snapshot<KeyValueTable> {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.get(key).map(|kv| kv.value.as_str())
    }

    /// A whole number of seconds stored under `key`.
    pub fn seconds(&self, key: &str) -> Option<Duration> {
        self.value(key)?.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    pub fn vocabulary(&self) -> Vocabulary {
        Vocabulary::from_pairs(self.records().map(|kv| (kv.key.as_str(), kv.value.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect()
    }

    #[test]
    fn settings_lookup_and_seconds() {
        let table = KeyValueTable::new("settings");
        let (snapshot, dropped) = Snapshot::build(
            &table,
            rows(&[
                &["key", "value"],
                &["users_update_time", "600"],
                &["greeting", "hi"],
                &["", "orphan"],
            ]),
        )
        .unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(snapshot.value("greeting"), Some("hi"));
        assert_eq!(snapshot.seconds("users_update_time"), Some(Duration::from_secs(600)));
        assert_eq!(snapshot.seconds("greeting"), None);
        assert_eq!(snapshot.value("missing"), None);
    }

    #[test]
    fn unknown_column_drops_every_row() {
        let table = KeyValueTable::new("settings");
        let (snapshot, dropped) = Snapshot::build(
            &table,
            rows(&[&["key", "value", "note"], &["a", "1", "x"], &["b", "2", ""]]),
        )
        .unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(dropped.len(), 2);
        assert_eq!(dropped[0].error, RowError::UnknownColumn("note".into()));
    }

    #[test]
    fn vocabulary_from_i18n_sheet() {
        let table = KeyValueTable::new("i18n");
        let (snapshot, _) = Snapshot::build(
            &table,
            rows(&[&["key", "value"], &["yes", "да"], &["no", "нет"], &["users", "Пользователи"]]),
        )
        .unwrap();
        let vocab = snapshot.vocabulary();
        assert_eq!(vocab.yes, "да");
        assert_eq!(vocab.worksheets.users, "Пользователи");
        assert_eq!(vocab.done, "done");
    }

    #[test]
    fn duplicate_keys_keep_the_first() {
        let table = KeyValueTable::new("settings");
        let (snapshot, dropped) =
            Snapshot::build(&table, rows(&[&["key", "value"], &["a", "1"], &["a", "2"]])).unwrap();
        assert_eq!(snapshot.value("a"), Some("1"));
        assert_eq!(dropped[0].error, RowError::DuplicateUid("a".into()));
        assert_eq!(dropped[0].row, 3);
    }
}
