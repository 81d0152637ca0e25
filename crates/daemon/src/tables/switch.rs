// Kill switch worksheet.
//
// One data row under a header and a note row: `bot_active` and
// `user_registration_open`, both strict yes/no. This is the safety-critical
// table: if no valid row is left the bot must not run, and `bot_active = no`
// stops it.

use sheetbot_common::row::{RowError, SheetRow};
use sheetbot_common::vocabulary::Vocabulary;

use crate::cache::{Entry, Snapshot, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchState {
    pub row: usize,
    pub bot_active: bool,
    pub user_registration_open: bool,
}

#[derive(Debug, Clone)]
pub struct SwitchTable {
    vocab: Vocabulary,
}

impl SwitchTable {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }
}

impl Table for SwitchTable {
    type Record = SwitchState;
    type Views = ();

    fn name(&self) -> &str {
        "switch"
    }

    fn uid_column(&self) -> Option<&str> {
        None
    }

    fn header_rows(&self) -> usize {
        2
    }

    fn is_critical(&self) -> bool {
        true
    }

    fn parse_row(&self, row: &SheetRow<'_>) -> Result<SwitchState, RowError> {
        Ok(SwitchState {
            row: row.number(),
            bot_active: self.vocab.parse_bool("bot_active", row.get("bot_active")?)?,
            user_registration_open: self
                .vocab
                .parse_bool("user_registration_open", row.get("user_registration_open")?)?,
        })
    }

    fn uid(&self, record: &SwitchState) -> String {
        record.row.to_string()
    }

    fn cell(&self, record: &SwitchState, column: &str) -> Option<String> {
        match column {
            "bot_active" => Some(self.vocab.bool_word(record.bot_active).to_string()),
            "user_registration_open" => {
                Some(self.vocab.bool_word(record.user_registration_open).to_string())
            }
            _ => None,
        }
    }

    fn set_cell(&self, record: &mut SwitchState, column: &str, value: &str) -> Result<(), RowError> {
        match column {
            "bot_active" => record.bot_active = self.vocab.parse_bool(column, value)?,
            "user_registration_open" => {
                record.user_registration_open = self.vocab.parse_bool(column, value)?
            }
            other => return Err(RowError::UnknownColumn(other.to_string())),
        }
        Ok(())
    }

    fn views(&self, _entries: &[Entry<SwitchState>]) {}
}

impl Snapshot<SwitchTable> {
    /// The switch in effect: the first valid row.
    pub fn state(&self) -> Option<SwitchState> {
        self.records().next().copied()
    }

    pub fn bot_active(&self) -> bool {
        self.state().is_some_and(|s| s.bot_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect()
    }

    #[test]
    fn reads_first_row_under_the_note_row() {
        let table = SwitchTable::new(Vocabulary::default());
        let (snapshot, dropped) = Snapshot::build(
            &table,
            rows(&[
                &["bot_active", "user_registration_open"],
                &["Is the bot running?", "Can new users register?"],
                &["yes", "no"],
            ]),
        )
        .unwrap();
        assert!(dropped.is_empty());
        let state = snapshot.state().unwrap();
        assert_eq!(state.row, 3);
        assert!(state.bot_active);
        assert!(!state.user_registration_open);
        assert!(snapshot.bot_active());
    }

    #[test]
    fn invalid_words_drop_the_row() {
        let table = SwitchTable::new(Vocabulary::default());
        let (snapshot, dropped) = Snapshot::build(
            &table,
            rows(&[&["bot_active", "user_registration_open"], &["note", "note"], &["maybe", "no"]]),
        )
        .unwrap();
        assert!(snapshot.is_empty());
        assert!(!snapshot.bot_active());
        assert_eq!(
            dropped[0].error,
            RowError::InvalidValue { column: "bot_active".into(), value: "maybe".into() }
        );
    }

    #[test]
    fn missing_header_is_an_error() {
        let table = SwitchTable::new(Vocabulary::default());
        let result = Snapshot::build(&table, Vec::new());
        assert!(matches!(result, Err(CacheError::MissingHeader { .. })));
    }
}
