// Registered users.
//
// The one open-schema table: besides the fixed columns every header column
// holds the user's answer to a registration question, and operators add
// questions by adding columns. Answer columns double as audience flags for
// notifications with a `condition`.

use std::collections::BTreeMap;

use sheetbot_common::row::{RowError, SheetRow};
use sheetbot_common::vocabulary::Vocabulary;

use crate::cache::{Entry, Snapshot, Table};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub chat_id: String,
    pub username: String,
    /// Registration timestamp as written by the bot.
    pub registered_at: String,
    pub is_active: bool,
    /// `None` while the cell is empty or not a yes/no word.
    pub is_bot_banned: Option<bool>,
    /// Conversation state; empty when the user is not mid-conversation.
    pub state: String,
    pub answers: BTreeMap<String, String>,
}

impl User {
    /// Reachable: explicitly marked as not having blocked the bot.
    pub fn is_reachable(&self) -> bool {
        self.is_bot_banned == Some(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserViews {
    /// Active and reachable users.
    pub active: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct UsersTable {
    vocab: Vocabulary,
}

impl UsersTable {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }
}

impl Table for UsersTable {
    type Record = User;
    type Views = UserViews;

    fn name(&self) -> &str {
        "users"
    }

    fn uid_column(&self) -> Option<&str> {
        Some("chat_id")
    }

    fn parse_row(&self, row: &SheetRow<'_>) -> Result<User, RowError> {
        let mut user = User {
            chat_id: row.require("chat_id")?.to_string(),
            username: String::new(),
            registered_at: String::new(),
            is_active: false,
            is_bot_banned: None,
            state: String::new(),
            answers: BTreeMap::new(),
        };
        for (column, value) in row.iter() {
            if column.is_empty() || column == "chat_id" {
                continue;
            }
            self.set_cell(&mut user, column, value)?;
        }
        Ok(user)
    }

    fn uid(&self, record: &User) -> String {
        record.chat_id.clone()
    }

    fn cell(&self, record: &User, column: &str) -> Option<String> {
        Some(match column {
            "chat_id" => record.chat_id.clone(),
            "username" => record.username.clone(),
            "datetime" => record.registered_at.clone(),
            "is_active" => self.vocab.bool_word(record.is_active).to_string(),
            "is_bot_banned" => match record.is_bot_banned {
                Some(banned) => self.vocab.bool_word(banned).to_string(),
                None => String::new(),
            },
            "state" => record.state.clone(),
            other => record.answers.get(other).cloned().unwrap_or_default(),
        })
    }

    fn set_cell(&self, record: &mut User, column: &str, value: &str) -> Result<(), RowError> {
        match column {
            "chat_id" => return Err(RowError::ReadOnlyColumn(column.to_string())),
            "username" => record.username = value.to_string(),
            "datetime" => record.registered_at = value.to_string(),
            // Flags never reject a row: a user missing from the snapshot would
            // be appended again on the next upsert.
            "is_active" => record.is_active = value == self.vocab.yes,
            "is_bot_banned" => record.is_bot_banned = self.vocab.parse_bool(column, value).ok(),
            "state" => record.state = value.to_string(),
            answer => {
                record.answers.insert(answer.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    fn blank(&self, uid: &str) -> Option<User> {
        Some(User {
            chat_id: uid.to_string(),
            username: String::new(),
            registered_at: String::new(),
            is_active: false,
            is_bot_banned: None,
            state: String::new(),
            answers: BTreeMap::new(),
        })
    }

    fn views(&self, entries: &[Entry<User>]) -> UserViews {
        UserViews {
            active: entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.record.is_active && e.record.is_reachable())
                .map(|(idx, _)| idx)
                .collect(),
        }
    }
}

impl Snapshot<UsersTable> {
    pub fn active_users(&self) -> impl Iterator<Item = &User> {
        self.pick(&self.views().active)
    }

    /// Reachable users whose `column` reads yes. `None` selects by
    /// `is_active`.
    pub fn audience<'a>(&'a self, table: &'a UsersTable, column: Option<&'a str>) -> Vec<&'a User> {
        let Some(column) = column.filter(|c| !c.is_empty() && *c != "is_active") else {
            return self.active_users().collect();
        };
        self.records()
            .filter(|user| user.is_reachable())
            .filter(|user| table.cell(user, column).as_deref() == Some(table.vocab.yes.as_str()))
            .collect()
    }
}
