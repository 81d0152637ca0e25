// Registered group chats.
//
// Header plus a note row. A group only counts while `is_active` is yes;
// `is_admin` ranks it as a normal, admin or superadmin group, which decides
// what it is sent.

use sheetbot_common::row::{RowError, SheetRow};
use sheetbot_common::vocabulary::{AdminLevel, Vocabulary};

use crate::cache::{Entry, Snapshot, Table};

const COLUMNS: &[&str] = &["chat_id", "name", "is_admin", "is_active"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub chat_id: String,
    pub name: String,
    pub level: AdminLevel,
    pub is_active: bool,
}

/// Positions of active groups by privilege.
#[derive(Debug, Clone, Default)]
pub struct GroupViews {
    pub normal: Vec<usize>,
    /// Admin and superadmin groups.
    pub admin: Vec<usize>,
    pub superadmin: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct GroupsTable {
    vocab: Vocabulary,
}

impl GroupsTable {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }
}

impl Table for GroupsTable {
    type Record = Group;
    type Views = GroupViews;

    fn name(&self) -> &str {
        "groups"
    }

    fn uid_column(&self) -> Option<&str> {
        Some("chat_id")
    }

    fn header_rows(&self) -> usize {
        2
    }

    fn parse_row(&self, row: &SheetRow<'_>) -> Result<Group, RowError> {
        row.ensure_closed_schema(COLUMNS)?;
        let is_active = row.get("is_active")?;
        if is_active != self.vocab.yes {
            return Err(RowError::InvalidValue { column: "is_active".into(), value: is_active.into() });
        }
        Ok(Group {
            chat_id: row.require("chat_id")?.to_string(),
            name: row.get("name").unwrap_or("").to_string(),
            level: self.vocab.parse_admin_level("is_admin", row.get("is_admin")?)?,
            is_active: true,
        })
    }

    fn uid(&self, record: &Group) -> String {
        record.chat_id.clone()
    }

    fn cell(&self, record: &Group, column: &str) -> Option<String> {
        Some(match column {
            "chat_id" => record.chat_id.clone(),
            "name" => record.name.clone(),
            "is_admin" => self.vocab.admin_level_word(record.level).to_string(),
            "is_active" => self.vocab.bool_word(record.is_active).to_string(),
            _ => return None,
        })
    }

    fn set_cell(&self, record: &mut Group, column: &str, value: &str) -> Result<(), RowError> {
        match column {
            "name" => record.name = value.to_string(),
            "is_admin" => record.level = self.vocab.parse_admin_level(column, value)?,
            "is_active" => record.is_active = self.vocab.parse_flag(column, value)?,
            other => return Err(RowError::UnknownColumn(other.to_string())),
        }
        Ok(())
    }

    fn blank(&self, uid: &str) -> Option<Group> {
        Some(Group {
            chat_id: uid.to_string(),
            name: String::new(),
            level: AdminLevel::Member,
            is_active: false,
        })
    }

    fn views(&self, entries: &[Entry<Group>]) -> GroupViews {
        let mut views = GroupViews::default();
        for (idx, entry) in entries.iter().enumerate() {
            let group = &entry.record;
            if !group.is_active {
                continue;
            }
            match group.level {
                AdminLevel::Member => views.normal.push(idx),
                AdminLevel::Admin => views.admin.push(idx),
                AdminLevel::Superadmin => {
                    views.admin.push(idx);
                    views.superadmin.push(idx);
                }
            }
        }
        views
    }
}

impl Snapshot<GroupsTable> {
    pub fn normal_groups(&self) -> impl Iterator<Item = &Group> {
        self.pick(&self.views().normal)
    }

    pub fn admin_groups(&self) -> impl Iterator<Item = &Group> {
        self.pick(&self.views().admin)
    }

    pub fn superadmin_groups(&self) -> impl Iterator<Item = &Group> {
        self.pick(&self.views().superadmin)
    }

    pub fn is_admin_group(&self, chat_id: &str) -> bool {
        self.get(chat_id).is_some_and(|g| g.is_active && g.level.is_admin())
    }
}
