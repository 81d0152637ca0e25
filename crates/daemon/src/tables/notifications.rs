// Scheduled notifications.
//
// Header plus a note row. Rows have no id column; the remote row number
// identifies a notification. `is_active` carries the lifecycle status
// (no / yes / planned / done in the sheet's own words).

use chrono::NaiveDateTime;
use sheetbot_common::keyboard::InlineKeyboard;
use sheetbot_common::notification::{format_schedule, parse_schedule, NotificationStatus, ReplyButtons};
use sheetbot_common::row::{RowError, SheetRow};
use sheetbot_common::vocabulary::Vocabulary;

use crate::cache::{Entry, Snapshot, Table};

pub const STATUS_COLUMN: &str = "is_active";

const COLUMNS: &[&str] = &[
    "scheldue_date",
    "is_active",
    "text_markdown",
    "state",
    "button_text",
    "button_answer",
    "send_picture",
    "condition",
    "document_link",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub row: usize,
    pub scheduled_at: NaiveDateTime,
    pub status: NotificationStatus,
    pub text_markdown: String,
    /// Conversation state a recipient enters through the buttons; empty for
    /// plain announcements.
    pub state: String,
    pub buttons: ReplyButtons,
    pub send_picture: String,
    /// Users column selecting the audience; empty means active users.
    pub condition: String,
    pub document_link: String,
}

impl Notification {
    pub fn uid(&self) -> String {
        self.row.to_string()
    }

    pub fn condition(&self) -> Option<&str> {
        Some(self.condition.as_str()).filter(|c| !c.is_empty())
    }

    pub fn picture(&self) -> Option<&str> {
        Some(self.send_picture.as_str()).filter(|p| !p.is_empty())
    }

    pub fn keyboard(&self) -> Option<InlineKeyboard> {
        if self.state.is_empty() {
            return None;
        }
        self.buttons.keyboard(&self.state)
    }
}

/// Positions of notifications by status, each sorted by schedule.
#[derive(Debug, Clone, Default)]
pub struct NotificationViews {
    pub active: Vec<usize>,
    pub planned: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct NotificationsTable {
    vocab: Vocabulary,
}

impl NotificationsTable {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Sheet word for `status`.
    pub fn status_word(&self, status: NotificationStatus) -> &str {
        status.as_word(&self.vocab)
    }
}

impl Table for NotificationsTable {
    type Record = Notification;
    type Views = NotificationViews;

    fn name(&self) -> &str {
        "notifications"
    }

    fn uid_column(&self) -> Option<&str> {
        None
    }

    fn header_rows(&self) -> usize {
        2
    }

    fn parse_row(&self, row: &SheetRow<'_>) -> Result<Notification, RowError> {
        row.ensure_closed_schema(COLUMNS)?;
        let scheduled_at = parse_schedule(row.require("scheldue_date")?)?;
        let status = NotificationStatus::parse(&self.vocab, STATUS_COLUMN, row.get(STATUS_COLUMN)?)?;
        let text_markdown = row.require("text_markdown")?.to_string();
        let state = row.get("state")?.to_string();
        let buttons = if state.is_empty() {
            ReplyButtons::default()
        } else {
            ReplyButtons::parse(row.get("button_text")?, row.get("button_answer")?)?
        };
        Ok(Notification {
            row: row.number(),
            scheduled_at,
            status,
            text_markdown,
            state,
            buttons,
            send_picture: row.get("send_picture").unwrap_or("").to_string(),
            condition: row.get("condition").unwrap_or("").to_string(),
            document_link: row.get("document_link").unwrap_or("").to_string(),
        })
    }

    fn uid(&self, record: &Notification) -> String {
        record.uid()
    }

    fn cell(&self, record: &Notification, column: &str) -> Option<String> {
        Some(match column {
            "scheldue_date" => format_schedule(record.scheduled_at),
            STATUS_COLUMN => self.status_word(record.status).to_string(),
            "text_markdown" => record.text_markdown.clone(),
            "state" => record.state.clone(),
            "button_text" => record.buttons.to_cells().0,
            "button_answer" => record.buttons.to_cells().1,
            "send_picture" => record.send_picture.clone(),
            "condition" => record.condition.clone(),
            "document_link" => record.document_link.clone(),
            _ => return None,
        })
    }

    fn set_cell(&self, record: &mut Notification, column: &str, value: &str) -> Result<(), RowError> {
        match column {
            STATUS_COLUMN => record.status = NotificationStatus::parse(&self.vocab, column, value)?,
            "scheldue_date" => record.scheduled_at = parse_schedule(value)?,
            "text_markdown" => record.text_markdown = value.to_string(),
            "send_picture" => record.send_picture = value.to_string(),
            "condition" => record.condition = value.to_string(),
            other => return Err(RowError::ReadOnlyColumn(other.to_string())),
        }
        Ok(())
    }

    fn views(&self, entries: &[Entry<Notification>]) -> NotificationViews {
        let by_status = |status: NotificationStatus| {
            let mut positions: Vec<usize> = entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.record.status == status)
                .map(|(idx, _)| idx)
                .collect();
            positions.sort_by_key(|&idx| (entries[idx].record.scheduled_at, entries[idx].row));
            positions
        };
        NotificationViews {
            active: by_status(NotificationStatus::Active),
            planned: by_status(NotificationStatus::Planned),
        }
    }
}

impl Snapshot<NotificationsTable> {
    /// Active notifications due at `now`, earliest first.
    pub fn to_plan(&self, now: NaiveDateTime) -> Vec<Notification> {
        self.pick(&self.views().active).filter(|n| n.scheduled_at <= now).cloned().collect()
    }

    /// Planned notifications due at `now`, earliest first.
    pub fn ready(&self, now: NaiveDateTime) -> Vec<Notification> {
        self.pick(&self.views().planned).filter(|n| n.scheduled_at <= now).cloned().collect()
    }

    /// Notification that puts recipients into conversation `state`.
    pub fn by_state(&self, state: &str) -> Option<&Notification> {
        if state.is_empty() {
            return None;
        }
        self.records().find(|n| n.state == state)
    }
}
