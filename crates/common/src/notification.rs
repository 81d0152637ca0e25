// Notification domain: status lifecycle, schedule dates, reply buttons.
//
// Status lifecycle driven by the notification pipeline:
//   inactive → active → planned → done
// Operators move rows between inactive and active by hand; the pipeline
// only ever advances active → planned → done.

use chrono::NaiveDateTime;

use crate::keyboard::{answer_callback, set_state_callback, InlineButton, InlineKeyboard};
use crate::row::RowError;
use crate::vocabulary::Vocabulary;

/// `scheldue_date` cell format: day.month.year hour:minute.
pub const SCHEDULE_FORMAT: &str = "%d.%m.%Y %H:%M";

pub fn parse_schedule(value: &str) -> Result<NaiveDateTime, RowError> {
    NaiveDateTime::parse_from_str(value.trim(), SCHEDULE_FORMAT)
        .map_err(|_| RowError::InvalidDate { value: value.to_string() })
}

pub fn format_schedule(at: NaiveDateTime) -> String {
    at.format(SCHEDULE_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationStatus {
    Inactive,
    Active,
    Planned,
    Done,
}

impl NotificationStatus {
    pub fn as_word(self, vocab: &Vocabulary) -> &str {
        match self {
            Self::Inactive => &vocab.no,
            Self::Active => &vocab.yes,
            Self::Planned => &vocab.planned,
            Self::Done => &vocab.done,
        }
    }

    pub fn parse(vocab: &Vocabulary, column: &str, value: &str) -> Result<Self, RowError> {
        if value == vocab.no {
            Ok(Self::Inactive)
        } else if value == vocab.yes {
            Ok(Self::Active)
        } else if value == vocab.planned {
            Ok(Self::Planned)
        } else if value == vocab.done {
            Ok(Self::Done)
        } else {
            Err(RowError::InvalidValue { column: column.to_string(), value: value.to_string() })
        }
    }

    /// Whether the pipeline may move a record from `self` to `next`.
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!((self, next), (Self::Active, Self::Planned) | (Self::Planned, Self::Done))
    }
}

/// What a recipient's button press resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAnswer<'a> {
    /// Single-button shorthand: the button opens a free-form reply.
    Reply(&'a str),
    /// One of several choices.
    Choice { answer: &'a str, label: &'a str },
}

/// Parallel newline-delimited `button_text` / `button_answer` lists.
///
/// Valid shapes: equal counts, or exactly one label with two answers
/// (free-form reply prompt plus confirmation).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplyButtons {
    pub labels: Vec<String>,
    pub answers: Vec<String>,
}

impl ReplyButtons {
    pub fn parse(labels: &str, answers: &str) -> Result<Self, RowError> {
        let labels: Vec<String> = labels.split('\n').map(str::to_string).collect();
        let answers: Vec<String> = answers.split('\n').map(str::to_string).collect();
        let buttons = Self { labels, answers };
        if buttons.is_valid() {
            Ok(buttons)
        } else {
            Err(RowError::ButtonMismatch {
                labels: buttons.labels.len(),
                answers: buttons.answers.len(),
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        let (l, a) = (self.labels.len(), self.answers.len());
        (l == 1 && a == 2) || l == a
    }

    pub fn is_freeform(&self) -> bool {
        self.labels.len() == 1
    }

    /// Keyboard offered with a notification that moves the user into `state`.
    pub fn keyboard(&self, state: &str) -> Option<InlineKeyboard> {
        match self.labels.len() {
            0 => None,
            1 => Some(InlineKeyboard::column([InlineButton {
                text: self.labels[0].clone(),
                callback_data: set_state_callback(state),
            }])),
            _ => Some(InlineKeyboard::column(self.labels.iter().enumerate().map(
                |(idx, label)| InlineButton {
                    text: label.clone(),
                    callback_data: answer_callback(state, idx),
                },
            ))),
        }
    }

    pub fn answer(&self, idx: Option<usize>) -> Option<ButtonAnswer<'_>> {
        if self.is_freeform() {
            return self.answers.first().map(|a| ButtonAnswer::Reply(a));
        }
        let idx = idx?;
        Some(ButtonAnswer::Choice {
            answer: self.answers.get(idx)?,
            label: self.labels.get(idx)?,
        })
    }

    /// Newline-joined cells, as stored in the sheet.
    pub fn to_cells(&self) -> (String, String) {
        (self.labels.join("\n"), self.answers.join("\n"))
    }
}
