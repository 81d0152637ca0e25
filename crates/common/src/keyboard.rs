// Inline keyboards attached to outgoing messages.
//
// Serializes to the Bot API `reply_markup` shape:
// `{"inline_keyboard": [[{"text": "...", "callback_data": "..."}]]}`.

use serde::{Deserialize, Serialize};

pub const CALLBACK_SET_STATE_PREFIX: &str = "user_notification_set_state_";
pub const CALLBACK_ANSWER_PREFIX: &str = "user_notification_answer_";
pub const CALLBACK_ANSWER_SEPARATOR: char = '_';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    #[serde(rename = "inline_keyboard")]
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// One button per row.
    pub fn column(buttons: impl IntoIterator<Item = InlineButton>) -> Self {
        Self { rows: buttons.into_iter().map(|b| vec![b]).collect() }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

pub fn set_state_callback(state: &str) -> String {
    format!("{CALLBACK_SET_STATE_PREFIX}{state}")
}

pub fn answer_callback(state: &str, answer: usize) -> String {
    format!("{CALLBACK_ANSWER_PREFIX}{state}{CALLBACK_ANSWER_SEPARATOR}{answer}")
}

/// Inverse of [`answer_callback`]. States may contain underscores, so the
/// answer index is taken from the last separator.
pub fn parse_answer_callback(data: &str) -> Option<(&str, usize)> {
    let rest = data.strip_prefix(CALLBACK_ANSWER_PREFIX)?;
    let (state, idx) = rest.rsplit_once(CALLBACK_ANSWER_SEPARATOR)?;
    Some((state, idx.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_bot_api_shape() {
        let kb = InlineKeyboard::column([InlineButton {
            text: "Go".into(),
            callback_data: set_state_callback("quiz"),
        }]);
        let json = serde_json::to_value(&kb).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "inline_keyboard": [[{"text": "Go", "callback_data": "user_notification_set_state_quiz"}]]
            })
        );
    }

    #[test]
    fn answer_callback_survives_underscored_states() {
        let data = answer_callback("final_quiz", 3);
        assert_eq!(data, "user_notification_answer_final_quiz_3");
        assert_eq!(parse_answer_callback(&data), Some(("final_quiz", 3)));
    }

    #[test]
    fn parse_answer_callback_rejects_foreign_data() {
        assert_eq!(parse_answer_callback("user_change_name"), None);
        assert_eq!(parse_answer_callback("user_notification_answer_quiz_x"), None);
    }
}
