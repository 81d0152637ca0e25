// Outbound chat delivery.
//
// The pipeline only needs two calls: send a text and send a photo with a
// caption, each optionally carrying an inline keyboard. Every call is one
// independent delivery; a failure says nothing about other recipients.

use std::future::Future;
use std::time::Duration;

use sheetbot_common::keyboard::InlineKeyboard;
use thiserror::Error;

/// Markup dialect of a message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextFormat {
    /// Legacy Telegram markdown, the dialect operators write in the sheet.
    #[default]
    Markdown,
    Html,
    Plain,
}

impl TextFormat {
    /// Bot API `parse_mode` value.
    pub fn parse_mode(self) -> Option<&'static str> {
        match self {
            Self::Markdown => Some("Markdown"),
            Self::Html => Some("HTML"),
            Self::Plain => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request to the chat service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("chat service rejected the message ({code}): {description}")]
    Rejected { code: i64, description: String },

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

pub trait Messenger: Send + Sync + 'static {
    fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        format: TextFormat,
        keyboard: Option<&InlineKeyboard>,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// `photo` is a URL or a previously uploaded file id.
    fn send_photo(
        &self,
        chat_id: &str,
        photo: &str,
        caption: &str,
        format: TextFormat,
        keyboard: Option<&InlineKeyboard>,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}
