// In-memory messenger: records every message and can be told to reject or
// stall specific chats.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use sheetbot_common::keyboard::InlineKeyboard;

use super::messenger::{DeliveryError, Messenger, TextFormat};

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
    pub photo: Option<String>,
    pub format: TextFormat,
    pub keyboard: Option<InlineKeyboard>,
}

#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<SentMessage>>,
    rejected: Mutex<HashSet<String>>,
    stalled: Mutex<HashMap<String, Duration>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages that were accepted, in completion order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("messenger lock poisoned").clone()
    }

    pub fn sent_to(&self, chat_id: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.chat_id == chat_id).collect()
    }

    /// Reject every message to `chat_id`, as a bot blocked by the user would be.
    pub fn reject(&self, chat_id: &str) {
        self.rejected.lock().expect("messenger lock poisoned").insert(chat_id.to_string());
    }

    /// Hold every message to `chat_id` for `delay` before accepting it.
    pub fn stall(&self, chat_id: &str, delay: Duration) {
        self.stalled.lock().expect("messenger lock poisoned").insert(chat_id.to_string(), delay);
    }

    async fn deliver(&self, message: SentMessage) -> Result<(), DeliveryError> {
        let delay = self.stalled.lock().expect("messenger lock poisoned").get(&message.chat_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected.lock().expect("messenger lock poisoned").contains(&message.chat_id) {
            return Err(DeliveryError::Rejected {
                code: 403,
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        self.sent.lock().expect("messenger lock poisoned").push(message);
        Ok(())
    }
}

impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        format: TextFormat,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), DeliveryError> {
        self.deliver(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            photo: None,
            format,
            keyboard: keyboard.cloned(),
        })
        .await
    }

    async fn send_photo(
        &self,
        chat_id: &str,
        photo: &str,
        caption: &str,
        format: TextFormat,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), DeliveryError> {
        self.deliver(SentMessage {
            chat_id: chat_id.to_string(),
            text: caption.to_string(),
            photo: Some(photo.to_string()),
            format,
            keyboard: keyboard.cloned(),
        })
        .await
    }
}
