// Telegram Bot API client.
//
// Only the calls the daemon makes on its own: sendMessage and sendPhoto for
// notifications, getFile plus the file download for attachments. Every
// method is a JSON POST to `<api_base>/bot<token>/<method>` answered with
// `{"ok": bool, "result": ..., "error_code": n, "description": "..."}`.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sheetbot_common::keyboard::InlineKeyboard;
use tracing::debug;

use crate::attachment::{FetchedFile, FileFetcher, UploadError};
use crate::notify::{DeliveryError, Messenger, TextFormat};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    description: String,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<Option<T>, DeliveryError> {
        if self.ok {
            Ok(self.result)
        } else {
            Err(DeliveryError::Rejected { code: self.error_code, description: self.description })
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboard>,
}

#[derive(Debug, Serialize)]
struct SendPhoto<'a> {
    chat_id: &'a str,
    photo: &'a str,
    caption: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboard>,
}

#[derive(Debug, Serialize)]
struct GetFile<'a> {
    file_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct File {
    file_path: Option<String>,
}

#[derive(Clone)]
pub struct TelegramMessenger {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for TelegramMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramMessenger").field("api_base", &self.api_base).finish_non_exhaustive()
    }
}

impl TelegramMessenger {
    pub fn new(api_base: &str, token: impl Into<String>, http: reqwest::Client) -> Self {
        Self { http, api_base: api_base.trim_end_matches('/').to_string(), token: token.into() }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<Option<T>, DeliveryError> {
        let response = self.http.post(self.method_url(method)).json(body).send().await?;
        let parsed: ApiResponse<T> = response.json().await?;
        parsed.into_result()
    }
}

impl Messenger for TelegramMessenger {
    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        format: TextFormat,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), DeliveryError> {
        let body = SendMessage { chat_id, text, parse_mode: format.parse_mode(), reply_markup: keyboard };
        self.call::<_, serde_json::Value>("sendMessage", &body).await?;
        debug!(chat_id, "sent message");
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: &str,
        photo: &str,
        caption: &str,
        format: TextFormat,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), DeliveryError> {
        let body =
            SendPhoto { chat_id, photo, caption, parse_mode: format.parse_mode(), reply_markup: keyboard };
        self.call::<_, serde_json::Value>("sendPhoto", &body).await?;
        debug!(chat_id, "sent photo");
        Ok(())
    }
}

impl FileFetcher for TelegramMessenger {
    async fn fetch(&self, file_id: &str) -> Result<FetchedFile, UploadError> {
        let fetch_error = |message: String| UploadError::Fetch { file_id: file_id.to_string(), message };

        let file: Option<File> =
            self.call("getFile", &GetFile { file_id }).await.map_err(|e| fetch_error(e.to_string()))?;
        let file_path = file
            .and_then(|f| f.file_path)
            .ok_or_else(|| fetch_error("no file path returned".into()))?;

        let response = self.http.get(self.file_url(&file_path)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("download returned {status}")));
        }
        let bytes = response.bytes().await?.to_vec();
        debug!(file_id, size = bytes.len(), "downloaded chat file");
        Ok(FetchedFile { bytes, extension: path_extension(&file_path) })
    }
}

fn path_extension(file_path: &str) -> Option<String> {
    Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}
