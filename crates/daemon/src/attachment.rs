// Files users attach while filling in records.
//
// The record itself only stores a JSON descriptor of the chat file. The
// bytes are copied to a Drive folder afterwards, outside the write lock:
// `TableCache::batch_upsert` hands back a `PendingAttachment` and the caller
// spawns `DriveUploader::upload` for it.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::{AuthError, TokenProvider};

pub const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("drive returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not retrieve file `{file_id}`: {message}")]
    Fetch { file_id: String, message: String },
}

/// A chat file as the messenger describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// A document to store in `column`, and where to copy its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub column: String,
    pub document: Document,
    /// Drive folder link or id.
    pub save_to: String,
    /// File name without extension.
    pub save_as: String,
}

impl Attachment {
    /// Cell value recorded for the attachment.
    pub fn descriptor(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.document)
    }

    pub fn pending(&self) -> PendingAttachment {
        PendingAttachment {
            file_id: self.document.file_id.clone(),
            mime_type: self.document.mime_type.clone(),
            folder_id: folder_id(&self.save_to),
            file_name: self.save_as.clone(),
        }
    }
}

/// Upload still owed for an attachment written to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub file_id: String,
    pub mime_type: Option<String>,
    pub folder_id: String,
    pub file_name: String,
}

/// `https://drive.google.com/drive/folders/<id>?usp=sharing` → `<id>`.
pub fn folder_id(link: &str) -> String {
    let last = link.trim().trim_end_matches('/').rsplit('/').next().unwrap_or("");
    last.split('?').next().unwrap_or("").to_string()
}

/// Downloaded file bytes.
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    /// Extension reported by the messenger's storage path, if any.
    pub extension: Option<String>,
}

/// Retrieves chat files by id.
pub trait FileFetcher: Send + Sync + 'static {
    fn fetch(&self, file_id: &str) -> impl Future<Output = Result<FetchedFile, UploadError>> + Send;
}

/// Extension for the uploaded name: storage path first, then the declared
/// mime type, then a few well-known signatures.
pub fn guess_extension(file: &FetchedFile, mime_type: Option<&str>) -> String {
    if let Some(ext) = file.extension.as_deref().filter(|e| !e.is_empty()) {
        return ext.to_ascii_lowercase();
    }
    if let Some(ext) = mime_type.and_then(extension_for_mime) {
        return ext.to_string();
    }
    let bytes = file.bytes.as_slice();
    let sniffed = if bytes.starts_with(b"%PDF") {
        "pdf"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(b"\x89PNG") {
        "png"
    } else if bytes.starts_with(b"PK\x03\x04") {
        "zip"
    } else {
        "bin"
    };
    sniffed.to_string()
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    Some(match mime {
        "application/pdf" => "pdf",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "application/zip" => "zip",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "text/plain" => "txt",
        _ => return None,
    })
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Clone)]
pub struct DriveUploader {
    http: reqwest::Client,
    tokens: Arc<TokenProvider>,
    upload_url: String,
}

impl DriveUploader {
    pub fn new(tokens: Arc<TokenProvider>, http: reqwest::Client) -> Self {
        Self { http, tokens, upload_url: DEFAULT_UPLOAD_URL.to_string() }
    }

    /// Fetch the file through `fetcher` and store it in the target folder.
    /// Returns the Drive file id.
    pub async fn upload<F: FileFetcher>(
        &self,
        pending: &PendingAttachment,
        fetcher: &F,
    ) -> Result<String, UploadError> {
        info!(folder = %pending.folder_id, name = %pending.file_name, "started saving attachment");
        let file = fetcher.fetch(&pending.file_id).await?;
        let name = format!(
            "{}.{}",
            pending.file_name,
            guess_extension(&file, pending.mime_type.as_deref())
        );
        let metadata = serde_json::json!({ "name": name, "parents": [pending.folder_id] });

        let form = reqwest::multipart::Form::new()
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata.to_string())
                    .mime_str("application/json; charset=UTF-8")?,
            )
            .part("file", reqwest::multipart::Part::bytes(file.bytes).file_name(name.clone()));

        let token = self.tokens.token().await?;
        let response = self
            .http
            .post(&self.upload_url)
            .query(&[("uploadType", "multipart")])
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(UploadError::Api { status: status.as_u16(), message });
        }
        let uploaded: UploadedFile = response.json().await?;
        info!(folder = %pending.folder_id, %name, id = %uploaded.id, "saved attachment");
        Ok(uploaded.id)
    }
}

/// Run an upload in the background. Failures are logged; the record
/// already holds the descriptor either way.
pub fn spawn_upload<F: FileFetcher>(
    uploader: DriveUploader,
    pending: PendingAttachment,
    fetcher: Arc<F>,
) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        match uploader.upload(&pending, fetcher.as_ref()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(file_id = %pending.file_id, folder = %pending.folder_id, error = %e, "attachment upload failed");
                None
            }
        }
    })
}
