// Google Sheets v4 REST client.
//
// One `SheetsClient` per spreadsheet; `worksheet(title)` hands out a cheap
// `Worksheet` handle implementing `RemoteTable` for one tab. Values are read
// formatted (what an operator sees) and written as USER_ENTERED so dates and
// numbers keep the sheet's own formatting rules.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sheetbot_common::a1::{sheet_range, CellRef};
use tracing::debug;
use url::Url;

use super::{CellWrite, RemoteError, RemoteTable};
use crate::auth::TokenProvider;

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets/";

/// Extract the spreadsheet id from a share link such as
/// `https://docs.google.com/spreadsheets/d/<id>/edit#gid=0`. A bare id is
/// accepted as-is.
pub fn spreadsheet_id(link: &str) -> Result<String, RemoteError> {
    let link = link.trim();
    if !link.contains('/') {
        if link.is_empty() {
            return Err(RemoteError::InvalidLink(link.to_string()));
        }
        return Ok(link.to_string());
    }
    let url = Url::parse(link).map_err(|_| RemoteError::InvalidLink(link.to_string()))?;
    let mut segments = url.path_segments().into_iter().flatten();
    while let Some(segment) = segments.next() {
        if segment == "d" {
            if let Some(id) = segments.next().filter(|id| !id.is_empty()) {
                return Ok(id.to_string());
            }
        }
    }
    Err(RemoteError::InvalidLink(link.to_string()))
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteRange<'a> {
    range: String,
    major_dimension: &'a str,
    values: [[&'a str; 1]; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest<'a> {
    value_input_option: &'a str,
    data: Vec<WriteRange<'a>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Clone)]
pub struct SheetsClient {
    http: reqwest::Client,
    base: Url,
    spreadsheet_id: String,
    tokens: Arc<TokenProvider>,
}

impl SheetsClient {
    pub fn new(
        link: &str,
        tokens: Arc<TokenProvider>,
        http: reqwest::Client,
    ) -> Result<Self, RemoteError> {
        let base = Url::parse(DEFAULT_API_BASE)
            .map_err(|_| RemoteError::InvalidLink(DEFAULT_API_BASE.to_string()))?;
        Ok(Self { http, base, spreadsheet_id: spreadsheet_id(link)?, tokens })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    pub fn worksheet(&self, title: impl Into<String>) -> Worksheet {
        Worksheet { client: self.clone(), title: title.into() }
    }

    /// `<base>/<id>/<segments...>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::InvalidLink(self.base.to_string()))?
            .pop_if_empty()
            .push(&self.spreadsheet_id)
            .extend(segments);
        Ok(url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);
        Err(RemoteError::Api { status: status.as_u16(), message })
    }

    async fn worksheet_titles(&self) -> Result<Vec<String>, RemoteError> {
        let mut url = self.endpoint(&[])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties.title");
        let token = self.tokens.token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let meta: SpreadsheetMeta = Self::check(response).await?.json().await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }
}

/// Handle on one tab of a spreadsheet.
#[derive(Debug, Clone)]
pub struct Worksheet {
    client: SheetsClient,
    title: String,
}

impl Worksheet {
    pub fn title(&self) -> &str {
        &self.title
    }

    fn whole_sheet_range(&self) -> String {
        format!("'{}'", self.title.replace('\'', "''"))
    }
}

impl RemoteTable for Worksheet {
    async fn reconnect(&self) -> Result<(), RemoteError> {
        self.client.tokens.invalidate().await;
        let titles = self.client.worksheet_titles().await?;
        if !titles.iter().any(|t| t == &self.title) {
            return Err(RemoteError::WorksheetNotFound(self.title.clone()));
        }
        Ok(())
    }

    async fn fetch_all_rows(&self) -> Result<Vec<Vec<String>>, RemoteError> {
        let range = self.whole_sheet_range();
        let mut url = self.client.endpoint(&["values", &range])?;
        url.query_pairs_mut().append_pair("majorDimension", "ROWS");
        let token = self.client.tokens.token().await?;
        let response = self.client.http.get(url).bearer_auth(token).send().await?;
        let body: ValueRange = SheetsClient::check(response).await?.json().await?;
        debug!(worksheet = %self.title, rows = body.values.len(), "fetched worksheet");
        Ok(body.values)
    }

    async fn write_cell(&self, cell: CellRef, value: &str) -> Result<(), RemoteError> {
        let range = sheet_range(&self.title, cell);
        let mut url = self.client.endpoint(&["values", &range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "USER_ENTERED");
        let body = WriteRange { range, major_dimension: "ROWS", values: [[value]] };
        let token = self.client.tokens.token().await?;
        let response = self.client.http.put(url).bearer_auth(token).json(&body).send().await?;
        SheetsClient::check(response).await?;
        Ok(())
    }

    async fn write_batch(&self, writes: &[CellWrite]) -> Result<(), RemoteError> {
        if writes.is_empty() {
            return Ok(());
        }
        let url = self.client.endpoint(&["values:batchUpdate"])?;
        let body = BatchUpdateRequest {
            value_input_option: "USER_ENTERED",
            data: writes
                .iter()
                .map(|w| WriteRange {
                    range: sheet_range(&self.title, w.cell),
                    major_dimension: "ROWS",
                    values: [[w.value.as_str()]],
                })
                .collect(),
        };
        let token = self.client.tokens.token().await?;
        let response = self.client.http.post(url).bearer_auth(token).json(&body).send().await?;
        SheetsClient::check(response).await?;
        Ok(())
    }
}
