use core::time::Duration;
use std::time::Instant;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::{StatusCode, Url};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::http;
use crate::{BackendKind, Error, Result, SheetClient};

const B: BackendKind = BackendKind::RemoteTabular;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before they actually expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account key file that signing needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_owned()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::configuration(B, format!("invalid service account key: {e}")))
    }
}

impl core::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS as u64
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// [`SheetClient`] for the Google Sheets v4 values API, authenticated as a
/// service account.
pub struct GoogleSheetsClient {
    http: Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    token: Mutex<Option<CachedToken>>,
    api_base: String,
    spreadsheet_id: String,
    worksheet: String,
}

impl GoogleSheetsClient {
    pub fn new(
        http: Client,
        key: ServiceAccountKey,
        spreadsheet_id: impl Into<String>,
        worksheet: impl Into<String>,
    ) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| Error::configuration(B, format!("invalid service account key: {e}")))?;
        Ok(Self {
            http,
            key,
            signing_key,
            token: Mutex::new(None),
            api_base: SHEETS_API_BASE.to_owned(),
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: worksheet.into(),
        })
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn worksheet(&self) -> &str {
        &self.worksheet
    }

    fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock();
        if let Some(token) = cached.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.value.clone());
        }

        let iat = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
                .map_err(|e| Error::configuration(B, format!("cannot sign assertion: {e}")))?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .map_err(|e| http::send_error(B, &e))?;
        let token: TokenResponse = http::read_json(B, http::check(B, response)?)?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    fn values_url(&self, range: &str) -> Result<Url> {
        let range = format!("'{}'!{range}", self.worksheet);
        api_url(
            &self.api_base,
            &["v4", "spreadsheets", &self.spreadsheet_id, "values", &range],
        )
    }

    /// `Ok(None)` when the worksheet does not exist.
    fn fetch_rows(&self) -> Result<Option<Vec<Vec<String>>>> {
        let response = self
            .http
            .get(self.values_url("A:D")?)
            .bearer_auth(self.access_token()?)
            .send()
            .map_err(|e| http::send_error(B, &e))?;
        // An unknown sheet name is reported as an unparseable range.
        if response.status() == StatusCode::BAD_REQUEST {
            return Ok(None);
        }
        let range: ValueRange = http::read_json(B, http::check(B, response)?)?;
        Ok(Some(
            range
                .values
                .into_iter()
                .map(|row| row.into_iter().map(cell_text).collect())
                .collect(),
        ))
    }

    fn add_worksheet(&self) -> Result<()> {
        let url = api_url(
            &self.api_base,
            &["v4", "spreadsheets", &format!("{}:batchUpdate", self.spreadsheet_id)],
        )?;
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": self.worksheet,
                        "gridProperties": { "rowCount": 1000, "columnCount": 4 }
                    }
                }
            }]
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(self.access_token()?)
            .json(&body)
            .send()
            .map_err(|e| http::send_error(B, &e))?;
        http::check(B, response)?;

        #[cfg(feature = "tracing")]
        tracing::info!(worksheet = %self.worksheet, "created sequences worksheet");
        Ok(())
    }
}

impl SheetClient for GoogleSheetsClient {
    fn ensure_worksheet(&self, header: &[&str]) -> Result<()> {
        let rows = match self.fetch_rows()? {
            Some(rows) => rows,
            None => {
                self.add_worksheet()?;
                Vec::new()
            }
        };
        if rows.is_empty() {
            let header = header.iter().map(|h| json!(h)).collect();
            self.write_range("A1:D1", vec![header])?;
        }
        Ok(())
    }

    fn read_rows(&self) -> Result<Vec<Vec<String>>> {
        self.fetch_rows()?.ok_or_else(|| {
            Error::configuration(B, format!("worksheet `{}` does not exist", self.worksheet))
        })
    }

    fn write_range(&self, range: &str, rows: Vec<Vec<Value>>) -> Result<()> {
        let response = self
            .http
            .put(self.values_url(range)?)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(self.access_token()?)
            .json(&json!({ "values": rows }))
            .send()
            .map_err(|e| http::send_error(B, &e))?;
        http::check(B, response)?;
        Ok(())
    }
}

fn cell_text(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `api_base` with `segments` appended, each percent-encoded as one path
/// segment.
fn api_url(api_base: &str, segments: &[&str]) -> Result<Url> {
    let invalid =
        |reason: String| Error::configuration(B, format!("API base `{api_base}` {reason}"));
    let mut url = Url::parse(api_base).map_err(|e| invalid(format!("is not a URL: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| invalid("cannot carry a path".to_owned()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
