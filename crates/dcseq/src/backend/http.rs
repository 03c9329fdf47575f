use core::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};

use crate::{BackendKind, Error, Result};

const USER_AGENT: &str = concat!("dcseq/", env!("CARGO_PKG_VERSION"));

pub(crate) fn client(backend: BackendKind, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::configuration(backend, format!("cannot build http client: {e}")))
}

/// Connection, TLS and timeout failures are all worth another attempt.
pub(crate) fn send_error(backend: BackendKind, err: &reqwest::Error) -> Error {
    Error::transient(backend, err.to_string())
}

/// Maps a non-success status to an error. 409 is left to the caller, which
/// knows which key the write was for.
pub(crate) fn status_error(backend: BackendKind, status: StatusCode, body: &str) -> Error {
    let reason = format!("status {status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::configuration(backend, format!("credentials rejected ({reason})"))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Error::transient(backend, reason)
        }
        s if s.is_server_error() => Error::transient(backend, reason),
        _ => Error::configuration(backend, reason),
    }
}

/// Passes successful responses through and turns the rest into errors.
pub(crate) fn check(backend: BackendKind, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(backend, status, &body))
}

pub(crate) fn read_text(backend: BackendKind, response: Response) -> Result<String> {
    response
        .text()
        .map_err(|e| Error::transient(backend, format!("reading response body: {e}")))
}

pub(crate) fn read_json<T>(backend: BackendKind, response: Response) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let body = read_text(backend, response)?;
    serde_json::from_str(&body)
        .map_err(|e| Error::corrupt(backend, format!("unexpected response body: {e}")))
}
