use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::http;
use crate::{BackendKind, ContentStore, Error, Result, VersionedContent};

const B: BackendKind = BackendKind::VersionedFile;

pub const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

/// [`ContentStore`] over the GitHub repository contents API. The blob sha is
/// the version token.
pub struct GitHubContentsClient {
    http: Client,
    api_base: String,
    token: String,
    repo: String,
    branch: String,
    path: String,
}

impl GitHubContentsClient {
    /// `repo` is `owner/name`.
    pub fn new(
        http: Client,
        token: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self> {
        let repo = repo.into();
        if repo.split('/').filter(|part| !part.is_empty()).count() != 2 {
            return Err(Error::configuration(
                B,
                format!("repository `{repo}` is not in owner/name form"),
            ));
        }
        Ok(Self {
            http,
            api_base: GITHUB_API_BASE.to_owned(),
            token: token.into(),
            repo,
            branch: branch.into(),
            path: path.into().trim_start_matches('/').to_owned(),
        })
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn url(&self) -> String {
        format!("{}/repos/{}/contents/{}", self.api_base, self.repo, self.path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }
}

impl core::fmt::Debug for GitHubContentsClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GitHubContentsClient")
            .field("repo", &self.repo)
            .field("branch", &self.branch)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ContentStore for GitHubContentsClient {
    fn fetch(&self) -> Result<Option<VersionedContent>> {
        let response = self
            .authorized(self.http.get(self.url()))
            .query(&[("ref", self.branch.as_str())])
            .send()
            .map_err(|e| http::send_error(B, &e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let contents: ContentsResponse = http::read_json(B, http::check(B, response)?)?;
        Ok(Some(VersionedContent {
            content: decode_content(&contents.content)?,
            version: contents.sha,
        }))
    }

    fn store(&self, content: &str, expected: Option<&str>, message: &str) -> Result<String> {
        let body = PutContents {
            message,
            content: STANDARD.encode(content),
            branch: &self.branch,
            sha: expected,
        };
        let response = self
            .authorized(self.http.put(self.url()))
            .json(&body)
            .send()
            .map_err(|e| http::send_error(B, &e))?;

        // 409: sha mismatch. 422: sha missing for a file that now exists.
        if matches!(
            response.status(),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            return Err(Error::Conflict {
                backend: B,
                key: self.path.clone(),
            });
        }
        let stored: PutResponse = http::read_json(B, http::check(B, response)?)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            path = %self.path,
            sha = %stored.content.sha,
            commit = message,
            "committed sequence file"
        );
        Ok(stored.content.sha)
    }
}

/// The API wraps base64 content at 60 columns.
fn decode_content(encoded: &str) -> Result<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| Error::corrupt(B, format!("file content is not base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::corrupt(B, format!("file content is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_content_decodes() {
        let encoded = STANDARD.encode(r#"{"sequences":{"akdcah_seq":301}}"#);
        let (head, tail) = encoded.split_at(20);
        let wrapped = format!("{head}\n{tail}\n");
        assert_eq!(
            decode_content(&wrapped).unwrap(),
            r#"{"sequences":{"akdcah_seq":301}}"#
        );
    }

    #[test]
    fn garbage_content_is_corrupt() {
        assert!(matches!(decode_content("@@@"), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn repo_must_name_owner_and_repository() {
        let http = Client::new();
        let err = GitHubContentsClient::new(http.clone(), "t", "just-a-name", "main", "f.json")
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let client =
            GitHubContentsClient::new(http, "t", "acme/ledger", "main", "/sequence_data.json")
                .unwrap()
                .with_api_base("http://localhost:9/");
        assert_eq!(
            client.url(),
            "http://localhost:9/repos/acme/ledger/contents/sequence_data.json"
        );
    }
}
