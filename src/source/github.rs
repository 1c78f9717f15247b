//! # GitHub Source
//!
//! Downloads a revision archive through the codeload endpoint and normalizes
//! the configured subtree into the configuration object.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use serde_json::Value;
use tracing::{debug, info};

use super::archive::extract_entries;
use super::{ContentSource, SourceDocument, SourceError, SourceKind};
use crate::constants::{GITHUB_TOKEN_ENV_VAR, TOKEN_SECRET_KEY};
use crate::crd::GithubSource;

const CODELOAD_BASE_URL: &str = "https://codeload.github.com";

/// Content source backed by a GitHub revision archive
pub struct GithubContentSource {
    spec: GithubSource,
    namespace: String,
    client: Client,
    http: reqwest::Client,
}

impl GithubContentSource {
    pub fn new(spec: GithubSource, namespace: String, client: Client, http: reqwest::Client) -> Self {
        Self {
            spec,
            namespace,
            client,
            http,
        }
    }

    /// Archive download URL for the configured revision
    pub fn archive_url(&self) -> String {
        codeload_url(&self.spec.org, &self.spec.repo, &self.spec.revision)
    }

    /// Effective download credential: the referenced Secret's `token` key,
    /// else the process-wide env token, else empty for public repositories.
    async fn resolve_token(&self) -> Result<String, SourceError> {
        if let Some(secret_name) = &self.spec.token_secret {
            let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
            let secret = match secrets.get(secret_name).await {
                Ok(secret) => secret,
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    return Err(SourceError::CredentialMissing(format!(
                        "secret '{secret_name}' not found in namespace '{}'",
                        self.namespace
                    )));
                }
                Err(e) => {
                    return Err(SourceError::Unavailable(format!(
                        "failed to read secret '{secret_name}': {e}"
                    )));
                }
            };

            let token = secret
                .data
                .as_ref()
                .and_then(|data| data.get(TOKEN_SECRET_KEY))
                .map(|bytes| String::from_utf8_lossy(&bytes.0).trim().to_string())
                .filter(|token| !token.is_empty())
                .ok_or_else(|| {
                    SourceError::CredentialMissing(format!(
                        "secret '{secret_name}' has no '{TOKEN_SECRET_KEY}' key"
                    ))
                })?;
            return Ok(token);
        }

        Ok(std::env::var(GITHUB_TOKEN_ENV_VAR).unwrap_or_default())
    }
}

impl std::fmt::Debug for GithubContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubContentSource")
            .field("org", &self.spec.org)
            .field("repo", &self.spec.repo)
            .field("revision", &self.spec.revision)
            .finish()
    }
}

/// The well-known codeload archive pattern
fn codeload_url(org: &str, repo: &str, revision: &str) -> String {
    format!("{CODELOAD_BASE_URL}/{org}/{repo}/zip/{revision}")
}

/// Authenticated GET of the archive body; non-2xx is `Unavailable`
pub async fn download_archive(
    http: &reqwest::Client,
    url: &str,
    token: &str,
) -> Result<bytes::Bytes, SourceError> {
    debug!("Downloading archive from {}", url);
    let mut request = http.get(url);
    if !token.is_empty() {
        request = request.header("Authorization", format!("token {token}"));
    }

    let response = request
        .send()
        .await
        .map_err(|e| SourceError::Unavailable(format!("archive download failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::Unavailable(format!(
            "archive server returned {status} for {url}"
        )));
    }

    response
        .bytes()
        .await
        .map_err(|e| SourceError::Unavailable(format!("archive body read failed: {e}")))
}

#[async_trait]
impl ContentSource for GithubContentSource {
    async fn retrieve(&self) -> Result<SourceDocument, SourceError> {
        let token = self.resolve_token().await?;
        let url = self.archive_url();

        let bytes = download_archive(&self.http, &url, &token).await?;
        let document = extract_entries(&bytes, self.spec.path.as_deref())?;
        info!(
            "Extracted {} entries from {}/{}@{}",
            document.len(),
            self.spec.org,
            self.spec.repo,
            self.spec.revision
        );

        let json = serde_json::to_string(&Value::Object(document))
            .map_err(|e| SourceError::Parse(format!("failed to serialize archive entries: {e}")))?;

        Ok(SourceDocument {
            json,
            revision: Some(self.spec.revision.clone()),
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Github
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo_archive() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.add_directory("storefront-abc123/", options).expect("dir");
        writer
            .start_file("storefront-abc123/blocks/page.json", options)
            .expect("file");
        writer.write_all(br#"{"title":"home"}"#).expect("body");
        writer.finish().expect("finish").into_inner()
    }

    #[test]
    fn codeload_url_follows_the_well_known_pattern() {
        assert_eq!(
            codeload_url("deco-sites", "storefront", "abc123"),
            "https://codeload.github.com/deco-sites/storefront/zip/abc123"
        );
    }

    #[tokio::test]
    async fn sends_token_header_when_credentialed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deco-sites/storefront/zip/abc123"))
            .and(header("Authorization", "token sekret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(repo_archive()))
            .expect(1)
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/deco-sites/storefront/zip/abc123", server.uri());
        let bytes = download_archive(&http, &url, "sekret").await.expect("download");
        let entries = extract_entries(&bytes, Some("blocks")).expect("extract");
        assert_eq!(entries["page"], serde_json::json!({ "title": "home" }));
    }

    #[tokio::test]
    async fn anonymous_download_sends_no_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(repo_archive()))
            .expect(1)
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        download_archive(&http, &server.uri(), "").await.expect("download");

        let requests = server.received_requests().await.expect("requests");
        assert!(requests[0].headers.get("Authorization").is_none());
    }

    #[tokio::test]
    async fn non_2xx_is_source_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let result = download_archive(&http, &server.uri(), "").await;
        match result {
            Err(SourceError::Unavailable(message)) => assert!(message.contains("404")),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
