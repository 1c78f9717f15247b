//! # Content Sources
//!
//! Pluggable retrieval of the configuration document a Decofile points at.
//! Each source normalizes its content into a single JSON object keyed by
//! canonical file name (trailing `.json` stripped).

use async_trait::async_trait;
use kube::Client;

use crate::crd::{Decofile, DecofileSource};

mod archive;
mod github;
mod inline;

pub use github::GithubContentSource;
pub use inline::InlineContentSource;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The Decofile's source declaration is unusable; retrying won't help
    #[error("invalid source spec: {0}")]
    InvalidSpec(String),
    /// A referenced credential Secret is absent or lacks the token key
    #[error("credential missing: {0}")]
    CredentialMissing(String),
    /// Network or archive-server failure; retried with back-off
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// An archive entry did not hold valid JSON
    #[error("unparseable content: {0}")]
    Parse(String),
}

/// Resolved source variant, recorded on status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Inline,
    Github,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Inline => "inline",
            SourceKind::Github => "github",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrieved configuration generation
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// The normalized JSON object, serialized once
    pub json: String,
    /// Revision identifier for archive sources; None for inline
    pub revision: Option<String>,
}

/// A content source a Decofile resolves to
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch and normalize the configuration content
    async fn retrieve(&self) -> Result<SourceDocument, SourceError>;

    /// Which variant this source is
    fn kind(&self) -> SourceKind;
}

/// Construct the content source a Decofile declares.
///
/// The CRD's tagged union already rejects unknown variants at deserialization;
/// this keeps construction behind one seam so the reconciler never matches on
/// the spec shape itself.
pub fn source_for(
    decofile: &Decofile,
    client: Client,
    http: reqwest::Client,
) -> Result<Box<dyn ContentSource>, SourceError> {
    let namespace = decofile
        .metadata
        .namespace
        .clone()
        .ok_or_else(|| SourceError::InvalidSpec("decofile has no namespace".to_string()))?;

    match &decofile.spec.source {
        DecofileSource::Inline(inline) => {
            Ok(Box::new(InlineContentSource::new(inline.files.clone())))
        }
        DecofileSource::Github(github) => Ok(Box::new(GithubContentSource::new(
            github.clone(),
            namespace,
            client,
            http,
        ))),
    }
}
