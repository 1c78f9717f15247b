//! # Custom Resource Definitions
//!
//! CRD types for the decofile operator.
//!
//! A `Decofile` declares where a service's configuration comes from (an inline
//! file map or a GitHub revision) and the operator materializes it into an
//! owned ConfigMap named `decofile-<name>`.

use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod status;

pub use status::{Condition, DecofileStatus};

use crate::constants::CONFIGMAP_NAME_PREFIX;

/// Decofile Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: deco.sh/v1alpha1
/// kind: Decofile
/// metadata:
///   name: storefront
///   namespace: default
/// spec:
///   deploymentId: storefront-site
///   source:
///     github:
///       org: deco-sites
///       repo: storefront
///       revision: 4f06e7b9c0a1d2e3f4a5b6c7d8e9f0a1b2c3d4e5
///       path: .deco/blocks
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Decofile",
    group = "deco.sh",
    version = "v1alpha1",
    namespaced,
    status = "DecofileStatus",
    shortname = "dcf",
    printcolumn = r#"{"name":"Source", "type":"string", "jsonPath":".status.source"}, {"name":"ConfigMap", "type":"string", "jsonPath":".status.configMap"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DecofileSpec {
    /// Alias used by Services to bind to this Decofile.
    /// Defaults to the resource name when empty.
    #[serde(default)]
    pub deployment_id: Option<String>,
    /// Where the configuration content comes from
    pub source: DecofileSource,
    /// When true, skip pod notification on content changes.
    /// Pods still pick the new content up on their next restart.
    #[serde(default)]
    pub silent: bool,
}

/// Configuration source
/// Kubernetes sends data in format: {"inline": {...}} or {"github": {...}}
/// We use externally tagged format and ignore a redundant "type" field
/// during deserialization
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum DecofileSource {
    /// File map embedded directly in the resource
    #[serde(rename = "inline")]
    Inline(InlineSource),
    /// ZIP archive of a GitHub revision, fetched through codeload
    #[serde(rename = "github")]
    Github(GithubSource),
}

impl<'de> serde::Deserialize<'de> for DecofileSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, MapAccess, Visitor};
        use std::fmt;

        struct DecofileSourceVisitor;

        impl<'de> Visitor<'de> for DecofileSourceVisitor {
            type Value = DecofileSource;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a source object with an inline or github field")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut inline: Option<InlineSource> = None;
                let mut github: Option<GithubSource> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "inline" => {
                            if inline.is_some() {
                                return Err(de::Error::duplicate_field("inline"));
                            }
                            inline = Some(map.next_value()?);
                        }
                        "github" => {
                            if github.is_some() {
                                return Err(de::Error::duplicate_field("github"));
                            }
                            github = Some(map.next_value()?);
                        }
                        _ => {
                            // Ignore unknown fields (like "type")
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }

                match (inline, github) {
                    (Some(source), None) => Ok(DecofileSource::Inline(source)),
                    (None, Some(source)) => Ok(DecofileSource::Github(source)),
                    (None, None) => Err(de::Error::missing_field("inline or github")),
                    _ => Err(de::Error::custom("multiple source types specified")),
                }
            }
        }

        deserializer.deserialize_map(DecofileSourceVisitor)
    }
}

/// Inline configuration source
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InlineSource {
    /// Mapping from filename to an arbitrary JSON value.
    /// A trailing `.json` on the filename is stripped before use as a key.
    #[schemars(schema_with = "inline_files_schema")]
    pub files: BTreeMap<String, serde_json::Value>,
}

/// GitHub archive configuration source
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GithubSource {
    /// GitHub organization or user
    pub org: String,
    /// Repository name
    pub repo: String,
    /// Revision identifier (commit SHA, tag, or branch)
    pub revision: String,
    /// Path prefix inside the archive; entries outside it are skipped
    #[serde(default)]
    pub path: Option<String>,
    /// Name of a Secret in the same namespace whose `token` key holds the
    /// download credential. Falls back to the GITHUB_TOKEN environment
    /// variable, then to anonymous access for public repositories.
    #[serde(default)]
    pub token_secret: Option<String>,
}

/// Structural schema for the inline file map
///
/// The values are arbitrary JSON, which a Kubernetes structural schema can
/// only express through `x-kubernetes-preserve-unknown-fields`.
fn inline_files_schema(_gen: &mut SchemaGenerator) -> Schema {
    let schema_value = serde_json::json!({
        "type": "object",
        "additionalProperties": {
            "x-kubernetes-preserve-unknown-fields": true
        },
        "description": "Mapping from filename to an arbitrary JSON value."
    });
    Schema::try_from(schema_value).expect("Failed to create Schema for inline files")
}

impl Decofile {
    /// Binding key Services use to select this Decofile.
    /// `spec.deploymentId` when set and non-empty, else the resource name.
    pub fn effective_deployment_id(&self) -> String {
        match self.spec.deployment_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.metadata.name.clone().unwrap_or_default(),
        }
    }

    /// Deterministic name of the owned ConfigMap
    pub fn configmap_name(&self) -> String {
        format!(
            "{CONFIGMAP_NAME_PREFIX}{}",
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decofile_with(spec: serde_json::Value) -> Decofile {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "deco.sh/v1alpha1",
            "kind": "Decofile",
            "metadata": { "name": "site", "namespace": "default" },
            "spec": spec,
        }))
        .expect("valid decofile")
    }

    #[test]
    fn deserializes_inline_source() {
        let decofile = decofile_with(serde_json::json!({
            "source": { "inline": { "files": { "a.json": { "x": 1 } } } }
        }));
        match &decofile.spec.source {
            DecofileSource::Inline(inline) => {
                assert_eq!(inline.files["a.json"], serde_json::json!({ "x": 1 }));
            }
            DecofileSource::Github(_) => panic!("expected inline source"),
        }
    }

    #[test]
    fn deserializes_github_source_ignoring_type_field() {
        let decofile = decofile_with(serde_json::json!({
            "source": {
                "type": "github",
                "github": { "org": "deco-sites", "repo": "storefront", "revision": "abc123" }
            }
        }));
        match &decofile.spec.source {
            DecofileSource::Github(github) => {
                assert_eq!(github.org, "deco-sites");
                assert_eq!(github.repo, "storefront");
                assert_eq!(github.revision, "abc123");
                assert_eq!(github.path, None);
            }
            DecofileSource::Inline(_) => panic!("expected github source"),
        }
    }

    #[test]
    fn rejects_ambiguous_source() {
        let result: Result<DecofileSource, _> = serde_json::from_value(serde_json::json!({
            "inline": { "files": {} },
            "github": { "org": "o", "repo": "r", "revision": "v" }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_source_variant() {
        let result: Result<DecofileSource, _> =
            serde_json::from_value(serde_json::json!({ "type": "inline" }));
        assert!(result.is_err());
    }

    #[test]
    fn effective_deployment_id_defaults_to_name() {
        let decofile = decofile_with(serde_json::json!({
            "source": { "inline": { "files": {} } }
        }));
        assert_eq!(decofile.effective_deployment_id(), "site");

        let aliased = decofile_with(serde_json::json!({
            "deploymentId": "storefront-site",
            "source": { "inline": { "files": {} } }
        }));
        assert_eq!(aliased.effective_deployment_id(), "storefront-site");
    }

    #[test]
    fn configmap_name_is_deterministic() {
        let decofile = decofile_with(serde_json::json!({
            "source": { "inline": { "files": {} } }
        }));
        assert_eq!(decofile.configmap_name(), "decofile-site");
    }
}
