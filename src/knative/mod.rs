//! # Knative Service Types
//!
//! Minimal typed model of `serving.knative.dev/v1 Service`, covering the
//! fields the admission mutator touches. The revision template's pod spec is
//! the core-v1 `PodSpec`, which is what Knative embeds.

use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::{DEPLOYMENT_ID_LABEL, INJECT_ANNOTATION};

/// Knative Service spec
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Service",
    group = "serving.knative.dev",
    version = "v1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KnativeServiceSpec {
    /// Revision template stamped out for each configuration generation
    #[serde(default)]
    pub template: RevisionTemplateSpec,
}

/// Pod template of a Knative revision
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "opaque_object_schema")]
    pub metadata: Option<ObjectMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "opaque_object_schema")]
    pub spec: Option<PodSpec>,
}

/// `ObjectMeta` and `PodSpec` come from k8s-openapi, which does not implement
/// `JsonSchema`; the admission path never needs a generated schema for them
fn opaque_object_schema(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
    let schema_value = serde_json::json!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    });
    schemars::Schema::try_from(schema_value).expect("Failed to create opaque object Schema")
}

impl Service {
    /// Whether this Service opted into Decofile injection
    pub fn injection_requested(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(INJECT_ANNOTATION))
            .is_some_and(|value| value == "true")
    }

    /// The binding key this Service declares, when present
    pub fn deployment_id(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(DEPLOYMENT_ID_LABEL))
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_from(value: serde_json::Value) -> Service {
        serde_json::from_value(value).expect("valid service")
    }

    #[test]
    fn injection_requires_exact_true() {
        let service = service_from(serde_json::json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": {
                "name": "web",
                "annotations": { "decofile-inject": "true" },
                "labels": { "deploymentId": "site" }
            },
            "spec": {}
        }));
        assert!(service.injection_requested());
        assert_eq!(service.deployment_id(), Some("site"));

        let opted_out = service_from(serde_json::json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": { "name": "web", "annotations": { "decofile-inject": "false" } },
            "spec": {}
        }));
        assert!(!opted_out.injection_requested());
        assert_eq!(opted_out.deployment_id(), None);
    }

    #[test]
    fn unknown_fields_in_the_wire_object_are_tolerated() {
        let service = service_from(serde_json::json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": { "name": "web" },
            "spec": {
                "template": {
                    "metadata": { "annotations": { "autoscaling.knative.dev/target": "20" } },
                    "spec": {
                        "containers": [{ "name": "app", "image": "example/web:1" }],
                        "containerConcurrency": 0
                    }
                }
            },
            "status": { "url": "https://web.example.com" }
        }));
        let template = &service.spec.template;
        let spec = template.spec.as_ref().expect("pod spec");
        assert_eq!(spec.containers[0].name, "app");
    }
}
