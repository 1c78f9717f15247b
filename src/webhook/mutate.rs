//! # Service Mutator
//!
//! On Service create/update, resolves the bound Decofile and injects the
//! ConfigMap volume, mount, consumer env vars, reload token, and the pod
//! discovery label. Every element upserts by name so repeated admissions of
//! the same Service never duplicate anything.

use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use kube::Api;
use tracing::{info, warn};

use super::WebhookContext;
use crate::constants::{
    APP_CONTAINER_NAME, DEFAULT_MOUNT_PATH, DEPLOYMENT_ID_LABEL, MOUNT_PATH_ANNOTATION,
    POD_SELECTOR_LABEL, RELEASE_ENV_VAR, RELOAD_TOKEN_ENV_VAR, VOLUME_NAME,
};
use crate::crd::Decofile;
use crate::encoding::ContentKey;
use crate::knative::Service;
use crate::observability;

/// Everything the injection needs, resolved before mutation
#[derive(Debug, Clone)]
pub struct Binding {
    pub deployment_id: String,
    pub configmap_name: String,
    pub content_key: ContentKey,
}

/// Mutating admission handler for Knative Services
pub async fn handler(
    State(ctx): State<WebhookContext>,
    Json(review): Json<AdmissionReview<Service>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Service> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed service admission review: {}", e);
            observability::metrics::increment_admissions("mutate", "invalid");
            return Json(AdmissionResponse::invalid(e).into_review());
        }
    };

    let response = AdmissionResponse::from(&request);
    let Some(service) = &request.object else {
        return Json(response.into_review());
    };

    let deployment_id = match injection_precondition(service, &request.name) {
        Precondition::Skip => {
            observability::metrics::increment_admissions("mutate", "allowed");
            return Json(response.into_review());
        }
        Precondition::Deny(reason) => {
            observability::metrics::increment_admissions("mutate", "denied");
            return Json(response.deny(reason).into_review());
        }
        Precondition::Resolve(deployment_id) => deployment_id,
    };

    let namespace = request.namespace.as_deref().unwrap_or("default");
    let binding = match resolve_binding(&ctx, namespace, &deployment_id).await {
        Some(binding) => binding,
        None => {
            // Workload creation is never blocked on operator lag: admit
            // without injection and let the next update catch up
            info!(
                "No bound decofile for deployment '{}' in '{}'; admitting '{}' without injection",
                deployment_id, namespace, request.name
            );
            observability::metrics::increment_admissions("mutate", "allowed");
            return Json(response.into_review());
        }
    };

    let mut mutated = service.clone();
    apply_injection(
        &mut mutated,
        &binding,
        &uuid::Uuid::new_v4().simple().to_string(),
    );

    let patch = match build_patch(service, &mutated) {
        Ok(patch) => patch,
        Err(e) => {
            warn!("Failed to build mutation patch for '{}': {}", request.name, e);
            observability::metrics::increment_admissions("mutate", "invalid");
            return Json(AdmissionResponse::invalid(e).into_review());
        }
    };

    match response.with_patch(patch) {
        Ok(patched) => {
            info!(
                "Injected decofile '{}' into service '{}/{}'",
                binding.configmap_name, namespace, request.name
            );
            observability::metrics::increment_admissions("mutate", "patched");
            Json(patched.into_review())
        }
        Err(e) => {
            warn!("Failed to serialize mutation patch: {}", e);
            observability::metrics::increment_admissions("mutate", "invalid");
            Json(AdmissionResponse::invalid(e).into_review())
        }
    }
}

/// What the admission decided before touching the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Injection not requested; admit unchanged
    Skip,
    /// Injection requested without a binding label; reject with this reason
    Deny(String),
    /// Proceed to binding resolution with this deployment id
    Resolve(String),
}

/// Decide whether a Service admission skips, denies, or resolves a binding
pub fn injection_precondition(service: &Service, name: &str) -> Precondition {
    if !service.injection_requested() {
        return Precondition::Skip;
    }
    match service.deployment_id() {
        Some(deployment_id) => Precondition::Resolve(deployment_id.to_string()),
        None => Precondition::Deny(format!(
            "service '{name}' requests decofile injection but has no '{DEPLOYMENT_ID_LABEL}' label"
        )),
    }
}

/// Find the Decofile bound to `deployment_id` and the encoding its ConfigMap
/// currently stores. Returns None whenever injection cannot proceed; the
/// admission still allows the Service through.
async fn resolve_binding(
    ctx: &WebhookContext,
    namespace: &str,
    deployment_id: &str,
) -> Option<Binding> {
    let decofiles: Api<Decofile> = Api::namespaced(ctx.client.clone(), namespace);
    let listed = match decofiles.list(&ListParams::default()).await {
        Ok(listed) => listed,
        Err(e) => {
            warn!("Failed to list decofiles in '{}': {}", namespace, e);
            return None;
        }
    };

    let decofile = listed
        .items
        .into_iter()
        .find(|decofile| decofile.effective_deployment_id() == deployment_id)?;

    let configmap_name = decofile
        .status
        .as_ref()
        .and_then(|status| status.config_map.clone())?;

    let configmaps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), namespace);
    let configmap = match configmaps.get_opt(&configmap_name).await {
        Ok(Some(configmap)) => configmap,
        Ok(None) => {
            warn!(
                "Decofile '{}' reports ConfigMap '{}' but it does not exist yet",
                deployment_id, configmap_name
            );
            return None;
        }
        Err(e) => {
            warn!("Failed to read ConfigMap '{}': {}", configmap_name, e);
            return None;
        }
    };

    let content_key = content_key_of(&configmap);
    Some(Binding {
        deployment_id: deployment_id.to_string(),
        configmap_name,
        content_key,
    })
}

/// Which encoding the live ConfigMap stores
fn content_key_of(configmap: &ConfigMap) -> ContentKey {
    let has_bin = configmap
        .data
        .as_ref()
        .is_some_and(|data| data.contains_key(ContentKey::Bin.data_key()));
    if has_bin {
        ContentKey::Bin
    } else {
        ContentKey::Json
    }
}

/// Inject volume, mount, env, token, and pod label into the Service.
///
/// Idempotent: elements are upserted by name and the reload token is only
/// written when absent, so re-admitting an already-injected Service changes
/// nothing and never rolls pods.
pub fn apply_injection(service: &mut Service, binding: &Binding, new_token: &str) {
    let mount_path = service
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(MOUNT_PATH_ANNOTATION))
        .cloned()
        .unwrap_or_else(|| DEFAULT_MOUNT_PATH.to_string());

    let template = &mut service.spec.template;
    let pod_spec = template.spec.get_or_insert_with(Default::default);

    // Volume sourced from the bound ConfigMap
    let volume = Volume {
        name: VOLUME_NAME.to_string(),
        config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
            name: binding.configmap_name.clone(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
    match volumes.iter_mut().find(|v| v.name == VOLUME_NAME) {
        Some(existing) => *existing = volume,
        None => volumes.push(volume),
    }

    // Mount and env land on the `app` container, or the first one
    let container_index = pod_spec
        .containers
        .iter()
        .position(|container| container.name == APP_CONTAINER_NAME)
        .unwrap_or(0);
    let Some(container) = pod_spec.containers.get_mut(container_index) else {
        return;
    };

    let mount = VolumeMount {
        name: VOLUME_NAME.to_string(),
        mount_path: mount_path.clone(),
        read_only: Some(true),
        sub_path: None,
        ..Default::default()
    };
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    match mounts.iter_mut().find(|m| m.name == VOLUME_NAME) {
        Some(existing) => *existing = mount,
        None => mounts.push(mount),
    }

    let release = format!(
        "file://{}/decofile.{}",
        mount_path.trim_end_matches('/'),
        binding.content_key.extension()
    );
    let env = container.env.get_or_insert_with(Vec::new);
    upsert_env(env, RELEASE_ENV_VAR, &release);

    // The reload token is a per-pod-template secret, not a per-request nonce:
    // regenerating it on every admission would roll pods for no reason
    let token_present = env
        .iter()
        .any(|var| var.name == RELOAD_TOKEN_ENV_VAR && var.value.as_deref().is_some_and(|v| !v.is_empty()));
    if !token_present {
        upsert_env(env, RELOAD_TOKEN_ENV_VAR, new_token);
    }

    // The notifier's selector label goes on the pod template directly; no
    // reliance on platform-level label propagation
    let template_meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    template_meta
        .labels
        .get_or_insert_with(Default::default)
        .insert(POD_SELECTOR_LABEL.to_string(), binding.deployment_id.clone());
}

fn upsert_env(env: &mut Vec<EnvVar>, name: &str, value: &str) {
    let var = EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    };
    match env.iter_mut().find(|existing| existing.name == name) {
        Some(existing) => *existing = var,
        None => env.push(var),
    }
}

/// JSON patch from the admitted object to its mutated form
fn build_patch(original: &Service, mutated: &Service) -> Result<json_patch::Patch, serde_json::Error> {
    let original = serde_json::to_value(original)?;
    let mutated = serde_json::to_value(mutated)?;
    Ok(json_patch::diff(&original, &mutated))
}
