//! # Decofile Deletion Validator
//!
//! Denies deletion of a Decofile while any Service in the namespace is still
//! bound to it. A transient failure to list Services fails open: admitting
//! the delete beats orphaning a cluster behind a broken webhook.

use axum::extract::State;
use axum::Json;
use kube::api::ListParams;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::Api;
use tracing::{info, warn};

use super::WebhookContext;
use crate::crd::Decofile;
use crate::knative::Service;
use crate::observability;

/// Validating admission handler for Decofile deletion
pub async fn handler(
    State(ctx): State<WebhookContext>,
    Json(review): Json<AdmissionReview<Decofile>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<Decofile> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed decofile admission review: {}", e);
            observability::metrics::increment_admissions("validate", "invalid");
            return Json(AdmissionResponse::invalid(e).into_review());
        }
    };

    let response = AdmissionResponse::from(&request);
    if request.operation != Operation::Delete {
        observability::metrics::increment_admissions("validate", "allowed");
        return Json(response.into_review());
    }

    // On DELETE the object under review arrives as oldObject
    let Some(decofile) = &request.old_object else {
        observability::metrics::increment_admissions("validate", "allowed");
        return Json(response.into_review());
    };

    let namespace = request.namespace.as_deref().unwrap_or("default");
    let deployment_id = decofile.effective_deployment_id();

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    let listed = match services.list(&ListParams::default()).await {
        Ok(listed) => listed,
        Err(e) => {
            warn!(
                "Failed to list services in '{}' while validating deletion of '{}'; failing open: {}",
                namespace, request.name, e
            );
            observability::metrics::increment_admissions("validate", "allowed");
            return Json(response.into_review());
        }
    };

    let blocking = blocking_services(&listed.items, &deployment_id);
    if blocking.is_empty() {
        info!(
            "Allowing deletion of decofile '{}/{}'; no bound services",
            namespace, request.name
        );
        observability::metrics::increment_admissions("validate", "allowed");
        return Json(response.into_review());
    }

    observability::metrics::increment_admissions("validate", "denied");
    Json(
        response
            .deny(format!(
                "decofile '{}' is still bound by service(s): {}; remove the decofile-inject annotation first",
                request.name,
                blocking.join(", ")
            ))
            .into_review(),
    )
}

/// Names of the Services still bound to `deployment_id`
pub fn blocking_services(services: &[Service], deployment_id: &str) -> Vec<String> {
    services
        .iter()
        .filter(|service| {
            service.injection_requested() && service.deployment_id() == Some(deployment_id)
        })
        .filter_map(|service| service.metadata.name.clone())
        .collect()
}
