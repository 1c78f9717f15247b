//! # Status Management
//!
//! Updates Decofile status with reconciliation results. Every write re-fetches
//! the resource first so a stale cached copy never clobbers newer status; a
//! 409 from the API server surfaces as a conflict and the key is requeued.

use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use crate::constants::FIELD_MANAGER;
use crate::crd::status::{
    upsert_condition, Condition, GenerationId, CONDITION_PODS_NOTIFIED, CONDITION_READY,
};
use crate::crd::{Decofile, DecofileStatus};
use crate::notifier::NotifyResult;
use crate::source::SourceKind;

/// What a completed reconcile writes back to status
#[derive(Debug)]
pub struct ReconcileOutcome<'a> {
    pub configmap_name: String,
    pub source_kind: SourceKind,
    pub revision: Option<String>,
    pub notify: Option<(&'a NotifyResult, &'a GenerationId)>,
}

/// Mark the fan-out as in flight before launching it
pub async fn set_pods_notified_unknown(
    client: &Client,
    decofile: &Decofile,
    generation: &GenerationId,
) -> Result<(), kube::Error> {
    let namespace = decofile.namespace().unwrap_or_else(|| "default".into());
    let api: Api<Decofile> = Api::namespaced(client.clone(), &namespace);

    // Read before write: the watch copy may be stale
    let Some(fresh) = api.get_opt(&decofile.name_any()).await? else {
        return Ok(());
    };

    let mut conditions = fresh
        .status
        .as_ref()
        .map(|status| status.conditions.clone())
        .unwrap_or_default();
    upsert_condition(
        &mut conditions,
        Condition::new(
            CONDITION_PODS_NOTIFIED,
            "Unknown",
            "NotificationInProgress",
            Some(format!("notifying pods for {generation}")),
        ),
    );

    let patch = serde_json::json!({ "status": { "conditions": conditions } });
    api.patch_status(
        &decofile.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await?;

    Ok(())
}

/// Record a failed reconcile as Ready=False without touching the rest of
/// status; the requeue policy decides when it is retried
pub async fn set_ready_false(
    client: &Client,
    decofile: &Decofile,
    error: &super::ReconcilerError,
) -> Result<(), kube::Error> {
    let namespace = decofile.namespace().unwrap_or_else(|| "default".into());
    let api: Api<Decofile> = Api::namespaced(client.clone(), &namespace);

    let Some(fresh) = api.get_opt(&decofile.name_any()).await? else {
        return Ok(());
    };

    let reason = match error {
        super::ReconcilerError::InvalidSpec(_) => "InvalidSpec",
        super::ReconcilerError::CredentialMissing(_) => "CredentialMissing",
        super::ReconcilerError::SourceUnavailable(_) => "SourceUnavailable",
        super::ReconcilerError::Encoding(_) => "EncodingError",
        _ => "ReconciliationFailed",
    };

    let mut conditions = fresh
        .status
        .as_ref()
        .map(|status| status.conditions.clone())
        .unwrap_or_default();
    upsert_condition(
        &mut conditions,
        Condition::new(CONDITION_READY, "False", reason, Some(error.to_string())),
    );

    let patch = serde_json::json!({ "status": { "conditions": conditions } });
    api.patch_status(
        &decofile.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await?;

    Ok(())
}

/// Persist the final status for this reconcile: bound ConfigMap, source
/// variant, revision, and the Ready/PodsNotified conditions
pub async fn update_reconciled_status(
    client: &Client,
    decofile: &Decofile,
    outcome: &ReconcileOutcome<'_>,
) -> Result<(), kube::Error> {
    let namespace = decofile.namespace().unwrap_or_else(|| "default".into());
    let api: Api<Decofile> = Api::namespaced(client.clone(), &namespace);

    // Read before write: the watch copy may be stale
    let Some(fresh) = api.get_opt(&decofile.name_any()).await? else {
        debug!(
            "Decofile {} disappeared before status write, skipping",
            decofile.name_any()
        );
        return Ok(());
    };

    let mut conditions = fresh
        .status
        .as_ref()
        .map(|status| status.conditions.clone())
        .unwrap_or_default();

    upsert_condition(
        &mut conditions,
        Condition::new(
            CONDITION_READY,
            "True",
            "ConfigMapCreated",
            Some(format!("ConfigMap {} is up to date", outcome.configmap_name)),
        ),
    );

    if let Some((result, generation)) = &outcome.notify {
        let condition = match result.failure_message() {
            None => Condition::new(
                CONDITION_PODS_NOTIFIED,
                "True",
                "NotificationSucceeded",
                Some(format!(
                    "notified {} pods ({} skipped) for {generation}",
                    result.notified, result.skipped
                )),
            ),
            Some(failure) => Condition::new(
                CONDITION_PODS_NOTIFIED,
                "False",
                "NotificationFailed",
                Some(format!("{failure} for {generation}")),
            ),
        };
        upsert_condition(&mut conditions, condition);
    }

    let status = DecofileStatus {
        config_map: Some(outcome.configmap_name.clone()),
        last_updated: Some(chrono::Utc::now().to_rfc3339()),
        source: Some(outcome.source_kind.as_str().to_string()),
        last_seen_revision: outcome.revision.clone(),
        conditions,
        observed_generation: fresh.metadata.generation,
    };

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &decofile.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await?;

    Ok(())
}
