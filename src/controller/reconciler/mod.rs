//! # Reconciler
//!
//! Drives a Decofile from spec to materialized ConfigMap: resolve the content
//! source, retrieve and encode the document, upsert the ConfigMap, fan the
//! reload out to bound pods on change, and record the outcome on status.
//!
//! Each resource key is processed serially by the controller runtime; nothing
//! here holds state beyond the per-key error back-off.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

pub mod status;

use crate::configmap::{self, ChangeKind, WriteError};
use crate::constants::DEFAULT_RESYNC_SECS;
use crate::crd::status::GenerationId;
use crate::crd::{Decofile, DecofileSource};
use crate::encoding::{encode, EncodingError};
use crate::notifier::{Notifier, NotifyError, NotifyResult};
use crate::observability;
use crate::source::{source_for, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    /// Malformed Decofile; recorded on status and not requeued aggressively
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    /// Referenced credential Secret is absent or unusable
    #[error("credential missing: {0}")]
    CredentialMissing(String),
    /// Network or archive-server failure; retried with back-off
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),
    /// Compression or marshalling failure; should not happen in normal operation
    #[error("encoding failed: {0}")]
    Encoding(String),
    /// Optimistic-concurrency conflict on a status write; requeued immediately
    #[error("conflicting status write: {0}")]
    ClusterConflict(#[source] kube::Error),
    /// Any other cluster API failure
    #[error("cluster API error: {0}")]
    Cluster(#[source] kube::Error),
    /// Fan-out finished degraded; the ConfigMap write stays effective
    #[error("pod notification incomplete: {0}")]
    NotifyIncomplete(String),
}

impl ReconcilerError {
    /// Requeue-reason label for metrics
    pub fn requeue_reason(&self) -> &'static str {
        match self {
            ReconcilerError::InvalidSpec(_) => "invalid-spec",
            ReconcilerError::CredentialMissing(_) => "credential-missing",
            ReconcilerError::SourceUnavailable(_) => "source-unavailable",
            ReconcilerError::Encoding(_) => "encoding",
            ReconcilerError::ClusterConflict(_) => "conflict",
            ReconcilerError::Cluster(_) => "cluster",
            ReconcilerError::NotifyIncomplete(_) => "notify-incomplete",
        }
    }
}

impl From<SourceError> for ReconcilerError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::InvalidSpec(message) => ReconcilerError::InvalidSpec(message),
            SourceError::CredentialMissing(message) => ReconcilerError::CredentialMissing(message),
            SourceError::Unavailable(message) => ReconcilerError::SourceUnavailable(message),
            SourceError::Parse(message) => ReconcilerError::Encoding(message),
        }
    }
}

impl From<EncodingError> for ReconcilerError {
    fn from(error: EncodingError) -> Self {
        ReconcilerError::Encoding(error.to_string())
    }
}

impl From<WriteError> for ReconcilerError {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::MissingOwner => {
                ReconcilerError::InvalidSpec("decofile has no uid yet".to_string())
            }
            WriteError::Cluster(e) => classify_cluster_error(e),
        }
    }
}

impl From<kube::Error> for ReconcilerError {
    fn from(error: kube::Error) -> Self {
        classify_cluster_error(error)
    }
}

impl From<NotifyError> for ReconcilerError {
    fn from(error: NotifyError) -> Self {
        match error {
            NotifyError::Discovery(e) => classify_cluster_error(e),
            NotifyError::Payload(e) => ReconcilerError::Encoding(e.to_string()),
        }
    }
}

fn classify_cluster_error(error: kube::Error) -> ReconcilerError {
    match error {
        kube::Error::Api(ref ae) if ae.code == 409 => ReconcilerError::ClusterConflict(error),
        other => ReconcilerError::Cluster(other),
    }
}

/// Per-resource error back-off state
#[derive(Debug)]
pub struct BackoffState {
    pub consecutive_errors: u32,
}

impl BackoffState {
    /// Exponential delay: 30s doubling per consecutive error, capped at 15m
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.consecutive_errors.min(5);
        self.consecutive_errors += 1;
        Duration::from_secs((30 << exponent).min(900))
    }
}

/// Shared reconciler context
pub struct Reconciler {
    pub client: Client,
    pub http: reqwest::Client,
    pub notifier: Notifier,
    /// Per-resource back-off, keyed `namespace/name`, consulted by the error
    /// policy and cleared on success
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish()
    }
}

impl Reconciler {
    pub fn new(client: Client) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let notifier = Notifier::new(client.clone(), http.clone());
        Ok(Self {
            client,
            http,
            notifier,
            backoff_states: Mutex::new(HashMap::new()),
        })
    }

    /// Forget accumulated errors for a resource after a clean reconcile
    pub fn clear_backoff(&self, key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}

fn change_label(change: ChangeKind) -> &'static str {
    match change {
        ChangeKind::CreatedNew => "created",
        ChangeKind::RewrittenSameEncoding => "rewritten",
        ChangeKind::RewrittenEncodingSwitched => "encoding-switched",
        ChangeKind::Unchanged => "unchanged",
    }
}

/// Reconcile one Decofile event, recording failures on status before the
/// error policy decides the requeue
pub async fn reconcile(
    decofile: Arc<Decofile>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    match reconcile_inner(decofile.clone(), ctx.clone()).await {
        Ok(action) => Ok(action),
        Err(error) => {
            // Conflicts are a status-write race (retried immediately) and a
            // degraded fan-out already settled PodsNotified; everything else
            // surfaces as Ready=False so watchers see why the resource stalled
            if !matches!(
                error,
                ReconcilerError::ClusterConflict(_) | ReconcilerError::NotifyIncomplete(_)
            ) {
                if let Err(e) = status::set_ready_false(&ctx.client, &decofile, &error).await {
                    warn!(
                        "Failed to record error condition for {}: {}",
                        decofile.name_any(),
                        e
                    );
                }
            }
            Err(error)
        }
    }
}

async fn reconcile_inner(
    decofile: Arc<Decofile>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = decofile.name_any();
    let namespace = decofile.namespace().unwrap_or_else(|| "default".into());
    let resource_key = format!("{namespace}/{name}");

    // Deletion cascades to the owned ConfigMap through the owner reference;
    // the deletion validator has already had its say
    if decofile.metadata.deletion_timestamp.is_some() {
        debug!("Decofile {} is terminating, nothing to reconcile", resource_key);
        return Ok(Action::await_change());
    }

    observability::metrics::increment_reconciliations();
    info!("Reconciling decofile {}", resource_key);

    let source = source_for(&decofile, ctx.client.clone(), ctx.http.clone())?;
    let configmaps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);

    // Archive sources skip the download entirely when the stored revision is
    // already the current one and the ConfigMap still exists
    if let DecofileSource::Github(github) = &decofile.spec.source {
        let last_seen = decofile
            .status
            .as_ref()
            .and_then(|status| status.last_seen_revision.as_deref());
        if last_seen == Some(github.revision.as_str())
            && configmaps.get_opt(&decofile.configmap_name()).await?.is_some()
        {
            debug!(
                "Revision {} unchanged for {}, skipping download",
                github.revision, resource_key
            );
            ctx.clear_backoff(&resource_key);
            return Ok(Action::requeue(Duration::from_secs(DEFAULT_RESYNC_SECS)));
        }
    }

    let document = source.retrieve().await?;
    let payload = encode(&document.json)?;
    let (change, timestamp) = configmap::upsert(&configmaps, &decofile, &payload).await?;
    observability::metrics::increment_configmap_writes(change_label(change));

    let generation = match &document.revision {
        Some(revision) => GenerationId::Commit(revision.clone()),
        None => GenerationId::Timestamp(timestamp.clone()),
    };

    let mut notify_outcome: Option<NotifyResult> = None;
    if change.notifies() && !decofile.spec.silent {
        // Flip PodsNotified to Unknown before launching so watchers see the
        // fan-out in flight; the final write settles it
        if let Err(e) =
            status::set_pods_notified_unknown(&ctx.client, &decofile, &generation).await
        {
            warn!(
                "Failed to mark PodsNotified=Unknown for {}: {}",
                resource_key, e
            );
        }

        let result = ctx
            .notifier
            .notify(
                &namespace,
                &decofile.effective_deployment_id(),
                &timestamp,
                &document.json,
            )
            .await?;
        info!(
            "✅ Notified {} pods for {} ({} failed, {} skipped)",
            result.notified, resource_key, result.failed, result.skipped
        );
        notify_outcome = Some(result);
    } else if change.notifies() {
        debug!("Decofile {} is silent, skipping pod notification", resource_key);
    }

    status::update_reconciled_status(
        &ctx.client,
        &decofile,
        &status::ReconcileOutcome {
            configmap_name: decofile.configmap_name(),
            source_kind: source.kind(),
            revision: document.revision.clone(),
            notify: notify_outcome.as_ref().map(|result| (result, &generation)),
        },
    )
    .await?;

    ctx.clear_backoff(&resource_key);

    if let Some(message) = notify_outcome.as_ref().and_then(NotifyResult::failure_message) {
        return Err(ReconcilerError::NotifyIncomplete(message));
    }

    Ok(Action::requeue(Duration::from_secs(DEFAULT_RESYNC_SECS)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut state = BackoffState {
            consecutive_errors: 0,
        };
        assert_eq!(state.next_delay(), Duration::from_secs(30));
        assert_eq!(state.next_delay(), Duration::from_secs(60));
        assert_eq!(state.next_delay(), Duration::from_secs(120));
        assert_eq!(state.next_delay(), Duration::from_secs(240));
        assert_eq!(state.next_delay(), Duration::from_secs(480));
        assert_eq!(state.next_delay(), Duration::from_secs(900));
        assert_eq!(state.next_delay(), Duration::from_secs(900));
    }

    #[test]
    fn source_errors_map_onto_the_error_taxonomy() {
        let invalid: ReconcilerError = SourceError::InvalidSpec("bad".into()).into();
        assert_eq!(invalid.requeue_reason(), "invalid-spec");

        let missing: ReconcilerError = SourceError::CredentialMissing("no token".into()).into();
        assert_eq!(missing.requeue_reason(), "credential-missing");

        let unavailable: ReconcilerError = SourceError::Unavailable("503".into()).into();
        assert_eq!(unavailable.requeue_reason(), "source-unavailable");

        let parse: ReconcilerError = SourceError::Parse("not json".into()).into();
        assert_eq!(parse.requeue_reason(), "encoding");
    }
}
