//! # Error Policy
//!
//! Maps reconciliation errors onto requeue actions. Transient errors back off
//! exponentially per resource so one broken Decofile never throttles the rest;
//! terminal spec errors requeue lazily to avoid a hot loop the user cannot fix
//! by waiting.

use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS;
use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::Decofile;
use crate::observability;

/// Requeue delay for spec errors only the user can resolve
const INVALID_SPEC_REQUEUE_SECS: u64 = 300;

/// Requeue delay while a referenced credential Secret is missing
const CREDENTIAL_REQUEUE_SECS: u64 = 300;

/// Handle reconciliation errors with per-kind requeue policy
///
/// Back-off state is tracked per resource to avoid cross-resource
/// interference when many resources fail at once.
pub fn handle_reconciliation_error(
    obj: Arc<Decofile>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("default");
    let resource_key = format!("{namespace}/{name}");

    error!("Reconciliation error for {}: {}", resource_key, error);
    observability::metrics::increment_reconciliation_errors();
    observability::metrics::increment_requeues_total(error.requeue_reason());

    let delay = match error {
        ReconcilerError::InvalidSpec(_) => Duration::from_secs(INVALID_SPEC_REQUEUE_SECS),
        ReconcilerError::CredentialMissing(_) => Duration::from_secs(CREDENTIAL_REQUEUE_SECS),
        ReconcilerError::Encoding(_) => {
            Duration::from_secs(DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS)
        }
        // The write that conflicted observes its own retry immediately
        ReconcilerError::ClusterConflict(_) => Duration::from_secs(1),
        // The ConfigMap write already landed; retry the fan-out after a
        // bounded delay
        ReconcilerError::NotifyIncomplete(_) => {
            Duration::from_secs(DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS)
        }
        ReconcilerError::SourceUnavailable(_) | ReconcilerError::Cluster(_) => {
            next_backoff(&ctx, &resource_key)
        }
    };

    info!(
        "Requeueing {} in {}s (reason: {})",
        resource_key,
        delay.as_secs(),
        error.requeue_reason()
    );
    Action::requeue(delay)
}

/// Advance and read the exponential back-off for one resource
fn next_backoff(ctx: &Reconciler, resource_key: &str) -> Duration {
    match ctx.backoff_states.lock() {
        Ok(mut states) => states
            .entry(resource_key.to_string())
            .or_insert_with(|| BackoffState {
                consecutive_errors: 0,
            })
            .next_delay(),
        Err(e) => {
            warn!(
                "Failed to lock backoff_states: {}, using default backoff",
                e
            );
            Duration::from_secs(DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS)
        }
    }
}
