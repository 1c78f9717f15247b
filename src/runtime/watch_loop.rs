//! # Watch Loop
//!
//! Runs the controller: watches Decofile resources, owns their ConfigMaps for
//! cascade visibility, and dispatches each event to the reconciler with the
//! error policy deciding requeues.

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube_runtime::controller::Controller;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{error, info};

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::Decofile;
use crate::runtime::error_policy::handle_reconciliation_error;

/// Run the controller watch loop until the process exits
pub async fn run_watch_loop(
    decofiles: Api<Decofile>,
    reconciler: Arc<Reconciler>,
) -> Result<()> {
    let owned_configmaps: Api<ConfigMap> = Api::all(reconciler.client.clone());

    Controller::new(decofiles, watcher::Config::default())
        .owns(owned_configmaps, watcher::Config::default())
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, _action)) => info!("✅ reconciled {}", object.name),
                Err(e) => error!("❌ reconcile failed: {e:?}"),
            }
        })
        .await;

    Ok(())
}
