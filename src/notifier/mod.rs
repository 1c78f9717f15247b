//! # Pod Notifier
//!
//! After a content change, tells every bound pod to reload: discovers pods by
//! the `decofile=<deploymentId>` label, re-reads each one by name for fresh
//! IP/phase data, then fans out authenticated HTTP POSTs under a bounded
//! worker pool with per-pod retries and a single global deadline.
//!
//! Pod churn is normal here: a pod that vanished or is not Running is a skip,
//! never a failure.

use bytes::Bytes;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::{
    env_var_or_default, APP_CONTAINER_NAME, DEFAULT_NOTIFY_CONCURRENCY,
    DEFAULT_NOTIFY_DEADLINE_SECS, DEFAULT_RELOAD_PORT, NOTIFY_MAX_ATTEMPTS,
    NOTIFY_REQUEST_TIMEOUT_SECS, NOTIFY_RETRY_BACKOFF_SECS, POD_SELECTOR_LABEL, RELOAD_PATH,
    RELOAD_TOKEN_ENV_VAR,
};
use crate::observability;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to list pods: {0}")]
    Discovery(#[from] kube::Error),
    #[error("failed to marshal reload payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// One pod the fan-out will POST to
#[derive(Debug, Clone)]
pub struct PodTarget {
    pub name: String,
    pub url: String,
    pub token: Option<String>,
}

/// Why a discovered pod was not notified; skips are not failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Vanished,
    NotRunning,
    NoIp,
}

/// Aggregate outcome of one fan-out
#[derive(Debug, Default)]
pub struct NotifyResult {
    pub notified: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub timed_out: bool,
}

impl NotifyResult {
    /// Compact failure summary, or None when every pod succeeded or skipped
    pub fn failure_message(&self) -> Option<String> {
        if self.timed_out {
            return Some(format!(
                "notification deadline elapsed after {} of {} pods succeeded",
                self.notified,
                self.notified + self.failed
            ));
        }
        if self.failed > 0 {
            return Some(format!(
                "{} of {} pods failed: {}",
                self.failed,
                self.notified + self.failed,
                self.errors.join("; ")
            ));
        }
        None
    }
}

#[derive(Serialize)]
struct ReloadRequest<'a> {
    timestamp: &'a str,
    source: &'a str,
    decofile: &'a serde_json::value::RawValue,
}

/// Marshal the reload body once; every pod request shares these bytes
pub fn build_body(timestamp: &str, document_json: &str) -> Result<Bytes, serde_json::Error> {
    let decofile: &serde_json::value::RawValue = serde_json::from_str(document_json)?;
    let body = serde_json::to_vec(&ReloadRequest {
        timestamp,
        source: "operator",
        decofile,
    })?;
    Ok(Bytes::from(body))
}

/// Resolve a freshly-read pod into a target, or a reason to skip it
pub fn target_from_pod(pod: &Pod) -> Result<PodTarget, SkipReason> {
    let name = pod.metadata.name.clone().unwrap_or_default();

    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref());
    if phase != Some("Running") {
        return Err(SkipReason::NotRunning);
    }

    let ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
        .ok_or(SkipReason::NoIp)?;

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();

    let port = containers
        .first()
        .and_then(|container| container.ports.as_ref())
        .and_then(|ports| ports.first())
        .map_or(DEFAULT_RELOAD_PORT, |port| port.container_port);

    // The reload token lives on the container the mutator injected into:
    // the one named `app`, else the first
    let token = containers
        .iter()
        .find(|container| container.name == APP_CONTAINER_NAME)
        .or_else(|| containers.first())
        .and_then(|container| container.env.as_ref())
        .and_then(|env| {
            env.iter()
                .find(|var| var.name == RELOAD_TOKEN_ENV_VAR)
                .and_then(|var| var.value.clone())
        })
        .filter(|token| !token.is_empty());

    Ok(PodTarget {
        name,
        url: format!("http://{ip}:{port}{RELOAD_PATH}"),
        token,
    })
}

/// Notifier shared by all reconciles
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    http: reqwest::Client,
    concurrency: usize,
    deadline: Duration,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("concurrency", &self.concurrency)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Notifier {
    pub fn new(client: Client, http: reqwest::Client) -> Self {
        Self {
            client,
            http,
            concurrency: env_var_or_default("NOTIFY_CONCURRENCY", DEFAULT_NOTIFY_CONCURRENCY),
            deadline: Duration::from_secs(env_var_or_default(
                "NOTIFY_DEADLINE_SECS",
                DEFAULT_NOTIFY_DEADLINE_SECS,
            )),
        }
    }

    /// Fan the reload request out to every pod bound to `deployment_id`
    pub async fn notify(
        &self,
        namespace: &str,
        deployment_id: &str,
        timestamp: &str,
        document_json: &str,
    ) -> Result<NotifyResult, NotifyError> {
        let body = build_body(timestamp, document_json)?;
        let (targets, skipped) = self.discover_targets(namespace, deployment_id).await?;

        info!(
            "Notifying {} pods for deployment '{}' in '{}' ({} skipped at discovery)",
            targets.len(),
            deployment_id,
            namespace,
            skipped
        );

        let mut result = fan_out(
            &self.http,
            targets,
            body,
            self.concurrency,
            self.deadline,
        )
        .await;
        result.skipped += skipped;

        observability::metrics::increment_pods_notified(result.notified as u64);
        observability::metrics::increment_pod_notify_failures(result.failed as u64);

        Ok(result)
    }

    /// List pods by label, then re-read each by NAME so IP/phase/env are
    /// fresh, not the cached list view
    async fn discover_targets(
        &self,
        namespace: &str,
        deployment_id: &str,
    ) -> Result<(Vec<PodTarget>, usize), kube::Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{POD_SELECTOR_LABEL}={deployment_id}");
        let listed = pods.list(&ListParams::default().labels(&selector)).await?;

        let mut targets = Vec::new();
        let mut skipped = 0;
        for pod in listed {
            let Some(name) = pod.metadata.name else {
                continue;
            };
            let Some(fresh) = pods.get_opt(&name).await? else {
                debug!("Pod {} vanished before notification, skipping", name);
                skipped += 1;
                continue;
            };
            match target_from_pod(&fresh) {
                Ok(target) => targets.push(target),
                Err(reason) => {
                    debug!("Skipping pod {} ({reason:?})", name);
                    skipped += 1;
                }
            }
        }
        Ok((targets, skipped))
    }
}

/// Drain all targets through a bounded pool of in-flight requests under one
/// global deadline. Elapsing the deadline cancels in-flight requests and
/// returns the partial tallies.
pub async fn fan_out(
    http: &reqwest::Client,
    targets: Vec<PodTarget>,
    body: Bytes,
    concurrency: usize,
    deadline: Duration,
) -> NotifyResult {
    let tallies: Mutex<NotifyResult> = Mutex::new(NotifyResult::default());

    let drain = futures::stream::iter(targets.into_iter().map(|target| {
        let http = http.clone();
        let body = body.clone();
        async move {
            let outcome = notify_pod(&http, &target, body).await;
            (target.name, outcome)
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .for_each(|(name, outcome)| {
        {
            let mut tallies = tallies.lock().expect("tallies lock");
            match outcome {
                Ok(()) => tallies.notified += 1,
                Err(cause) => {
                    warn!("Pod {} reload failed: {}", name, cause);
                    tallies.failed += 1;
                    tallies.errors.push(format!("{name}: {cause}"));
                }
            }
        }
        futures::future::ready(())
    });

    let timed_out = tokio::time::timeout(deadline, drain).await.is_err();

    let mut result = tallies.into_inner().expect("tallies lock");
    result.timed_out = timed_out;
    result
}

/// POST the reload to one pod, retrying up to the attempt budget with a
/// doubling back-off between attempts
async fn notify_pod(http: &reqwest::Client, target: &PodTarget, body: Bytes) -> Result<(), String> {
    let mut backoff = Duration::from_secs(NOTIFY_RETRY_BACKOFF_SECS);
    let mut last_error = String::new();

    for attempt in 1..=NOTIFY_MAX_ATTEMPTS {
        if attempt > 1 {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        let mut request = http
            .post(&target.url)
            .timeout(Duration::from_secs(NOTIFY_REQUEST_TIMEOUT_SECS))
            .header("Content-Type", "application/json")
            .body(body.clone());
        if let Some(token) = &target.token {
            request = request.header("Authorization", format!("Token {token}"));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    "Pod {} acknowledged reload (attempt {})",
                    target.name, attempt
                );
                return Ok(());
            }
            Ok(response) => {
                last_error = format!("status {}", response.status());
            }
            Err(e) => {
                last_error = if e.is_timeout() {
                    "request timed out".to_string()
                } else {
                    format!("request error: {e}")
                };
            }
        }
    }

    Err(last_error)
}
