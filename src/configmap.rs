//! # ConfigMap Writer
//!
//! Materializes an encoded payload into the Decofile's owned ConfigMap with
//! deterministic change detection. Change detection compares the stored string
//! for the selected content key (never parsed JSON) and treats an encoding
//! switch as a change in its own right.

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::constants::{FIELD_MANAGER, TIMESTAMP_KEY};
use crate::crd::Decofile;
use crate::encoding::{ContentKey, Payload};

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("decofile has no uid yet; cannot own a ConfigMap")]
    MissingOwner,
    #[error(transparent)]
    Cluster(#[from] kube::Error),
}

/// What the upsert did to the stored content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// No ConfigMap existed; pods bind on startup, no notification
    CreatedNew,
    /// Content replaced under the same content key
    RewrittenSameEncoding,
    /// Content crossed the compression threshold in either direction
    RewrittenEncodingSwitched,
    /// Stored content already matches; timestamp preserved verbatim
    Unchanged,
}

impl ChangeKind {
    /// Whether this write should trigger the pod fan-out
    pub fn notifies(self) -> bool {
        matches!(
            self,
            ChangeKind::RewrittenSameEncoding | ChangeKind::RewrittenEncodingSwitched
        )
    }
}

/// Compare the intended payload against the existing ConfigMap data
pub fn detect_change(existing: Option<&BTreeMap<String, String>>, payload: &Payload) -> ChangeKind {
    let Some(data) = existing else {
        return ChangeKind::CreatedNew;
    };

    match data.get(payload.key.data_key()) {
        Some(stored) if stored == &payload.value => ChangeKind::Unchanged,
        Some(_) => ChangeKind::RewrittenSameEncoding,
        None => {
            let other = match payload.key {
                ContentKey::Json => ContentKey::Bin,
                ContentKey::Bin => ContentKey::Json,
            };
            if data.contains_key(other.data_key()) {
                ChangeKind::RewrittenEncodingSwitched
            } else {
                // Neither content key present; treat as a plain rewrite
                ChangeKind::RewrittenSameEncoding
            }
        }
    }
}

/// Unix-second timestamp for a fresh write, strictly after the previous one
pub fn next_timestamp(previous: Option<&str>) -> String {
    let now = chrono::Utc::now().timestamp();
    let floor = previous
        .and_then(|p| p.trim().parse::<i64>().ok())
        .map_or(now, |prev| prev + 1);
    now.max(floor).to_string()
}

/// Create or update the Decofile's ConfigMap.
///
/// Returns what changed and the `timestamp.txt` value now stored. On
/// `Unchanged` nothing is written and the existing timestamp is returned
/// verbatim so downstream polling stays idempotent.
pub async fn upsert(
    api: &Api<ConfigMap>,
    decofile: &Decofile,
    payload: &Payload,
) -> Result<(ChangeKind, String), WriteError> {
    let name = decofile.configmap_name();
    let existing = api.get_opt(&name).await?;

    let change = detect_change(existing.as_ref().and_then(|cm| cm.data.as_ref()), payload);

    let previous_timestamp = existing
        .as_ref()
        .and_then(|cm| cm.data.as_ref())
        .and_then(|data| data.get(TIMESTAMP_KEY))
        .cloned();

    if change == ChangeKind::Unchanged {
        debug!("ConfigMap {} content unchanged, skipping write", name);
        let timestamp = previous_timestamp.unwrap_or_else(|| next_timestamp(None));
        return Ok((change, timestamp));
    }

    let timestamp = next_timestamp(previous_timestamp.as_deref());

    let owner = decofile
        .controller_owner_ref(&())
        .ok_or(WriteError::MissingOwner)?;

    let desired = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: decofile.metadata.namespace.clone(),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (payload.key.data_key().to_string(), payload.value.clone()),
            (TIMESTAMP_KEY.to_string(), timestamp.clone()),
        ])),
        ..Default::default()
    };

    // Server-side apply with a single field manager: on an encoding switch the
    // previously-applied content key falls out of the object because this
    // manager no longer asserts it
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&desired),
    )
    .await?;

    info!(
        "ConfigMap {} written ({:?}, key {}, timestamp {})",
        name,
        change,
        payload.key.data_key(),
        timestamp
    );

    Ok((change, timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(key: ContentKey, value: &str) -> Payload {
        Payload {
            key,
            value: value.to_string(),
        }
    }

    fn data(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn absent_configmap_is_created_new() {
        let change = detect_change(None, &payload(ContentKey::Json, "{}"));
        assert_eq!(change, ChangeKind::CreatedNew);
        assert!(!change.notifies());
    }

    #[test]
    fn identical_content_is_unchanged() {
        let existing = data(&[("decofile.json", r#"{"a":1}"#), ("timestamp.txt", "1722470400")]);
        let change = detect_change(Some(&existing), &payload(ContentKey::Json, r#"{"a":1}"#));
        assert_eq!(change, ChangeKind::Unchanged);
        assert!(!change.notifies());
    }

    #[test]
    fn different_content_same_key_is_rewritten() {
        let existing = data(&[("decofile.json", r#"{"a":1}"#), ("timestamp.txt", "1722470400")]);
        let change = detect_change(Some(&existing), &payload(ContentKey::Json, r#"{"a":2}"#));
        assert_eq!(change, ChangeKind::RewrittenSameEncoding);
        assert!(change.notifies());
    }

    #[test]
    fn crossing_the_threshold_is_an_encoding_switch() {
        let existing = data(&[("decofile.json", r#"{"a":1}"#), ("timestamp.txt", "1722470400")]);
        let change = detect_change(Some(&existing), &payload(ContentKey::Bin, "aGVsbG8="));
        assert_eq!(change, ChangeKind::RewrittenEncodingSwitched);
        assert!(change.notifies());

        let existing = data(&[("decofile.bin", "aGVsbG8="), ("timestamp.txt", "1722470400")]);
        let change = detect_change(Some(&existing), &payload(ContentKey::Json, "{}"));
        assert_eq!(change, ChangeKind::RewrittenEncodingSwitched);
    }

    #[test]
    fn formatting_identical_strings_do_not_rewrite() {
        // Change detection is raw string comparison, not JSON equality:
        // a reordered-but-equal document is a rewrite, an identical string
        // never is.
        let existing = data(&[("decofile.json", r#"{"a":1,"b":2}"#)]);
        let change = detect_change(Some(&existing), &payload(ContentKey::Json, r#"{"b":2,"a":1}"#));
        assert_eq!(change, ChangeKind::RewrittenSameEncoding);
    }

    #[test]
    fn next_timestamp_is_strictly_increasing() {
        let now = chrono::Utc::now().timestamp();
        let far_future = (now + 1000).to_string();
        assert_eq!(
            next_timestamp(Some(&far_future)),
            (now + 1001).to_string(),
            "a previous timestamp at or ahead of the clock still advances"
        );

        let past = (now - 1000).to_string();
        let fresh: i64 = next_timestamp(Some(&past)).parse().expect("numeric");
        assert!(fresh >= now);

        let initial: i64 = next_timestamp(None).parse().expect("numeric");
        assert!(initial >= now);
    }

    #[test]
    fn unparseable_previous_timestamp_falls_back_to_now() {
        let now = chrono::Utc::now().timestamp();
        let fresh: i64 = next_timestamp(Some("garbage")).parse().expect("numeric");
        assert!(fresh >= now);
    }
}
