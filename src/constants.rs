//! # Constants
//!
//! Platform contract values and tunable defaults for the decofile operator.

/// ConfigMap key for the uncompressed JSON document
pub const CONTENT_KEY_JSON: &str = "decofile.json";

/// ConfigMap key for the base64(brotli(JSON)) document
pub const CONTENT_KEY_BIN: &str = "decofile.bin";

/// ConfigMap key carrying the Unix-second write timestamp
pub const TIMESTAMP_KEY: &str = "timestamp.txt";

/// Documents larger than this are brotli-compressed before storage (2.5 MiB)
pub const COMPRESSION_THRESHOLD_BYTES: usize = 2_621_440;

/// Prefix for the ConfigMap owned by a Decofile: `decofile-<name>`
pub const CONFIGMAP_NAME_PREFIX: &str = "decofile-";

/// Service annotation that opts a workload into injection
pub const INJECT_ANNOTATION: &str = "decofile-inject";

/// Service annotation overriding the in-container mount directory
pub const MOUNT_PATH_ANNOTATION: &str = "decofile-mount-path";

/// Service label naming the Decofile binding key
pub const DEPLOYMENT_ID_LABEL: &str = "deploymentId";

/// Pod-template label the notifier selects on: `decofile=<deploymentId>`
pub const POD_SELECTOR_LABEL: &str = "decofile";

/// Name of the injected volume sourced from the owned ConfigMap
pub const VOLUME_NAME: &str = "decofile-config";

/// Default mount directory inside the workload container
pub const DEFAULT_MOUNT_PATH: &str = "/app/decofile";

/// Container the mutator prefers when injecting mounts and env vars
pub const APP_CONTAINER_NAME: &str = "app";

/// Env var pointing the workload at its mounted document
pub const RELEASE_ENV_VAR: &str = "DECO_RELEASE";

/// Env var holding the per-pod-template reload authorization token
pub const RELOAD_TOKEN_ENV_VAR: &str = "DECO_RELEASE_RELOAD_TOKEN";

/// Process-wide fallback credential for codeload downloads
pub const GITHUB_TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Key inside a referenced credential Secret holding the token
pub const TOKEN_SECRET_KEY: &str = "token";

/// Reload endpoint path the workload serves
pub const RELOAD_PATH: &str = "/.decofile/reload";

/// Port used when a pod declares no containerPort
pub const DEFAULT_RELOAD_PORT: i32 = 8000;

/// Per-pod notification attempts (initial request plus retries)
pub const NOTIFY_MAX_ATTEMPTS: u32 = 3;

/// Initial per-pod retry back-off, doubled on each retry
pub const NOTIFY_RETRY_BACKOFF_SECS: u64 = 2;

/// Per-request notification timeout
pub const NOTIFY_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default in-flight request bound across the fan-out
pub const DEFAULT_NOTIFY_CONCURRENCY: usize = 10;

/// Default wall-clock deadline covering the entire fan-out
pub const DEFAULT_NOTIFY_DEADLINE_SECS: u64 = 120;

/// Default HTTP port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP port for the admission webhook endpoints
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// How long to wait for the HTTP server to be ready before giving up
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 30;

/// How often to check if the HTTP server is ready during startup
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 100;

/// Requeue delay when an error has no dedicated policy
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Requeue delay after a successful reconcile
pub const DEFAULT_RESYNC_SECS: u64 = 300;

/// Field manager used for all server-side patches
pub const FIELD_MANAGER: &str = "decofile-operator";

/// Read environment variable or return default value
pub fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
