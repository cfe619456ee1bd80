//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! Interval values represent the defaults; most of them can be overridden via
//! environment variables (see [`crate::config::ControllerConfig`]).

/// Field manager name used for all writes issued by the operator
pub const FIELD_MANAGER: &str = "oneagent-operator";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Minimum time between two remote verifications of the same token (seconds)
pub const DEFAULT_TOKEN_PROBE_INTERVAL_SECS: u64 = 5 * 60;

/// Minimum time between two agent version fan-outs over the fleet (seconds)
pub const DEFAULT_UPDATE_PROBE_INTERVAL_SECS: u64 = 15 * 60;

/// Minimum time between two registry digest lookups (seconds)
pub const DEFAULT_IMAGE_PROBE_INTERVAL_SECS: u64 = 15 * 60;

/// Poll interval while waiting for a replacement pod (milliseconds)
pub const DEFAULT_POD_SPLAY_INTERVAL_MS: u64 = 10_000;

/// How long a replacement pod may take to become ready (seconds)
pub const DEFAULT_WAIT_READY_SECS: u64 = 300;

/// Steady-state poll interval when nothing changed (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 30 * 60;

/// Requeue after the Istio configuration was mutated (seconds)
pub const DEFAULT_ISTIO_REQUEUE_SECS: u64 = 30;

/// Requeue after the DaemonSet was created or replaced (seconds)
pub const DEFAULT_WORKLOAD_REQUEUE_SECS: u64 = 5 * 60;

/// Requeue after the monitoring API answered 429 (seconds)
pub const DEFAULT_RATE_LIMIT_REQUEUE_SECS: u64 = 60;

/// Default maximum number of parallel reconciliations across resources
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Annotation on the DaemonSet holding the pod-template hash
pub const ANNOTATION_TEMPLATE_HASH: &str = "dynatrace.com/template-hash";

/// Pod label carried by every agent pod
pub const LABEL_APP: &str = "dynatrace";
pub const LABEL_APP_VALUE: &str = "oneagent";
/// Pod label naming the owning `OneAgent`
pub const LABEL_INSTANCE: &str = "oneagent";

/// Labels on Istio objects used to find stale ones
pub const LABEL_ISTIO_OWNER: &str = "dynatrace-istio-owner";
pub const LABEL_ISTIO_ROLE: &str = "dynatrace-istio-role";
pub const ISTIO_ROLE_API_URL: &str = "api-url";
pub const ISTIO_ROLE_COMMUNICATION_ENDPOINT: &str = "communication-endpoint";

/// Secret keys holding the two tokens
pub const SECRET_KEY_API_TOKEN: &str = "apiToken";
pub const SECRET_KEY_PAAS_TOKEN: &str = "paasToken";

/// Scopes each token must carry
pub const SCOPE_DATA_EXPORT: &str = "DataExport";
pub const SCOPE_INSTALLER_DOWNLOAD: &str = "InstallerDownload";

/// Name of the agent container inside the DaemonSet
pub const CONTAINER_NAME: &str = "dynatrace-oneagent";

/// Default service account for agent pods
pub const DEFAULT_SERVICE_ACCOUNT: &str = "dynatrace-oneagent";

/// Default images when neither an explicit image nor immutable mode applies
pub const DEFAULT_IMAGE_KUBERNETES: &str = "docker.io/dynatrace/oneagent:latest";
pub const DEFAULT_IMAGE_OPENSHIFT: &str = "registry.connect.redhat.com/dynatrace/oneagent";

/// Image config label carrying the agent build version
pub const IMAGE_VERSION_LABEL: &str = "com.dynatrace.build-version";

/// Suffix of the pull secret provisioned for immutable images
pub const PULL_SECRET_SUFFIX: &str = "-pull-secret";

/// Installer OS and types for the latest-version query
pub const OS_UNIX: &str = "unix";
pub const INSTALLER_TYPE_DEFAULT: &str = "default";
pub const INSTALLER_TYPE_PAAS: &str = "paas";
