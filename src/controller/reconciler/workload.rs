//! # Workload Synthesis
//!
//! Builds the desired agent DaemonSet from a `OneAgent` spec and computes the
//! content hash used for drift detection.
//!
//! Everything here is a pure derivation of the spec plus the cluster id. The
//! hash is taken over a canonical JSON rendering of the pod template, with
//! object keys sorted and the order-insensitive lists (tolerations, pull
//! secrets) sorted as well.

use super::types::ReconcilerError;
use crate::config::Platform;
use crate::constants::{
    ANNOTATION_TEMPLATE_HASH, CONTAINER_NAME, DEFAULT_SERVICE_ACCOUNT, LABEL_APP, LABEL_APP_VALUE,
    LABEL_INSTANCE, PULL_SECRET_SUFFIX,
};
use crate::crd::{AgentResource, OneAgentSpec};
use crate::dtclient::CommunicationHost;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, Container, EnvVar, EnvVarSource, ExecAction, HostPathVolumeSource,
    LocalObjectReference, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    ObjectFieldSelector, PodSpec, PodTemplateSpec, Probe, SecretKeySelector, SecurityContext,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

const HOST_ROOT_VOLUME: &str = "host-root";
const HOST_ROOT_MOUNT: &str = "/mnt/root";
const APPARMOR_ANNOTATION: &str = "container.apparmor.security.beta.kubernetes.io/dynatrace-oneagent";

const UNPRIVILEGED_CAPABILITIES: [&str; 15] = [
    "CHOWN",
    "DAC_OVERRIDE",
    "DAC_READ_SEARCH",
    "FOWNER",
    "FSETID",
    "KILL",
    "NET_ADMIN",
    "NET_RAW",
    "SETFCAP",
    "SETGID",
    "SETUID",
    "SYS_ADMIN",
    "SYS_CHROOT",
    "SYS_PTRACE",
    "SYS_RESOURCE",
];

/// Inputs to the synthesis that do not come from the resource
#[derive(Debug, Clone, Copy)]
pub struct WorkloadContext<'a> {
    pub cluster_id: &'a str,
    pub platform: Platform,
    pub operator_version: &'a str,
}

/// Labels selecting the agent pods of one `OneAgent`
#[must_use]
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), LABEL_APP_VALUE.to_string()),
        (LABEL_INSTANCE.to_string(), name.to_string()),
    ])
}

/// Label selector string matching [`selector_labels`]
#[must_use]
pub fn pod_label_selector(name: &str) -> String {
    format!("{}={},{}={}", LABEL_APP, LABEL_APP_VALUE, LABEL_INSTANCE, name)
}

/// Registry host of the tenant, taken from the API URL
pub fn registry_host(api_url: &str) -> Result<String, ReconcilerError> {
    let host = CommunicationHost::parse(api_url)
        .map_err(|e| ReconcilerError::Validation(format!("invalid apiUrl: {e}")))?;
    Ok(host.host)
}

/// Name of the pull secret the operator provisions for immutable images
#[must_use]
pub fn default_pull_secret_name(name: &str) -> String {
    format!("{name}{PULL_SECRET_SUFFIX}")
}

/// Whether the operator provisions the pull secret itself
#[must_use]
pub fn needs_provisioned_pull_secret(spec: &OneAgentSpec) -> bool {
    spec.use_immutable_image
        && spec.image.as_deref().is_none_or(str::is_empty)
        && spec.custom_pull_secret.as_deref().is_none_or(str::is_empty)
}

/// Pull secret the agent pods use, if any
#[must_use]
pub fn pull_secret_name(name: &str, spec: &OneAgentSpec) -> Option<String> {
    if let Some(custom) = spec.custom_pull_secret.as_deref().filter(|s| !s.is_empty()) {
        return Some(custom.to_string());
    }
    (spec.use_immutable_image && spec.image.as_deref().is_none_or(str::is_empty))
        .then(|| default_pull_secret_name(name))
}

/// Image precedence: explicit image, then the version-tagged tenant image
/// in immutable mode, then the platform default
pub fn resolve_image(spec: &OneAgentSpec, platform: Platform) -> Result<String, ReconcilerError> {
    if let Some(image) = spec.image.as_deref().filter(|i| !i.is_empty()) {
        return Ok(image.to_string());
    }
    if spec.use_immutable_image {
        let host = registry_host(&spec.base.api_url)?;
        let tag = spec
            .agent_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or("latest");
        return Ok(format!("{host}/linux/oneagent:{tag}"));
    }
    Ok(platform.default_image().to_string())
}

fn plain_env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..EnvVarSource::default()
        }),
    }
}

fn reserved_env(name: &str, spec: &OneAgentSpec, ctx: &WorkloadContext<'_>) -> Vec<EnvVar> {
    let mut env = Vec::new();

    if !spec.use_immutable_image {
        env.push(plain_env(
            "ONEAGENT_INSTALLER_SCRIPT_URL",
            format!(
                "{}/v1/deployment/installer/agent/unix/default/latest?arch=x86&flavor=default",
                spec.base.api_url.trim_end_matches('/')
            ),
        ));
        env.push(secret_env(
            "ONEAGENT_INSTALLER_TOKEN",
            &spec.base.tokens_secret_name(name),
            crate::constants::SECRET_KEY_PAAS_TOKEN,
        ));
        env.push(plain_env(
            "ONEAGENT_INSTALLER_SKIP_CERT_CHECK",
            spec.base.skip_cert_check.to_string(),
        ));
    }

    if spec.webhook_injection {
        env.push(plain_env("ONEAGENT_DISABLE_CONTAINER_INJECTION", "true"));
    }

    env.push(EnvVar {
        name: "DT_K8S_NODE_NAME".to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "spec.nodeName".to_string(),
                api_version: None,
            }),
            ..EnvVarSource::default()
        }),
    });
    env.push(plain_env("DT_K8S_CLUSTER_ID", ctx.cluster_id));

    if let Some(proxy) = &spec.base.proxy {
        if let Some(secret) = proxy.value_from.as_deref().filter(|s| !s.is_empty()) {
            env.push(secret_env("https_proxy", secret, "proxy"));
        } else if let Some(value) = proxy.value.as_deref().filter(|v| !v.is_empty()) {
            env.push(plain_env("https_proxy", value));
        }
    }

    env
}

/// Merge the user's variables into the reserved ones
///
/// Reserved variables keep their fixed order; a user entry with a reserved
/// name takes that slot with the user's value. Later duplicates are dropped.
/// Remaining user variables follow in their original order.
#[must_use]
pub fn merge_env(reserved: Vec<EnvVar>, user: &[EnvVar]) -> Vec<EnvVar> {
    let reserved_names: BTreeSet<String> = reserved.iter().map(|e| e.name.clone()).collect();
    let mut merged: Vec<EnvVar> = reserved
        .into_iter()
        .map(|var| {
            user.iter()
                .find(|u| u.name == var.name && (u.value.is_some() || u.value_from.is_some()))
                .cloned()
                .unwrap_or(var)
        })
        .collect();
    merged.extend(
        user.iter()
            .filter(|u| !reserved_names.contains(&u.name))
            .cloned(),
    );
    merged
}

fn node_affinity() -> Affinity {
    let term = |prefix: &str| NodeSelectorTerm {
        match_expressions: Some(vec![
            NodeSelectorRequirement {
                key: format!("{prefix}/arch"),
                operator: "In".to_string(),
                values: Some(vec!["amd64".to_string(), "arm64".to_string()]),
            },
            NodeSelectorRequirement {
                key: format!("{prefix}/os"),
                operator: "In".to_string(),
                values: Some(vec!["linux".to_string()]),
            },
        ]),
        match_fields: None,
    };
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![term("beta.kubernetes.io"), term("kubernetes.io")],
            }),
            ..NodeAffinity::default()
        }),
        ..Affinity::default()
    }
}

fn security_context(unprivileged: bool) -> SecurityContext {
    if unprivileged {
        SecurityContext {
            privileged: Some(false),
            capabilities: Some(Capabilities {
                add: Some(UNPRIVILEGED_CAPABILITIES.iter().map(|c| (*c).to_string()).collect()),
                drop: None,
            }),
            ..SecurityContext::default()
        }
    } else {
        SecurityContext {
            privileged: Some(true),
            ..SecurityContext::default()
        }
    }
}

fn container_args(spec: &OneAgentSpec, ctx: &WorkloadContext<'_>) -> Vec<String> {
    let mut args = spec.args.clone();
    if !args.iter().any(|a| a.starts_with("--set-host-property=OperatorVersion=")) {
        args.push(format!(
            "--set-host-property=OperatorVersion={}",
            ctx.operator_version
        ));
    }
    if let Some(zone) = spec.base.network_zone.as_deref().filter(|z| !z.is_empty()) {
        if !args.iter().any(|a| a.starts_with("--set-network-zone=")) {
            args.push(format!("--set-network-zone={zone}"));
        }
    }
    args
}

/// Build the pod template for the agent pods of `name`
pub fn build_pod_template(
    name: &str,
    spec: &OneAgentSpec,
    ctx: &WorkloadContext<'_>,
) -> Result<PodTemplateSpec, ReconcilerError> {
    let image = resolve_image(spec, ctx.platform)?;

    let mut labels = spec.labels.clone();
    labels.extend(selector_labels(name));

    let annotations = spec
        .use_unprivileged_mode
        .then(|| BTreeMap::from([(APPARMOR_ANNOTATION.to_string(), "unconfined".to_string())]));

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(image),
        image_pull_policy: Some("Always".to_string()),
        args: Some(container_args(spec, ctx)),
        env: Some(merge_env(reserved_env(name, spec, ctx), &spec.env)),
        resources: spec.resources.clone(),
        security_context: Some(security_context(spec.use_unprivileged_mode)),
        volume_mounts: Some(vec![VolumeMount {
            name: HOST_ROOT_VOLUME.to_string(),
            mount_path: HOST_ROOT_MOUNT.to_string(),
            ..VolumeMount::default()
        }]),
        readiness_probe: Some(Probe {
            exec: Some(ExecAction {
                command: Some(vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    "grep -q oneagentwatchdo /proc/[0-9]*/stat".to_string(),
                ]),
            }),
            initial_delay_seconds: Some(30),
            period_seconds: Some(30),
            timeout_seconds: Some(1),
            ..Probe::default()
        }),
        ..Container::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        host_network: Some(true),
        host_pid: Some(true),
        host_ipc: Some(true),
        node_selector: (!spec.node_selector.is_empty()).then(|| spec.node_selector.clone()),
        tolerations: (!spec.tolerations.is_empty()).then(|| spec.tolerations.clone()),
        priority_class_name: spec.priority_class_name.clone().filter(|p| !p.is_empty()),
        service_account_name: Some(
            spec.service_account_name
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SERVICE_ACCOUNT.to_string()),
        ),
        dns_policy: Some(
            spec.dns_policy
                .clone()
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "ClusterFirstWithHostNet".to_string()),
        ),
        affinity: Some(node_affinity()),
        image_pull_secrets: pull_secret_name(name, spec).map(|secret| {
            vec![LocalObjectReference { name: secret }]
        }),
        volumes: Some(vec![Volume {
            name: HOST_ROOT_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: "/".to_string(),
                type_: None,
            }),
            ..Volume::default()
        }]),
        ..PodSpec::default()
    };

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            annotations,
            ..ObjectMeta::default()
        }),
        spec: Some(pod_spec),
    })
}

fn sort_array(value: &mut Value, pointer: &str) {
    if let Some(Value::Array(items)) = value.pointer_mut(pointer) {
        items.sort_by_cached_key(Value::to_string);
    }
}

/// Content hash of a pod template, stable across map and list reordering
pub fn template_hash(template: &PodTemplateSpec) -> Result<String, ReconcilerError> {
    let mut value = serde_json::to_value(template)
        .map_err(|e| ReconcilerError::Other(anyhow::anyhow!("failed to serialize pod template: {e}")))?;
    sort_array(&mut value, "/spec/tolerations");
    sort_array(&mut value, "/spec/imagePullSecrets");

    // serde_json maps are ordered by key, so this rendering is canonical
    let canonical = serde_json::to_vec(&value)
        .map_err(|e| ReconcilerError::Other(anyhow::anyhow!("failed to serialize pod template: {e}")))?;
    let digest = Sha256::digest(&canonical);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Desired DaemonSet for `resource`, annotated with its template hash
pub fn build_daemonset<R: AgentResource>(
    resource: &R,
    spec: &OneAgentSpec,
    ctx: &WorkloadContext<'_>,
) -> Result<DaemonSet, ReconcilerError> {
    let name = resource.name_any();
    let template = build_pod_template(&name, spec, ctx)?;
    let hash = template_hash(&template)?;

    Ok(DaemonSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: resource.namespace(),
            labels: Some(selector_labels(&name)),
            annotations: Some(BTreeMap::from([(ANNOTATION_TEMPLATE_HASH.to_string(), hash)])),
            owner_references: resource.controller_owner_ref(&()).map(|r| vec![r]),
            ..ObjectMeta::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                match_expressions: None,
            },
            template,
            ..DaemonSetSpec::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Toleration;

    fn ctx() -> WorkloadContext<'static> {
        WorkloadContext {
            cluster_id: "cluster-uid",
            platform: Platform::Kubernetes,
            operator_version: "0.1.0",
        }
    }

    fn spec() -> OneAgentSpec {
        let mut spec = OneAgentSpec::default();
        spec.base.api_url = "https://tenant.live.dynatrace.com/api".to_string();
        spec.wait_ready_seconds = 300;
        spec
    }

    fn env_names(template: &PodTemplateSpec) -> Vec<String> {
        template.spec.as_ref().unwrap().containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    fn toleration(key: &str) -> Toleration {
        Toleration {
            key: Some(key.to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Toleration::default()
        }
    }

    #[test]
    fn test_reserved_env_order_and_user_override() {
        let mut spec = spec();
        spec.env = vec![
            plain_env("CUSTOM", "1"),
            plain_env("DT_K8S_CLUSTER_ID", "override"),
            plain_env("DT_K8S_CLUSTER_ID", "second"),
        ];
        let template = build_pod_template("oneagent", &spec, &ctx()).unwrap();

        assert_eq!(
            env_names(&template),
            vec![
                "ONEAGENT_INSTALLER_SCRIPT_URL",
                "ONEAGENT_INSTALLER_TOKEN",
                "ONEAGENT_INSTALLER_SKIP_CERT_CHECK",
                "DT_K8S_NODE_NAME",
                "DT_K8S_CLUSTER_ID",
                "CUSTOM",
            ]
        );
        let env = template.spec.unwrap().containers[0].env.clone().unwrap();
        assert_eq!(env[4].value.as_deref(), Some("override"));
    }

    #[test]
    fn test_image_precedence() {
        let mut spec = spec();
        assert_eq!(
            resolve_image(&spec, Platform::Kubernetes).unwrap(),
            crate::constants::DEFAULT_IMAGE_KUBERNETES
        );

        spec.use_immutable_image = true;
        assert_eq!(
            resolve_image(&spec, Platform::Kubernetes).unwrap(),
            "tenant.live.dynatrace.com/linux/oneagent:latest"
        );
        spec.agent_version = Some("1.187".to_string());
        assert_eq!(
            resolve_image(&spec, Platform::Kubernetes).unwrap(),
            "tenant.live.dynatrace.com/linux/oneagent:1.187"
        );

        spec.image = Some("registry.example.com/oneagent:custom".to_string());
        assert_eq!(
            resolve_image(&spec, Platform::OpenShift).unwrap(),
            "registry.example.com/oneagent:custom"
        );
    }

    #[test]
    fn test_hash_ignores_list_ordering_noise() {
        let mut a = spec();
        a.tolerations = vec![toleration("a"), toleration("b")];
        let mut b = spec();
        b.tolerations = vec![toleration("b"), toleration("a")];

        let hash_a = template_hash(&build_pod_template("oneagent", &a, &ctx()).unwrap()).unwrap();
        let hash_b = template_hash(&build_pod_template("oneagent", &b, &ctx()).unwrap()).unwrap();
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn test_hash_changes_with_env_value() {
        let mut a = spec();
        a.env = vec![plain_env("CUSTOM", "1")];
        let mut b = spec();
        b.env = vec![plain_env("CUSTOM", "2")];

        let hash_a = template_hash(&build_pod_template("oneagent", &a, &ctx()).unwrap()).unwrap();
        let hash_b = template_hash(&build_pod_template("oneagent", &b, &ctx()).unwrap()).unwrap();
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn test_unprivileged_mode() {
        let mut spec = spec();
        spec.use_unprivileged_mode = true;
        let template = build_pod_template("oneagent", &spec, &ctx()).unwrap();

        let annotations = template.metadata.as_ref().unwrap().annotations.as_ref().unwrap();
        assert_eq!(annotations.get(APPARMOR_ANNOTATION).map(String::as_str), Some("unconfined"));
        let security = template.spec.unwrap().containers[0].security_context.clone().unwrap();
        assert_eq!(security.privileged, Some(false));
        assert_eq!(security.capabilities.unwrap().add.unwrap().len(), 15);
    }

    #[test]
    fn test_affinity_has_legacy_and_current_terms() {
        let template = build_pod_template("oneagent", &spec(), &ctx()).unwrap();
        let terms = template
            .spec
            .unwrap()
            .affinity
            .unwrap()
            .node_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap()
            .node_selector_terms;
        assert_eq!(terms.len(), 2);
        let keys: Vec<String> = terms
            .iter()
            .flat_map(|t| t.match_expressions.clone().unwrap())
            .map(|r| r.key)
            .collect();
        assert!(keys.contains(&"beta.kubernetes.io/os".to_string()));
        assert!(keys.contains(&"kubernetes.io/arch".to_string()));
    }

    #[test]
    fn test_pull_secret_selection() {
        let mut spec = spec();
        assert_eq!(pull_secret_name("oneagent", &spec), None);
        spec.use_immutable_image = true;
        assert_eq!(pull_secret_name("oneagent", &spec).as_deref(), Some("oneagent-pull-secret"));
        assert!(needs_provisioned_pull_secret(&spec));
        spec.custom_pull_secret = Some("mine".to_string());
        assert_eq!(pull_secret_name("oneagent", &spec).as_deref(), Some("mine"));
        assert!(!needs_provisioned_pull_secret(&spec));
    }
}
