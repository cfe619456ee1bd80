//! In-process object store
//!
//! Keeps objects as JSON values keyed by kind, namespace and name and records
//! every mutation so that callers can assert on exactly what was written.
//! Optionally simulates the DaemonSet controller by respawning deleted pods.

use super::{object_key, ObjectStore, StoreError, StoreObject};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

type ObjectKey = (String, String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    Create,
    Update,
    Delete,
    UpdateStatus,
}

/// One write issued against the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub op: MutationOp,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, Value>>,
    mutations: Mutex<Vec<Mutation>>,
    installed_kinds: Mutex<BTreeSet<String>>,
    cluster_id: String,
    respawn_pods: AtomicBool,
    fail_status_updates: AtomicBool,
    resource_version: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key_of<K: StoreObject>(namespace: &str, name: &str) -> ObjectKey {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

/// Matches `k=v` and bare `k` (exists) terms joined by commas
fn matches_selector(labels: Option<&Value>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let labels = labels.and_then(Value::as_object);
            match term.split_once('=') {
                Some((key, expected)) => labels
                    .and_then(|l| l.get(key.trim_end_matches('=')))
                    .and_then(Value::as_str)
                    == Some(expected.trim_start_matches('=')),
                None => labels.is_some_and(|l| l.contains_key(term)),
            }
        })
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            mutations: Mutex::new(Vec::new()),
            installed_kinds: Mutex::new(BTreeSet::new()),
            cluster_id: uuid::Uuid::new_v4().to_string(),
            respawn_pods: AtomicBool::new(false),
            fail_status_updates: AtomicBool::new(false),
            resource_version: AtomicU64::new(1),
        }
    }

    /// Use a fixed cluster id instead of a random one
    #[must_use]
    pub fn with_cluster_id(mut self, cluster_id: &str) -> Self {
        self.cluster_id = cluster_id.to_string();
        self
    }

    /// Recreate deleted pods on the same node, running and ready
    pub fn set_respawn_pods(&self, enabled: bool) {
        self.respawn_pods.store(enabled, Ordering::SeqCst);
    }

    /// Reject every status write with an API error
    pub fn set_fail_status_updates(&self, enabled: bool) {
        self.fail_status_updates.store(enabled, Ordering::SeqCst);
    }

    /// Mark the API serving `K` as installed
    pub fn install_kind<K: StoreObject>(&self) {
        lock(&self.installed_kinds).insert(K::kind(&()).to_string());
    }

    /// Seed an object without recording a mutation, the way objects written
    /// by other controllers appear
    pub fn insert<K: StoreObject>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = object_key(obj)?;
        let mut value = serde_json::to_value(obj)?;
        self.stamp(&mut value, true);
        lock(&self.objects).insert(key_of::<K>(&namespace, &name), value);
        Ok(())
    }

    /// All mutations since creation or the last [`MemoryStore::clear_mutations`]
    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        lock(&self.mutations).clone()
    }

    pub fn clear_mutations(&self) {
        lock(&self.mutations).clear();
    }

    /// Mutations of one kind and operation
    #[must_use]
    pub fn mutations_of(&self, kind: &str, op: MutationOp) -> Vec<Mutation> {
        lock(&self.mutations)
            .iter()
            .filter(|m| m.kind == kind && m.op == op)
            .cloned()
            .collect()
    }

    fn record(&self, op: MutationOp, key: &ObjectKey) {
        lock(&self.mutations).push(Mutation {
            op,
            kind: key.0.clone(),
            namespace: key.1.clone(),
            name: key.2.clone(),
        });
    }

    fn next_resource_version(&self) -> String {
        self.resource_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn stamp(&self, value: &mut Value, new_uid: bool) {
        let resource_version = self.next_resource_version();
        if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            if new_uid || !meta.contains_key("uid") {
                meta.insert("uid".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
            }
            meta.insert("resourceVersion".to_string(), Value::String(resource_version));
        }
    }

    fn not_found(key: &ObjectKey) -> StoreError {
        StoreError::NotFound {
            kind: key.0.clone(),
            namespace: key.1.clone(),
            name: key.2.clone(),
        }
    }

    fn respawn_pod(&self, objects: &mut BTreeMap<ObjectKey, Value>, mut pod: Value, key: &ObjectKey) {
        let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(5).collect();
        let base = pod
            .pointer("/metadata/generateName")
            .and_then(Value::as_str)
            .map_or_else(|| format!("{}-", key.2), str::to_string);
        let name = format!("{base}{suffix}");

        if let Some(meta) = pod.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("name".to_string(), Value::String(name.clone()));
        }
        let containers: Vec<Value> = pod
            .pointer("/spec/containers")
            .and_then(Value::as_array)
            .map(|containers| {
                containers
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "name": c.get("name").cloned().unwrap_or_default(),
                            "image": c.get("image").cloned().unwrap_or_else(|| Value::String(String::new())),
                            "imageID": "",
                            "ready": true,
                            "restartCount": 0,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let host_ip = pod.pointer("/status/hostIP").cloned().unwrap_or(Value::Null);
        if let Some(obj) = pod.as_object_mut() {
            obj.insert(
                "status".to_string(),
                serde_json::json!({
                    "phase": "Running",
                    "hostIP": host_ip,
                    "containerStatuses": containers,
                }),
            );
        }
        self.stamp(&mut pod, true);
        objects.insert((key.0.clone(), key.1.clone(), name), pod);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let value = lock(&self.objects).get(&key_of::<K>(namespace, name)).cloned();
        value.map(|v| serde_json::from_value(v).map_err(StoreError::from)).transpose()
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let kind = K::kind(&()).to_string();
        let values: Vec<Value> = lock(&self.objects)
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && (namespace.is_empty() || ns == namespace))
            .filter(|(_, v)| matches_selector(v.pointer("/metadata/labels"), label_selector))
            .map(|(_, v)| v.clone())
            .collect();
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let key = key_of::<K>(&namespace, &name);
        let mut value = serde_json::to_value(obj)?;
        {
            let mut objects = lock(&self.objects);
            if objects.contains_key(&key) {
                return Err(StoreError::AlreadyExists {
                    kind: key.0,
                    namespace,
                    name,
                });
            }
            self.stamp(&mut value, true);
            objects.insert(key.clone(), value.clone());
        }
        self.record(MutationOp::Create, &key);
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let key = key_of::<K>(&namespace, &name);
        let mut value = serde_json::to_value(obj)?;
        {
            let mut objects = lock(&self.objects);
            let stored = objects.get(&key).ok_or_else(|| Self::not_found(&key))?;
            let stored_version = stored.pointer("/metadata/resourceVersion").cloned();
            if let Some(version) = value.pointer("/metadata/resourceVersion") {
                if Some(version) != stored_version.as_ref() {
                    return Err(StoreError::Conflict(format!("{}/{}", namespace, name)));
                }
            }
            // Status is owned by the status subresource
            let stored_status = stored.get("status").cloned();
            if let Some(obj) = value.as_object_mut() {
                match stored_status {
                    Some(status) => obj.insert("status".to_string(), status),
                    None => obj.remove("status"),
                };
            }
            self.stamp(&mut value, false);
            objects.insert(key.clone(), value.clone());
        }
        self.record(MutationOp::Update, &key);
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = key_of::<K>(namespace, name);
        {
            let mut objects = lock(&self.objects);
            let removed = objects.remove(&key).ok_or_else(|| Self::not_found(&key))?;
            if key.0 == "Pod" && self.respawn_pods.load(Ordering::SeqCst) {
                self.respawn_pod(&mut objects, removed, &key);
            }
        }
        self.record(MutationOp::Delete, &key);
        Ok(())
    }

    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let key = key_of::<K>(&namespace, &name);
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Api(format!(
                "status update of {}/{} rejected",
                namespace, name
            )));
        }
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);
        let value = {
            let mut objects = lock(&self.objects);
            let stored = objects.get_mut(&key).ok_or_else(|| Self::not_found(&key))?;
            if let Some(obj) = stored.as_object_mut() {
                obj.insert("status".to_string(), status);
            }
            let mut updated = stored.clone();
            self.stamp(&mut updated, false);
            *stored = updated.clone();
            updated
        };
        self.record(MutationOp::UpdateStatus, &key);
        Ok(serde_json::from_value(value)?)
    }

    async fn kind_installed<K: StoreObject>(&self) -> Result<bool, StoreError> {
        Ok(lock(&self.installed_kinds).contains(&*K::kind(&())))
    }

    async fn cluster_id(&self) -> Result<String, StoreError> {
        Ok(self.cluster_id.clone())
    }
}
