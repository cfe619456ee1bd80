//! Kubernetes-backed object store

use super::{object_key, ObjectStore, StoreError, StoreObject};
use crate::constants::FIELD_MANAGER;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::{Client, Resource};
use tracing::debug;

/// [`ObjectStore`] on top of a kube [`Client`]
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        }
    }
}

fn map_error<K: StoreObject>(error: kube::Error, namespace: &str, name: &str) -> StoreError {
    match error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind: K::kind(&()).to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => {
            StoreError::Conflict(format!("{}/{}: {}", namespace, name, response.message))
        }
        other => StoreError::Api(other.to_string()),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error::<K>(e, namespace, name))
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| map_error::<K>(e, namespace, ""))?;
        Ok(list.items)
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        debug!("Creating {} {}/{}", K::kind(&()), namespace, name);
        self.api::<K>(&namespace)
            .create(&Self::post_params(), obj)
            .await
            .map_err(|e| map_error::<K>(e, &namespace, &name))
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        debug!("Replacing {} {}/{}", K::kind(&()), namespace, name);
        self.api::<K>(&namespace)
            .replace(&name, &Self::post_params(), obj)
            .await
            .map_err(|e| map_error::<K>(e, &namespace, &name))
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        debug!("Deleting {} {}/{}", K::kind(&()), namespace, name);
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_error::<K>(e, namespace, name))
    }

    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(obj)?;
        let value = serde_json::to_value(obj)?;
        // Server-side apply drops status fields this manager no longer sets
        let patch = serde_json::json!({
            "apiVersion": K::api_version(&()),
            "kind": K::kind(&()),
            "status": value.get("status").cloned().unwrap_or(serde_json::Value::Null),
        });
        self.api::<K>(&namespace)
            .patch_status(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&patch),
            )
            .await
            .map_err(|e| map_error::<K>(e, &namespace, &name))
    }

    async fn kind_installed<K: StoreObject>(&self) -> Result<bool, StoreError> {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        match kube::discovery::pinned_kind(&self.client, &gvk).await {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!("{}/{} {} is not served: {}", gvk.group, gvk.version, gvk.kind, e);
                Ok(false)
            }
        }
    }

    async fn cluster_id(&self) -> Result<String, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = api
            .get("kube-system")
            .await
            .map_err(|e| StoreError::Api(format!("failed to read kube-system namespace: {e}")))?;
        namespace
            .metadata
            .uid
            .ok_or(StoreError::MissingMetadata("uid"))
    }
}
