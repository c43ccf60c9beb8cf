use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{HTTPIngressPath, Ingress};
use kube::{
    api::{DeleteParams, Patch, PatchParams, PostParams},
    Api, Client,
};
use thiserror::Error;

use super::middleware::Middleware;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    #[error("resource already exists")]
    AlreadyExists,
    #[error("write conflicted with another writer")]
    Conflict,
    #[error("store request failed: {0}")]
    Api(#[source] kube::Error),
}

impl From<kube::Error> for StoreError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ref response) if response.code == 404 => StoreError::NotFound,
            kube::Error::Api(ref response) if response.code == 409 && response.reason == "AlreadyExists" => {
                StoreError::AlreadyExists
            }
            kube::Error::Api(ref response) if response.code == 409 => StoreError::Conflict,
            other => StoreError::Api(other),
        }
    }
}

/// Get/Create/Patch/Delete surface the reconciler runs against. The patch is
/// conditioned on the resource version read during fetch; a raced write
/// surfaces as [`StoreError::Conflict`].
#[async_trait]
pub trait ResourceStore {
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Ingress, StoreError>;

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), StoreError>;

    async fn patch_ingress_routes(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        paths: Vec<HTTPIngressPath>,
    ) -> Result<(), StoreError>;

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    async fn create_middleware(&self, namespace: &str, middleware: &Middleware) -> Result<(), StoreError>;

    async fn delete_middleware(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Production store backed by the cluster API.
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn middlewares(&self, namespace: &str) -> Api<Middleware> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Ingress, StoreError> {
        self.ingresses(namespace).get(name).await.map_err(StoreError::from)
    }

    async fn create_ingress(&self, namespace: &str, ingress: &Ingress) -> Result<(), StoreError> {
        self.ingresses(namespace).create(&PostParams::default(), ingress).await?;
        Ok(())
    }

    async fn patch_ingress_routes(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        paths: Vec<HTTPIngressPath>,
    ) -> Result<(), StoreError> {
        // Carrying the fetched resourceVersion makes the apiserver reject the
        // merge with 409 if another writer got in between.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "spec": { "rules": [ { "http": { "paths": paths } } ] },
        });
        self.ingresses(namespace)
            .patch(name, &PatchParams::default().validation_strict(), &Patch::Strategic(patch))
            .await?;
        Ok(())
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.ingresses(namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn create_middleware(&self, namespace: &str, middleware: &Middleware) -> Result<(), StoreError> {
        self.middlewares(namespace).create(&PostParams::default(), middleware).await?;
        Ok(())
    }

    async fn delete_middleware(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.middlewares(namespace).delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
