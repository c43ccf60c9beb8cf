use std::sync::Arc;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::store::{ResourceStore, StoreError};
use crate::common::{AUTH_MIDDLEWARE_NAME, STRIP_MIDDLEWARE_NAME};

/// Strip regex matching the first path segment, which is what the route path
/// builder prefixes routes with.
const STRIP_PREFIX_REGEX: &str = "^/[^/]+(/|$)";

/// Traefik request-transformation resource. Only the two sections this
/// controller manages are modelled.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(group = "traefik.io", version = "v1alpha1", kind = "Middleware", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefix_regex: Option<StripPrefixRegex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct StripPrefixRegex {
    pub regex: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct BasicAuth {
    pub secret: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MiddlewareAction {
    Create,
    Delete,
}

/// Creates and deletes the per-namespace transformation middlewares alongside
/// the shared ingress.
pub struct MiddlewareManager<S> {
    store: Arc<S>,
}

impl<S> MiddlewareManager<S>
where
    S: ResourceStore + Send + Sync,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn apply(
        &self,
        namespace: &str,
        action: MiddlewareAction,
        credential_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        match action {
            MiddlewareAction::Create => {
                self.create(namespace, &strip_middleware(namespace)).await;
                if let Some(secret) = credential_ref {
                    self.create(namespace, &auth_middleware(namespace, secret)).await;
                }
                Ok(())
            }
            MiddlewareAction::Delete => {
                self.delete(namespace, STRIP_MIDDLEWARE_NAME).await?;
                if credential_ref.is_some() {
                    self.delete(namespace, AUTH_MIDDLEWARE_NAME).await?;
                }
                info!("middleware: deleted transformation middlewares in {namespace}");
                Ok(())
            }
        }
    }

    // One middleware failing to create must not stop its sibling; partial
    // success is left standing, not rolled back.
    async fn create(&self, namespace: &str, middleware: &Middleware) {
        let name = middleware.metadata.name.as_deref().unwrap_or_default();
        match self.store.create_middleware(namespace, middleware).await {
            Ok(()) => info!("middleware: created {namespace}.{name}"),
            Err(StoreError::AlreadyExists) => debug!("middleware: {namespace}.{name} already exists"),
            Err(e) => warn!("middleware: creating {namespace}.{name} failed {e:?}"),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self.store.delete_middleware(namespace, name).await {
            Ok(()) => Ok(()),
            // Deletion is idempotent.
            Err(StoreError::NotFound) => {
                debug!("middleware: {namespace}.{name} already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn middleware(namespace: &str, name: &str, spec: MiddlewareSpec) -> Middleware {
    let mut middleware = Middleware::new(name, spec);
    middleware.metadata.namespace = Some(namespace.to_owned());
    middleware
}

fn strip_middleware(namespace: &str) -> Middleware {
    middleware(
        namespace,
        STRIP_MIDDLEWARE_NAME,
        MiddlewareSpec {
            strip_prefix_regex: Some(StripPrefixRegex {
                regex: vec![STRIP_PREFIX_REGEX.to_owned()],
            }),
            basic_auth: None,
        },
    )
}

fn auth_middleware(namespace: &str, secret: &str) -> Middleware {
    middleware(
        namespace,
        AUTH_MIDDLEWARE_NAME,
        MiddlewareSpec {
            strip_prefix_regex: None,
            basic_auth: Some(BasicAuth { secret: secret.to_owned() }),
        },
    )
}
