use std::{collections::BTreeMap, str::FromStr};

use k8s_openapi::api::core::v1::Service;
use thiserror::Error;
use typed_builder::TypedBuilder;

mod resource_key;

pub use resource_key::{ResourceKey, DEFAULT_NAMESPACE_NAME};

/// Port every registered route points at.
pub const BACKEND_PORT: i32 = 4040;

pub const STRIP_MIDDLEWARE_NAME: &str = "url-strip";
pub const AUTH_MIDDLEWARE_NAME: &str = "url-auth";
pub const MIDDLEWARE_REGISTRY_SUFFIX: &str = "kubernetescrd";

/// Ingress implementation family the controller writes annotations for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngressFlavor {
    Nginx,
    Traefik,
}

impl IngressFlavor {
    /// Traefik routes through Middleware resources; nginx does everything
    /// with annotations alone.
    pub fn requires_middleware(self) -> bool {
        matches!(self, IngressFlavor::Traefik)
    }

    pub fn ingress_class_name(self) -> Option<String> {
        match self {
            IngressFlavor::Nginx => Some("nginx".to_owned()),
            IngressFlavor::Traefik => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported ingress flavor: {0}")]
pub struct UnsupportedFlavor(pub String);

impl FromStr for IngressFlavor {
    type Err = UnsupportedFlavor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nginx" => Ok(IngressFlavor::Nginx),
            "traefik" => Ok(IngressFlavor::Traefik),
            other => Err(UnsupportedFlavor(other.to_owned())),
        }
    }
}

/// Everything the reconciler needs from a Service, captured at the watcher
/// boundary. Never stored beyond the handling of one event.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ServiceRecord {
    pub name: String,
    pub namespace: String,
    #[builder(default)]
    pub selector: BTreeMap<String, String>,
}

impl ServiceRecord {
    /// Application name discovered from the service selector.
    pub fn app_name(&self, selector_key: &str) -> Option<&str> {
        self.selector.get(selector_key).map(String::as_str)
    }
}

impl From<&Service> for ServiceRecord {
    fn from(service: &Service) -> Self {
        let key = ResourceKey::from(service);
        let selector = service.spec.as_ref().and_then(|spec| spec.selector.clone()).unwrap_or_default();
        Self {
            name: key.name,
            namespace: key.namespace,
            selector,
        }
    }
}

/// Edge-triggered notification handed from the service watcher to the
/// reconciler.
#[derive(Clone, Debug)]
pub enum ServiceEvent {
    Added(ServiceRecord),
    Deleted(ServiceRecord),
}

pub fn create_id(name: &str, namespace: &str) -> String {
    namespace.to_owned() + "." + name
}
