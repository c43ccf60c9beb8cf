use std::fmt::Display;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use super::create_id;

pub const DEFAULT_NAMESPACE_NAME: &str = "default";

/// Identifies one namespaced resource. Also used as the serialization key for
/// ingress writes.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn namespaced(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
        }
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", create_id(&self.name, &self.namespace))
    }
}

impl From<&Service> for ResourceKey {
    fn from(service: &Service) -> Self {
        let namespace = service.namespace().unwrap_or(DEFAULT_NAMESPACE_NAME.to_owned());
        let value = &service.metadata;
        let name = match (value.name.as_ref(), value.generate_name.as_ref()) {
            (None, None) => "",
            (Some(name), _) | (None, Some(name)) => name,
        };
        Self {
            namespace,
            name: name.to_owned(),
        }
    }
}
