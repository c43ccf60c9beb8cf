use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, IngressBackend, IngressServiceBackend, ServiceBackendPort,
};

use crate::common::BACKEND_PORT;

/// Prefix-match suffix consumed by both flavors' regex engines. Must stay
/// bit-exact.
const PATH_SUFFIX: &str = "(/|$)(.*)";

/// Canonical path pattern for one application. With `namespaced` the
/// namespace is folded into the prefix so identically-named applications in
/// different namespaces do not collide.
pub fn build_app_path(namespaced: bool, namespace: &str, app_name: &str) -> String {
    if namespaced {
        format!("/{namespace}/{app_name}{PATH_SUFFIX}")
    } else {
        format!("/{app_name}{PATH_SUFFIX}")
    }
}

/// The single route a tagged service contributes to the shared ingress.
pub fn ingress_path(path: &str, backend_service_name: &str) -> HTTPIngressPath {
    HTTPIngressPath {
        path: Some(path.to_owned()),
        path_type: "ImplementationSpecific".to_owned(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: backend_service_name.to_owned(),
                port: Some(ServiceBackendPort {
                    number: Some(BACKEND_PORT),
                    name: None,
                }),
            }),
            resource: None,
        },
    }
}

#[cfg(test)]
mod test {
    use super::{build_app_path, ingress_path};
    use crate::common::BACKEND_PORT;

    #[test]
    fn plain_path() {
        assert_eq!(build_app_path(false, "default", "app1"), "/app1(/|$)(.*)");
    }

    #[test]
    fn namespaced_path() {
        assert_eq!(build_app_path(true, "default", "app1"), "/default/app1(/|$)(.*)");
    }

    #[test]
    fn path_targets_fixed_backend_port() {
        let path = ingress_path("/app1(/|$)(.*)", "app1-ui-svc");
        assert_eq!(path.path.as_deref(), Some("/app1(/|$)(.*)"));
        assert_eq!(path.path_type, "ImplementationSpecific");
        let backend = path.backend.service.expect("service backend");
        assert_eq!(backend.name, "app1-ui-svc");
        assert_eq!(backend.port.and_then(|p| p.number), Some(BACKEND_PORT));
    }
}
