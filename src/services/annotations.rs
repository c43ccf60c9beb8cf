use std::collections::BTreeMap;

use itertools::Itertools;

use crate::common::{
    IngressFlavor, AUTH_MIDDLEWARE_NAME, MIDDLEWARE_REGISTRY_SUFFIX, STRIP_MIDDLEWARE_NAME,
};

const NGINX_REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";
const NGINX_USE_REGEX: &str = "nginx.ingress.kubernetes.io/use-regex";
const NGINX_AUTH_TYPE: &str = "nginx.ingress.kubernetes.io/auth-type";
const NGINX_AUTH_SECRET: &str = "nginx.ingress.kubernetes.io/auth-secret";
const NGINX_AUTH_REALM: &str = "nginx.ingress.kubernetes.io/auth-realm";

const TRAEFIK_MIDDLEWARES: &str = "traefik.ingress.kubernetes.io/router.middlewares";
const TRAEFIK_ENTRYPOINTS: &str = "traefik.ingress.kubernetes.io/router.entrypoints";
const TRAEFIK_PATH_MATCHER: &str = "traefik.ingress.kubernetes.io/router.pathmatcher";

/// Annotation set the shared ingress is created with. Deterministic for a
/// given input; the credential reference toggles the basic-auth wiring.
pub fn ingress_annotations(
    flavor: IngressFlavor,
    namespace: &str,
    credential_ref: Option<&str>,
) -> BTreeMap<String, String> {
    match flavor {
        IngressFlavor::Nginx => {
            let mut annotations = BTreeMap::from([
                (NGINX_REWRITE_TARGET.to_owned(), "/$2".to_owned()),
                (NGINX_USE_REGEX.to_owned(), "true".to_owned()),
            ]);
            if let Some(secret) = credential_ref {
                annotations.insert(NGINX_AUTH_TYPE.to_owned(), "basic".to_owned());
                annotations.insert(NGINX_AUTH_SECRET.to_owned(), secret.to_owned());
                annotations.insert(NGINX_AUTH_REALM.to_owned(), "Authentication Required".to_owned());
            }
            annotations
        }
        IngressFlavor::Traefik => {
            // Auth must run before strip, so its token comes first.
            let middleware_names = if credential_ref.is_some() {
                vec![AUTH_MIDDLEWARE_NAME, STRIP_MIDDLEWARE_NAME]
            } else {
                vec![STRIP_MIDDLEWARE_NAME]
            };
            let middleware_value = middleware_names
                .into_iter()
                .map(|name| format!("{namespace}-{name}@{MIDDLEWARE_REGISTRY_SUFFIX}"))
                .join(",\n");

            BTreeMap::from([
                (TRAEFIK_MIDDLEWARES.to_owned(), middleware_value),
                (TRAEFIK_ENTRYPOINTS.to_owned(), "web".to_owned()),
                (TRAEFIK_PATH_MATCHER.to_owned(), "PathRegexp".to_owned()),
            ])
        }
    }
}
