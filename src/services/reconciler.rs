use std::sync::Arc;

use k8s_openapi::{
    api::networking::v1::{HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressRule, IngressSpec},
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use super::{
    annotations::ingress_annotations,
    middleware::{MiddlewareAction, MiddlewareManager},
    routes::{build_app_path, ingress_path},
    store::{ResourceStore, StoreError},
    ReconcilerError,
};
use crate::{
    common::{IngressFlavor, ResourceKey, ServiceEvent, ServiceRecord},
    state::State,
};

/// Bound on fetch-patch attempts when writes keep conflicting with another
/// writer.
const MAX_WRITE_ATTEMPTS: usize = 3;

/// State-transition engine for the shared ingress. Consumes service events
/// and applies create-or-patch / patch-or-delete transitions; all writes for
/// one ingress run under its per-key lock and carry the fetched resource
/// version.
#[derive(TypedBuilder)]
pub struct IngressReconcilerService<S> {
    store: Arc<S>,
    state: State,
    ingress_name: String,
    ingress_flavor: IngressFlavor,
    namespaced_path: bool,
    credential_ref: Option<String>,
    app_name_selector: String,
    receiver: mpsc::Receiver<ServiceEvent>,
}

impl<S> IngressReconcilerService<S>
where
    S: ResourceStore + Send + Sync,
{
    pub async fn start(mut self) -> crate::Result<()> {
        while let Some(event) = self.receiver.recv().await {
            // Errors end the event, never the service; there is no retry
            // beyond the conflict bound.
            match event {
                ServiceEvent::Added(record) => {
                    if let Err(e) = self.handle_add(&record).await {
                        warn!("handle_add: {}.{} failed {e}", record.namespace, record.name);
                    }
                }
                ServiceEvent::Deleted(record) => {
                    if let Err(e) = self.handle_delete(&record).await {
                        warn!("handle_delete: {}.{} failed {e}", record.namespace, record.name);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_add(&self, record: &ServiceRecord) -> Result<(), ReconcilerError> {
        let app_name = record
            .app_name(&self.app_name_selector)
            .ok_or_else(|| ReconcilerError::MissingAppName(self.app_name_selector.clone()))?;
        let path = build_app_path(self.namespaced_path, &record.namespace, app_name);
        let key = self.ingress_key(record);
        info!("handle_add: {key} registering route {path} for service {}", record.name);

        let lock = self.state.ingress_lock(&key).await;
        let _guard = lock.lock().await;

        for _attempt in 0..MAX_WRITE_ATTEMPTS {
            match self.store.get_ingress(&key.namespace, &key.name).await {
                Err(StoreError::NotFound) => match self.create_ingress(&key, &path, &record.name).await {
                    // Lost a create race; re-fetch and append instead.
                    Err(StoreError::AlreadyExists) => continue,
                    other => return other.map_err(ReconcilerError::from),
                },
                Ok(existing) => {
                    let mut paths = route_paths(&existing);
                    if paths.iter().any(|p| p.path.as_deref() == Some(path.as_str())) {
                        info!("handle_add: {key} route {path} already registered, nothing to do");
                        return Ok(());
                    }
                    paths.push(ingress_path(&path, &record.name));
                    let resource_version = resource_version(&key, &existing)?;
                    match self.patch_routes(&key, &resource_version, paths).await {
                        Err(StoreError::Conflict) => continue,
                        other => return other.map_err(ReconcilerError::from),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcilerError::WriteRetriesExhausted(MAX_WRITE_ATTEMPTS))
    }

    pub(crate) async fn handle_delete(&self, record: &ServiceRecord) -> Result<(), ReconcilerError> {
        let app_name = record
            .app_name(&self.app_name_selector)
            .ok_or_else(|| ReconcilerError::MissingAppName(self.app_name_selector.clone()))?;
        let path = build_app_path(self.namespaced_path, &record.namespace, app_name);
        let key = self.ingress_key(record);
        info!("handle_delete: {key} removing route {path}");

        let lock = self.state.ingress_lock(&key).await;
        let _guard = lock.lock().await;

        for _attempt in 0..MAX_WRITE_ATTEMPTS {
            let existing = match self.store.get_ingress(&key.namespace, &key.name).await {
                Ok(existing) => existing,
                // Already converged.
                Err(StoreError::NotFound) => {
                    debug!("handle_delete: {key} ingress already absent");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let paths = route_paths(&existing);
            let remaining: Vec<HTTPIngressPath> =
                paths.iter().filter(|p| p.path.as_deref() != Some(path.as_str())).cloned().collect();
            if remaining.len() == paths.len() {
                debug!("handle_delete: {key} route {path} not registered, nothing to do");
                return Ok(());
            }

            if remaining.is_empty() {
                return self.teardown_ingress(&key).await;
            }

            let resource_version = resource_version(&key, &existing)?;
            match self.patch_routes(&key, &resource_version, remaining).await {
                Err(StoreError::Conflict) => continue,
                other => return other.map_err(ReconcilerError::from),
            }
        }
        Err(ReconcilerError::WriteRetriesExhausted(MAX_WRITE_ATTEMPTS))
    }

    async fn create_ingress(&self, key: &ResourceKey, path: &str, backend_service: &str) -> Result<(), StoreError> {
        // The middleware-requiring flavor gets its transformation resources
        // before the ingress that references them.
        if self.ingress_flavor.requires_middleware() {
            self.middleware_manager()
                .apply(&key.namespace, MiddlewareAction::Create, self.credential_ref.as_deref())
                .await?;
        }
        let annotations = ingress_annotations(self.ingress_flavor, &key.namespace, self.credential_ref.as_deref());
        let ingress = Ingress {
            metadata: ObjectMeta {
                name: Some(key.name.clone()),
                namespace: Some(key.namespace.clone()),
                annotations: Some(annotations),
                ..ObjectMeta::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: self.ingress_flavor.ingress_class_name(),
                rules: Some(vec![IngressRule {
                    host: None,
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![ingress_path(path, backend_service)],
                    }),
                }]),
                ..IngressSpec::default()
            }),
            status: None,
        };
        self.store.create_ingress(&key.namespace, &ingress).await?;
        info!("handle_add: {key} created ingress with route {path}");
        Ok(())
    }

    async fn patch_routes(&self, key: &ResourceKey, resource_version: &str, paths: Vec<HTTPIngressPath>) -> Result<(), StoreError> {
        self.store.patch_ingress_routes(&key.namespace, &key.name, resource_version, paths).await?;
        info!("{key} patched ingress routes");
        Ok(())
    }

    async fn teardown_ingress(&self, key: &ResourceKey) -> Result<(), ReconcilerError> {
        match self.store.delete_ingress(&key.namespace, &key.name).await {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
        info!("handle_delete: {key} deleted ingress, no routes left");
        if self.ingress_flavor.requires_middleware() {
            self.middleware_manager()
                .apply(&key.namespace, MiddlewareAction::Delete, self.credential_ref.as_deref())
                .await?;
        }
        Ok(())
    }

    fn middleware_manager(&self) -> MiddlewareManager<S> {
        MiddlewareManager::new(Arc::clone(&self.store))
    }

    fn ingress_key(&self, record: &ServiceRecord) -> ResourceKey {
        ResourceKey::namespaced(&self.ingress_name, &record.namespace)
    }
}

fn resource_version(key: &ResourceKey, ingress: &Ingress) -> Result<String, ReconcilerError> {
    ingress
        .metadata
        .resource_version
        .clone()
        .ok_or_else(|| ReconcilerError::MissingResourceVersion(key.clone()))
}

/// All route paths currently on the ingress, across every rule. Lookup is
/// always by path pattern, never by position.
fn route_paths(ingress: &Ingress) -> Vec<HTTPIngressPath> {
    ingress
        .spec
        .iter()
        .flat_map(|spec| spec.rules.iter().flatten())
        .flat_map(|rule| rule.http.iter())
        .flat_map(|http| http.paths.iter().cloned())
        .collect()
}

#[cfg(test)]
mod test {
    use std::{collections::BTreeMap, sync::Arc};

    use tokio::sync::mpsc;

    use super::{route_paths, IngressReconcilerService};
    use crate::{
        common::{IngressFlavor, ServiceRecord},
        services::store::memory::MemoryStore,
        state::State,
    };

    const INGRESS_NAME: &str = "shared-ui-ingress";

    fn reconciler(
        store: &Arc<MemoryStore>,
        flavor: IngressFlavor,
        credential_ref: Option<&str>,
    ) -> IngressReconcilerService<MemoryStore> {
        let (_sender, receiver) = mpsc::channel(8);
        IngressReconcilerService::builder()
            .store(Arc::clone(store))
            .state(State::new())
            .ingress_name(INGRESS_NAME.to_owned())
            .ingress_flavor(flavor)
            .namespaced_path(false)
            .credential_ref(credential_ref.map(str::to_owned))
            .app_name_selector("app-name".to_owned())
            .receiver(receiver)
            .build()
    }

    fn record(service_name: &str, app_name: &str) -> ServiceRecord {
        ServiceRecord::builder()
            .name(service_name.to_owned())
            .namespace("jobs".to_owned())
            .selector(BTreeMap::from([("app-name".to_owned(), app_name.to_owned())]))
            .build()
    }

    fn stored_paths(store: &MemoryStore) -> Vec<String> {
        let ingress = store.ingress("jobs", INGRESS_NAME).expect("ingress present");
        route_paths(&ingress).into_iter().filter_map(|p| p.path).collect()
    }

    #[tokio::test]
    async fn first_add_creates_ingress_with_single_route() {
        let store = Arc::new(MemoryStore::new());
        let service = reconciler(&store, IngressFlavor::Nginx, None);
        service.handle_add(&record("app1-svc", "app1")).await.expect("add");

        let ingress = store.ingress("jobs", INGRESS_NAME).expect("ingress created");
        assert_eq!(stored_paths(&store), vec!["/app1(/|$)(.*)".to_owned()]);
        assert_eq!(
            ingress.spec.as_ref().and_then(|s| s.ingress_class_name.clone()),
            Some("nginx".to_owned())
        );
        let annotations = ingress.metadata.annotations.expect("annotations");
        assert_eq!(annotations["nginx.ingress.kubernetes.io/use-regex"], "true");
        // Nginx never engages the middleware manager.
        assert!(store.middleware_names("jobs").is_empty());
    }

    #[tokio::test]
    async fn traefik_add_creates_middlewares_once() {
        let store = Arc::new(MemoryStore::new());
        let service = reconciler(&store, IngressFlavor::Traefik, Some("ui-users"));
        service.handle_add(&record("app1-svc", "app1")).await.expect("first add");
        service.handle_add(&record("app2-svc", "app2")).await.expect("second add");

        let ingress = store.ingress("jobs", INGRESS_NAME).expect("ingress created");
        assert_eq!(ingress.spec.as_ref().and_then(|s| s.ingress_class_name.clone()), None);
        assert_eq!(store.middleware_names("jobs"), vec!["url-auth".to_owned(), "url-strip".to_owned()]);
    }

    #[tokio::test]
    async fn second_add_appends_route() {
        let store = Arc::new(MemoryStore::new());
        let service = reconciler(&store, IngressFlavor::Nginx, None);
        service.handle_add(&record("app1-svc", "app1")).await.expect("first add");
        service.handle_add(&record("app2-svc", "app2")).await.expect("second add");

        let paths = stored_paths(&store);
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&"/app1(/|$)(.*)".to_owned()));
        assert!(paths.contains(&"/app2(/|$)(.*)".to_owned()));
    }

    #[tokio::test]
    async fn duplicate_add_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let service = reconciler(&store, IngressFlavor::Nginx, None);
        service.handle_add(&record("app1-svc", "app1")).await.expect("first add");
        service.handle_add(&record("app1-svc", "app1")).await.expect("repeated add");

        assert_eq!(stored_paths(&store).len(), 1);
    }

    #[tokio::test]
    async fn delete_restores_previous_route_set() {
        let store = Arc::new(MemoryStore::new());
        let service = reconciler(&store, IngressFlavor::Nginx, None);
        service.handle_add(&record("app1-svc", "app1")).await.expect("first add");
        service.handle_add(&record("app2-svc", "app2")).await.expect("second add");
        service.handle_delete(&record("app2-svc", "app2")).await.expect("delete");

        assert_eq!(stored_paths(&store), vec!["/app1(/|$)(.*)".to_owned()]);
    }

    #[tokio::test]
    async fn last_delete_tears_down_ingress_and_middlewares() {
        let store = Arc::new(MemoryStore::new());
        let service = reconciler(&store, IngressFlavor::Traefik, Some("ui-users"));
        service.handle_add(&record("app1-svc", "app1")).await.expect("add");
        service.handle_delete(&record("app1-svc", "app1")).await.expect("delete");

        assert!(store.ingress("jobs", INGRESS_NAME).is_none());
        assert!(store.middleware_names("jobs").is_empty());
    }

    #[tokio::test]
    async fn delete_without_ingress_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let service = reconciler(&store, IngressFlavor::Nginx, None);
        service.handle_delete(&record("app1-svc", "app1")).await.expect("delete of nothing");
        assert!(store.ingress("jobs", INGRESS_NAME).is_none());
    }

    #[tokio::test]
    async fn conflicting_write_is_retried() {
        let store = Arc::new(MemoryStore::new());
        let service = reconciler(&store, IngressFlavor::Nginx, None);
        service.handle_add(&record("app1-svc", "app1")).await.expect("first add");

        store.inject_conflicts(1);
        service.handle_add(&record("app2-svc", "app2")).await.expect("add retried past conflict");
        assert_eq!(stored_paths(&store).len(), 2);
    }

    #[tokio::test]
    async fn concurrent_adds_both_survive() {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(reconciler(&store, IngressFlavor::Nginx, None));

        let first = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.handle_add(&record("app1-svc", "app1")).await })
        };
        let second = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.handle_add(&record("app2-svc", "app2")).await })
        };
        first.await.expect("task").expect("first add");
        second.await.expect("task").expect("second add");

        let paths = stored_paths(&store);
        assert!(paths.contains(&"/app1(/|$)(.*)".to_owned()));
        assert!(paths.contains(&"/app2(/|$)(.*)".to_owned()));
    }

    #[tokio::test]
    async fn namespaced_paths_fold_in_namespace() {
        let store = Arc::new(MemoryStore::new());
        let (_sender, receiver) = mpsc::channel(8);
        let service = IngressReconcilerService::builder()
            .store(Arc::clone(&store))
            .state(State::new())
            .ingress_name(INGRESS_NAME.to_owned())
            .ingress_flavor(IngressFlavor::Nginx)
            .namespaced_path(true)
            .credential_ref(None)
            .app_name_selector("app-name".to_owned())
            .receiver(receiver)
            .build();
        service.handle_add(&record("app1-svc", "app1")).await.expect("add");
        assert_eq!(stored_paths(&store), vec!["/jobs/app1(/|$)(.*)".to_owned()]);
    }
}
