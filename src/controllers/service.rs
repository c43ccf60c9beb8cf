use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::{
    runtime::watcher::{watcher, Config, Event},
    Api, Client,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::common::{ServiceEvent, ServiceRecord};

/// Edge-triggered event source: watches services carrying the marker label
/// and forwards Add/Delete notifications to the reconciler. Label filtering
/// happens server-side; at-least-once delivery, no cross-resource ordering.
#[derive(TypedBuilder)]
pub struct ServiceWatcher {
    client: Client,
    marker_label: String,
    watch_namespace: Option<String>,
    sender: mpsc::Sender<ServiceEvent>,
}

impl ServiceWatcher {
    pub async fn start(self) -> crate::Result<()> {
        let api: Api<Service> = match &self.watch_namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        // A bare key in the selector matches label presence, value ignored.
        let stream = watcher(api, Config::default().labels(&self.marker_label));
        futures::pin_mut!(stream);

        info!("service watcher started, marker label `{}`", self.marker_label);
        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Apply(service) | Event::InitApply(service)) => {
                    let record = ServiceRecord::from(&service);
                    debug!("service watcher: {}.{} applied", record.namespace, record.name);
                    if self.sender.send(ServiceEvent::Added(record)).await.is_err() {
                        break;
                    }
                }
                Ok(Event::Delete(service)) => {
                    let record = ServiceRecord::from(&service);
                    info!("service watcher: {}.{} deleted", record.namespace, record.name);
                    if self.sender.send(ServiceEvent::Deleted(record)).await.is_err() {
                        break;
                    }
                }
                Ok(Event::Init | Event::InitDone) => {}
                Err(e) => {
                    warn!("service watcher: watch error {e:?}, stream will resume");
                }
            }
        }
        info!("service watcher stopped");
        Ok(())
    }
}
