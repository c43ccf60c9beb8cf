use std::sync::Arc;

use futures::FutureExt;
use kube::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;
use typed_builder::TypedBuilder;

pub mod common;
mod controllers;
mod services;
mod state;

use common::IngressFlavor;
use controllers::ServiceWatcher;
use services::{IngressReconcilerService, KubeStore};
use state::State;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, TypedBuilder)]
pub struct Configuration {
    /// Name of the shared ingress maintained in each namespace.
    pub ingress_name: String,
    pub ingress_flavor: IngressFlavor,
    /// Fold the namespace into every route path.
    pub namespaced_path: bool,
    /// Pre-existing basic-auth credential secret; presence turns on the auth
    /// middleware/annotations.
    pub credential_ref: Option<String>,
    /// Label whose presence opts a service into route registration.
    pub marker_label: String,
    /// Selector key the application name is discovered from.
    pub app_name_selector: String,
    /// Restrict watching to one namespace; `None` watches everywhere.
    pub watch_namespace: Option<String>,
}

#[derive(Error, Debug)]
enum ConfigurationError {
    #[error("ingress name must be not empty")]
    IngressName,
    #[error("marker label must be not empty")]
    MarkerLabel,
    #[error("application name selector must be not empty")]
    AppNameSelector,
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.ingress_name.is_empty() {
            return Err(ConfigurationError::IngressName.into());
        }
        if self.marker_label.is_empty() {
            return Err(ConfigurationError::MarkerLabel.into());
        }
        if self.app_name_selector.is_empty() {
            return Err(ConfigurationError::AppNameSelector.into());
        }
        Ok(())
    }
}

pub async fn start(configuration: Configuration) -> Result<()> {
    info!("Ingress registrar started");
    let state = State::new();
    let client = Client::try_default().await?;

    let (service_event_sender, service_event_receiver) = mpsc::channel(1024);

    let watcher = ServiceWatcher::builder()
        .client(client.clone())
        .marker_label(configuration.marker_label.clone())
        .watch_namespace(configuration.watch_namespace.clone())
        .sender(service_event_sender)
        .build();

    let reconciler = IngressReconcilerService::builder()
        .store(Arc::new(KubeStore::new(client)))
        .state(state)
        .ingress_name(configuration.ingress_name.clone())
        .ingress_flavor(configuration.ingress_flavor)
        .namespaced_path(configuration.namespaced_path)
        .credential_ref(configuration.credential_ref.clone())
        .app_name_selector(configuration.app_name_selector.clone())
        .receiver(service_event_receiver)
        .build();

    let services = vec![watcher.start().boxed(), reconciler.start().boxed()];

    tokio::select! {
        _ = futures::future::join_all(services) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }
    info!("Ingress registrar stopped");
    Ok(())
}
