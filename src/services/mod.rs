mod annotations;
mod middleware;
mod reconciler;
mod routes;
mod store;

pub use annotations::ingress_annotations;
pub use middleware::{Middleware, MiddlewareAction, MiddlewareManager, MiddlewareSpec};
pub use reconciler::IngressReconcilerService;
pub use routes::{build_app_path, ingress_path};
pub use store::{KubeStore, ResourceStore, StoreError};

use crate::common::ResourceKey;

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error("service carries no `{0}` selector, cannot derive an application name")]
    MissingAppName(String),
    #[error("ingress {0} carries no resource version")]
    MissingResourceVersion(ResourceKey),
    #[error("gave up after {0} conflicting writes")]
    WriteRetriesExhausted(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}
