use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;

use crate::common::ResourceKey;

/// Shared controller state: one async mutex per ingress key. Every
/// fetch-then-write against a given ingress runs under that key's lock so two
/// in-flight events cannot silently drop each other's route.
#[derive(Clone, Default)]
pub struct State {
    ingress_locks: Arc<Mutex<HashMap<ResourceKey, Arc<Mutex<()>>>>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ingress_lock(&self, key: &ResourceKey) -> Arc<Mutex<()>> {
        let mut locks = self.ingress_locks.lock().await;
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

#[cfg(test)]
mod test {
    use super::State;
    use crate::common::ResourceKey;

    #[tokio::test]
    async fn same_key_shares_one_lock() {
        let state = State::new();
        let a = state.ingress_lock(&ResourceKey::namespaced("ing", "ns1")).await;
        let b = state.ingress_lock(&ResourceKey::namespaced("ing", "ns1")).await;
        let c = state.ingress_lock(&ResourceKey::namespaced("ing", "ns2")).await;
        assert!(std::sync::Arc::ptr_eq(&a, &b));
        assert!(!std::sync::Arc::ptr_eq(&a, &c));
    }
}
