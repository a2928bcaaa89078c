//! Shared model catalog snapshot
//!
//! Readers always see a whole snapshot. Writers replace it; nothing is
//! merged in place.

use std::sync::Arc;

use tokio::sync::watch;
use vchat_core::{ModelCatalog, ModelStatus};

#[derive(Clone)]
pub struct CatalogStore {
    tx: Arc<watch::Sender<Option<Arc<ModelCatalog>>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    pub fn with_snapshot(catalog: ModelCatalog) -> Self {
        let store = Self::new();
        store.replace(catalog);
        store
    }

    pub fn current(&self) -> Option<Arc<ModelCatalog>> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ModelCatalog>>> {
        self.tx.subscribe()
    }

    /// Publish a freshly fetched catalog as-is
    pub fn replace(&self, catalog: ModelCatalog) -> Arc<ModelCatalog> {
        let snapshot = Arc::new(catalog);
        self.tx.send_replace(Some(snapshot.clone()));
        snapshot
    }

    /// Publish the status fields of a poll, keeping the known profiles
    pub fn publish_status(&self, poll: ModelCatalog) -> Arc<ModelCatalog> {
        let next = match self.current() {
            Some(prev) if !prev.profiles.is_empty() => prev.with_status_of(poll),
            _ => poll,
        };
        self.replace(next)
    }

    /// Optimistic status change while waiting for the backend to confirm it
    pub fn mark(&self, status: ModelStatus, message: Option<String>) -> Arc<ModelCatalog> {
        let next = match self.current() {
            Some(prev) => prev.with_status(status, message),
            None => ModelCatalog {
                status,
                message,
                ..Default::default()
            },
        };
        self.replace(next)
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}
