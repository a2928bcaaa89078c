//! Maps a user-facing profile id to the backend model identifier

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use vchat_core::{Result, VchatError};

use crate::{CatalogStore, StatusQuery};

/// Resolves profile ids once per send against a fresh status query
///
/// When the status query fails the last published catalog snapshot is used
/// instead. With neither available the profile is unresolved.
#[derive(Clone)]
pub struct SelectionBinding {
    status: Arc<dyn StatusQuery>,
    catalog: CatalogStore,
}

impl SelectionBinding {
    pub fn new(status: Arc<dyn StatusQuery>, catalog: CatalogStore) -> Self {
        Self { status, catalog }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, profile_id: &str) -> Result<String> {
        let model_id = match self.status.fetch_status().await {
            Ok(fresh) => fresh.resolve_model_id(profile_id).map(str::to_string),
            Err(e) => {
                warn!(error = %e, "Status query failed, falling back to cached catalog");
                let cached = self.catalog.current().ok_or_else(|| {
                    VchatError::ModelUnresolved(format!("model catalog unavailable: {}", e))
                })?;
                cached.resolve_model_id(profile_id).map(str::to_string)
            }
        };

        let model_id = model_id.ok_or_else(|| {
            VchatError::ModelUnresolved(format!("unknown profile '{}'", profile_id))
        })?;

        debug!(%model_id, "Resolved profile");
        Ok(model_id)
    }
}
