//! Service container
//!
//! Builds the gateway client once and wires every controller to it. The
//! catalog store is shared, so a switch in progress is visible to model
//! resolution in all chat sessions.

use std::sync::Arc;

use vchat_core::{ClientConfig, Result};

use crate::{CatalogStore, ChatSession, GatewayClient, ModelSwitcher, SelectionBinding};

pub struct Services {
    pub config: ClientConfig,
    pub gateway: Arc<GatewayClient>,
    pub catalog: CatalogStore,
    pub switcher: ModelSwitcher,
    pub binding: SelectionBinding,
}

impl Services {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let gateway = Arc::new(GatewayClient::new(&config.gateway)?);
        Ok(Self::with_gateway(config, gateway))
    }

    pub fn with_gateway(config: ClientConfig, gateway: Arc<GatewayClient>) -> Self {
        let catalog = CatalogStore::new();
        let switcher = ModelSwitcher::new(
            gateway.clone(),
            gateway.clone(),
            catalog.clone(),
            config.switch.clone(),
        );
        let binding = SelectionBinding::new(gateway.clone(), catalog.clone());

        Self {
            config,
            gateway,
            catalog,
            switcher,
            binding,
        }
    }

    /// New session using the configured generation parameters
    pub fn chat_session(&self) -> ChatSession {
        ChatSession::new(
            self.gateway.clone(),
            self.binding.clone(),
            self.config.generation.clone(),
        )
    }
}
