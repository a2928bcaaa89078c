mod capability;
mod catalog_store;
mod chat;
mod gateway;
mod selection;
mod services;
pub mod stream;
mod switcher;

#[cfg(test)]
mod testing;

pub use capability::{
    ChunkStream, CompletionTransport, CredentialSource, EnvCredentials, StaticCredentials,
    StatusQuery, SwitchCommand,
};
pub use catalog_store::CatalogStore;
pub use chat::{ChatSession, SendOutcome};
pub use gateway::GatewayClient;
pub use selection::SelectionBinding;
pub use services::Services;
pub use stream::{consume_stream, DeltaConsumer, SseDecoder, StreamEnd, StreamSummary};
pub use switcher::ModelSwitcher;

// Re-export core types so callers only need this crate
pub use vchat_core::{
    ClientConfig, HardwareInfo, Message, ModelCatalog, ModelProfile, ModelStatus, Role,
    SessionState, SwitchOutcome, VchatError,
};
