// Domain modules
pub mod catalog;
pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod switch;
pub mod wire;

pub use catalog::{
    Compatibility, GpuInfo, HardwareInfo, HardwareRequirements, ModelCatalog, ModelProfile,
    ModelStatus,
};
pub use config::{ClientConfig, GatewayConfig, GenerationConfig, SwitchConfig};
pub use error::{Result, VchatError};
pub use message::{Message, Role};
pub use session::SessionState;
pub use switch::SwitchOutcome;
pub use wire::{
    ChatCompletion, ChatRequest, ErrorDetail, HardwareRecommendations, ProfileFit,
    ProfilesResponse, ReloadResponse, StreamFragment, SwitchAck, SwitchRequest, Usage,
    WireMessage,
};
