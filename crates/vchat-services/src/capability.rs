//! Capabilities the controllers depend on
//!
//! `GatewayClient` implements all three over HTTP. Tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use vchat_core::{ChatCompletion, ChatRequest, ModelCatalog, Result, SwitchAck};

/// Raw body chunks of a streamed completion, in delivery order
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Send a request and wait for the whole response body
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion>;

    /// Send a request and hand back the body as it arrives
    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream>;
}

#[async_trait]
pub trait StatusQuery: Send + Sync {
    async fn fetch_status(&self) -> Result<ModelCatalog>;
}

#[async_trait]
pub trait SwitchCommand: Send + Sync {
    /// Ask the backend to start loading a profile. Rejections come back as
    /// `VchatError::SwitchRejected` or an ack with `success: false`.
    async fn request_switch(&self, profile_id: &str) -> Result<SwitchAck>;
}

/// Supplies the bearer token attached to completion requests
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Reads the token from an environment variable on every request
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialSource for EnvCredentials {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Option<String>);

impl CredentialSource for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}
