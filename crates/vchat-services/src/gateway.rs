use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument};
use vchat_core::{
    ChatCompletion, ChatRequest, ErrorDetail, GatewayConfig, HardwareRecommendations,
    ModelCatalog, ProfilesResponse, ReloadResponse, Result, SwitchAck, SwitchRequest, VchatError,
};

use crate::{
    ChunkStream, CompletionTransport, CredentialSource, EnvCredentials, StatusQuery,
    SwitchCommand,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const BODY_EXCERPT: usize = 500;

/// HTTP client for the chat gateway
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    api_base: String,
    request_timeout: Duration,
    credentials: Arc<dyn CredentialSource>,
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| VchatError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base(),
            request_timeout: config.request_timeout(),
            credentials: Arc::new(EnvCredentials::new(&config.auth_token_env)),
        })
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;
        read_json(ensure_success(response).await?).await
    }

    /// Profiles known to the gateway, without status
    #[instrument(skip(self))]
    pub async fn profiles(&self) -> Result<ProfilesResponse> {
        self.get_json("/models/profiles").await
    }

    /// Profiles graded against the gateway's hardware
    #[instrument(skip(self))]
    pub async fn hardware_recommendations(&self) -> Result<HardwareRecommendations> {
        let recs: HardwareRecommendations = self.get_json("/models/hardware-recommendations").await?;
        debug!(
            recommended = recs.recommended_profiles.len(),
            incompatible = recs.incompatible_profiles.len(),
            "Fetched hardware recommendations"
        );
        Ok(recs)
    }

    /// Ask the gateway to re-read its profile definitions
    #[instrument(skip(self))]
    pub async fn reload_profiles(&self) -> Result<ReloadResponse> {
        let url = self.url("/models/reload");
        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        let reload: ReloadResponse = read_json(ensure_success(response).await?).await?;
        info!(profiles = reload.profiles.len(), "Reloaded model profiles");
        Ok(reload)
    }
}

#[async_trait]
impl CompletionTransport for GatewayClient {
    #[instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        let url = self.url("/chat");
        debug!("Sending completion request");

        let response = self
            .authorize(self.client.post(&url))
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        read_json(ensure_success(response).await?).await
    }

    #[instrument(skip(self, request), fields(model = %request.model, messages = request.messages.len()))]
    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let url = self.url("/chat");
        debug!("Opening completion stream");

        // No total timeout here: a long reply may legitimately stream for minutes.
        let response = self
            .authorize(self.client.post(&url))
            .json(request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        let response = ensure_success(response).await?;
        Ok(response
            .bytes_stream()
            .map_err(|e| VchatError::Transport(e.to_string()))
            .boxed())
    }
}

#[async_trait]
impl StatusQuery for GatewayClient {
    #[instrument(skip(self))]
    async fn fetch_status(&self) -> Result<ModelCatalog> {
        let catalog: ModelCatalog = self.get_json("/models/status").await?;
        debug!(
            status = catalog.status.as_str(),
            current = ?catalog.current_profile,
            profiles = catalog.profiles.len(),
            "Fetched model status"
        );
        Ok(catalog)
    }
}

#[async_trait]
impl SwitchCommand for GatewayClient {
    #[instrument(skip(self))]
    async fn request_switch(&self, profile_id: &str) -> Result<SwitchAck> {
        let url = self.url("/models/switch");
        let body = SwitchRequest {
            profile_id: profile_id.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorDetail>(&text)
                .ok()
                .and_then(|d| d.message())
                .unwrap_or_else(|| format!("switch request failed with status {}", status));
            error!(%status, %message, "Switch rejected");
            return Err(VchatError::SwitchRejected(message));
        }

        let ack: SwitchAck = read_json(response).await?;
        info!(message = %ack.message, switching_to = ?ack.switching_to, "Switch accepted");
        Ok(ack)
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    error!(%status, "Gateway returned an error status");
    Err(VchatError::Http {
        status: status.as_u16(),
        body: excerpt(&body),
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response
        .text()
        .await
        .map_err(|e| VchatError::Transport(e.to_string()))?;

    serde_json::from_str(&body).map_err(|e| {
        VchatError::Protocol(format!("{} - body: {}", e, excerpt(&body)))
    })
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT).collect()
}

/// Map reqwest errors, calling out an unreachable gateway
fn map_reqwest_error(e: reqwest::Error, url: &str) -> VchatError {
    if e.is_connect() {
        error!(url, "Connection refused - is the gateway running?");
        return VchatError::Transport(format!("connection refused: {}", url));
    }

    if e.is_timeout() {
        error!(url, "Request timed out");
        return VchatError::Transport(format!("request timed out: {}", url));
    }

    error!("HTTP error: {}", e);
    VchatError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::consume_stream;
    use crate::StaticCredentials;
    use tokio_util::sync::CancellationToken;
    use vchat_core::{GenerationConfig, ModelStatus, Role, WireMessage};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GatewayClient {
        let config = GatewayConfig {
            base_url: server.uri(),
            ..Default::default()
        };
        GatewayClient::new(&config)
            .unwrap()
            .with_credentials(Arc::new(StaticCredentials::default()))
    }

    fn hello_request(stream: bool) -> ChatRequest {
        let params = GenerationConfig {
            stream,
            ..Default::default()
        };
        ChatRequest::new(
            vec![WireMessage {
                role: Role::User,
                content: "Hello".into(),
            }],
            "microsoft/Phi-3-mini-4k-instruct",
            &params,
        )
    }

    #[tokio::test]
    async fn complete_posts_chat_body_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "microsoft/Phi-3-mini-4k-instruct",
                "stream": false,
                "messages": [{"role": "user", "content": "Hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "Hi there"}}],
                "usage": {"total_tokens": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server)
            .with_credentials(Arc::new(StaticCredentials(Some("secret".into()))));
        let completion = client.complete(&hello_request(false)).await.unwrap();

        assert_eq!(completion.text().unwrap(), "Hi there");
        assert_eq!(completion.total_tokens(), Some(5));
    }

    #[tokio::test]
    async fn error_status_becomes_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(502).set_body_string("vLLM unavailable"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&hello_request(false))
            .await
            .unwrap_err();

        match err {
            VchatError::Http { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "vLLM unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_body_is_a_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(&hello_request(false))
            .await
            .unwrap_err();
        assert!(matches!(err, VchatError::Protocol(_)));
    }

    #[tokio::test]
    async fn stream_body_feeds_the_consumer() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/plain"))
            .mount(&server)
            .await;

        let chunks = client_for(&server)
            .open_stream(&hello_request(true))
            .await
            .unwrap();

        let mut text = String::new();
        consume_stream(chunks, &CancellationToken::new(), |d| text.push_str(d))
            .await
            .unwrap();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn fetch_status_parses_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/models/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "current_profile": "phi3-mini",
                "status": "switching",
                "available_profiles": {
                    "phi3-mini": {"name": "Phi-3", "model_id": "microsoft/Phi-3-mini-4k-instruct", "description": ""}
                },
                "message": "loading"
            })))
            .mount(&server)
            .await;

        let catalog = client_for(&server).fetch_status().await.unwrap();
        assert_eq!(catalog.status, ModelStatus::Switching);
        assert_eq!(
            catalog.resolve_model_id("phi3-mini"),
            Some("microsoft/Phi-3-mini-4k-instruct")
        );
    }

    #[tokio::test]
    async fn switch_rejection_carries_backend_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/models/switch"))
            .and(body_partial_json(serde_json::json!({"profile_id": "ghost"})))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"detail": "profile 'ghost' not found"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).request_switch("ghost").await.unwrap_err();
        match err {
            VchatError::SwitchRejected(message) => assert_eq!(message, "profile 'ghost' not found"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn switch_ack_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/models/switch"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "message": "switching to Phi-3",
                "current_profile": "qwen",
                "switching_to": "phi3-mini"
            })))
            .mount(&server)
            .await;

        let ack = client_for(&server).request_switch("phi3-mini").await.unwrap();
        assert!(ack.success);
        assert_eq!(ack.switching_to.as_deref(), Some("phi3-mini"));
    }

    #[tokio::test]
    async fn profiles_and_reload() {
        let server = MockServer::start().await;
        let profiles = serde_json::json!({
            "qwen": {"name": "Qwen 2.5 7B", "model_id": "Qwen/Qwen2.5-7B-Instruct", "max_model_len": 8192}
        });
        Mock::given(method("GET"))
            .and(path("/api/models/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "profiles": profiles,
                "current_profile": "qwen"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/models/reload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "message": "Reloaded 1 profiles",
                "profiles": profiles
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let listing = client.profiles().await.unwrap();
        assert_eq!(listing.current_profile.as_deref(), Some("qwen"));
        assert_eq!(listing.profiles["qwen"].max_model_len, 8192);
        assert_eq!(listing.profiles["qwen"].tensor_parallel_size, 1);

        let reload = client.reload_profiles().await.unwrap();
        assert!(reload.success);
        assert_eq!(reload.profiles.len(), 1);
    }

    #[tokio::test]
    async fn hardware_recommendations_split_by_fit() {
        let server = MockServer::start().await;
        let qwen = serde_json::json!({
            "profile_id": "qwen",
            "name": "Qwen 2.5 7B",
            "compatibility": {"compatible": true, "message": "Hardware compatible"}
        });
        let phi = serde_json::json!({
            "profile_id": "phi3-mini",
            "name": "Phi-3 Mini",
            "description": null,
            "compatibility": {"compatible": true, "message": "Hardware compatible"}
        });
        Mock::given(method("GET"))
            .and(path("/api/models/hardware-recommendations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "current_hardware": {"gpu_count": 1, "total_vram_gb": 24.0, "available_vram_gb": 20.0},
                "recommended_profiles": [qwen.clone()],
                "compatible_profiles": [qwen, phi],
                "incompatible_profiles": [{
                    "profile_id": "llama-70b",
                    "name": "Llama 3 70B",
                    "description": "Needs two GPUs",
                    "compatibility": {"compatible": false, "message": "Requires 2 GPUs, found 1"}
                }]
            })))
            .mount(&server)
            .await;

        let recs = client_for(&server).hardware_recommendations().await.unwrap();

        assert_eq!(recs.current_hardware.unwrap().gpu_count, 1);
        assert_eq!(recs.recommended_profiles.len(), 1);
        assert_eq!(recs.recommended_profiles[0].profile_id, "qwen");
        assert_eq!(recs.compatible_profiles.len(), 2);
        assert!(recs.compatible_profiles[1].description.is_none());
        let refused = &recs.incompatible_profiles[0];
        assert!(!refused.compatibility.compatible);
        assert_eq!(refused.description.as_deref(), Some("Needs two GPUs"));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        let config = GatewayConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..Default::default()
        };
        let client = GatewayClient::new(&config).unwrap();
        let err = client.fetch_status().await.unwrap_err();
        assert!(matches!(err, VchatError::Transport(_)));
    }
}
