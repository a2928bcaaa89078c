//! Gateway request and response bodies
//!
//! Response shapes are deliberately lenient: every field is optional so a
//! shape mismatch surfaces as missing data instead of a parse failure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Compatibility, GenerationConfig, HardwareInfo, Message, ModelProfile, Role, VchatError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<WireMessage>, model: impl Into<String>, params: &GenerationConfig) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: params.stream,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub message: Option<CompletionMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Atomic (non-streamed) completion body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// Generated text of the first choice. A body without one is malformed.
    pub fn text(&self) -> Result<&str, VchatError> {
        let message = self
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .ok_or_else(|| VchatError::Protocol("completion has no choices".into()))?;
        Ok(message.content.as_deref().unwrap_or_default())
    }

    pub fn total_tokens(&self) -> Option<u32> {
        self.usage.as_ref().and_then(|u| u.total_tokens)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Option<StreamDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One `data:` event of a streamed completion
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamFragment {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl StreamFragment {
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.as_deref())
    }

    pub fn total_tokens(&self) -> Option<u32> {
        self.usage.as_ref().and_then(|u| u.total_tokens)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchRequest {
    pub profile_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchAck {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub current_profile: Option<String>,
    #[serde(default)]
    pub switching_to: Option<String>,
}

/// Error body returned with a non-success status
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ErrorDetail {
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfilesResponse {
    #[serde(default)]
    pub profiles: BTreeMap<String, ModelProfile>,
    #[serde(default)]
    pub current_profile: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReloadResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, ModelProfile>,
}

/// One profile as graded by the gateway against its own hardware
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileFit {
    pub profile_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub compatibility: Compatibility,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HardwareRecommendations {
    #[serde(default)]
    pub current_hardware: Option<HardwareInfo>,
    /// Subset of `compatible_profiles` that also fits the recommended VRAM
    #[serde(default)]
    pub recommended_profiles: Vec<ProfileFit>,
    #[serde(default)]
    pub compatible_profiles: Vec<ProfileFit>,
    #[serde(default)]
    pub incompatible_profiles: Vec<ProfileFit>,
}
