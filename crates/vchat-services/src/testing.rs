//! In-memory capabilities for controller tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use vchat_core::{
    ChatCompletion, ChatRequest, ModelCatalog, ModelProfile, ModelStatus, Result, SwitchAck,
    VchatError,
};

use crate::{ChunkStream, CompletionTransport, StatusQuery, SwitchCommand};

pub fn profile(profile_id: &str) -> ModelProfile {
    serde_json::from_value(serde_json::json!({
        "name": profile_id,
        "model_id": format!("org/{profile_id}"),
    }))
    .unwrap()
}

/// Catalog serving `current` with profiles for `current`, "qwen" and "phi3-mini"
pub fn catalog(current: &str, status: ModelStatus) -> ModelCatalog {
    let mut catalog = ModelCatalog {
        current_profile: Some(current.to_string()),
        status,
        ..Default::default()
    };
    for id in [current, "qwen", "phi3-mini"] {
        catalog.profiles.insert(id.to_string(), profile(id));
    }
    catalog
}

pub fn sse_event(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": text}}]})
    )
}

/// Status responses served in order; the last one repeats
pub struct ScriptedStatus {
    responses: Mutex<VecDeque<Option<ModelCatalog>>>,
    calls: AtomicU32,
}

impl ScriptedStatus {
    pub fn sequence(responses: Vec<Option<ModelCatalog>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn repeating(catalog: ModelCatalog) -> Self {
        Self::sequence(vec![Some(catalog)])
    }

    pub fn failing() -> Self {
        Self::sequence(vec![None])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusQuery for ScriptedStatus {
    async fn fetch_status(&self) -> Result<ModelCatalog> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.pop_front().flatten()
            } else {
                responses.front().cloned().flatten()
            }
        };
        next.ok_or_else(|| VchatError::Transport("connection refused".into()))
    }
}

pub enum SwitchReply {
    Accept,
    AlreadyRunning,
    Refuse(&'static str),
    Error(&'static str),
}

pub struct ScriptedSwitch {
    reply: SwitchReply,
    calls: AtomicU32,
}

impl ScriptedSwitch {
    pub fn new(reply: SwitchReply) -> Self {
        Self {
            reply,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwitchCommand for ScriptedSwitch {
    async fn request_switch(&self, profile_id: &str) -> Result<SwitchAck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ack = |success: bool, message: &str, switching_to: Option<&str>| SwitchAck {
            success,
            message: message.to_string(),
            current_profile: Some("qwen".to_string()),
            switching_to: switching_to.map(str::to_string),
        };
        match &self.reply {
            SwitchReply::Accept => Ok(ack(true, "switch started", Some(profile_id))),
            SwitchReply::AlreadyRunning => Ok(SwitchAck {
                current_profile: Some(profile_id.to_string()),
                ..ack(true, "already running", None)
            }),
            SwitchReply::Refuse(message) => Ok(ack(false, message, None)),
            SwitchReply::Error(message) => Err(VchatError::SwitchRejected(message.to_string())),
        }
    }
}

/// What the fake transport does for one request
pub enum Reply {
    Text(&'static str, Option<u32>),
    /// Reply text after a delay, in virtual time under `start_paused`
    Delayed(Duration, &'static str),
    NoChoices,
    Status(u16),
    /// Never responds
    Hang,
    Chunks(Vec<String>),
    ChunksThenHang(Vec<String>),
    ChunksThenError(Vec<String>),
}

pub struct FakeTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self, request: &ChatRequest) -> Reply {
        self.requests.lock().unwrap().push(request.clone());
        self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Hang)
    }
}

fn completion(text: &str, tokens: Option<u32>) -> ChatCompletion {
    serde_json::from_value(serde_json::json!({
        "choices": [{"message": {"content": text}}],
        "usage": {"total_tokens": tokens},
    }))
    .unwrap()
}

fn chunk_stream(chunks: Vec<String>) -> impl futures::Stream<Item = Result<Bytes>> + Send + 'static {
    stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
}

#[async_trait]
impl CompletionTransport for FakeTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        match self.next_reply(request) {
            Reply::Text(text, tokens) => Ok(completion(text, tokens)),
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(completion(text, None))
            }
            Reply::NoChoices => Ok(ChatCompletion::default()),
            Reply::Status(status) => Err(VchatError::Http {
                status,
                body: "upstream failure".into(),
            }),
            _ => futures::future::pending().await,
        }
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        match self.next_reply(request) {
            Reply::Chunks(chunks) => Ok(chunk_stream(chunks).boxed()),
            Reply::ChunksThenHang(chunks) => {
                Ok(chunk_stream(chunks).chain(stream::pending()).boxed())
            }
            Reply::ChunksThenError(chunks) => Ok(chunk_stream(chunks)
                .chain(stream::once(async {
                    Err(VchatError::Transport("connection reset".into()))
                }))
                .boxed()),
            Reply::Status(status) => Err(VchatError::Http {
                status,
                body: "upstream failure".into(),
            }),
            _ => futures::future::pending().await,
        }
    }
}
