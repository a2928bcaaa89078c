use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The author of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One transcript entry
///
/// The id is only guaranteed to be unique. Ordering comes from the entry's
/// position in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
    #[serde(default)]
    pub model_ref: Option<String>,
    #[serde(default)]
    pub token_count: Option<u32>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, model_ref: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created_at: now_millis(),
            model_ref,
            token_count: None,
        }
    }

    pub fn user(content: impl Into<String>, model_ref: Option<String>) -> Self {
        Self::new(Role::User, content, model_ref)
    }

    /// Empty assistant entry that a pending reply is written into
    pub fn placeholder(model_ref: Option<String>) -> Self {
        Self::new(Role::Assistant, String::new(), model_ref)
    }

    pub fn append(&mut self, delta: &str) {
        self.content.push_str(delta);
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
