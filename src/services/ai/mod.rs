pub mod groq;
pub mod local;
pub mod nlu;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, system_prompt: &str, messages: &[Message]) -> anyhow::Result<String>;
}

/// System prompt followed by the conversation, in the chat-completions shape.
fn chat_messages(system_prompt: &str, messages: &[Message]) -> Vec<Value> {
    let mut out = vec![json!({
        "role": "system",
        "content": system_prompt,
    })];
    for msg in messages {
        out.push(json!({
            "role": msg.role,
            "content": msg.content,
        }));
    }
    out
}
