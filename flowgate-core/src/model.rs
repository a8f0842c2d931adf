use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// One flow-execution call: the flow to run plus the ordered conversation so far.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunRequest {
    pub flow: String,
    pub messages: Vec<ChatMessage>,
}

/// Non-streaming completion result.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunCompletion {
    pub flow: String,
    pub text: String,
    pub finish_reason: String,
    pub provider: String,
    pub created_at_ms: i64,
    pub latency_ms: u32,
}
